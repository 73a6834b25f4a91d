//! Condition codec
//!
//! Conditions travel through the store as opaque bytes. The store never
//! inspects them; evaluation happens elsewhere.

use super::policy::Conditions;
use crate::error::Result;

/// Serialize and deserialize a policy's conditions
pub trait ConditionCodec: Send + Sync {
    fn encode(&self, conditions: &Conditions) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Conditions>;
}

/// JSON object encoding; empty conditions become `{}`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConditionCodec;

impl ConditionCodec for JsonConditionCodec {
    fn encode(&self, conditions: &Conditions) -> Result<Vec<u8>> {
        if conditions.is_empty() {
            return Ok(b"{}".to_vec());
        }
        Ok(serde_json::to_vec(conditions)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Conditions> {
        if bytes.is_empty() {
            return Ok(Conditions::new());
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}
