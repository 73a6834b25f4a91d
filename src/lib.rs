//! # policy-store - Relational Storage for Access-Control Policies
//!
//! `policy-store` keeps authorization policies in a normalized SQLite schema
//! and answers "which policies could apply to this subject?" without loading
//! every policy:
//!
//! - **Shared templates**: each subject/action/resource template is stored once,
//!   keyed by the SHA-256 of its text, and linked to every policy using it
//! - **Precompiled matchers**: templates such as `<.+>@example.com` are compiled
//!   to anchored regular expressions on write
//! - **Candidate queries**: exact matches and pattern matches are merged in SQL
//! - **Atomic writes**: a policy and all its links commit together or not at all
//!
//! Deciding allow/deny from the candidates is left to the caller.
//!
//! ## Quick Start
//!
//! ```rust
//! use policy_store::{Database, Effect, Policy, PolicyManager, Request, SqlPolicyManager, StoreConfig};
//!
//! # fn main() -> policy_store::Result<()> {
//! let config = StoreConfig::default();
//! let manager = SqlPolicyManager::new(Database::open_in_memory(&config)?, config);
//! manager.create_schemas()?;
//!
//! manager.create(
//!     &Policy::new("alice-docs", Effect::Allow)
//!         .with_description("Alice may read her documents")
//!         .with_subjects(["alice"])
//!         .with_actions(["read"])
//!         .with_resources(["docs:alice:<.+>"]),
//! )?;
//!
//! let candidates = manager.find_request_candidates(&Request::new("alice", "read", "docs:alice:cv"))?;
//! assert_eq!(candidates[0].id, "alice-docs");
//!
//! manager.delete("alice-docs")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;

pub use crate::core::{cache, condition, database, fold, policy, schema, store, template};

pub use crate::config::{DuplicatePolicyId, StoreConfig, StoreConfigBuilder, TablePrefix};
pub use crate::core::{
    condition::{ConditionCodec, JsonConditionCodec},
    database::Database,
    policy::{Conditions, Effect, Policy, Request},
    schema::{Dimension, TableNames},
    store::{PolicyManager, SqlPolicyManager},
    template::{compile, template_id, CompiledTemplate, Delimiters},
};
pub use crate::error::{PolicyStoreError, Result};
