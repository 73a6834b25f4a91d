//! Shared setup for integration tests

#![allow(dead_code)]

use policy_store::{Database, SqlPolicyManager, StoreConfig, StoreConfigBuilder};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::Path;

/// `{prefix}_` followed by ten random letters
pub fn random_table_prefix(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .filter(|c| c.is_ascii_alphabetic())
        .take(10)
        .map(char::from)
        .collect();
    format!("{}_{}", prefix, suffix)
}

pub fn config() -> StoreConfig {
    StoreConfigBuilder::new()
        .table_prefix(random_table_prefix("pol"))
        .build()
        .unwrap()
}

/// In-memory manager with its schema created
pub fn memory_manager(config: StoreConfig) -> SqlPolicyManager {
    let db = Database::open_in_memory(&config).unwrap();
    let manager = SqlPolicyManager::new(db, config);
    manager.create_schemas().unwrap();
    manager
}

/// File-backed manager; the schema is left to the caller
pub fn file_manager(path: &Path, config: StoreConfig) -> SqlPolicyManager {
    let db = Database::open(path, &config).unwrap();
    SqlPolicyManager::new(db, config)
}
