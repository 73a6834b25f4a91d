//! Shared SQLite handle
//!
//! A [`Database`] is cloned into every manager that needs storage. All clones
//! share one connection; callers serialize on its lock. Opening a handle:
//! - enables foreign keys (link rows cascade with their policy)
//! - sets the busy timeout
//! - registers `regexp_like(value, pattern)` backed by a [`PatternCache`]

use super::cache::PatternCache;
use crate::config::StoreConfig;
use crate::error::{PolicyStoreError, Result};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Name of the SQL matcher function
pub const REGEXP_FUNCTION: &str = "regexp_like";

/// Cloneable handle to a SQLite connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    patterns: Arc<Mutex<PatternCache>>,
}

impl Database {
    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        info!("Opening policy database at {:?}", path.as_ref());
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| PolicyStoreError::from_sql("open", "database", e))?;
        Self::from_connection(conn, config)
    }

    /// Open a private in-memory database
    pub fn open_in_memory(config: &StoreConfig) -> Result<Self> {
        debug!("Opening in-memory policy database");
        let conn = Connection::open_in_memory()
            .map_err(|e| PolicyStoreError::from_sql("open", "database", e))?;
        Self::from_connection(conn, config)
    }

    /// Wrap an existing connection
    pub fn from_connection(conn: Connection, config: &StoreConfig) -> Result<Self> {
        config.validate()?;

        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| PolicyStoreError::from_sql("configure", "database", e))?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| PolicyStoreError::from_sql("configure", "database", e))?;

        let patterns = Arc::new(Mutex::new(PatternCache::new(config.pattern_cache_capacity)));
        register_regexp(&conn, Arc::clone(&patterns))?;

        let interrupt = Arc::new(conn.get_interrupt_handle());

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            patterns,
        })
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    /// Cancel the statement currently running on this handle
    ///
    /// Never waits for the connection lock. An interrupted write transaction
    /// is rolled back and the call fails with `Interrupted`.
    pub fn interrupt(&self) {
        debug!("Interrupting running statement");
        self.interrupt.interrupt();
    }

    /// Number of compiled matchers currently cached
    pub fn cached_patterns(&self) -> usize {
        self.patterns.lock().len()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

fn register_regexp(conn: &Connection, patterns: Arc<Mutex<PatternCache>>) -> Result<()> {
    let patterns = AssertUnwindSafe(patterns);
    conn.create_scalar_function(
        REGEXP_FUNCTION,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let value: String = ctx.get(0)?;
            let pattern: String = ctx.get(1)?;
            patterns
                .lock()
                .is_match(&pattern, &value)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))
        },
    )
    .map_err(|e| PolicyStoreError::from_sql("configure", REGEXP_FUNCTION, e))
}
