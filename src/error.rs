//! Error types for policy storage operations

use rusqlite::ErrorCode;
use thiserror::Error;

/// Policy store result type
pub type Result<T> = std::result::Result<T, PolicyStoreError>;

/// Policy store errors
#[derive(Error, Debug)]
pub enum PolicyStoreError {
    /// Keyed lookup produced no policy
    #[error("Not found: {0}")]
    NotFound(String),

    /// Template has unbalanced delimiters or an invalid pattern fragment
    #[error("Could not compile template '{template}': {reason}")]
    Compile { template: String, reason: String },

    /// Begin, commit or rollback failed
    #[error("Transaction failed during {operation}: {source}")]
    Transaction {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Duplicate key or dangling reference
    #[error("Constraint violated during {operation} on {table}: {source}")]
    ConstraintViolation {
        operation: &'static str,
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Statement cancelled through the database handle
    #[error("Interrupted during {operation}")]
    Interrupted { operation: &'static str },

    /// Any other driver error
    #[error("Storage error during {operation} on {table}: {source}")]
    Storage {
        operation: &'static str,
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Condition codec failure
    #[error("Condition encoding error: {0}")]
    Conditions(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PolicyStoreError {
    /// Classify a driver error raised while running `operation` against `table`
    pub(crate) fn from_sql(operation: &'static str, table: &str, err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => {
                PolicyStoreError::NotFound(format!("{} on {}", operation, table))
            }
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                ErrorCode::ConstraintViolation => PolicyStoreError::ConstraintViolation {
                    operation,
                    table: table.to_string(),
                    source: err,
                },
                ErrorCode::OperationInterrupted => PolicyStoreError::Interrupted { operation },
                _ => PolicyStoreError::Storage {
                    operation,
                    table: table.to_string(),
                    source: err,
                },
            },
            _ => PolicyStoreError::Storage {
                operation,
                table: table.to_string(),
                source: err,
            },
        }
    }

    /// Classify a driver error raised while opening or finishing a transaction
    pub(crate) fn from_tx(operation: &'static str, err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == ErrorCode::OperationInterrupted =>
            {
                PolicyStoreError::Interrupted { operation }
            }
            _ => PolicyStoreError::Transaction {
                operation,
                source: err,
            },
        }
    }

    /// Returns true for [`PolicyStoreError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, PolicyStoreError::NotFound(_))
    }
}

/// Shorthand for `map_err` on driver calls
pub(crate) fn sql_err<'a>(
    operation: &'static str,
    table: &'a str,
) -> impl FnOnce(rusqlite::Error) -> PolicyStoreError + 'a {
    move |err| PolicyStoreError::from_sql(operation, table, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: std::os::raw::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_constraint_is_classified() {
        let err = PolicyStoreError::from_sql(
            "create",
            "hydpol_p",
            failure(rusqlite::ffi::SQLITE_CONSTRAINT),
        );
        assert!(matches!(
            err,
            PolicyStoreError::ConstraintViolation { table, .. } if table == "hydpol_p"
        ));
    }

    #[test]
    fn test_interrupt_is_classified() {
        let err = PolicyStoreError::from_sql("get", "hydpol_p", failure(rusqlite::ffi::SQLITE_INTERRUPT));
        assert!(matches!(err, PolicyStoreError::Interrupted { operation: "get" }));

        let err = PolicyStoreError::from_tx("create", failure(rusqlite::ffi::SQLITE_INTERRUPT));
        assert!(matches!(err, PolicyStoreError::Interrupted { .. }));
    }

    #[test]
    fn test_no_rows_is_not_found() {
        let err = PolicyStoreError::from_sql("get", "hydpol_p", rusqlite::Error::QueryReturnedNoRows);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_other_errors_keep_context() {
        let err = PolicyStoreError::from_sql("get_all", "hydpol_r", failure(rusqlite::ffi::SQLITE_IOERR));
        let message = err.to_string();
        assert!(message.contains("get_all"));
        assert!(message.contains("hydpol_r"));
    }
}
