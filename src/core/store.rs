//! SQL policy manager
//!
//! Writes normalize each policy into the seven-table layout of
//! [`crate::schema`]; reads join the tables back and fold the rows.
//!
//! Read queries never cross-multiply dimensions. Each query is a `UNION ALL`
//! of one branch per dimension, so a policy with m subjects and n actions
//! produces m + n rows rather than m * n.

use super::condition::{ConditionCodec, JsonConditionCodec};
use super::database::{Database, REGEXP_FUNCTION};
use super::fold::{fold_rows, PolicyRow};
use super::policy::{Effect, Policy, Request};
use super::schema::{schema_statements, Dimension, TableNames, TABLE_COUNT};
use super::template::compile;
use crate::config::{DuplicatePolicyId, StoreConfig};
use crate::error::{sql_err, PolicyStoreError, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Params, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

/// Storage operations offered to the evaluation layer
pub trait PolicyManager: Send + Sync {
    /// Store a policy with its templates, atomically
    fn create(&self, policy: &Policy) -> Result<()>;

    /// Fetch one policy by ID
    fn get(&self, id: &str) -> Result<Policy>;

    /// Page through all policies, ordered by ID
    fn get_all(&self, limit: usize, offset: usize) -> Result<Vec<Policy>>;

    /// Remove a policy; absent IDs are not an error
    fn delete(&self, id: &str) -> Result<()>;

    /// Policies with a subject template matching the request's subject
    fn find_request_candidates(&self, request: &Request) -> Result<Vec<Policy>>;
}

/// [`PolicyManager`] backed by SQLite
pub struct SqlPolicyManager {
    db: Database,
    tables: TableNames,
    config: StoreConfig,
    codec: Box<dyn ConditionCodec>,
}

impl SqlPolicyManager {
    /// Create a manager over `db` with tables named from `config.table_prefix`
    ///
    /// # Examples
    ///
    /// ```
    /// use policy_store::{Database, Effect, Policy, PolicyManager, Request, SqlPolicyManager, StoreConfig};
    ///
    /// # fn main() -> policy_store::Result<()> {
    /// let config = StoreConfig::default();
    /// let db = Database::open_in_memory(&config)?;
    /// let manager = SqlPolicyManager::new(db, config);
    /// manager.create_schemas()?;
    ///
    /// manager.create(
    ///     &Policy::new("p1", Effect::Allow)
    ///         .with_subjects(["<.+>@example.com"])
    ///         .with_actions(["read"]),
    /// )?;
    ///
    /// let candidates = manager.find_request_candidates(&Request::for_subject("bob@example.com"))?;
    /// assert_eq!(candidates.len(), 1);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(db: Database, config: StoreConfig) -> Self {
        let tables = TableNames::new(&config.table_prefix);
        SqlPolicyManager {
            db,
            tables,
            config,
            codec: Box::new(JsonConditionCodec),
        }
    }

    /// Replace the condition codec
    pub fn with_codec(mut self, codec: Box<dyn ConditionCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Table names this manager reads and writes
    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Handle the manager was built with
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Create all seven tables and their indexes
    ///
    /// Not idempotent: running it against an existing schema fails and
    /// changes nothing. Returns the number of tables created.
    pub fn create_schemas(&self) -> Result<usize> {
        info!("Creating policy schema with prefix '{}'", self.config.table_prefix);
        let statements = schema_statements(&self.tables);

        self.db.with_conn(|conn| {
            in_transaction(conn, "create_schemas", |tx| {
                for statement in &statements {
                    tx.execute(statement, [])
                        .map_err(sql_err("create_schemas", &self.tables.policies))?;
                }
                Ok(TABLE_COUNT)
            })
        })
    }

    fn templates<'p>(policy: &'p Policy, dimension: Dimension) -> &'p [String] {
        match dimension {
            Dimension::Subject => &policy.subjects,
            Dimension::Action => &policy.actions,
            Dimension::Resource => &policy.resources,
        }
    }

    /// Insert the policy row; returns false when an existing row was kept
    fn insert_policy(&self, tx: &Transaction<'_>, policy: &Policy, conditions: &[u8]) -> Result<bool> {
        let verb = match self.config.on_duplicate_id {
            DuplicatePolicyId::Reject => "INSERT",
            DuplicatePolicyId::Ignore => "INSERT OR IGNORE",
        };
        let sql = format!(
            "{} INTO {} (ID, DESCRIPTION, EFFECT, CONDITIONS) VALUES (?1, ?2, ?3, ?4)",
            verb, self.tables.policies
        );

        let inserted = tx
            .execute(
                &sql,
                params![
                    policy.id,
                    policy.description,
                    policy.effect.as_str(),
                    conditions
                ],
            )
            .map_err(sql_err("create", &self.tables.policies))?;
        Ok(inserted > 0)
    }

    fn insert_templates(&self, tx: &Transaction<'_>, policy: &Policy) -> Result<()> {
        for dimension in Dimension::ALL {
            let table = self.tables.templates(dimension);
            let links = self.tables.links(dimension);
            let template_sql = format!(
                "INSERT OR IGNORE INTO {} (ID, TEMPLATE, COMPILED, HAS_REGEX) VALUES (?1, ?2, ?3, ?4)",
                table
            );
            let link_sql = format!(
                "INSERT OR IGNORE INTO {} (POLICY, {}) VALUES (?1, ?2)",
                links,
                dimension.link_column()
            );

            for template in Self::templates(policy, dimension) {
                let compiled = compile(template, policy.delimiters)?;

                tx.execute(
                    &template_sql,
                    params![compiled.id, compiled.raw, compiled.pattern, compiled.has_pattern],
                )
                .map_err(sql_err("create", table))?;

                tx.execute(&link_sql, params![policy.id, compiled.id])
                    .map_err(sql_err("create", links))?;
            }
        }
        Ok(())
    }

    /// Columns every read branch selects; exactly one template column is set
    fn branch(&self, dimension: Option<Dimension>, filter: &str) -> String {
        let column = |d: Dimension| {
            if dimension == Some(d) {
                "t.TEMPLATE"
            } else {
                "NULL"
            }
        };

        let select = format!(
            "SELECT p.ID, p.EFFECT, p.CONDITIONS, p.DESCRIPTION, {}, {}, {} FROM {} p",
            column(Dimension::Subject),
            column(Dimension::Action),
            column(Dimension::Resource),
            self.tables.policies
        );

        match dimension {
            None => format!("{} WHERE {}", select, filter),
            Some(d) => format!(
                "{} JOIN {} l ON l.POLICY = p.ID JOIN {} t ON t.ID = l.{} WHERE {}",
                select,
                self.tables.links(d),
                self.tables.templates(d),
                d.link_column(),
                filter
            ),
        }
    }

    /// Seed branch for the policy row plus one branch per dimension
    fn unrestricted_query(&self, filter: &str) -> String {
        let mut branches = vec![self.branch(None, filter)];
        branches.extend(Dimension::ALL.iter().map(|&d| self.branch(Some(d), filter)));
        format!("{} ORDER BY 1, 5, 6, 7", branches.join(" UNION ALL "))
    }

    /// Subject match: exact text for plain templates, regex for patterned ones
    fn subject_match(alias: &str) -> String {
        format!(
            "(({a}.HAS_REGEX = 0 AND {a}.TEMPLATE = ?1) OR ({a}.HAS_REGEX = 1 AND {f}(?1, {a}.COMPILED)))",
            a = alias,
            f = REGEXP_FUNCTION
        )
    }

    fn candidate_query(&self) -> String {
        let matched_policies = format!(
            "p.ID IN (SELECT ml.POLICY FROM {} ml JOIN {} mt ON mt.ID = ml.{} WHERE {})",
            self.tables.links(Dimension::Subject),
            self.tables.templates(Dimension::Subject),
            Dimension::Subject.link_column(),
            Self::subject_match("mt")
        );

        let branches = [
            self.branch(Some(Dimension::Subject), &Self::subject_match("t")),
            self.branch(Some(Dimension::Action), &matched_policies),
            self.branch(Some(Dimension::Resource), &matched_policies),
        ];
        format!("{} ORDER BY 1, 5, 6, 7", branches.join(" UNION ALL "))
    }

    fn query_policies<P: Params>(
        &self,
        conn: &Connection,
        operation: &'static str,
        sql: &str,
        params: P,
    ) -> Result<Vec<Policy>> {
        let table = self.tables.policies.as_str();
        let mut stmt = conn.prepare_cached(sql).map_err(sql_err(operation, table))?;

        let raw = stmt
            .query_map(params, |row| {
                let effect: String = row.get(1)?;
                let effect = effect.parse::<Effect>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into())
                })?;
                let conditions: Option<Vec<u8>> = row.get(2)?;
                let policy_row = PolicyRow {
                    id: row.get(0)?,
                    effect,
                    description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    subject: row.get(4)?,
                    action: row.get(5)?,
                    resource: row.get(6)?,
                    ..Default::default()
                };
                Ok((policy_row, conditions.unwrap_or_default()))
            })
            .map_err(sql_err(operation, table))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err(operation, table))?;

        let mut rows = Vec::with_capacity(raw.len());
        for (mut row, conditions) in raw {
            row.conditions = self.codec.decode(&conditions)?;
            rows.push(row);
        }

        Ok(fold_rows(rows))
    }

    fn count_policies(&self, conn: &Connection) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.tables.policies);
        let count: i64 = conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(sql_err("get_all", &self.tables.policies))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

impl PolicyManager for SqlPolicyManager {
    fn create(&self, policy: &Policy) -> Result<()> {
        debug!("Creating policy '{}'", policy.id);
        if policy.id.is_empty() {
            warn!("Creating policy with an empty ID");
        }

        let conditions = self.codec.encode(&policy.conditions)?;

        self.db.with_conn(|conn| {
            in_transaction(conn, "create", |tx| {
                if !self.insert_policy(tx, policy, &conditions)? {
                    debug!("Policy '{}' already exists, leaving it unchanged", policy.id);
                    return Ok(());
                }
                self.insert_templates(tx, policy)
            })
        })
    }

    fn get(&self, id: &str) -> Result<Policy> {
        debug!("Getting policy '{}'", id);
        let sql = self.unrestricted_query("p.ID = ?1");

        let policies = self
            .db
            .with_conn(|conn| self.query_policies(conn, "get", &sql, [id]))?;

        policies
            .into_iter()
            .next()
            .ok_or_else(|| PolicyStoreError::NotFound(format!("policy '{}'", id)))
    }

    fn get_all(&self, limit: usize, offset: usize) -> Result<Vec<Policy>> {
        debug!("Listing policies (limit {}, offset {})", limit, offset);
        let sql = self.unrestricted_query(&format!(
            "p.ID IN (SELECT ID FROM {} ORDER BY ID LIMIT ?1 OFFSET ?2)",
            self.tables.policies
        ));

        self.db.with_conn(|conn| {
            let (mut limit, mut offset) = (limit, offset);
            if self.config.legacy_pagination_reset {
                let total = self.count_policies(conn)?;
                if offset.saturating_add(limit) > total {
                    debug!("Page overruns {} policies, returning all of them", total);
                    limit = total;
                    offset = 0;
                }
            }

            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let offset = i64::try_from(offset).unwrap_or(i64::MAX);
            self.query_policies(conn, "get_all", &sql, params![limit, offset])
        })
    }

    fn delete(&self, id: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE ID = ?1", self.tables.policies);
        let removed = self.db.with_conn(|conn| {
            conn.execute(&sql, [id])
                .map_err(sql_err("delete", &self.tables.policies))
        })?;
        debug!("Deleted policy '{}' ({} rows)", id, removed);
        Ok(())
    }

    fn find_request_candidates(&self, request: &Request) -> Result<Vec<Policy>> {
        debug!("Finding candidate policies for subject '{}'", request.subject);
        let sql = self.candidate_query();

        self.db.with_conn(|conn| {
            self.query_policies(conn, "find_request_candidates", &sql, [request.subject.as_str()])
        })
    }
}

/// Run `f` inside an immediate transaction
///
/// Commits on success. On failure the transaction is rolled back explicitly
/// so a failed rollback surfaces instead of being dropped.
fn in_transaction<T>(
    conn: &mut Connection,
    operation: &'static str,
    f: impl FnOnce(&Transaction<'_>) -> Result<T>,
) -> Result<T> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| PolicyStoreError::from_tx(operation, e))?;

    match f(&tx) {
        Ok(value) => {
            tx.commit()
                .map_err(|e| PolicyStoreError::from_tx(operation, e))?;
            Ok(value)
        }
        Err(err) => {
            // An interrupted statement may already have ended the transaction
            if !tx.is_autocommit() {
                if let Err(rollback) = tx.rollback() {
                    warn!(
                        "Rollback after failed {} failed: {} (original error: {})",
                        operation, rollback, err
                    );
                    return Err(PolicyStoreError::from_tx(operation, rollback));
                }
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfigBuilder;

    fn manager() -> SqlPolicyManager {
        let config = StoreConfig::default();
        let db = Database::open_in_memory(&config).unwrap();
        let manager = SqlPolicyManager::new(db, config);
        manager.create_schemas().unwrap();
        manager
    }

    fn count(manager: &SqlPolicyManager, table: &str) -> i64 {
        manager
            .database()
            .with_conn(|conn| {
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                    .map_err(sql_err("test", table))
            })
            .unwrap()
    }

    #[test]
    fn test_create_schemas_twice_fails() {
        let manager = manager();
        assert!(manager.create_schemas().is_err());
    }

    #[test]
    fn test_create_schemas_count() {
        let config = StoreConfigBuilder::new().table_prefix("fresh").build().unwrap();
        let db = Database::open_in_memory(&config).unwrap();
        let manager = SqlPolicyManager::new(db, config);
        assert_eq!(manager.create_schemas().unwrap(), 7);
    }

    #[test]
    fn test_templates_shared_between_policies() {
        let manager = manager();
        manager
            .create(&Policy::new("p1", Effect::Allow).with_subjects(["alice"]).with_actions(["read"]))
            .unwrap();
        manager
            .create(&Policy::new("p2", Effect::Deny).with_subjects(["alice"]).with_actions(["read"]))
            .unwrap();

        let tables = manager.tables().clone();
        assert_eq!(count(&manager, tables.templates(Dimension::Subject)), 1);
        assert_eq!(count(&manager, tables.templates(Dimension::Action)), 1);
        assert_eq!(count(&manager, tables.links(Dimension::Subject)), 2);
    }

    #[test]
    fn test_compile_failure_rolls_back() {
        let manager = manager();
        let policy = Policy::new("broken", Effect::Allow)
            .with_subjects(["alice"])
            .with_resources(["files:<[a-z]+"]);

        assert!(matches!(
            manager.create(&policy),
            Err(PolicyStoreError::Compile { .. })
        ));

        let tables = manager.tables().clone();
        assert_eq!(count(&manager, &tables.policies), 0);
        assert_eq!(count(&manager, tables.templates(Dimension::Subject)), 0);
        assert_eq!(count(&manager, tables.links(Dimension::Subject)), 0);
        assert!(manager.get("broken").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_keeps_templates() {
        let manager = manager();
        manager
            .create(&Policy::new("p1", Effect::Allow).with_subjects(["alice", "bob"]))
            .unwrap();
        manager.delete("p1").unwrap();

        let tables = manager.tables().clone();
        assert_eq!(count(&manager, tables.links(Dimension::Subject)), 0);
        assert_eq!(count(&manager, tables.templates(Dimension::Subject)), 2);
    }

    #[test]
    fn test_duplicate_template_in_one_set() {
        let manager = manager();
        manager
            .create(&Policy::new("p1", Effect::Allow).with_actions(["read", "read", "write"]))
            .unwrap();
        assert_eq!(count(&manager, manager.tables().links(Dimension::Action)), 2);
    }

    #[test]
    fn test_candidate_query_without_actions() {
        let manager = manager();
        manager
            .create(&Policy::new("p1", Effect::Allow).with_subjects(["alice"]))
            .unwrap();

        let found = manager
            .find_request_candidates(&Request::for_subject("alice"))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].actions.is_empty());
        assert!(found[0].resources.is_empty());
    }

    #[test]
    fn test_interrupted_create_rolls_back() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::time::Duration;

        let manager = manager();
        let other = manager.database().clone();
        let done = Arc::new(AtomicBool::new(false));
        let finished = Arc::clone(&done);

        let interrupter = std::thread::spawn(move || {
            while !finished.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
                other.interrupt();
            }
        });

        let big = Policy::new("big", Effect::Allow)
            .with_subjects((0..200_000).map(|i| format!("user{}", i)));
        let result = manager.create(&big);
        done.store(true, Ordering::SeqCst);
        interrupter.join().unwrap();

        assert!(matches!(result, Err(PolicyStoreError::Interrupted { .. })));
        assert!(manager.get("big").unwrap_err().is_not_found());

        let tables = manager.tables().clone();
        assert_eq!(count(&manager, &tables.policies), 0);
        assert_eq!(count(&manager, tables.links(Dimension::Subject)), 0);

        // Lock and transaction are released
        manager
            .create(&Policy::new("after", Effect::Allow).with_subjects(["alice"]))
            .unwrap();
        assert_eq!(manager.get("after").unwrap().subjects, vec!["alice"]);
    }

    #[test]
    fn test_no_candidates_is_empty() {
        let manager = manager();
        let found = manager
            .find_request_candidates(&Request::for_subject("nobody"))
            .unwrap();
        assert!(found.is_empty());
    }
}
