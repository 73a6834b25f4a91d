//! Relational layout for policies
//!
//! Seven tables per prefix:
//!
//! ```text
//! {p}_p   policies            ID, DESCRIPTION, EFFECT, CONDITIONS
//! {p}_s   subject templates   ID, HAS_REGEX, COMPILED, TEMPLATE
//! {p}_a   action templates    (same shape)
//! {p}_r   resource templates  (same shape)
//! {p}_sr  policy <-> subject  POLICY, SUBJECT
//! {p}_ar  policy <-> action   POLICY, ACTION_ID
//! {p}_rr  policy <-> resource POLICY, RESOURCE_ID
//! ```
//!
//! Link rows cascade with their policy. Templates are shared between
//! policies and are never removed by a policy delete.

use crate::config::TablePrefix;

/// One of the three template dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Subject,
    Action,
    Resource,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Subject, Dimension::Action, Dimension::Resource];

    /// Template column name in the link table
    pub fn link_column(&self) -> &'static str {
        match self {
            Dimension::Subject => "SUBJECT",
            Dimension::Action => "ACTION_ID",
            Dimension::Resource => "RESOURCE_ID",
        }
    }
}

/// Table names resolved from a prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub policies: String,
    subjects: String,
    actions: String,
    resources: String,
    subject_links: String,
    action_links: String,
    resource_links: String,
}

impl TableNames {
    pub fn new(prefix: &TablePrefix) -> Self {
        let p = prefix.as_str();
        TableNames {
            policies: format!("{}_p", p),
            subjects: format!("{}_s", p),
            actions: format!("{}_a", p),
            resources: format!("{}_r", p),
            subject_links: format!("{}_sr", p),
            action_links: format!("{}_ar", p),
            resource_links: format!("{}_rr", p),
        }
    }

    pub fn templates(&self, dimension: Dimension) -> &str {
        match dimension {
            Dimension::Subject => &self.subjects,
            Dimension::Action => &self.actions,
            Dimension::Resource => &self.resources,
        }
    }

    pub fn links(&self, dimension: Dimension) -> &str {
        match dimension {
            Dimension::Subject => &self.subject_links,
            Dimension::Action => &self.action_links,
            Dimension::Resource => &self.resource_links,
        }
    }
}

/// Number of tables [`schema_statements`] creates
pub const TABLE_COUNT: usize = 7;

/// DDL for one prefix, in dependency order
pub fn schema_statements(tables: &TableNames) -> Vec<String> {
    let mut statements = vec![format!(
        "CREATE TABLE {p} (
            ID          TEXT NOT NULL,
            DESCRIPTION TEXT NULL,
            EFFECT      TEXT NOT NULL CHECK (EFFECT IN ('allow', 'deny')),
            CONDITIONS  BLOB NULL,
            CONSTRAINT {p}_pk_idx PRIMARY KEY (ID)
        )",
        p = tables.policies
    )];

    for dimension in Dimension::ALL {
        statements.push(format!(
            "CREATE TABLE {t} (
                ID        TEXT NOT NULL,
                HAS_REGEX INTEGER NOT NULL,
                COMPILED  TEXT NOT NULL,
                TEMPLATE  TEXT NOT NULL UNIQUE,
                CONSTRAINT {t}_pk_idx PRIMARY KEY (ID)
            )",
            t = tables.templates(dimension)
        ));
    }

    for dimension in Dimension::ALL {
        let link = tables.links(dimension);
        let column = dimension.link_column();
        statements.push(format!(
            "CREATE TABLE {l} (
                POLICY   TEXT NOT NULL,
                {c}      TEXT NOT NULL,
                CONSTRAINT {l}_pk_idx PRIMARY KEY (POLICY, {c}),
                CONSTRAINT {l}_p_fk FOREIGN KEY (POLICY) REFERENCES {p} (ID) ON DELETE CASCADE,
                CONSTRAINT {l}_t_fk FOREIGN KEY ({c}) REFERENCES {t} (ID)
            )",
            l = link,
            c = column,
            p = tables.policies,
            t = tables.templates(dimension)
        ));
        statements.push(format!(
            "CREATE INDEX {l}_t_idx ON {l} ({c})",
            l = link,
            c = column
        ));
    }

    statements.push(format!(
        "CREATE INDEX {t}_regex_idx ON {t} (HAS_REGEX, TEMPLATE)",
        t = tables.templates(Dimension::Subject)
    ));

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_from_prefix() {
        let tables = TableNames::new(&TablePrefix::new("hyd_pol").unwrap());
        assert_eq!(tables.policies, "hyd_pol_p");
        assert_eq!(tables.templates(Dimension::Action), "hyd_pol_a");
        assert_eq!(tables.links(Dimension::Resource), "hyd_pol_rr");
    }

    #[test]
    fn test_statement_set() {
        let tables = TableNames::new(&TablePrefix::default());
        let statements = schema_statements(&tables);

        let creates = statements
            .iter()
            .filter(|s| s.starts_with("CREATE TABLE"))
            .count();
        assert_eq!(creates, TABLE_COUNT);
        assert!(statements[0].contains("CREATE TABLE hydpol_p "));
        assert!(statements
            .iter()
            .any(|s| s.contains("REFERENCES hydpol_p (ID) ON DELETE CASCADE")));
    }

    #[test]
    fn test_statements_apply() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        for statement in schema_statements(&TableNames::new(&TablePrefix::default())) {
            conn.execute(&statement, []).unwrap();
        }

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'hydpol_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, TABLE_COUNT as i64);
    }
}
