//! Row folding
//!
//! Read queries return one row per (policy, template) pair. Folding groups
//! those rows back into policies, in order of first appearance, with each
//! template set deduplicated.

use super::policy::{Conditions, Effect, Policy};
use std::collections::{HashMap, HashSet};

/// One flattened row from a policy read query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyRow {
    pub id: String,
    pub effect: Effect,
    pub conditions: Conditions,
    pub description: String,
    pub subject: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
}

/// Fold flattened rows into policies
///
/// # Examples
///
/// ```
/// use policy_store::fold::{fold_rows, PolicyRow};
///
/// let row = |action: &str| PolicyRow {
///     id: "p1".to_string(),
///     action: Some(action.to_string()),
///     ..Default::default()
/// };
///
/// let policies = fold_rows(vec![row("read"), row("read"), row("write")]);
/// assert_eq!(policies.len(), 1);
/// assert_eq!(policies[0].actions, vec!["read", "write"]);
/// ```
pub fn fold_rows<I>(rows: I) -> Vec<Policy>
where
    I: IntoIterator<Item = PolicyRow>,
{
    let mut policies: Vec<Policy> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let slot = match index.get(&row.id) {
            Some(&slot) => slot,
            None => {
                index.insert(row.id.clone(), policies.len());
                policies.push(Policy {
                    id: row.id,
                    description: row.description,
                    effect: row.effect,
                    conditions: row.conditions,
                    ..Default::default()
                });
                policies.len() - 1
            }
        };

        let policy = &mut policies[slot];
        push_present(&mut policy.subjects, row.subject);
        push_present(&mut policy.actions, row.action);
        push_present(&mut policy.resources, row.resource);
    }

    for policy in &mut policies {
        dedup_stable(&mut policy.subjects);
        dedup_stable(&mut policy.actions);
        dedup_stable(&mut policy.resources);
    }

    policies
}

fn push_present(values: &mut Vec<String>, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        values.push(value);
    }
}

/// Remove repeats, keeping the first occurrence of each value
pub(crate) fn dedup_stable(values: &mut Vec<String>) {
    let mut seen = HashSet::with_capacity(values.len());
    values.retain(|v| seen.insert(v.clone()));
}
