//! Policy document structure
//!
//! A policy grants or denies a set of actions on a set of resources to a set
//! of subjects. Each of the three sets holds templates, see [`crate::template`].

use super::template::Delimiters;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Effect of a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(format!("unknown effect '{}'", other)),
        }
    }
}

/// Named conditions, opaque to the store
///
/// Ordered by name so the encoded form is stable.
pub type Conditions = BTreeMap<String, serde_json::Value>;

/// Access-control policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub description: String,
    pub effect: Effect,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    /// Segment delimiters used to compile this policy's templates (not persisted)
    #[serde(skip)]
    pub delimiters: Delimiters,
}

impl Policy {
    /// Create an empty policy with the given ID and effect
    pub fn new(id: impl Into<String>, effect: Effect) -> Self {
        Policy {
            id: id.into(),
            effect,
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subjects = subjects.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, name: impl Into<String>, condition: serde_json::Value) -> Self {
        self.conditions.insert(name.into(), condition);
        self
    }

    /// Set the delimiters used to compile this policy's templates
    ///
    /// Templates are keyed by raw text only. A template already stored
    /// under other delimiters is reused as stored, so its pattern may not
    /// match what these delimiters would produce.
    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }
}

fn as_set(values: &[String]) -> HashSet<&str> {
    values.iter().map(String::as_str).collect()
}

/// Template sets compare without regard to order or repetition
impl PartialEq for Policy {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.description == other.description
            && self.effect == other.effect
            && self.conditions == other.conditions
            && as_set(&self.subjects) == as_set(&other.subjects)
            && as_set(&self.actions) == as_set(&other.actions)
            && as_set(&self.resources) == as_set(&other.resources)
    }
}

/// Access request used to look up candidate policies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    pub subject: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl Request {
    pub fn new(
        subject: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Request {
            subject: subject.into(),
            action: action.into(),
            resource: resource.into(),
            context: HashMap::new(),
        }
    }

    /// Request carrying only a subject
    pub fn for_subject(subject: impl Into<String>) -> Self {
        Request {
            subject: subject.into(),
            ..Default::default()
        }
    }
}
