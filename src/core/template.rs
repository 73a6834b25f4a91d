//! Template compilation and identifier derivation
//!
//! A template is a subject, action or resource string that may contain
//! delimited pattern segments, e.g. `users:<[a-z]+>` or `<.+>@example.com`.
//! Each top-level segment is embedded as a capture group; literal text
//! around it is escaped. The result is always anchored.

use crate::error::{PolicyStoreError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Start and end characters of a pattern segment
///
/// Delimiters shape how a template compiles but are not part of its
/// identity: a template is stored once per raw text, see [`template_id`].
/// When the same text was first stored under other delimiters, later
/// policies link to that stored row and its compiled pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    pub start: char,
    pub end: char,
}

impl Delimiters {
    pub fn new(start: char, end: char) -> Self {
        Delimiters { start, end }
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Delimiters {
            start: '<',
            end: '>',
        }
    }
}

/// A template ready to be stored
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    /// Content-derived identifier, see [`template_id`]
    pub id: String,
    /// Template as authored
    pub raw: String,
    /// Anchored regular expression source
    pub pattern: String,
    /// Whether the raw text contains the start delimiter
    pub has_pattern: bool,
    matcher: Regex,
}

impl CompiledTemplate {
    /// Match a value the way a candidate query would
    pub fn matches(&self, value: &str) -> bool {
        if !self.has_pattern {
            return self.raw == value;
        }
        self.matcher.is_match(value)
    }
}

impl PartialEq for CompiledTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.raw == other.raw
            && self.pattern == other.pattern
            && self.has_pattern == other.has_pattern
    }
}

impl Eq for CompiledTemplate {}

/// Derive the stable identifier for a template
///
/// Lowercase hex SHA-256 of the raw text. Identical text always yields the
/// same identifier, so a template shared by many policies is stored once.
///
/// # Examples
///
/// ```
/// use policy_store::template_id;
///
/// assert_eq!(template_id("alice"), template_id("alice"));
/// assert_ne!(template_id("alice"), template_id("bob"));
/// assert_eq!(template_id("alice").len(), 64);
/// ```
pub fn template_id(template: &str) -> String {
    let digest = Sha256::digest(template.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compile a template into an anchored regular expression
///
/// # Errors
///
/// Returns `Compile` for unbalanced delimiters or a segment that is not a
/// valid regular expression.
///
/// # Examples
///
/// ```
/// use policy_store::{compile, Delimiters};
///
/// let t = compile("<.+>@example.com", Delimiters::default()).unwrap();
/// assert!(t.has_pattern);
/// assert_eq!(t.pattern, r"^(.+)@example\.com$");
/// assert!(t.matches("bob@example.com"));
///
/// assert!(compile("users:<[a-z]+", Delimiters::default()).is_err());
/// ```
pub fn compile(template: &str, delimiters: Delimiters) -> Result<CompiledTemplate> {
    let segments = segment_bounds(template, delimiters)?;

    let mut pattern = String::with_capacity(template.len() + 8);
    pattern.push('^');

    let mut end = 0;
    for (open, close) in segments {
        let inner = &template[open + delimiters.start.len_utf8()..close];

        // Each segment must stand on its own as a regex
        Regex::new(&format!("^{}$", inner)).map_err(|e| compile_error(template, e))?;

        pattern.push_str(&regex::escape(&template[end..open]));
        pattern.push('(');
        pattern.push_str(inner);
        pattern.push(')');
        end = close + delimiters.end.len_utf8();
    }
    pattern.push_str(&regex::escape(&template[end..]));
    pattern.push('$');

    let matcher = Regex::new(&pattern).map_err(|e| compile_error(template, e))?;

    Ok(CompiledTemplate {
        id: template_id(template),
        raw: template.to_string(),
        pattern,
        has_pattern: template.contains(delimiters.start),
        matcher,
    })
}

/// Byte offsets of each top-level segment: (start delimiter, end delimiter)
fn segment_bounds(template: &str, delimiters: Delimiters) -> Result<Vec<(usize, usize)>> {
    let mut bounds = Vec::new();
    let mut depth = 0usize;
    let mut open = 0;

    for (i, c) in template.char_indices() {
        if c == delimiters.start {
            if depth == 0 {
                open = i;
            }
            depth += 1;
        } else if c == delimiters.end {
            if depth == 0 {
                return Err(unbalanced(template));
            }
            depth -= 1;
            if depth == 0 {
                bounds.push((open, i));
            }
        }
    }

    if depth != 0 {
        return Err(unbalanced(template));
    }

    Ok(bounds)
}

fn unbalanced(template: &str) -> PolicyStoreError {
    PolicyStoreError::Compile {
        template: template.to_string(),
        reason: "unbalanced delimiters".to_string(),
    }
}

fn compile_error(template: &str, err: regex::Error) -> PolicyStoreError {
    PolicyStoreError::Compile {
        template: template.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(template: &str) -> CompiledTemplate {
        compile(template, Delimiters::default()).unwrap()
    }

    #[test]
    fn test_plain_template_is_escaped() {
        let t = c("files:read.all");
        assert!(!t.has_pattern);
        assert_eq!(t.pattern, r"^files:read\.all$");
        assert!(t.matches("files:read.all"));
        assert!(!t.matches("files:readXall"));
    }

    #[test]
    fn test_single_segment() {
        let t = c("users:<[0-9]+>");
        assert!(t.has_pattern);
        assert_eq!(t.pattern, "^users:([0-9]+)$");
        assert!(t.matches("users:42"));
        assert!(!t.matches("users:abc"));
        assert!(!t.matches("xusers:42"));
    }

    #[test]
    fn test_multiple_segments() {
        let t = c("<[a-z]+>:<read|write>");
        assert_eq!(t.pattern, "^([a-z]+):(read|write)$");
        assert!(t.matches("files:write"));
        assert!(!t.matches("files:delete"));
    }

    #[test]
    fn test_nested_delimiters_stay_in_segment() {
        let t = compile("a{b{1,2}}", Delimiters::new('{', '}')).unwrap();
        assert_eq!(t.pattern, "^a(b{1,2})$");
        assert!(t.matches("abb"));
        assert!(!t.matches("abbb"));
    }

    #[test]
    fn test_unbalanced() {
        assert!(matches!(
            compile("users:<[0-9]+", Delimiters::default()),
            Err(PolicyStoreError::Compile { .. })
        ));
        assert!(compile("users:>", Delimiters::default()).is_err());
        assert!(compile("<a>>", Delimiters::default()).is_err());
    }

    #[test]
    fn test_invalid_fragment() {
        let err = compile("users:<[0-9>", Delimiters::default()).unwrap_err();
        assert!(matches!(err, PolicyStoreError::Compile { template, .. } if template == "users:<[0-9>"));
    }

    #[test]
    fn test_custom_delimiters() {
        let t = compile("users:{.*}", Delimiters::new('{', '}')).unwrap();
        assert!(t.has_pattern);
        assert!(t.matches("users:anyone"));

        // Default delimiters are literal text here
        let t = compile("<b>", Delimiters::new('{', '}')).unwrap();
        assert!(!t.has_pattern);
        assert_eq!(t.pattern, "^<b>$");
    }

    #[test]
    fn test_matcher_survives_clone() {
        let t = c("users:<[0-9]+>");
        let copy = t.clone();
        assert_eq!(copy, t);
        assert!(copy.matches("users:7"));
        assert!(!copy.matches("users:x"));

        // Equality ignores the compiled matcher
        assert_eq!(c("users:<[0-9]+>"), t);
        assert_ne!(c("users:<[0-9]*>"), t);
    }

    #[test]
    fn test_multibyte_text() {
        let t = c("ressource:é<[0-9]>ü");
        assert!(t.matches("ressource:é7ü"));
    }

    #[test]
    fn test_id_is_sha256_hex() {
        assert_eq!(
            template_id(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(c("alice").id, template_id("alice"));
    }
}
