//! LRU cache of compiled matchers
//!
//! Stored templates keep their regex source text. Candidate queries compile
//! each distinct source at most once while it stays in the cache.

use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;

/// LRU cache of compiled template patterns
pub struct PatternCache {
    cache: LruCache<String, Regex>,
}

impl PatternCache {
    /// Create a new pattern cache with given capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        PatternCache {
            cache: LruCache::new(capacity),
        }
    }

    /// Match `value` against `pattern`, compiling the pattern on a miss
    pub fn is_match(&mut self, pattern: &str, value: &str) -> Result<bool, regex::Error> {
        if let Some(re) = self.cache.get(pattern) {
            return Ok(re.is_match(value));
        }

        let re = Regex::new(pattern)?;
        let matched = re.is_match(value);
        self.cache.put(pattern.to_string(), re);
        Ok(matched)
    }

    /// Drop every cached matcher
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Number of cached matchers
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
