//! Regex values.
//!
//! Wraps a compiled `regex::Regex` with pattern-based equality and hashing,
//! since the language compares regex values by their source pattern.

use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone)]
pub struct ValueRegex {
    pattern: String,
    compiled: regex::Regex,
}

impl ValueRegex {
    /// Compile a pattern; an empty pattern matches everything.
    pub fn new(pattern: impl Into<String>) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        let compiled = regex::Regex::new(&pattern)?;
        Ok(Self { pattern, compiled })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn as_regex(&self) -> &regex::Regex {
        &self.compiled
    }

    /// Match against a string; returns the capture groups (index 0 is the
    /// whole match) when successful.
    ///
    /// An empty pattern matches any input with no captures, mirroring the
    /// behavior of `//`.
    pub fn captures(&self, input: &str) -> Option<Vec<String>> {
        if self.pattern.is_empty() {
            return Some(vec![String::new()]);
        }
        self.compiled.captures(input).map(|captures| {
            captures
                .iter()
                .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect()
        })
    }

    /// Whether the pattern matches anywhere in the input.
    pub fn is_match(&self, input: &str) -> bool {
        self.pattern.is_empty() || self.compiled.is_match(input)
    }
}

impl PartialEq for ValueRegex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for ValueRegex {}

impl Hash for ValueRegex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
    }
}

impl fmt::Display for ValueRegex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_pattern() {
        let a = ValueRegex::new(r"\d+").unwrap();
        let b = ValueRegex::new(r"\d+").unwrap();
        let c = ValueRegex::new(r"\w+").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn empty_pattern_matches_everything() {
        let regex = ValueRegex::new("").unwrap();
        assert!(regex.is_match("anything"));
        assert_eq!(regex.captures("x"), Some(vec![String::new()]));
    }

    #[test]
    fn captures_include_whole_match() {
        let regex = ValueRegex::new(r"(\w+)@(\w+)").unwrap();
        let captures = regex.captures("user@host").unwrap();
        assert_eq!(captures, vec!["user@host", "user", "host"]);
    }
}
