//! Endpoint path matching.
//!
//! # Responsibilities
//! - Match a request path exactly or against a regular expression
//! - Render matchers for logs
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Patterns are used as written; anchor them (`^...$`) to avoid partial matches
//! - Exact matching needs no regex, so the common case stays a string compare

use std::fmt;

use regex::Regex;

/// Predicate over request paths.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    Exact(String),
    Pattern(Regex),
}

impl PathMatcher {
    pub fn exact(path: impl Into<String>) -> Self {
        Self::Exact(path.into())
    }

    /// Compile a pattern matcher.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Pattern)
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == path,
            Self::Pattern(re) => re.is_match(path),
        }
    }
}

impl fmt::Display for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(path) => f.write_str(path),
            Self::Pattern(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for PathMatcher {
    fn from(path: &str) -> Self {
        Self::exact(path)
    }
}

impl From<String> for PathMatcher {
    fn from(path: String) -> Self {
        Self::Exact(path)
    }
}

impl From<Regex> for PathMatcher {
    fn from(re: Regex) -> Self {
        Self::Pattern(re)
    }
}
