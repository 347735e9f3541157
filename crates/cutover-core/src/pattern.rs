//! Listener path patterns.
//!
//! Patterns follow load-balancer path-condition syntax: `*` matches any
//! sequence of characters (including `/`), `?` matches exactly one character,
//! everything else matches literally. Matching is case-sensitive.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A path condition of a routing rule, e.g. `/api/*` or `/frontend`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathPattern(String);

impl PathPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `path` satisfies this pattern.
    pub fn matches(&self, path: &str) -> bool {
        glob_match(self.0.as_bytes(), path.as_bytes())
    }

    /// A pattern must be absolute (start with `/` or a wildcard).
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && (self.0.starts_with('/') || self.0.starts_with('*'))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Iterative glob match with single-star backtracking.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut star_t = 0;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_exactly() {
        let p = PathPattern::new("/frontend");
        assert!(p.matches("/frontend"));
        assert!(!p.matches("/frontend/app.js"));
        assert!(!p.matches("/front"));
    }

    #[test]
    fn star_matches_any_suffix() {
        let p = PathPattern::new("/api/*");
        assert!(p.matches("/api/hello"));
        assert!(p.matches("/api/v1/users/7"));
        assert!(p.matches("/api/"));
        assert!(!p.matches("/api"));
        assert!(!p.matches("/frontend"));
    }

    #[test]
    fn star_in_the_middle_backtracks() {
        let p = PathPattern::new("/img/*.png");
        assert!(p.matches("/img/a/b.png"));
        assert!(!p.matches("/img/a/b.jpg"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        let p = PathPattern::new("/v?/status");
        assert!(p.matches("/v1/status"));
        assert!(!p.matches("/v10/status"));
    }

    #[test]
    fn validity() {
        assert!(PathPattern::new("/").is_valid());
        assert!(PathPattern::new("*").is_valid());
        assert!(!PathPattern::new("api").is_valid());
        assert!(!PathPattern::new("").is_valid());
    }
}
