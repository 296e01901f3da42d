//! Route path matching.
//!
//! # Responsibilities
//! - Decide whether a request path matches a route path
//! - Host matching is done by the table (exact map lookup, lowercase)
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - No regex: prefix compare or a linear-time glob

use std::str::FromStr;

/// How a route's path is compared against the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStrategy {
    /// Request path starts with the route path.
    #[default]
    Prefix,
    /// Route path is a glob (`*` any run, `?` one byte) over the whole request path.
    Glob,
}

impl MatchStrategy {
    /// Returns true if `path` matches the route path `pattern`.
    pub fn matches(&self, path: &str, pattern: &str) -> bool {
        match self {
            MatchStrategy::Prefix => path.starts_with(pattern),
            MatchStrategy::Glob => glob_match(pattern.as_bytes(), path.as_bytes()),
        }
    }
}

impl FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prefix" => Ok(MatchStrategy::Prefix),
            "glob" => Ok(MatchStrategy::Glob),
            other => Err(format!("unknown matcher {other:?}")),
        }
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            // backtrack: let the last star swallow one more byte
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}
