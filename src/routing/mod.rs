//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Directive text (discovered + manual)
//!     → parser.rs (tokenize, validate each line)
//!     → table.rs (apply add/del/weight in order, build slot rings)
//!     → Return: immutable Table, or the first RouteError
//!
//! Request lookup:
//!     (host, path)
//!     → table.rs (host candidates, longest path first)
//!     → matcher.rs (prefix or glob)
//!     → picker.rs (random or round-robin over the slot ring)
//! ```
//!
//! # Design Decisions
//! - Tables are compiled off the hot path and swapped atomically
//! - Deterministic: same text always compiles to the same table
//! - First (longest) match wins

pub mod matcher;
pub mod parser;
pub mod picker;
pub mod table;

use thiserror::Error;

pub use matcher::MatchStrategy;
pub use parser::{Directive, Source, COMMANDS};
pub use picker::PickStrategy;
pub use table::{Route, RouteInfo, Table, Target};

/// Error compiling route directives.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    #[error("line {line}: invalid url {url:?}: {source}")]
    InvalidUrl {
        line: usize,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("line {line}: unsupported scheme {scheme:?}")]
    UnsupportedScheme { line: usize, scheme: String },

    #[error("line {line}: weight {value:?} must be between 0 and 1")]
    InvalidWeight { line: usize, value: String },
}

impl RouteError {
    pub(crate) fn syntax(line: usize, reason: impl Into<String>) -> Self {
        RouteError::Syntax {
            line,
            reason: reason.into(),
        }
    }

    /// 1-based line of the offending directive.
    pub fn line(&self) -> usize {
        match self {
            RouteError::Syntax { line, .. }
            | RouteError::InvalidUrl { line, .. }
            | RouteError::UnsupportedScheme { line, .. }
            | RouteError::InvalidWeight { line, .. } => *line,
        }
    }
}
