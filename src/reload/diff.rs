//! Routing table change log.
//!
//! `detail` logs the compiled table, `all` the full directive text and
//! `delta` only the directive lines that were added or removed.

use similar::{ChangeTag, TextDiff};
use std::str::FromStr;

use crate::routing::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutesFormat {
    Detail,
    #[default]
    Delta,
    All,
}

impl FromStr for RoutesFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detail" => Ok(RoutesFormat::Detail),
            "delta" => Ok(RoutesFormat::Delta),
            "all" => Ok(RoutesFormat::All),
            other => Err(format!("invalid route format {other:?}")),
        }
    }
}

impl RoutesFormat {
    /// Parse `log.routes_format`, falling back to `delta` with a warning.
    pub fn from_config(value: &str) -> Self {
        value.parse().unwrap_or_else(|e: String| {
            tracing::warn!(error = %e, "falling back to delta route logging");
            RoutesFormat::Delta
        })
    }
}

/// Render the change from `prev` to `next`. `None` means nothing to log.
pub fn render(format: RoutesFormat, table: &Table, prev: &str, next: &str) -> Option<String> {
    match format {
        RoutesFormat::Detail => Some(table.dump()),
        RoutesFormat::All => Some(next.to_string()),
        RoutesFormat::Delta => delta(prev, next),
    }
}

/// Non-blank inserted and deleted lines, prefixed `+ ` / `- `.
pub fn delta(prev: &str, next: &str) -> Option<String> {
    let diff = TextDiff::from_lines(prev, next);
    let mut out = String::new();

    for op in diff.ops() {
        // one op is a run of same-type edits
        for change in diff.iter_changes(op) {
            let prefix = match change.tag() {
                ChangeTag::Insert => "+ ",
                ChangeTag::Delete => "- ",
                ChangeTag::Equal => continue,
            };
            let line = change.value().trim();
            if line.is_empty() {
                continue;
            }
            out.push_str(prefix);
            out.push_str(line);
            out.push('\n');
        }
    }

    if out.is_empty() {
        None
    } else {
        out.pop();
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_shows_only_changed_lines() {
        let out = delta("a\nb", "a\nc").unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines.contains(&"- b"));
        assert!(lines.contains(&"+ c"));
        assert!(!lines.iter().any(|l| l.ends_with('a')));
    }

    #[test]
    fn delta_ignores_blank_changes() {
        assert_eq!(delta("a\n", "a\n\n\n"), None);
        assert_eq!(delta("x\ny", "x\ny"), None);
    }

    #[test]
    fn delta_from_empty() {
        assert_eq!(
            delta("", "route add a /a http://h:1/\n\n").as_deref(),
            Some("+ route add a /a http://h:1/")
        );
    }

    #[test]
    fn unknown_format_falls_back_to_delta() {
        assert_eq!(RoutesFormat::from_config("verbose"), RoutesFormat::Delta);
        assert_eq!(RoutesFormat::from_config("detail"), RoutesFormat::Detail);
    }

    #[test]
    fn render_modes() {
        let table = Table::parse("route add a /a http://127.0.0.1:1/").unwrap();
        let next = "route add a /a http://127.0.0.1:1/\n";
        assert_eq!(render(RoutesFormat::All, &table, "", next).as_deref(), Some(next));
        assert_eq!(render(RoutesFormat::Detail, &table, "", next), Some(table.dump()));
        assert_eq!(render(RoutesFormat::Delta, &table, next, next), None);
    }
}
