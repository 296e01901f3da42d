//! Route directive parser.
//!
//! Grammar, one directive per line:
//!
//! ```text
//! route add <svc> <src> <dst> [weight <w>] [tags "<t1>,<t2>"] [opts "k=v k2=v2"]
//! route del <svc> [<src> [<dst>]]
//! route weight <svc> <src> weight <w> [tags "<t1>,<t2>"]
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use std::collections::BTreeMap;
use std::fmt;
use url::Url;

use crate::routing::RouteError;

/// Help text served by the admin API.
pub const COMMANDS: &str = r#"
route add <svc> <src> <dst> [weight <w>] [tags "<t1>,<t2>,..."] [opts "k1=v1 k2=v2 ..."]
  - Add route for service svc from src to dst and assign weight and tags.
    src is "host/path", "/path" or ":port" for TCP routes.
    dst is an http://, https:// or tcp:// URL.
    weight is a fraction between 0 and 1.
    Supported opts: strip=<prefix>, tlsskipverify=true

route del <svc> [<src> [<dst>]]
  - Remove all routes of service svc, or only those for src, or only
    the single target dst on src.

route weight <svc> <src> weight <w> [tags "<t1>,<t2>,..."]
  - Route w percent of the traffic for src to the instances of svc,
    optionally only those carrying all given tags.
"#;

/// Where a route matches: a host and a path, or `:port` for TCP.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Source {
    pub host: String,
    pub path: String,
}

impl Source {
    pub fn parse(src: &str) -> Self {
        if src.starts_with(':') {
            return Self { host: src.to_string(), path: String::new() };
        }
        match src.find('/') {
            Some(idx) => Self {
                host: src[..idx].to_ascii_lowercase(),
                path: src[idx..].to_string(),
            },
            None => Self { host: src.to_ascii_lowercase(), path: "/".to_string() },
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.host, self.path)
    }
}

/// A parsed routing directive.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Add {
        service: String,
        src: Source,
        dst: Url,
        weight: Option<f64>,
        tags: Vec<String>,
        opts: BTreeMap<String, String>,
    },
    Del {
        service: String,
        src: Option<Source>,
        dst: Option<Url>,
    },
    Weight {
        service: String,
        src: Source,
        weight: f64,
        tags: Vec<String>,
    },
}

/// Parse directive text into directives, in order.
pub fn parse(text: &str) -> Result<Vec<Directive>, RouteError> {
    let mut directives = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let tokens = tokenize(trimmed).map_err(|reason| RouteError::syntax(line, reason))?;
        directives.push(parse_tokens(line, &tokens)?);
    }
    Ok(directives)
}

fn parse_tokens(line: usize, tokens: &[String]) -> Result<Directive, RouteError> {
    let words: Vec<&str> = tokens.iter().map(String::as_str).collect();
    match words.as_slice() {
        ["route", "add", service, src, dst, rest @ ..] => {
            let opts = parse_options(line, rest, &["weight", "tags", "opts"])?;
            Ok(Directive::Add {
                service: service.to_string(),
                src: Source::parse(src),
                dst: parse_dst(line, dst)?,
                weight: opts.get("weight").map(|w| parse_weight(line, w)).transpose()?,
                tags: opts.get("tags").map(|t| split_tags(t)).unwrap_or_default(),
                opts: opts.get("opts").map(|o| split_opts(line, o)).transpose()?.unwrap_or_default(),
            })
        }
        ["route", "add", ..] => Err(RouteError::syntax(line, "route add needs <svc> <src> <dst>")),
        ["route", "del", service] => Ok(Directive::Del {
            service: service.to_string(),
            src: None,
            dst: None,
        }),
        ["route", "del", service, src] => Ok(Directive::Del {
            service: service.to_string(),
            src: Some(Source::parse(src)),
            dst: None,
        }),
        ["route", "del", service, src, dst] => Ok(Directive::Del {
            service: service.to_string(),
            src: Some(Source::parse(src)),
            dst: Some(parse_dst(line, dst)?),
        }),
        ["route", "del", ..] => Err(RouteError::syntax(line, "route del takes <svc> [<src> [<dst>]]")),
        ["route", "weight", service, src, rest @ ..] => {
            let opts = parse_options(line, rest, &["weight", "tags"])?;
            let weight = opts
                .get("weight")
                .ok_or_else(|| RouteError::syntax(line, "route weight needs weight <w>"))?;
            Ok(Directive::Weight {
                service: service.to_string(),
                src: Source::parse(src),
                weight: parse_weight(line, weight)?,
                tags: opts.get("tags").map(|t| split_tags(t)).unwrap_or_default(),
            })
        }
        ["route", command, ..] => Err(RouteError::syntax(line, format!("unknown command {command:?}"))),
        _ => Err(RouteError::syntax(line, "directive must start with 'route'")),
    }
}

/// Split a line on whitespace, keeping double-quoted sections together.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut pending = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                pending = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if pending {
                    tokens.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if in_quotes {
        return Err("unterminated quote".to_string());
    }
    if pending {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_options<'a>(
    line: usize,
    rest: &[&'a str],
    allowed: &[&str],
) -> Result<BTreeMap<&'a str, &'a str>, RouteError> {
    let mut opts = BTreeMap::new();
    let mut iter = rest.iter();
    while let Some(key) = iter.next() {
        if !allowed.contains(key) {
            return Err(RouteError::syntax(line, format!("unexpected {key:?}")));
        }
        let value = iter
            .next()
            .ok_or_else(|| RouteError::syntax(line, format!("{key} needs a value")))?;
        opts.insert(*key, *value);
    }
    Ok(opts)
}

fn parse_dst(line: usize, dst: &str) -> Result<Url, RouteError> {
    let url = Url::parse(dst).map_err(|source| RouteError::InvalidUrl {
        line,
        url: dst.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "tcp" if url.host_str().is_some() && url.port().is_some() => Ok(url),
        "http" | "https" | "tcp" => Err(RouteError::syntax(line, format!("{dst:?} needs host and port"))),
        scheme => Err(RouteError::UnsupportedScheme {
            line,
            scheme: scheme.to_string(),
        }),
    }
}

fn parse_weight(line: usize, value: &str) -> Result<f64, RouteError> {
    match value.parse::<f64>() {
        Ok(w) if (0.0..=1.0).contains(&w) => Ok(w),
        _ => Err(RouteError::InvalidWeight {
            line,
            value: value.to_string(),
        }),
    }
}

fn split_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn split_opts(line: usize, value: &str) -> Result<BTreeMap<String, String>, RouteError> {
    value
        .split_whitespace()
        .map(|kv| {
            kv.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| RouteError::syntax(line, format!("option {kv:?} is not key=value")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_options() {
        let directives = parse(
            r#"route add svc1 example.com/api http://10.0.0.1:8080/ weight 0.5 tags "a, b" opts "strip=/api""#,
        )
        .unwrap();

        match &directives[0] {
            Directive::Add { service, src, dst, weight, tags, opts } => {
                assert_eq!(service, "svc1");
                assert_eq!(src, &Source { host: "example.com".into(), path: "/api".into() });
                assert_eq!(dst.as_str(), "http://10.0.0.1:8080/");
                assert_eq!(*weight, Some(0.5));
                assert_eq!(tags, &vec!["a".to_string(), "b".to_string()]);
                assert_eq!(opts.get("strip").map(String::as_str), Some("/api"));
            }
            other => panic!("unexpected directive {other:?}"),
        }
    }

    #[test]
    fn source_forms() {
        assert_eq!(Source::parse("/foo"), Source { host: "".into(), path: "/foo".into() });
        assert_eq!(Source::parse("Example.COM"), Source { host: "example.com".into(), path: "/".into() });
        assert_eq!(Source::parse(":5432"), Source { host: ":5432".into(), path: "".into() });
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let directives = parse("# comment\n\n  route del svc1  \n").unwrap();
        assert_eq!(
            directives,
            vec![Directive::Del { service: "svc1".into(), src: None, dst: None }]
        );
    }

    #[test]
    fn reports_line_number() {
        let err = parse("route add a /a http://h:1/\nroute frobnicate x").unwrap_err();
        assert_eq!(err.line(), 2);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            parse("route add a /a http://h:1/ weight 1.5"),
            Err(RouteError::InvalidWeight { .. })
        ));
        assert!(matches!(
            parse("route add a /a ftp://h:1/"),
            Err(RouteError::UnsupportedScheme { .. })
        ));
        assert!(matches!(parse("route add a :5432 tcp://db"), Err(RouteError::Syntax { .. })));
        assert!(matches!(parse(r#"route add a /a http://h:1/ tags "x"#), Err(RouteError::Syntax { .. })));
    }

    #[test]
    fn weight_requires_value() {
        assert!(parse("route weight svc /a weight").is_err());
        assert!(matches!(
            parse("route weight svc /a weight 0.2").unwrap()[0],
            Directive::Weight { weight, .. } if (weight - 0.2).abs() < f64::EPSILON
        ));
    }
}
