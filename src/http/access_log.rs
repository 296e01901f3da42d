//! Access log for proxied HTTP requests.
//!
//! A format is a template of literal text and `$field` placeholders.
//! `common` and `combined` name the two classic web server layouts.
//!
//! Fields: `$remote_addr`, `$remote_host`, `$remote_port`, `$request`,
//! `$request_args`, `$request_host`, `$request_method`, `$request_proto`,
//! `$request_scheme`, `$request_uri`, `$response_body_size`,
//! `$response_status`, `$response_time_ms`, `$response_time_us`,
//! `$time_common`, `$time_rfc3339`, `$time_unix_ms`, `$upstream_addr`,
//! `$upstream_service`, `$upstream_url` and `$header.<Name>`.

use axum::http::{HeaderMap, HeaderName, Method, Uri, Version};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::config::LogConfig;
use crate::routing::Target;

pub const COMMON_FORMAT: &str = r#"$remote_host - - [$time_common] "$request" $response_status $response_body_size"#;
pub const COMBINED_FORMAT: &str = r#"$remote_host - - [$time_common] "$request" $response_status $response_body_size "$header.Referer" "$header.User-Agent""#;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessLogError {
    #[error("invalid access log target {0:?}")]
    UnknownTarget(String),

    #[error("unknown access log field ${0}")]
    UnknownField(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Field {
    RemoteAddr,
    RemoteHost,
    RemotePort,
    Request,
    RequestArgs,
    RequestHost,
    RequestMethod,
    RequestProto,
    RequestScheme,
    RequestUri,
    ResponseBodySize,
    ResponseStatus,
    ResponseTimeMs,
    ResponseTimeUs,
    TimeCommon,
    TimeRfc3339,
    TimeUnixMs,
    UpstreamAddr,
    UpstreamService,
    UpstreamUrl,
    Header(HeaderName),
}

impl FromStr for Field {
    type Err = AccessLogError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if let Some(header) = name.strip_prefix("header.") {
            return HeaderName::from_bytes(header.as_bytes())
                .map(Field::Header)
                .map_err(|_| AccessLogError::UnknownField(name.to_string()));
        }
        Ok(match name {
            "remote_addr" => Field::RemoteAddr,
            "remote_host" => Field::RemoteHost,
            "remote_port" => Field::RemotePort,
            "request" => Field::Request,
            "request_args" => Field::RequestArgs,
            "request_host" => Field::RequestHost,
            "request_method" => Field::RequestMethod,
            "request_proto" => Field::RequestProto,
            "request_scheme" => Field::RequestScheme,
            "request_uri" => Field::RequestUri,
            "response_body_size" => Field::ResponseBodySize,
            "response_status" => Field::ResponseStatus,
            "response_time_ms" => Field::ResponseTimeMs,
            "response_time_us" => Field::ResponseTimeUs,
            "time_common" => Field::TimeCommon,
            "time_rfc3339" => Field::TimeRfc3339,
            "time_unix_ms" => Field::TimeUnixMs,
            "upstream_addr" => Field::UpstreamAddr,
            "upstream_service" => Field::UpstreamService,
            "upstream_url" => Field::UpstreamUrl,
            _ => return Err(AccessLogError::UnknownField(name.to_string())),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Field(Field),
}

/// A parsed access log template.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessFormat(Vec<Segment>);

impl FromStr for AccessFormat {
    type Err = AccessLogError;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        let template = match format {
            "common" => COMMON_FORMAT,
            "combined" => COMBINED_FORMAT,
            custom => custom,
        };

        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = template.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            if c != '$' {
                text.push(c);
                continue;
            }
            let start = idx + 1;
            let mut end = start;
            if !chars.peek().is_some_and(|&(_, c)| c.is_ascii_alphabetic()) {
                text.push('$');
                continue;
            }
            while let Some(&(i, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    end = i + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            segments.push(Segment::Field(template[start..end].parse()?));
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(AccessFormat(segments))
    }
}

/// Everything known about one finished request.
pub struct Entry<'a> {
    pub peer: SocketAddr,
    pub time: OffsetDateTime,
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub version: Version,
    pub host: &'a str,
    pub tls: bool,
    pub headers: &'a HeaderMap,
    pub status: u16,
    pub body_size: Option<u64>,
    pub elapsed: Duration,
    pub upstream: Option<&'a Target>,
}

impl AccessFormat {
    pub fn render(&self, entry: &Entry<'_>) -> String {
        let mut out = String::new();
        for segment in &self.0 {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(field) => render_field(&mut out, field, entry),
            }
        }
        out
    }
}

fn render_field(out: &mut String, field: &Field, e: &Entry<'_>) {
    let path_and_query = e.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let _ = match field {
        Field::RemoteAddr => write!(out, "{}", e.peer),
        Field::RemoteHost => write!(out, "{}", e.peer.ip()),
        Field::RemotePort => write!(out, "{}", e.peer.port()),
        Field::Request => write!(out, "{} {} {:?}", e.method, path_and_query, e.version),
        Field::RequestArgs => write!(out, "{}", e.uri.query().unwrap_or_default()),
        Field::RequestHost => write!(out, "{}", e.host),
        Field::RequestMethod => write!(out, "{}", e.method),
        Field::RequestProto => write!(out, "{:?}", e.version),
        Field::RequestScheme => write!(out, "{}", if e.tls { "https" } else { "http" }),
        Field::RequestUri => write!(out, "{path_and_query}"),
        Field::ResponseBodySize => match e.body_size {
            Some(size) => write!(out, "{size}"),
            None => write!(out, "-"),
        },
        Field::ResponseStatus => write!(out, "{}", e.status),
        Field::ResponseTimeMs => write!(out, "{}", e.elapsed.as_millis()),
        Field::ResponseTimeUs => write!(out, "{}", e.elapsed.as_micros()),
        Field::TimeCommon => {
            let common = format_description!(
                "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
            );
            write!(out, "{}", e.time.format(common).unwrap_or_else(|_| "-".into()))
        }
        Field::TimeRfc3339 => write!(out, "{}", e.time.format(&Rfc3339).unwrap_or_else(|_| "-".into())),
        Field::TimeUnixMs => write!(out, "{}", e.time.unix_timestamp_nanos() / 1_000_000),
        Field::UpstreamAddr => write!(out, "{}", e.upstream.map(|t| t.addr.as_str()).unwrap_or("-")),
        Field::UpstreamService => write!(out, "{}", e.upstream.map(|t| t.service.as_str()).unwrap_or("-")),
        Field::UpstreamUrl => write!(out, "{}", e.upstream.map(|t| t.url.as_str()).unwrap_or("-")),
        Field::Header(name) => write!(
            out,
            "{}",
            e.headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("-")
        ),
    };
}

enum Sink {
    Log,
    Writer(Mutex<Box<dyn Write + Send>>),
}

/// Formats entries and writes one line per request.
pub struct AccessLog {
    format: AccessFormat,
    sink: Sink,
}

impl AccessLog {
    /// `None` when access logging is disabled.
    pub fn from_config(config: &LogConfig) -> Result<Option<Self>, AccessLogError> {
        let format: AccessFormat = config.access_format.parse()?;
        match config.access_target.as_str() {
            "" => Ok(None),
            "stdout" => Ok(Some(Self::to_writer(format, io::stdout()))),
            "log" => Ok(Some(Self { format, sink: Sink::Log })),
            other => Err(AccessLogError::UnknownTarget(other.to_string())),
        }
    }

    pub fn to_writer(format: AccessFormat, writer: impl Write + Send + 'static) -> Self {
        Self {
            format,
            sink: Sink::Writer(Mutex::new(Box::new(writer))),
        }
    }

    pub fn record(&self, entry: &Entry<'_>) {
        let line = self.format.render(entry);
        match &self.sink {
            Sink::Log => tracing::info!(target: "access", "{line}"),
            Sink::Writer(writer) => {
                if let Ok(mut writer) = writer.lock() {
                    if let Err(e) = writeln!(writer, "{line}") {
                        tracing::warn!(error = %e, "access log write failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use time::macros::datetime;
    use url::Url;

    fn target() -> Target {
        Target {
            service: "web".into(),
            tags: Vec::new(),
            url: Url::parse("http://10.0.0.1:8080/").unwrap(),
            addr: "10.0.0.1:8080".into(),
            strip_path: None,
            tls_skip_verify: false,
            weight: 1.0,
        }
    }

    fn render(format: &str, upstream: Option<&Target>) -> String {
        let uri: Uri = "/index.html?lang=en".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));
        let entry = Entry {
            peer: "192.168.1.5:40000".parse().unwrap(),
            time: datetime!(2024-03-09 14:05:07 UTC),
            method: &Method::GET,
            uri: &uri,
            version: Version::HTTP_11,
            host: "example.com",
            tls: false,
            headers: &headers,
            status: 200,
            body_size: Some(512),
            elapsed: Duration::from_micros(1500),
            upstream,
        };
        format.parse::<AccessFormat>().unwrap().render(&entry)
    }

    #[test]
    fn common_format() {
        assert_eq!(
            render("common", None),
            r#"192.168.1.5 - - [09/Mar/2024:14:05:07 +0000] "GET /index.html?lang=en HTTP/1.1" 200 512"#
        );
    }

    #[test]
    fn combined_format_adds_headers() {
        let line = render("combined", None);
        assert!(line.ends_with(r#" 200 512 "-" "curl/8.0""#), "{line}");
    }

    #[test]
    fn custom_fields() {
        let t = target();
        assert_eq!(
            render("$request_method $request_uri $request_args -> $upstream_service@$upstream_addr", Some(&t)),
            "GET /index.html?lang=en lang=en -> web@10.0.0.1:8080"
        );
        assert_eq!(render("$response_time_ms/$response_time_us", None), "1/1500");
        assert_eq!(render("$upstream_addr cost $5", None), "- cost $5");
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert_eq!(
            "$remote_host $bogus".parse::<AccessFormat>(),
            Err(AccessLogError::UnknownField("bogus".into()))
        );
    }

    #[test]
    fn target_selection() {
        let mut config = LogConfig::default();
        assert!(AccessLog::from_config(&config).unwrap().is_none());
        config.access_target = "stdout".into();
        assert!(AccessLog::from_config(&config).unwrap().is_some());
        config.access_target = "syslog".into();
        assert!(matches!(
            AccessLog::from_config(&config),
            Err(AccessLogError::UnknownTarget(_))
        ));
    }
}
