//! CGI → HTTP translation (component 4.F).
//!
//! Turns the parsed PARAMS mapping of a request into a structured
//! [`HttpRequest`]. Grounded in `original_source/src/fastcgi/fcgi.go`'s
//! `RequestFromMap`, generalized to the byte-string params this engine
//! carries instead of Go's `map[string]string`.

use crate::body_pipe::PipeReader;
use crate::error::TranslationError;
use crate::record::Pairs;
use convert_case::{Case, Casing};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// The bookkeeping request header carrying `SCRIPT_FILENAME`, so a handler
/// can locate the file the web server resolved for this request.
pub const SCRIPT_FILENAME_HEADER: &str = "X-Script-Filename";

/// A structured HTTP request assembled from FastCGI PARAMS, with the
/// request body exposed as a byte stream fed by STDIN records.
pub struct HttpRequest {
    pub method: http::Method,
    pub uri: http::Uri,
    pub proto_major: u16,
    pub proto_minor: u16,
    pub headers: BTreeMap<String, String>,
    pub content_length: Option<i64>,
    pub tls: bool,
    pub remote_addr: String,
    /// The responder never pools connections to itself.
    pub close: bool,
    pub body: PipeReader,
}

fn param<'a>(params: &'a Pairs, name: &str) -> Option<&'a str> {
    params
        .get(name.as_bytes())
        .and_then(|v| std::str::from_utf8(v).ok())
        .filter(|s| !s.is_empty())
}

fn parse_server_protocol(value: &str) -> Option<(u16, u16)> {
    let version = value.strip_prefix("HTTP/")?;
    let (major, minor) = version.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// `HTTP_X_FORWARDED_FOR` → `X-Forwarded-For`.
fn canonicalize_header_name(cgi_name: &str) -> String {
    cgi_name
        .strip_prefix("HTTP_")
        .unwrap_or(cgi_name)
        .to_case(Case::Train)
}

fn remote_addr(params: &Pairs) -> String {
    let host = param(params, "REMOTE_ADDR").unwrap_or("");
    let port: u16 = param(params, "REMOTE_PORT")
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("[{ip}]:{port}"),
        _ => format!("{host}:{port}"),
    }
}

fn build_uri(params: &Pairs, tls: bool) -> Result<http::Uri, TranslationError> {
    let path = match param(params, "REQUEST_URI") {
        Some(uri) => uri.to_string(),
        None => {
            let script_name = param(params, "SCRIPT_NAME").unwrap_or("");
            let path_info = param(params, "PATH_INFO").unwrap_or("");
            let query = param(params, "QUERY_STRING").unwrap_or("");
            if query.is_empty() {
                format!("{script_name}{path_info}")
            } else {
                format!("{script_name}{path_info}?{query}")
            }
        }
    };

    if let Some(host) = param(params, "HTTP_HOST") {
        let scheme = if tls { "https" } else { "http" };
        let absolute = format!("{scheme}://{host}{path}");
        if let Ok(uri) = absolute.parse() {
            return Ok(uri);
        }
    }

    path.parse().map_err(|_| TranslationError::InvalidUrl)
}

/// Translates a request's full PARAMS mapping into a structured HTTP
/// request. `body` is the pipe reader already attached to this request by
/// the session.
pub fn translate(params: &Pairs, body: PipeReader) -> Result<HttpRequest, TranslationError> {
    let method_str = param(params, "REQUEST_METHOD").ok_or(TranslationError::MissingMethod)?;
    let method = method_str
        .parse::<http::Method>()
        .map_err(|_| TranslationError::InvalidMethod)?;

    let (proto_major, proto_minor) = param(params, "SERVER_PROTOCOL")
        .and_then(parse_server_protocol)
        .ok_or(TranslationError::InvalidProtocol)?;

    let content_length = param(params, "CONTENT_LENGTH")
        .map(|v| v.parse::<i64>().map_err(|_| TranslationError::InvalidContentLength))
        .transpose()?;

    let tls = matches!(param(params, "HTTPS"), Some("on" | "ON" | "1"));

    let mut headers = BTreeMap::new();
    if let Some(content_type) = param(params, "CONTENT_TYPE") {
        headers.insert("Content-Type".to_string(), content_type.to_string());
    }
    for (name, value) in params.iter() {
        let Ok(name) = std::str::from_utf8(name) else {
            continue;
        };
        if name == "HTTP_HOST" || !name.starts_with("HTTP_") {
            continue;
        }
        let Ok(value) = std::str::from_utf8(value) else {
            continue;
        };
        headers.insert(canonicalize_header_name(name), value.to_string());
    }
    if let Some(script_filename) = param(params, "SCRIPT_FILENAME") {
        headers.insert(SCRIPT_FILENAME_HEADER.to_string(), script_filename.to_string());
    }

    let uri = build_uri(params, tls)?;

    Ok(HttpRequest {
        method,
        uri,
        proto_major,
        proto_minor,
        headers,
        content_length,
        tls,
        remote_addr: remote_addr(params),
        close: true,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body_pipe::pipe;

    fn params(pairs: &[(&str, &str)]) -> Pairs {
        pairs
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn translates_minimal_get() {
        let p = params(&[
            ("REQUEST_METHOD", "GET"),
            ("SERVER_PROTOCOL", "HTTP/1.1"),
            ("REQUEST_URI", "/hi"),
            ("HTTP_HOST", "x"),
        ]);
        let (_w, r) = pipe();
        let req = translate(&p, r).unwrap();
        assert_eq!(req.method, http::Method::GET);
        assert_eq!(req.proto_major, 1);
        assert_eq!(req.proto_minor, 1);
        assert_eq!(req.uri, "http://x/hi");
    }

    #[test]
    fn missing_method_is_an_error() {
        let p = params(&[("SERVER_PROTOCOL", "HTTP/1.1")]);
        let (_w, r) = pipe();
        assert!(matches!(
            translate(&p, r),
            Err(TranslationError::MissingMethod)
        ));
    }

    #[test]
    fn canonicalizes_forwarded_for_header() {
        assert_eq!(
            canonicalize_header_name("HTTP_X_FORWARDED_FOR"),
            "X-Forwarded-For"
        );
    }

    #[test]
    fn synthesizes_uri_from_script_name_and_query() {
        let p = params(&[
            ("REQUEST_METHOD", "GET"),
            ("SERVER_PROTOCOL", "HTTP/1.1"),
            ("SCRIPT_NAME", "/app"),
            ("PATH_INFO", "/a"),
            ("QUERY_STRING", "q=1"),
        ]);
        let (_w, r) = pipe();
        let req = translate(&p, r).unwrap();
        assert_eq!(req.uri, "/app/a?q=1");
    }

    #[test]
    fn remote_addr_brackets_ipv6() {
        let p = params(&[
            ("REQUEST_METHOD", "GET"),
            ("SERVER_PROTOCOL", "HTTP/1.1"),
            ("REMOTE_ADDR", "::1"),
            ("REMOTE_PORT", "9000"),
        ]);
        let (_w, r) = pipe();
        let req = translate(&p, r).unwrap();
        assert_eq!(req.remote_addr, "[::1]:9000");
    }
}
