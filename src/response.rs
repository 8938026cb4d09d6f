//! The response adapter (component 4.G): exposes an HTTP-response-writer
//! surface to the handler and emits the CGI status/header block once,
//! followed by body bytes, as `STDOUT` records.

use crate::connection::FramedWriter;
use std::collections::BTreeMap;
use std::io::{self, Write};

fn http_date_now() -> String {
    chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// A minimal, narrowly-scoped subset of content-type sniffing (the crates
/// in this pack don't carry a sniffer for CGI's specific use case). Checks
/// the handful of signatures common enough to matter for a responder that
/// mostly serves text and files, falling back to a binary/text split.
fn sniff_content_type(chunk: &[u8]) -> &'static str {
    const SNIFFS: &[(&[u8], &str)] = &[
        (b"%PDF-", "application/pdf"),
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"PK\x03\x04", "application/zip"),
        (b"<?xml", "text/xml; charset=utf-8"),
    ];

    for (sig, mime) in SNIFFS {
        if chunk.starts_with(sig) {
            return mime;
        }
    }

    let head = &chunk[..chunk.len().min(512)];
    let looks_like_html = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|i| head[i..].to_ascii_lowercase().starts_with(b"<"))
        .unwrap_or(false);
    if looks_like_html {
        return "text/html; charset=utf-8";
    }

    if std::str::from_utf8(head).is_ok() {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

/// Exposed to the handler as `(request, response_writer)` per the handler
/// contract in §6. Owns the `STDOUT` framed writer for one request-id.
pub struct ResponseWriter<W> {
    status: Option<u16>,
    headers: BTreeMap<String, String>,
    header_written: bool,
    stdout: FramedWriter<W>,
}

impl<W: Write> ResponseWriter<W> {
    pub(crate) fn new(stdout: FramedWriter<W>) -> Self {
        Self {
            status: None,
            headers: BTreeMap::new(),
            header_written: false,
            stdout,
        }
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn write_status(&mut self, code: u16) {
        self.status = Some(code);
    }

    /// Writes body bytes, emitting the CGI header block exactly once
    /// before the first call's bytes.
    pub fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if !self.header_written {
            self.write_header_block(bytes)?;
        }
        self.stdout.write(bytes)?;
        Ok(bytes.len())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()
    }

    fn write_header_block(&mut self, first_chunk: &[u8]) -> io::Result<()> {
        self.header_written = true;
        let code = self.status.unwrap_or(200);

        if code == 304 {
            self.headers.remove("Content-Type");
            self.headers.remove("Content-Length");
            self.headers.remove("Transfer-Encoding");
        } else if !self.headers.contains_key("Content-Type") {
            self.headers
                .insert("Content-Type".to_string(), sniff_content_type(first_chunk).to_string());
        }

        self.headers
            .entry("Date".to_string())
            .or_insert_with(http_date_now);

        let reason = http::StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("");

        let mut block = Vec::new();
        write!(block, "Status: {code} {reason}\r\n")?;
        for (name, value) in &self.headers {
            write!(block, "{name}: {value}\r\n")?;
        }
        write!(block, "\r\n")?;
        self.stdout.write(&block)
    }
}

impl<W: Write> Drop for ResponseWriter<W> {
    /// Finalizes the response when the handler returns (or panics and
    /// unwinds): emits the header block if the handler never wrote a body,
    /// then the `STDOUT` stream terminator. This is what lets a handler
    /// panic still produce a well-formed, if empty, response instead of
    /// leaving the stream dangling.
    fn drop(&mut self) {
        if !self.header_written {
            let _ = self.write_header_block(&[]);
        }
        let _ = self.stdout.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{RecordReader, RecordWriter};
    use crate::record::FCGI_STDOUT;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    fn written_bytes(shared: &Arc<Mutex<RecordWriter<Cursor<Vec<u8>>>>>) -> Vec<u8> {
        let mut reader = RecordReader::new(Cursor::new(shared.lock().unwrap().inner.get_ref().clone()));
        let mut out = Vec::new();
        loop {
            let (_, content) = reader.read_record().unwrap();
            if content.is_empty() {
                break;
            }
            out.extend(content);
        }
        out
    }

    #[test]
    fn default_status_is_200_and_date_is_filled() {
        let shared = Arc::new(Mutex::new(RecordWriter::new(Cursor::new(Vec::new()))));
        let mut response = ResponseWriter::new(FramedWriter::new(shared.clone(), FCGI_STDOUT, 1));
        response.write(b"hello").unwrap();
        drop(response);

        let out = String::from_utf8(written_bytes(&shared)).unwrap();
        assert!(out.starts_with("Status: 200 OK\r\n"));
        assert!(out.contains("Date: "));
        assert!(out.ends_with("hello"));
    }

    #[test]
    fn status_304_strips_content_headers() {
        let shared = Arc::new(Mutex::new(RecordWriter::new(Cursor::new(Vec::new()))));
        let mut response = ResponseWriter::new(FramedWriter::new(shared.clone(), FCGI_STDOUT, 1));
        response.write_status(304);
        response.set_header("Content-Type", "text/plain");
        response.set_header("Content-Length", "5");
        response.write(b"").unwrap();
        drop(response);

        let out = String::from_utf8(written_bytes(&shared)).unwrap();
        assert!(out.starts_with("Status: 304 Not Modified\r\n"));
        assert!(!out.contains("Content-Type"));
        assert!(!out.contains("Content-Length"));
    }

    #[test]
    fn sniffs_html_when_content_type_unset() {
        let shared = Arc::new(Mutex::new(RecordWriter::new(Cursor::new(Vec::new()))));
        let mut response = ResponseWriter::new(FramedWriter::new(shared.clone(), FCGI_STDOUT, 1));
        response.write(b"<!doctype html><html></html>").unwrap();
        drop(response);

        let out = String::from_utf8(written_bytes(&shared)).unwrap();
        assert!(out.contains("Content-Type: text/html; charset=utf-8"));
    }
}
