//! The FastCGI record framing layer (component 4.A/4.C).
//!
//! A FastCGI client may split a logical stream record (`PARAMS`, `STDIN`,
//! `STDOUT`, `STDERR`, `DATA`) across several packets of the same type,
//! terminated by an empty one. The teacher's `minifcgi::Request::add_record`
//! reassembles those packets itself, which only works if a connection
//! carries a single request at a time. This engine multiplexes requests by
//! id, so reassembly has to happen per request id, not per connection —
//! [`RecordReader`] therefore decodes exactly one physical packet per call
//! and leaves accumulation to the session dispatcher.

use crate::error::Error;
use crate::record::MAXCONTENT;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The 8-byte header shared by every FastCGI record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub type_id: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

const FCGI_VERSION_1: u8 = 1;

fn padding_len(content_length: usize) -> u8 {
    ((8 - (content_length % 8)) % 8) as u8
}

/// Reads one physical FastCGI packet at a time off a byte stream.
#[derive(Debug)]
pub struct RecordReader<R> {
    inner: R,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads a single packet: its header, content and trailing padding.
    /// Does not attempt to reassemble a multi-packet stream record — see
    /// the module docs.
    pub fn read_record(&mut self) -> Result<(Header, Vec<u8>), Error> {
        let mut header_bytes = [0u8; 8];
        self.inner
            .read_exact(&mut header_bytes)
            .map_err(Error::UnexpectedSocketClose)?;

        let [version, type_id, req_id_1, req_id_0, length_1, length_0, padding_length, _reserved] =
            header_bytes;

        if version != FCGI_VERSION_1 {
            return Err(Error::UnsupportedVersion(version));
        }

        let request_id = u16::from_be_bytes([req_id_1, req_id_0]);
        let content_length = u16::from_be_bytes([length_1, length_0]);

        let mut content = vec![0u8; content_length as usize];
        self.inner
            .read_exact(&mut content)
            .map_err(Error::UnexpectedSocketClose)?;

        let mut padding = vec![0u8; padding_length as usize];
        self.inner
            .read_exact(&mut padding)
            .map_err(Error::UnexpectedSocketClose)?;

        Ok((
            Header {
                type_id,
                request_id,
                content_length,
                padding_length,
            },
            content,
        ))
    }
}

/// Writes FastCGI packets to a byte stream, chunking oversized content and
/// padding every packet out to a multiple of 8 bytes.
#[derive(Debug)]
pub struct RecordWriter<W> {
    inner: W,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes `content` as a single packet. Panics if it doesn't fit in the
    /// 16-bit content-length field; callers that can't bound their content
    /// up front should use [`Self::write_stream`] instead.
    pub fn write_packet(&mut self, type_id: u8, request_id: u16, content: &[u8]) -> io::Result<()> {
        assert!(content.len() <= MAXCONTENT, "record content too large");

        let padding = padding_len(content.len());

        self.inner.write_all(&[FCGI_VERSION_1, type_id])?;
        self.inner.write_all(&request_id.to_be_bytes())?;
        self.inner.write_all(&(content.len() as u16).to_be_bytes())?;
        self.inner.write_all(&[padding, 0])?;
        self.inner.write_all(content)?;
        self.inner.write_all(&vec![0u8; padding as usize])?;
        Ok(())
    }

    /// Writes a stream record (`STDOUT`/`STDERR`/`PARAMS`/`STDIN`/`DATA`),
    /// splitting `content` into `MAXCONTENT`-sized packets and always
    /// terminating with an empty packet, as the protocol requires.
    pub fn write_stream(&mut self, type_id: u8, request_id: u16, content: &[u8]) -> io::Result<()> {
        if content.is_empty() {
            return self.write_packet(type_id, request_id, &[]);
        }

        for chunk in content.chunks(MAXCONTENT) {
            self.write_packet(type_id, request_id, chunk)?;
        }
        self.write_packet(type_id, request_id, &[])
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A shared, lockable record writer: worker threads write `STDOUT`/`STDERR`
/// while the session thread writes `END_REQUEST`/management records, all
/// onto the same underlying socket. Generic so tests can share an in-memory
/// sink instead of a real `TcpStream`.
pub type SharedWriter<W> = Arc<Mutex<RecordWriter<W>>>;

/// The writer type produced by [`split`] for a real accepted connection.
pub type TcpSharedWriter = SharedWriter<io::BufWriter<TcpStream>>;

/// Splits an accepted connection into a session-owned reader and a writer
/// shared between the session thread and request worker threads.
///
/// A read timeout is set on the reader half so the session loop can
/// periodically check for finished workers instead of blocking forever
/// (see the session dispatcher).
pub fn split(
    stream: TcpStream,
) -> io::Result<(RecordReader<io::BufReader<TcpStream>>, TcpSharedWriter)> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(3)))?;
    let write_half = stream.try_clone()?;

    let reader = RecordReader::new(io::BufReader::new(stream));
    let writer = Arc::new(Mutex::new(RecordWriter::new(io::BufWriter::new(write_half))));
    Ok((reader, writer))
}

/// Component 4.C: an append-only byte sink over `(connection, type, req_id)`.
/// Buffers up to `MAXCONTENT` bytes and flushes a single record when full;
/// `close` flushes any residual bytes then emits the stream terminator.
/// Never emits `END_REQUEST` — that's the session's job.
///
/// The write mutex is only held across each record emission, not across a
/// caller's `write` call, so one slow writer can't stall another
/// request-id's output.
pub struct FramedWriter<W> {
    shared: SharedWriter<W>,
    type_id: u8,
    request_id: u16,
    buf: Vec<u8>,
}

impl<W: Write> FramedWriter<W> {
    pub fn new(shared: SharedWriter<W>, type_id: u8, request_id: u16) -> Self {
        Self {
            shared,
            type_id,
            request_id,
            buf: Vec::new(),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buf.extend_from_slice(bytes);
        while self.buf.len() >= MAXCONTENT {
            let rest = self.buf.split_off(MAXCONTENT);
            let mut shared = self.shared.lock().unwrap();
            shared.write_packet(self.type_id, self.request_id, &self.buf)?;
            self.buf = rest;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let mut shared = self.shared.lock().unwrap();
            shared.write_packet(self.type_id, self.request_id, &self.buf)?;
            self.buf.clear();
        }
        let mut shared = self.shared.lock().unwrap();
        shared.flush()
    }

    /// Flushes any residual bytes then emits the empty terminator record.
    pub fn close(&mut self) -> io::Result<()> {
        self.flush()?;
        let mut shared = self.shared.lock().unwrap();
        shared.write_packet(self.type_id, self.request_id, &[])
    }
}
