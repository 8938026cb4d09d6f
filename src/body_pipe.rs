//! The producer/consumer bridge between the session's STDIN records and a
//! request worker's byte-stream read (design note in §9: "not a callback
//! chain"). The session is the sole writer, the worker is the sole reader;
//! closing the write end yields EOF or a [`BodyError`] to the reader's next
//! read.

use crate::error::BodyError;
use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, SyncSender};

/// Bound on in-flight STDIN chunks before the session blocks writing into
/// the pipe, keeping memory bounded when a handler reads slower than the
/// client sends.
const CHANNEL_DEPTH: usize = 8;

enum Chunk {
    Data(Vec<u8>),
    Eof,
    Err(BodyError),
}

/// The session-owned write end of a request's body pipe.
pub struct PipeWriter {
    tx: SyncSender<Chunk>,
}

impl PipeWriter {
    /// Forwards a non-empty STDIN record payload. Returns `Ok(())` even if
    /// the worker has already stopped reading (a dropped receiver is not an
    /// error the session needs to act on).
    pub fn write(&self, data: Vec<u8>) {
        let _ = self.tx.send(Chunk::Data(data));
    }

    /// Signals a zero-length STDIN record: end of the body stream.
    pub fn close(&self) {
        let _ = self.tx.send(Chunk::Eof);
    }

    /// Closes the pipe with an error instead of EOF (`ABORT_REQUEST` or
    /// connection teardown).
    pub fn close_with_error(&self, err: BodyError) {
        let _ = self.tx.send(Chunk::Err(err));
    }
}

/// The worker-owned read end of a request's body pipe. Implements
/// [`Read`] so handlers consume it like any other byte stream.
pub struct PipeReader {
    rx: Receiver<Chunk>,
    buf: Vec<u8>,
    pos: usize,
    done: Option<Option<BodyError>>,
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.buf.len() {
                let n = (self.buf.len() - self.pos).min(out.len());
                out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }

            if let Some(terminal) = &self.done {
                return match terminal {
                    None => Ok(0),
                    Some(err) => Err(io::Error::from(*err)),
                };
            }

            match self.rx.recv() {
                Ok(Chunk::Data(data)) => {
                    self.buf = data;
                    self.pos = 0;
                }
                Ok(Chunk::Eof) => self.done = Some(None),
                Ok(Chunk::Err(err)) => self.done = Some(Some(err)),
                Err(_) => self.done = Some(Some(BodyError::ConnClosed)),
            }
        }
    }
}

/// Creates a request's body pipe. `first_chunk` seeds the pipe with the
/// first STDIN record already observed by the session (possibly empty,
/// meaning the body is immediately EOF).
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            buf: Vec::new(),
            pos: 0,
            done: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_chunks_in_order_then_eof() {
        let (writer, mut reader) = pipe();
        writer.write(b"HEL".to_vec());
        writer.write(b"LO".to_vec());
        writer.close();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"HELLO");
    }

    #[test]
    fn empty_first_chunk_is_immediate_eof() {
        let (writer, mut reader) = pipe();
        writer.close();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn abort_surfaces_as_error_on_next_read() {
        let (writer, mut reader) = pipe();
        writer.close_with_error(BodyError::Aborted);

        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.to_string(), BodyError::Aborted.to_string());
    }

    #[test]
    fn dropped_writer_surfaces_as_conn_closed() {
        let (writer, mut reader) = pipe();
        drop(writer);

        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.to_string(), BodyError::ConnClosed.to_string());
    }
}
