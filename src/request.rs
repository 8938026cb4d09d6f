//! Per-request-id state (component 4.E, folded into the session dispatcher
//! per SPEC_FULL.md). Tracks everything needed to know whether PARAMS are
//! complete, whether STDIN is open, and whether the worker has been
//! started — the invariants the session dispatcher enforces while reading
//! records for a given request id.

use crate::body_pipe::PipeWriter;
use crate::error::{BodyError, Error};
use crate::record::{decode_pairs, Pairs};

/// Per-request-id state, owned exclusively by the connection session.
pub(crate) struct RequestState {
    pub keep_alive: bool,
    raw_params: Vec<u8>,
    pub params: Option<Pairs>,
    stdin: Option<PipeWriter>,
    stdin_closed: bool,
    pub started: bool,
}

impl RequestState {
    pub fn new(keep_alive: bool) -> Self {
        Self {
            keep_alive,
            raw_params: Vec::new(),
            params: None,
            stdin: None,
            stdin_closed: false,
            started: false,
        }
    }

    /// Appends a non-empty `PARAMS` record's content to the accumulating
    /// buffer.
    pub fn append_params(&mut self, content: &[u8]) {
        self.raw_params.extend_from_slice(content);
    }

    /// Parses the accumulated PARAMS buffer on the zero-length terminator.
    pub fn finish_params(&mut self) -> Result<(), Error> {
        let pairs = decode_pairs(&self.raw_params)?;
        self.params = Some(pairs);
        Ok(())
    }

    pub fn params_complete(&self) -> bool {
        self.params.is_some()
    }

    /// Registers the pipe writer handle once the worker has been spawned
    /// for this request (on the first STDIN record).
    pub fn attach_stdin(&mut self, writer: PipeWriter) {
        self.stdin = Some(writer);
    }

    /// Forwards STDIN content, or closes the pipe on the zero-length
    /// terminator. Returns `Err` if STDIN arrives again after it was
    /// already closed — the stricter contract this spec mandates instead
    /// of silently dropping the record (see design notes on the source's
    /// STDIN handling).
    pub fn feed_stdin(&mut self, request_id: u16, content: &[u8]) -> Result<(), Error> {
        if self.stdin_closed {
            return Err(Error::StdinAfterClose(request_id));
        }

        let Some(writer) = &self.stdin else {
            return Ok(());
        };

        if content.is_empty() {
            writer.close();
            self.stdin_closed = true;
        } else {
            writer.write(content.to_vec());
        }

        Ok(())
    }

    /// Closes the request's body pipe with an error — used for
    /// `ABORT_REQUEST` and connection teardown. No-op if STDIN never
    /// arrived yet (the worker hasn't started and has nothing to unblock).
    pub fn close_stdin_with_error(&mut self, err: BodyError) {
        if let Some(writer) = &self.stdin {
            writer.close_with_error(err);
        }
        self.stdin_closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_after_close_is_an_error() {
        let mut state = RequestState::new(false);
        let (writer, _reader) = crate::body_pipe::pipe();
        state.attach_stdin(writer);

        state.feed_stdin(1, b"hi").unwrap();
        state.feed_stdin(1, b"").unwrap();
        assert!(matches!(
            state.feed_stdin(1, b"late"),
            Err(Error::StdinAfterClose(1))
        ));
    }

    #[test]
    fn params_round_trip_through_raw_buffer() {
        let mut state = RequestState::new(true);
        let mut encoded = Vec::new();
        let mut pairs = Pairs::new();
        pairs.insert(b"A".to_vec(), b"1".to_vec());
        crate::record::encode_pairs(&pairs, &mut encoded).unwrap();

        state.append_params(&encoded);
        assert!(!state.params_complete());
        state.finish_params().unwrap();
        assert_eq!(state.params, Some(pairs));
    }
}
