//! The per-connection session loop (component 4.D): reads records, routes
//! them by request id, maintains the request table, and serializes writes.
//! Grounded in the teacher's `minifcgi.rs::run` dispatch loop, generalized
//! from "one request per connection, no multiplexing" to full request-id
//! multiplexing.

use crate::body_pipe::{self, PipeReader};
use crate::connection::{self, FramedWriter, TcpSharedWriter};
use crate::error::{BodyError, Error};
use crate::record::{
    self, decode_pairs, encode_pairs, BeginRequestBody, EndRequestBody, Pairs, ProtocolStatus,
};
use crate::request::RequestState;
use crate::response::ResponseWriter;
use crate::translate;
use std::collections::HashMap;
use std::io;
use std::net::TcpStream;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, RwLock};

/// The handler contract from §6: given a translated request and a response
/// writer, write a response and return.
pub type Handler =
    dyn Fn(translate::HttpRequest, ResponseWriter<io::BufWriter<TcpStream>>) + Send + Sync;

type Table = Arc<RwLock<HashMap<u16, RequestState>>>;

struct WorkerDone {
    request_id: u16,
    app_status: u32,
}

/// Runs one connection's session loop to completion (connection close or
/// protocol error). Does not return until the connection is torn down.
pub fn run(stream: TcpStream, handler: Arc<Handler>) {
    let (mut reader, shared) = match connection::split(stream) {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!(error:err = e; "failed to prepare accepted connection");
            return;
        }
    };

    let table: Table = Arc::new(RwLock::new(HashMap::new()));
    let (done_tx, done_rx) = mpsc::channel::<WorkerDone>();
    let mut saw_non_keep_alive = false;

    loop {
        match reader.read_record() {
            Ok((header, content)) => {
                match dispatch(header.type_id, header.request_id, &content, &table, &shared, &handler, &done_tx)
                {
                    Ok(()) => {}
                    Err(e) => {
                        log::warn!(error:err = e; "protocol error on connection; closing");
                        break;
                    }
                }
            }
            Err(Error::UnexpectedSocketClose(io_err))
                if matches!(io_err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                if !drain_completed(&table, &shared, &done_rx, &mut saw_non_keep_alive) {
                    break;
                }
                continue;
            }
            Err(e) => {
                log::warn!(error:err = e; "connection closed");
                break;
            }
        }

        if !drain_completed(&table, &shared, &done_rx, &mut saw_non_keep_alive) {
            break;
        }
    }

    teardown(&table);
}

/// Drains any workers that finished since the last check, writing their
/// `END_REQUEST` and removing their table entry. A request whose
/// `BEGIN_REQUEST` didn't set `FCGI_KEEP_CONN` marks the connection for
/// closing, but other requests may still be in flight — the close only
/// takes effect once the table has drained completely, not on the first
/// such completion.
fn drain_completed(
    table: &Table,
    shared: &TcpSharedWriter,
    done_rx: &mpsc::Receiver<WorkerDone>,
    saw_non_keep_alive: &mut bool,
) -> bool {
    while let Ok(done) = done_rx.try_recv() {
        let keep_alive = table
            .write()
            .unwrap()
            .remove(&done.request_id)
            .map(|s| s.keep_alive)
            .unwrap_or(true);

        if let Err(e) = write_end_request(
            shared,
            done.request_id,
            done.app_status,
            ProtocolStatus::RequestComplete,
        ) {
            log::warn!(error:err = e; "failed to write END_REQUEST");
        }

        if !keep_alive {
            *saw_non_keep_alive = true;
        }
    }

    !(*saw_non_keep_alive && table.read().unwrap().is_empty())
}

fn teardown(table: &Table) {
    let mut table = table.write().unwrap();
    for (_, state) in table.iter_mut() {
        state.close_stdin_with_error(BodyError::ConnClosed);
    }
    table.clear();
}

fn write_end_request(
    shared: &TcpSharedWriter,
    request_id: u16,
    app_status: u32,
    protocol_status: ProtocolStatus,
) -> io::Result<()> {
    let body = EndRequestBody::new(app_status, protocol_status);
    let mut bytes = Vec::new();
    body.to_record_bytes(&mut bytes)?;
    shared
        .lock()
        .unwrap()
        .write_packet(record::FCGI_END_REQUEST, request_id, &bytes)
}

fn write_unknown_type(shared: &TcpSharedWriter, type_id: u8) -> io::Result<()> {
    let mut body = [0u8; 8];
    body[0] = type_id;
    shared
        .lock()
        .unwrap()
        .write_packet(record::FCGI_UNKNOWN_TYPE, record::MANAGEMENT_REQUEST_ID, &body)
}

fn write_get_values_result(shared: &TcpSharedWriter, requested: &Pairs) -> io::Result<()> {
    let mut result = Pairs::new();
    for name in requested.keys() {
        let value = match name.as_slice() {
            b"FCGI_MAX_CONNS" => "1",
            b"FCGI_MAX_REQS" => "1",
            b"FCGI_MPXS_CONNS" => "1",
            _ => continue,
        };
        result.insert(name.clone(), value.as_bytes().to_vec());
    }

    let mut bytes = Vec::new();
    encode_pairs(&result, &mut bytes)?;
    shared
        .lock()
        .unwrap()
        .write_packet(record::FCGI_GET_VALUES_RESULT, record::MANAGEMENT_REQUEST_ID, &bytes)
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    type_id: u8,
    request_id: u16,
    content: &[u8],
    table: &Table,
    shared: &TcpSharedWriter,
    handler: &Arc<Handler>,
    done_tx: &mpsc::Sender<WorkerDone>,
) -> Result<(), Error> {
    if request_id != 0
        && type_id != record::FCGI_BEGIN_REQUEST
        && type_id != record::FCGI_GET_VALUES
        && !table.read().unwrap().contains_key(&request_id)
    {
        return Ok(());
    }

    match type_id {
        record::FCGI_BEGIN_REQUEST => {
            let body = BeginRequestBody::from_record_bytes(content)?;

            if table.read().unwrap().contains_key(&request_id) {
                return Err(Error::DuplicateBeginRequest(request_id));
            }

            if !body.role().supported() {
                let _ = write_end_request(shared, request_id, 0, ProtocolStatus::UnknownRole);
                return Ok(());
            }

            table
                .write()
                .unwrap()
                .insert(request_id, RequestState::new(body.keep_alive()));
            Ok(())
        }

        record::FCGI_PARAMS => {
            let mut table = table.write().unwrap();
            if let Some(state) = table.get_mut(&request_id) {
                if content.is_empty() {
                    state.finish_params()?;
                } else {
                    state.append_params(content);
                }
            }
            Ok(())
        }

        record::FCGI_STDIN => {
            let spawn_info = {
                let mut table = table.write().unwrap();
                let Some(state) = table.get_mut(&request_id) else {
                    return Ok(());
                };

                let mut spawn = None;
                if !state.started {
                    state.started = true;
                    let (writer, pipe_reader) = body_pipe::pipe();
                    state.attach_stdin(writer);
                    let params = state.params.clone().unwrap_or_default();
                    spawn = Some((params, pipe_reader));
                }
                state.feed_stdin(request_id, content)?;
                spawn
            };

            if let Some((params, pipe_reader)) = spawn_info {
                spawn_worker(request_id, params, pipe_reader, shared.clone(), handler.clone(), done_tx.clone());
            }
            Ok(())
        }

        record::FCGI_ABORT_REQUEST => {
            if let Some(state) = table.write().unwrap().get_mut(&request_id) {
                state.close_stdin_with_error(BodyError::Aborted);
            }
            Ok(())
        }

        record::FCGI_GET_VALUES => {
            let requested = decode_pairs(content)?;
            let _ = write_get_values_result(shared, &requested);
            Ok(())
        }

        _ => {
            let _ = write_unknown_type(shared, type_id);
            Ok(())
        }
    }
}

fn spawn_worker(
    request_id: u16,
    params: Pairs,
    body: PipeReader,
    shared: TcpSharedWriter,
    handler: Arc<Handler>,
    done_tx: mpsc::Sender<WorkerDone>,
) {
    std::thread::spawn(move || {
        let app_status = match translate::translate(&params, body) {
            Ok(request) => {
                let stdout = FramedWriter::new(shared, record::FCGI_STDOUT, request_id);
                let response = ResponseWriter::new(stdout);
                match panic::catch_unwind(AssertUnwindSafe(|| handler(request, response))) {
                    Ok(()) => 0,
                    Err(_) => 1,
                }
            }
            Err(e) => {
                let mut stderr = FramedWriter::new(shared.clone(), record::FCGI_STDERR, request_id);
                let _ = stderr.write(e.to_string().as_bytes());
                let _ = stderr.close();
                let mut stdout = FramedWriter::new(shared, record::FCGI_STDOUT, request_id);
                let _ = stdout.close();
                1
            }
        };

        let _ = done_tx.send(WorkerDone { request_id, app_status });
    });
}
