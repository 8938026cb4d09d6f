//! Component H: the server listener and its lifecycle handle.
//!
//! The teacher hands an already-open, already-listening socket down from
//! `mod_fcgid` on fd 0 instead of accepting connections itself, so this
//! module's event loop has no direct teacher counterpart: a mio `Poll`
//! blocks on `poll()`, dispatching accepted connections to a `threadpool`,
//! with a `Waker` used to implement graceful shutdown, in the idiom the
//! broader pack uses for this shape (see DESIGN.md). It carries a single
//! opaque handler callable per the handler contract in §6.

use crate::response::ResponseWriter;
use crate::session::{self, Handler};
use crate::translate::HttpRequest;
use mio::event::Events;
use mio::net::TcpListener;
use mio::{Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, IntoRawFd};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const SERVER: Token = Token(0);
const SHUTDOWN: Token = Token(1);

/// Configuration of a FastCGI responder server: just the handler callable
/// the session dispatcher invokes once a request is fully translated.
pub struct ServerSpec {
    handler: Arc<Handler>,
}

impl ServerSpec {
    /// Creates a new server specification around `handler`.
    ///
    /// `handler` is called once per FastCGI request, after PARAMS and the
    /// first STDIN record have arrived, with the translated request and a
    /// response writer bound to that request's `STDOUT` stream (see §6).
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(HttpRequest, ResponseWriter<io::BufWriter<std::net::TcpStream>>) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Starts the FastCGI server at `address` and returns a handle to it.
    ///
    /// Binding to port `0` will request that the OS assign an available
    /// port. This function does not block: the server runs on a separate
    /// thread.
    pub fn start(self, address: SocketAddr) -> Result<ServerHandle, io::Error> {
        create_handle(self.handler, address)
    }
}

/// The reason the server exited.
#[derive(Debug, Default)]
pub enum ServerExitReason {
    /// It was gracefully shut down.
    #[default]
    Normal,
    /// Polling the server socket for new connections failed somehow.
    Err(io::Error),
    /// The server loop panicked. The payload is the panic message.
    Panic(String),
}

/// Handle to a running FastCGI server.
pub struct ServerHandle {
    address: SocketAddr,
    server_loop: JoinHandle<ServerExitReason>,
    server_waker: Waker,
    observe_shutdown: Receiver<()>,
}

impl ServerHandle {
    /// Blocks until the server terminates and returns the reason.
    ///
    /// This function does not attempt to stop the server; use
    /// [`ServerHandle::stop`] for that.
    pub fn join(self) -> ServerExitReason {
        match self.server_loop.join() {
            Ok(r) => r,
            Err(any) => match any.as_ref().downcast_ref::<String>() {
                Some(s) => ServerExitReason::Panic(s.clone()),
                None => match any.as_ref().downcast_ref::<&str>() {
                    Some(s) => ServerExitReason::Panic(s.to_string()),
                    None => ServerExitReason::Panic(String::new()),
                },
            },
        }
    }

    /// Stops the FastCGI server.
    ///
    /// The server waits for all in-flight requests to complete before it
    /// shuts down.
    pub fn stop(self) {
        let Ok(()) = self.server_waker.wake() else {
            return;
        };
        let _ = self.observe_shutdown.recv();
    }

    /// Returns the address the server is currently listening on.
    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

struct EventLoop {
    socket: TcpListener,
    handler: Arc<Handler>,
    poll: Poll,
    events: Events,
    signal_shutdown: SyncSender<()>,
}

fn create_handle(handler: Arc<Handler>, address: SocketAddr) -> Result<ServerHandle, io::Error> {
    let mut socket = TcpListener::bind(address)?;
    let address = socket.local_addr()?;

    log::info!("FastCGI responder listening on {address}");

    let poll = Poll::new()?;
    let events = Events::with_capacity(128);
    let server_waker = Waker::new(poll.registry(), SHUTDOWN)?;

    poll.registry()
        .register(&mut socket, SERVER, Interest::READABLE)?;

    let (signal_shutdown, observe_shutdown) = sync_channel(0);

    let event_loop = EventLoop {
        socket,
        handler,
        poll,
        events,
        signal_shutdown,
    };

    let server_loop = thread::spawn(move || run_event_loop(event_loop));

    Ok(ServerHandle {
        address,
        server_loop,
        server_waker,
        observe_shutdown,
    })
}

fn run_event_loop(mut evloop: EventLoop) -> ServerExitReason {
    let pool = threadpool::Builder::new().build();

    loop {
        match evloop.poll.poll(&mut evloop.events, None) {
            Ok(()) => {}
            Err(err) => {
                log::warn!(error:err = err; "poll call failed; server loop exiting");
                shutdown_threadpool(pool);
                return ServerExitReason::Err(err);
            }
        }

        for event in evloop.events.iter() {
            match event.token() {
                SERVER => loop {
                    match evloop.socket.accept() {
                        Ok((stream, _)) => {
                            let handler = evloop.handler.clone();
                            match to_blocking_stream(stream) {
                                Ok(stream) => pool.execute(move || session::run(stream, handler)),
                                Err(err) => {
                                    log::warn!(error:err = err; "failed to prepare accepted connection");
                                }
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(err) => {
                            log::warn!(error:err = err; "socket accept call failed; server loop exiting");
                            shutdown_threadpool(pool);
                            return ServerExitReason::Err(err);
                        }
                    }
                },
                SHUTDOWN => {
                    shutdown_threadpool(pool);
                    if evloop.signal_shutdown.send(()).is_err() {
                        log::error!("unreachable: failed to notify main thread of shutdown");
                        unreachable!("failed to notify main thread of shutdown");
                    }
                    return ServerExitReason::Normal;
                }
                _ => unreachable!(),
            }
        }
    }
}

/// Converts a non-blocking `mio` stream accepted off the listener into a
/// blocking `std::net::TcpStream`, the type the session loop's read-timeout
/// polling idiom relies on.
fn to_blocking_stream(stream: mio::net::TcpStream) -> io::Result<std::net::TcpStream> {
    let std_stream = unsafe { std::net::TcpStream::from_raw_fd(stream.into_raw_fd()) };
    std_stream.set_nonblocking(false)?;
    Ok(std_stream)
}

fn shutdown_threadpool(pool: threadpool::ThreadPool) {
    pool.join();
    drop(pool);
}
