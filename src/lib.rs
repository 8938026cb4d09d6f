//! A multi-threaded FastCGI responder-role protocol engine.
//!
//! [`ServerSpec`] binds a handler callable to an address and runs the
//! FastCGI session loop (record framing, request multiplexing, CGI→HTTP
//! translation) on its behalf; the handler sees a plain [`HttpRequest`] and
//! writes to a [`ResponseWriter`], same as a small HTTP framework.

mod body_pipe;
mod connection;
mod error;
mod record;
mod request;
mod response;
mod server;
mod session;
mod translate;

pub use error::{BodyError, Error, TranslationError};
pub use response::ResponseWriter;
pub use server::{ServerExitReason, ServerHandle, ServerSpec};
pub use translate::{HttpRequest, SCRIPT_FILENAME_HEADER};
