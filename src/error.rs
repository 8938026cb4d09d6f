use std::io;

/// Errors that tear down a FastCGI connection.
///
/// Anything in this enum indicates a corrupt or impossible byte stream;
/// none of it is recoverable at the request level (see
/// [`TranslationError`] and [`BodyError`] for the errors that are).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the FastCGI connection closed unexpectedly")]
    UnexpectedSocketClose(#[source] io::Error),

    #[error("unsupported FastCGI protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("request id {0} already has a request in flight on this connection")]
    DuplicateBeginRequest(u16),

    #[error("STDIN record received for request id {0} after its body stream was closed")]
    StdinAfterClose(u16),

    #[error("malformed {0} record payload")]
    MalformedRecordPayload(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors raised while translating FastCGI PARAMS into a structured HTTP
/// request (component 4.F). These never tear down the connection: the
/// caller reports the error on STDERR and completes the request.
#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    #[error("no REQUEST_METHOD in FastCGI params")]
    MissingMethod,

    #[error("REQUEST_METHOD is not a valid HTTP method token")]
    InvalidMethod,

    #[error("invalid or missing SERVER_PROTOCOL")]
    InvalidProtocol,

    #[error("invalid CONTENT_LENGTH")]
    InvalidContentLength,

    #[error("request parameter {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("failed to construct a URL from the request")]
    InvalidUrl,
}

/// Errors delivered to a request's body stream instead of to the client
/// (the client already knows why its own connection or request ended).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BodyError {
    #[error("the FastCGI client sent ABORT_REQUEST")]
    Aborted,
    #[error("the FastCGI connection was closed")]
    ConnClosed,
}

impl From<BodyError> for io::Error {
    fn from(e: BodyError) -> Self {
        io::Error::new(io::ErrorKind::Other, e)
    }
}
