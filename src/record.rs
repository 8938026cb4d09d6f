//! FastCGI wire-format constants and per-type record bodies.
//!
//! Every record on the wire shares the same 8-byte header (see
//! [`crate::connection`]). This module only concerns itself with decoding
//! and encoding the handful of record bodies that aren't simply an opaque
//! byte stream: `BEGIN_REQUEST`, `END_REQUEST`, `GET_VALUES` and
//! `GET_VALUES_RESULT`. The stream record types (`PARAMS`, `STDIN`,
//! `STDOUT`, `STDERR`, `DATA`) carry no structure of their own at this
//! layer; their content is handed to the session dispatcher as raw bytes.

mod begin_request;
mod end_request;
mod pairs;
mod protocol_status;
mod role;

pub use begin_request::BeginRequestBody;
pub use end_request::EndRequestBody;
pub use protocol_status::ProtocolStatus;
pub use role::Role;

pub(crate) use pairs::{decode_pairs, encode_pairs, Pairs};

/// Maximum content length of a single record (the content-length field is
/// 16 bits wide).
pub const MAXCONTENT: usize = 0xFFFF;

pub const FCGI_BEGIN_REQUEST: u8 = 1;
pub const FCGI_ABORT_REQUEST: u8 = 2;
pub const FCGI_END_REQUEST: u8 = 3;
pub const FCGI_PARAMS: u8 = 4;
pub const FCGI_STDIN: u8 = 5;
pub const FCGI_STDOUT: u8 = 6;
pub const FCGI_STDERR: u8 = 7;
pub const FCGI_DATA: u8 = 8;
pub const FCGI_GET_VALUES: u8 = 9;
pub const FCGI_GET_VALUES_RESULT: u8 = 10;
pub const FCGI_UNKNOWN_TYPE: u8 = 11;

/// Record-id reserved for management records (not tied to any request).
pub const MANAGEMENT_REQUEST_ID: u16 = 0;

/// Returns whether `type_id` addresses the connection itself rather than a
/// request (management records use request id 0).
pub fn is_management_type(type_id: u8) -> bool {
    matches!(
        type_id,
        FCGI_GET_VALUES | FCGI_GET_VALUES_RESULT | FCGI_UNKNOWN_TYPE
    )
}
