use std::io::{self, Write};

/// The `protocolStatus` field of `FCGI_END_REQUEST`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProtocolStatus {
    /// Normal end of request; the application status is meaningful.
    RequestComplete,
    /// Sent when a request arrives for a role this engine cannot multiplex
    /// (kept for protocol completeness; this engine multiplexes freely and
    /// never produces this status itself).
    MultiplexingUnsupported,
    /// The application ran out of some resource.
    Overloaded,
    /// `FCGI_BEGIN_REQUEST` named a role other than Responder.
    UnknownRole,
}

impl ProtocolStatus {
    pub fn id(&self) -> u8 {
        match self {
            Self::RequestComplete => 0,
            Self::MultiplexingUnsupported => 1,
            Self::Overloaded => 2,
            Self::UnknownRole => 3,
        }
    }

    pub fn from_record_byte(byte: u8) -> Option<Self> {
        let status = match byte {
            0 => Self::RequestComplete,
            1 => Self::MultiplexingUnsupported,
            2 => Self::Overloaded,
            3 => Self::UnknownRole,
            _ => return None,
        };

        Some(status)
    }

    pub fn to_record_byte<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        writer.write_all(&[self.id()])
    }
}
