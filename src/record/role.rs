use std::io::{self, Write};

/// The FastCGI role requested by `FCGI_BEGIN_REQUEST`.
///
/// Only `Responder` is implemented; `Authorizer` and `Filter` are recognized
/// so the engine can reply with `UNKNOWN_ROLE` rather than treating an
/// unfamiliar role id as a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Responder,
    Authorizer,
    Filter,
    Other(u16),
}

impl Role {
    pub fn id(&self) -> u16 {
        match self {
            Self::Responder => 1,
            Self::Authorizer => 2,
            Self::Filter => 3,
            Self::Other(id) => *id,
        }
    }

    pub fn from_record_bytes(bytes: [u8; 2]) -> Self {
        match u16::from_be_bytes(bytes) {
            1 => Self::Responder,
            2 => Self::Authorizer,
            3 => Self::Filter,
            id => Self::Other(id),
        }
    }

    pub fn to_record_bytes<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        writer.write_all(&self.id().to_be_bytes())
    }

    pub fn supported(&self) -> bool {
        *self == Role::Responder
    }
}
