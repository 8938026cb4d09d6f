use super::role::Role;
use crate::error::Error;
use std::io::{self, Write};

const MASK_FCGI_KEEP_CONN: u8 = 0x01;

/// The body of `FCGI_BEGIN_REQUEST`, which starts a request on the
/// connection. Decoding never rejects an unsupported role: the session
/// dispatcher decides whether to start the request or answer immediately
/// with `END_REQUEST`/`UnknownRole`, since that decision is per-request, not
/// a connection-level protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequestBody {
    role: Role,
    flags: u8,
}

impl BeginRequestBody {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn keep_alive(&self) -> bool {
        self.flags & MASK_FCGI_KEEP_CONN != 0
    }

    pub fn from_record_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let [role_1, role_0, flags, ..]: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::MalformedRecordPayload("BeginRequest"))?;

        let role = Role::from_record_bytes([role_1, role_0]);

        Ok(BeginRequestBody { role, flags })
    }

    pub fn to_record_bytes<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        self.role.to_record_bytes(writer)?;
        writer.write_all(&[self.flags, 0, 0, 0, 0, 0])
    }
}
