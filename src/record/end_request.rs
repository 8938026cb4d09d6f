use super::protocol_status::ProtocolStatus;
use crate::error::Error;
use std::io::{self, Write};

/// The body of `FCGI_END_REQUEST`, which the engine writes once per
/// request to hand back the application's exit status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EndRequestBody {
    app_status: u32,
    protocol_status: ProtocolStatus,
}

impl EndRequestBody {
    pub fn new(app_status: u32, protocol_status: ProtocolStatus) -> Self {
        Self {
            app_status,
            protocol_status,
        }
    }

    pub fn from_record_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let buffer: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::MalformedRecordPayload("EndRequest"))?;

        let app_status = u32::from_be_bytes(buffer[..4].try_into().unwrap());
        let protocol_status = ProtocolStatus::from_record_byte(buffer[4])
            .ok_or(Error::MalformedRecordPayload("EndRequest"))?;

        Ok(Self {
            app_status,
            protocol_status,
        })
    }

    pub fn to_record_bytes<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        writer.write_all(&self.app_status.to_be_bytes())?;
        self.protocol_status.to_record_byte(writer)?;
        writer.write_all(&[0, 0, 0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let body = EndRequestBody::new(0, ProtocolStatus::RequestComplete);
        let mut buf = Vec::new();
        body.to_record_bytes(&mut buf).unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(EndRequestBody::from_record_bytes(&buf).unwrap(), body);
    }
}
