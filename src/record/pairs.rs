use crate::error::Error;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};

/// Names and values are opaque byte strings (FastCGI places no charset
/// requirement on them; CGI params in particular are frequently Latin-1 or
/// filesystem-path bytes that aren't valid UTF-8).
pub type Pairs = BTreeMap<Vec<u8>, Vec<u8>>;

/// The high-order bit of the first byte of a length indicates the length's
/// encoding: zero means a one-byte length, one means a four-byte length
/// with that bit masked off.
fn read_pair_len<R: Read>(reader: &mut R) -> Result<u32, Error> {
    let mut sentinel = [0u8; 1];

    reader
        .read_exact(&mut sentinel)
        .map_err(|_| Error::MalformedRecordPayload("NameValuePair"))?;

    if sentinel[0] <= 127 {
        return Ok(sentinel[0] as u32);
    }

    let mut len_bytes = [sentinel[0] & 0b0111_1111, 0, 0, 0];
    reader
        .read_exact(&mut len_bytes[1..])
        .map_err(|_| Error::MalformedRecordPayload("NameValuePair"))?;

    Ok(u32::from_be_bytes(len_bytes))
}

fn write_pair_len<W: Write>(len: usize, writer: &mut W) -> Result<(), io::Error> {
    if len > 127 {
        let mut len_bytes = (len as u32).to_be_bytes();
        len_bytes[0] |= 0b1000_0000;
        writer.write_all(&len_bytes)
    } else {
        writer.write_all(&[len as u8])
    }
}

/// FastCGI transmits a name-value pair as the length of the name, the
/// length of the value, the name bytes, then the value bytes.
pub fn decode_pairs(bytes: &[u8]) -> Result<Pairs, Error> {
    let len = bytes.len();
    let mut cursor = Cursor::new(bytes);
    let mut pairs = BTreeMap::new();

    while (cursor.position() as usize) < len {
        let name_len = read_pair_len(&mut cursor)?;
        let value_len = read_pair_len(&mut cursor)?;

        let mut name = vec![0u8; name_len as usize];
        let mut value = vec![0u8; value_len as usize];

        cursor
            .read_exact(&mut name)
            .map_err(|_| Error::MalformedRecordPayload("NameValuePair"))?;
        cursor
            .read_exact(&mut value)
            .map_err(|_| Error::MalformedRecordPayload("NameValuePair"))?;

        pairs.insert(name, value);
    }

    Ok(pairs)
}

pub fn encode_pairs<W: Write>(pairs: &Pairs, writer: &mut W) -> Result<(), io::Error> {
    for (name, value) in pairs.iter() {
        write_pair_len(name.len(), writer)?;
        write_pair_len(value.len(), writer)?;
        writer.write_all(name)?;
        writer.write_all(value)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_short_and_long_pairs() {
        let mut pairs: Pairs = BTreeMap::new();
        pairs.insert(b"SHORT".to_vec(), b"value".to_vec());
        pairs.insert(b"LONG".to_vec(), vec![b'x'; 300]);

        let mut buf = Vec::new();
        encode_pairs(&pairs, &mut buf).unwrap();
        assert_eq!(decode_pairs(&buf).unwrap(), pairs);
    }

    #[test]
    fn empty_input_decodes_to_empty_map() {
        assert!(decode_pairs(&[]).unwrap().is_empty());
    }

    #[test]
    fn truncated_pair_is_malformed() {
        let buf = [5u8, 1, b'H', b'E'];
        assert!(decode_pairs(&buf).is_err());
    }
}
