//! Minimal BER reading and writing for the LDAPv3 message subset.

use crate::DirectoryError;
use bytes::{BufMut, BytesMut};

pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_ENUMERATED: u8 = 0x0a;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;

fn malformed(message: impl Into<String>) -> DirectoryError {
    DirectoryError::Protocol(message.into())
}

/// Reads the length octets at the start of `data`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the decoded length
/// and the number of octets the length itself took.
pub fn read_length(data: &[u8]) -> crate::Result<Option<(usize, usize)>> {
    let Some(&first) = data.first() else {
        return Ok(None);
    };

    if first & 0x80 == 0 {
        return Ok(Some((first as usize, 1)));
    }

    let num_octets = (first & 0x7f) as usize;
    if num_octets == 0 {
        return Err(malformed("indefinite length is not allowed"));
    }
    if num_octets > 4 {
        return Err(malformed(format!("length uses {} octets", num_octets)));
    }
    if data.len() < 1 + num_octets {
        return Ok(None);
    }

    let length = data[1..=num_octets]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok(Some((length, 1 + num_octets)))
}

/// Cursor over a complete BER encoded buffer.
#[derive(Debug, Clone)]
pub struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Reads one tag-length-value triple.
    pub fn read_tlv(&mut self) -> crate::Result<(u8, &'a [u8])> {
        let tag = self
            .peek_tag()
            .ok_or_else(|| malformed("unexpected end of message"))?;

        let (length, length_octets) = read_length(&self.data[self.pos + 1..])?
            .ok_or_else(|| malformed("truncated length"))?;

        let start = self.pos + 1 + length_octets;
        let end = start
            .checked_add(length)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| malformed(format!("element 0x{:02x} overruns its container", tag)))?;

        self.pos = end;
        Ok((tag, &self.data[start..end]))
    }

    pub fn read_expected(&mut self, expected: u8) -> crate::Result<&'a [u8]> {
        let (tag, value) = self.read_tlv()?;
        if tag != expected {
            return Err(malformed(format!(
                "expected tag 0x{:02x}, found 0x{:02x}",
                expected, tag
            )));
        }
        Ok(value)
    }

    pub fn read_integer(&mut self, tag: u8) -> crate::Result<i64> {
        decode_integer(self.read_expected(tag)?)
    }

    pub fn read_boolean(&mut self, tag: u8) -> crate::Result<bool> {
        match self.read_expected(tag)? {
            [value] => Ok(*value != 0),
            _ => Err(malformed("boolean must be one octet")),
        }
    }

    pub fn read_octet_string(&mut self, tag: u8) -> crate::Result<Vec<u8>> {
        Ok(self.read_expected(tag)?.to_vec())
    }

    pub fn read_string(&mut self, tag: u8) -> crate::Result<String> {
        String::from_utf8(self.read_octet_string(tag)?)
            .map_err(|_| malformed("string is not valid UTF-8"))
    }

    /// Enters a constructed element, returning a reader over its contents.
    pub fn read_sequence(&mut self, tag: u8) -> crate::Result<BerReader<'a>> {
        Ok(BerReader::new(self.read_expected(tag)?))
    }
}

pub fn decode_integer(bytes: &[u8]) -> crate::Result<i64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(malformed(format!("integer of {} octets", bytes.len())));
    }

    // Sign-extend from the first octet
    let initial: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    Ok(bytes
        .iter()
        .fold(initial, |acc, b| (acc << 8) | *b as i64))
}

pub fn write_length(buf: &mut BytesMut, length: usize) {
    if length < 0x80 {
        buf.put_u8(length as u8);
        return;
    }

    let octets = length.to_be_bytes();
    let skip = octets.iter().take_while(|b| **b == 0).count();
    buf.put_u8(0x80 | (octets.len() - skip) as u8);
    buf.put_slice(&octets[skip..]);
}

pub fn write_tlv(buf: &mut BytesMut, tag: u8, content: &[u8]) {
    buf.put_u8(tag);
    write_length(buf, content.len());
    buf.put_slice(content);
}

/// Minimal two's complement encoding.
pub fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

pub fn write_integer(buf: &mut BytesMut, tag: u8, value: i64) {
    write_tlv(buf, tag, &encode_integer(value));
}

pub fn write_octet_string(buf: &mut BytesMut, tag: u8, value: &[u8]) {
    write_tlv(buf, tag, value);
}

pub fn write_boolean(buf: &mut BytesMut, tag: u8, value: bool) {
    write_tlv(buf, tag, &[if value { 0xff } else { 0x00 }]);
}

/// Writes a constructed element whose contents are produced by `body`.
pub fn write_constructed<F>(buf: &mut BytesMut, tag: u8, body: F)
where
    F: FnOnce(&mut BytesMut),
{
    let mut content = BytesMut::new();
    body(&mut content);
    write_tlv(buf, tag, &content);
}
