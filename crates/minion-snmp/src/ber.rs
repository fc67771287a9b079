//! Basic Encoding Rules primitives for the subset of ASN.1 SNMP uses.

use crate::error::{Result, SnmpError};

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_IPADDRESS: u8 = 0x40;
pub const TAG_COUNTER32: u8 = 0x41;
pub const TAG_GAUGE32: u8 = 0x42;
pub const TAG_TIMETICKS: u8 = 0x43;
pub const TAG_OPAQUE: u8 = 0x44;
pub const TAG_COUNTER64: u8 = 0x46;
pub const TAG_NO_SUCH_OBJECT: u8 = 0x80;
pub const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
pub const TAG_END_OF_MIB_VIEW: u8 = 0x82;

/// Appends a definite length.
pub fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    out.push(0x80 | (bytes.len() - first) as u8);
    out.extend_from_slice(&bytes[first..]);
}

/// Appends a complete TLV.
pub fn write_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    write_length(out, content.len());
    out.extend_from_slice(content);
}

pub fn encode_signed(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

pub fn encode_unsigned(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    let mut out = Vec::with_capacity(9);
    if bytes[first] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[first..]);
    out
}

pub fn decode_signed(content: &[u8]) -> Result<i64> {
    if content.is_empty() || content.len() > 8 {
        return Err(SnmpError::malformed(format!(
            "integer of {} bytes",
            content.len()
        )));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for b in content {
        value = (value << 8) | i64::from(*b);
    }
    Ok(value)
}

pub fn decode_unsigned(content: &[u8]) -> Result<u64> {
    let content = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if content.is_empty() || content.len() > 8 {
        return Err(SnmpError::malformed(format!(
            "unsigned of {} bytes",
            content.len()
        )));
    }
    Ok(content.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

pub fn encode_oid(subids: &[u32]) -> Result<Vec<u8>> {
    if subids.len() < 2 || subids[0] > 2 || (subids[0] < 2 && subids[1] >= 40) {
        return Err(SnmpError::InvalidOid(
            subids
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join("."),
        ));
    }
    let mut out = Vec::with_capacity(subids.len() + 4);
    push_base128(&mut out, subids[0] * 40 + subids[1]);
    for id in &subids[2..] {
        push_base128(&mut out, *id);
    }
    Ok(out)
}

fn push_base128(out: &mut Vec<u8>, mut value: u32) {
    let mut tmp = [0u8; 5];
    let mut i = tmp.len();
    loop {
        i -= 1;
        tmp[i] = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = tmp.len() - 1;
    for (j, b) in tmp.iter().enumerate().skip(i) {
        out.push(if j == last { *b } else { *b | 0x80 });
    }
}

pub fn decode_oid(content: &[u8]) -> Result<Vec<u32>> {
    if content.is_empty() {
        return Err(SnmpError::malformed("empty OID"));
    }
    let mut subids = Vec::with_capacity(content.len() + 1);
    let mut value: u32 = 0;
    let mut first = true;
    for (i, b) in content.iter().enumerate() {
        value = value
            .checked_mul(128)
            .ok_or_else(|| SnmpError::malformed("OID sub-identifier overflow"))?
            | u32::from(b & 0x7f);
        if b & 0x80 != 0 {
            if i == content.len() - 1 {
                return Err(SnmpError::malformed("OID ends mid sub-identifier"));
            }
            continue;
        }
        if first {
            let (a, b) = match value {
                0..=39 => (0, value),
                40..=79 => (1, value - 40),
                _ => (2, value - 80),
            };
            subids.push(a);
            subids.push(b);
            first = false;
        } else {
            subids.push(value);
        }
        value = 0;
    }
    Ok(subids)
}

/// Cursor over BER-encoded bytes.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(SnmpError::Truncated {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_length(&mut self) -> Result<usize> {
        let first = self.take(1)?[0];
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 {
            return Err(SnmpError::malformed(format!(
                "unsupported length of {count} octets"
            )));
        }
        Ok(self
            .take(count)?
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b)))
    }

    /// Reads any TLV, returning its tag and content.
    pub fn read_any(&mut self) -> Result<(u8, &'a [u8])> {
        let tag = self.take(1)?[0];
        let len = self.read_length()?;
        Ok((tag, self.take(len)?))
    }

    pub fn read_tagged(&mut self, tag: u8, expected: &'static str) -> Result<&'a [u8]> {
        let (found, content) = self.read_any()?;
        if found != tag {
            return Err(SnmpError::UnexpectedTag { expected, found });
        }
        Ok(content)
    }

    pub fn read_sequence(&mut self) -> Result<Reader<'a>> {
        Ok(Reader::new(self.read_tagged(TAG_SEQUENCE, "SEQUENCE")?))
    }

    pub fn read_integer(&mut self) -> Result<i64> {
        decode_signed(self.read_tagged(TAG_INTEGER, "INTEGER")?)
    }

    pub fn read_octet_string(&mut self) -> Result<&'a [u8]> {
        self.read_tagged(TAG_OCTET_STRING, "OCTET STRING")
    }

    pub fn read_oid(&mut self) -> Result<Vec<u32>> {
        decode_oid(self.read_tagged(TAG_OID, "OBJECT IDENTIFIER")?)
    }
}
