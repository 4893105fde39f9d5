//! On-disk layout of a packed container.
//!
//! ```text
//! header : b"SLPK" | version u32 BE
//! record : type u8 | varint key_len | varint raw_len | varint stored_len
//!          | crc32 u32 BE of stored bytes | key bytes | stored bytes
//! ```
//!
//! Records are self-delimiting, so a container is read with a single forward
//! pass and never needs to be seekable.

use std::io::{self, Read};

use crate::error::{PackError, PackResult};

pub const MAGIC: &[u8; 4] = b"SLPK";
pub const VERSION: u32 = 1;
pub const HEADER_LEN: usize = 8;

/// zstd level used for record payloads.
pub const COMPRESSION_LEVEL: i32 = 3;

/// How a record's payload is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Zstd,
}

impl RecordKind {
    pub fn type_byte(&self) -> u8 {
        match self {
            Self::Zstd => 1,
        }
    }

    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// Fixed part of a record, read before its key and payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    /// Byte offset of the record's type byte in the container.
    pub offset: u64,
    pub kind: RecordKind,
    pub key_len: u64,
    pub raw_len: u64,
    pub stored_len: u64,
    pub crc32: u32,
}

pub fn encode_header(buf: &mut Vec<u8>) {
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_be_bytes());
}

/// Check the container header at the start of `reader`.
pub fn read_header(reader: &mut impl Read) -> PackResult<()> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => PackError::CorruptRecord {
            offset: 0,
            reason: "container shorter than its header".into(),
        },
        _ => PackError::Io(e),
    })?;
    if &header[0..4] != MAGIC {
        return Err(PackError::InvalidMagic {
            expected: String::from_utf8_lossy(MAGIC).into(),
            actual: String::from_utf8_lossy(&header[0..4]).into(),
        });
    }
    let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if version != VERSION {
        return Err(PackError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Encode one record. The payload is zstd-compressed.
pub fn encode_record(buf: &mut Vec<u8>, key: &str, payload: &[u8]) -> PackResult<()> {
    let stored = zstd::encode_all(payload, COMPRESSION_LEVEL)
        .map_err(|e| PackError::CompressionFailed(e.to_string()))?;

    buf.push(RecordKind::Zstd.type_byte());
    encode_varint(buf, key.len() as u64);
    encode_varint(buf, payload.len() as u64);
    encode_varint(buf, stored.len() as u64);
    buf.extend_from_slice(&crc32fast::hash(&stored).to_be_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(&stored);
    Ok(())
}

/// Decode a stored payload and check it against the header.
pub fn decode_payload(header: &RecordHeader, key: &str, stored: &[u8]) -> PackResult<Vec<u8>> {
    let actual_crc = crc32fast::hash(stored);
    if actual_crc != header.crc32 {
        return Err(PackError::CrcMismatch {
            offset: header.offset,
            key: key.to_string(),
        });
    }
    let raw = match header.kind {
        RecordKind::Zstd => zstd::decode_all(stored)
            .map_err(|e| PackError::DecompressionFailed(e.to_string()))?,
    };
    if raw.len() as u64 != header.raw_len {
        return Err(PackError::CorruptRecord {
            offset: header.offset,
            reason: format!("size mismatch: expected {}, got {}", header.raw_len, raw.len()),
        });
    }
    Ok(raw)
}

/// Encode a u64 as a variable-length integer.
pub fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a varint from a stream. Returns (value, bytes_consumed).
pub fn read_varint(reader: &mut impl Read, offset: u64) -> PackResult<(u64, u64)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    let mut consumed = 0;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => PackError::CorruptRecord {
                offset,
                reason: "truncated varint".into(),
            },
            _ => PackError::Io(e),
        })?;
        consumed += 1;
        if shift >= 64 {
            return Err(PackError::CorruptRecord {
                offset,
                reason: "varint overflow".into(),
            });
        }
        value |= u64::from(byte[0] & 0x7F) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok((value, consumed));
        }
        shift += 7;
    }
}
