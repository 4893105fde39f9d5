use std::io::{self, Read};

use crate::error::{PackError, PackResult};
use crate::format::{read_header, read_varint, RecordHeader, RecordKind, HEADER_LEN};

/// Forward-only scanner over the records of one container.
///
/// Each call to [`next_key`](Self::next_key) positions the reader just past a
/// record's key; the caller then either [`read_payload`](Self::read_payload)s
/// or moves on, in which case the payload is skipped without decoding.
pub struct RecordReader<R> {
    inner: R,
    offset: u64,
    pending: Option<Pending>,
}

struct Pending {
    header: RecordHeader,
    key: String,
}

impl<R: Read> RecordReader<R> {
    /// Validate the container header and position at the first record.
    pub fn new(mut inner: R) -> PackResult<Self> {
        read_header(&mut inner)?;
        Ok(Self {
            inner,
            offset: HEADER_LEN as u64,
            pending: None,
        })
    }

    /// Advance to the next record and return its key, or `None` at the end
    /// of the container.
    pub fn next_key(&mut self) -> PackResult<Option<&str>> {
        self.skip_pending()?;

        let offset = self.offset;
        let mut type_byte = [0u8; 1];
        match self.inner.read(&mut type_byte) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return self.next_key(),
            Err(e) => return Err(e.into()),
        }
        let kind = RecordKind::from_type_byte(type_byte[0]).ok_or_else(|| {
            PackError::CorruptRecord {
                offset,
                reason: format!("unknown type byte: {}", type_byte[0]),
            }
        })?;
        let mut consumed = 1;

        let (key_len, n) = read_varint(&mut self.inner, offset)?;
        consumed += n;
        let (raw_len, n) = read_varint(&mut self.inner, offset)?;
        consumed += n;
        let (stored_len, n) = read_varint(&mut self.inner, offset)?;
        consumed += n;

        let mut crc = [0u8; 4];
        self.read_exact_at(&mut crc, offset, "truncated record crc")?;
        consumed += 4;

        if key_len > u64::from(u16::MAX) {
            return Err(PackError::CorruptRecord {
                offset,
                reason: format!("key length {key_len} out of range"),
            });
        }
        let mut key = vec![0u8; key_len as usize];
        self.read_exact_at(&mut key, offset, "truncated record key")?;
        consumed += key_len;
        let key = String::from_utf8(key).map_err(|_| PackError::CorruptRecord {
            offset,
            reason: "record key is not UTF-8".into(),
        })?;

        self.offset += consumed;
        let pending = self.pending.insert(Pending {
            header: RecordHeader {
                offset,
                kind,
                key_len,
                raw_len,
                stored_len,
                crc32: u32::from_be_bytes(crc),
            },
            key,
        });
        Ok(Some(pending.key.as_str()))
    }

    /// Read, verify and decode the payload of the record whose key was just
    /// returned by [`next_key`](Self::next_key).
    pub fn read_payload(&mut self) -> PackResult<Vec<u8>> {
        let Some(pending) = self.pending.take() else {
            return Err(PackError::CorruptRecord {
                offset: self.offset,
                reason: "no record positioned for reading".into(),
            });
        };
        let stored_len = pending.header.stored_len;
        let mut stored = Vec::new();
        (&mut self.inner).take(stored_len).read_to_end(&mut stored)?;
        if stored.len() as u64 != stored_len {
            return Err(PackError::CorruptRecord {
                offset: pending.header.offset,
                reason: "truncated record payload".into(),
            });
        }
        self.offset += stored_len;
        crate::format::decode_payload(&pending.header, &pending.key, &stored)
    }

    /// Byte offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn skip_pending(&mut self) -> PackResult<()> {
        if let Some(pending) = self.pending.take() {
            let stored_len = pending.header.stored_len;
            let skipped = io::copy(&mut (&mut self.inner).take(stored_len), &mut io::sink())?;
            if skipped != stored_len {
                return Err(PackError::CorruptRecord {
                    offset: pending.header.offset,
                    reason: "truncated record payload".into(),
                });
            }
            self.offset += stored_len;
        }
        Ok(())
    }

    fn read_exact_at(&mut self, buf: &mut [u8], offset: u64, reason: &str) -> PackResult<()> {
        self.inner.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => PackError::CorruptRecord {
                offset,
                reason: reason.into(),
            },
            _ => PackError::Io(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{encode_header, encode_record};
    use std::io::Cursor;

    fn container(records: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_header(&mut buf);
        for (key, payload) in records {
            encode_record(&mut buf, key, payload).unwrap();
        }
        buf
    }

    #[test]
    fn scan_keys_and_payloads() {
        let data = container(&[("a.csv", b"1,2,3"), ("b.csv", b"4,5,6")]);
        let mut reader = RecordReader::new(Cursor::new(data)).unwrap();

        assert_eq!(reader.next_key().unwrap(), Some("a.csv"));
        // Skip a's payload.
        assert_eq!(reader.next_key().unwrap(), Some("b.csv"));
        assert_eq!(reader.read_payload().unwrap(), b"4,5,6");
        assert_eq!(reader.next_key().unwrap(), None);
    }

    #[test]
    fn empty_container() {
        let mut reader = RecordReader::new(Cursor::new(container(&[]))).unwrap();
        assert_eq!(reader.next_key().unwrap(), None);
        assert_eq!(reader.offset(), HEADER_LEN as u64);
    }

    #[test]
    fn offsets_track_records() {
        let data = container(&[("a", b"x"), ("b", b"y")]);
        let total = data.len() as u64;
        let mut reader = RecordReader::new(Cursor::new(data)).unwrap();
        while reader.next_key().unwrap().is_some() {}
        assert_eq!(reader.offset(), total);
    }

    #[test]
    fn flipped_payload_byte_is_crc_mismatch() {
        let mut data = container(&[("a", b"payload bytes")]);
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        let mut reader = RecordReader::new(Cursor::new(data)).unwrap();
        reader.next_key().unwrap();
        assert!(matches!(
            reader.read_payload(),
            Err(PackError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn truncated_tail_is_corrupt() {
        let mut data = container(&[("a", b"one"), ("b", b"two")]);
        data.truncate(data.len() - 2);
        let mut reader = RecordReader::new(Cursor::new(data)).unwrap();
        assert_eq!(reader.next_key().unwrap(), Some("a"));
        assert_eq!(reader.next_key().unwrap(), Some("b"));
        assert!(matches!(
            reader.read_payload(),
            Err(PackError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn unknown_type_byte() {
        let mut data = container(&[]);
        data.push(9);
        let mut reader = RecordReader::new(Cursor::new(data)).unwrap();
        assert!(matches!(
            reader.next_key(),
            Err(PackError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn read_payload_without_key() {
        let mut reader = RecordReader::new(Cursor::new(container(&[]))).unwrap();
        assert!(reader.read_payload().is_err());
    }
}
