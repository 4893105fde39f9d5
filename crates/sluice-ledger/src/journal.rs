use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::state::LedgerEvent;

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: u64 = 8;

/// Records larger than this are treated as a corrupt header.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

/// Append-only, crash-recoverable journal of ledger events.
///
/// On-disk format, repeated until end of file:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (JSON-serialized LedgerEvent)]
/// ```
///
/// Every append is flushed and `fsync`ed before it returns. A record cut off
/// by a crash is dropped on the next open and the file truncated back to the
/// last whole record, so later appends never sit behind garbage.
pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
}

impl Journal {
    /// Open (or create) the journal at `path`, returning it with every event
    /// recovered from it.
    pub fn open(path: &Path) -> LedgerResult<(Self, Vec<LedgerEvent>)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (events, valid_len) = recover(path)?;
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "truncating torn journal tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        debug!(path = %path.display(), recovered = events.len(), "journal opened");
        Ok((
            Self {
                path: path.to_path_buf(),
                writer: BufWriter::new(file),
                offset: valid_len,
            },
            events,
        ))
    }

    /// Append and `fsync` one event. Returns the byte offset of the record.
    pub fn append(&mut self, event: &LedgerEvent) -> LedgerResult<u64> {
        let payload =
            serde_json::to_vec(event).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let length = u32::try_from(payload.len())
            .map_err(|_| LedgerError::Serialization("event too large".into()))?;
        let crc = crc32fast::hash(&payload);

        let record_offset = self.offset;
        self.writer.write_all(&length.to_le_bytes())?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        self.offset += HEADER_SIZE + payload.len() as u64;
        debug!(offset = record_offset, len = payload.len(), "journal append");
        Ok(record_offset)
    }

    /// Current end of the journal in bytes.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Swap the writer for a read-only handle so every append fails.
    #[cfg(test)]
    pub(crate) fn make_read_only(&mut self) -> io::Result<()> {
        self.writer = BufWriter::new(File::open(&self.path)?);
        Ok(())
    }
}

/// Read every whole record. Returns the events and the length of the valid
/// prefix of the file.
fn recover(path: &Path) -> LedgerResult<(Vec<LedgerEvent>, u64)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE <= file_len {
        let mut header = [0u8; HEADER_SIZE as usize];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0
            || length > MAX_RECORD_LEN
            || offset + HEADER_SIZE + u64::from(length) > file_len
        {
            warn!(offset, length, file_len, "incomplete journal record; stopping recovery");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        reader.read_exact(&mut payload)?;

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            // A whole record with a bad checksum is damage, not a torn write.
            return Err(LedgerError::CorruptJournal {
                offset,
                reason: format!("crc mismatch: expected {expected_crc:08x}, got {actual_crc:08x}"),
            });
        }
        let event = serde_json::from_slice::<LedgerEvent>(&payload).map_err(|e| {
            LedgerError::CorruptJournal {
                offset,
                reason: e.to_string(),
            }
        })?;
        events.push(event);
        offset += HEADER_SIZE + u64::from(length);
    }

    Ok((events, offset))
}
