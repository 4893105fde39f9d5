use std::sync::Arc;

use sluice_store::{ObjectStore, ReadHandle, StoreError, WriteHandle};
use sluice_types::names::validate_file_name;
use sluice_types::ArtifactPath;
use tracing::{debug, warn};

use crate::error::{PackError, PackResult};
use crate::format::{encode_header, encode_record};
use crate::reader::RecordReader;

/// Append-only multi-record containers over an [`ObjectStore`].
///
/// Many small logical files share one physical path. Records are never
/// updated or deleted; a key may occur more than once and lookups return
/// the first occurrence. There is no index: lookup cost grows with the
/// number of records before the match.
#[derive(Clone)]
pub struct PackedStore {
    store: Arc<dyn ObjectStore>,
}

impl PackedStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Append one `(key, payload)` record to the container at `path`,
    /// creating it if absent. Returns once the record is synced.
    pub fn append(&self, path: &ArtifactPath, key: &str, payload: &[u8]) -> PackResult<()> {
        validate_file_name(key).map_err(|e| PackError::InvalidKey(e.to_string()))?;

        let fresh = !self.store.exists(path)? || self.store.len(path)? == 0;
        let mut buf = Vec::with_capacity(payload.len() / 2 + key.len() + 32);
        if fresh {
            encode_header(&mut buf);
        }
        encode_record(&mut buf, key, payload)?;

        let mut handle = self.store.open_append(path)?;
        let written = write_synced(handle.as_mut(), &buf);
        let closed = handle.close();
        written?;
        closed?;

        debug!(
            path = %path,
            key,
            raw_len = payload.len(),
            stored_len = buf.len(),
            fresh,
            "record appended"
        );
        Ok(())
    }

    /// Payload of the first record named `key`, or `None` if no record
    /// matches.
    pub fn lookup(&self, path: &ArtifactPath, key: &str) -> PackResult<Option<Vec<u8>>> {
        let mut reader = self.reader(path)?;
        while let Some(candidate) = reader.next_key()? {
            if candidate == key {
                return reader.read_payload().map(Some);
            }
        }
        Ok(None)
    }

    /// Every key in container order, duplicates included. The iterator
    /// reads lazily; call again to restart from the beginning.
    pub fn list_keys(&self, path: &ArtifactPath) -> PackResult<PackKeys> {
        Ok(PackKeys {
            reader: Some(self.reader(path)?),
        })
    }

    /// Whether a container exists at `path`.
    pub fn exists(&self, path: &ArtifactPath) -> PackResult<bool> {
        Ok(self.store.is_file(path)?)
    }

    fn reader(&self, path: &ArtifactPath) -> PackResult<RecordReader<ReadHandle>> {
        let handle = self.store.open(path)?;
        RecordReader::new(handle)
    }
}

impl std::fmt::Debug for PackedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedStore").finish_non_exhaustive()
    }
}

fn write_synced(handle: &mut dyn WriteHandle, buf: &[u8]) -> Result<(), StoreError> {
    handle.write_all(buf)?;
    handle.flush()?;
    handle.sync()?;
    Ok(())
}

/// Lazy iterator over the keys of one container.
///
/// Yields `Err` once on a corrupt record and then stops.
pub struct PackKeys {
    reader: Option<RecordReader<ReadHandle>>,
}

impl Iterator for PackKeys {
    type Item = PackResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        match reader.next_key() {
            Ok(Some(key)) => Some(Ok(key.to_string())),
            Ok(None) => {
                self.reader = None;
                None
            }
            Err(e) => {
                warn!(error = %e, "stopping key listing at corrupt record");
                self.reader = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_store::InMemoryObjectStore;

    fn p(s: &str) -> ArtifactPath {
        ArtifactPath::parse(s).unwrap()
    }

    fn packed() -> (Arc<InMemoryObjectStore>, PackedStore) {
        let store = Arc::new(InMemoryObjectStore::new());
        let packed = PackedStore::new(store.clone());
        (store, packed)
    }

    // -----------------------------------------------------------------------
    // Append / lookup
    // -----------------------------------------------------------------------

    #[test]
    fn append_then_lookup() {
        let (_store, packed) = packed();
        let path = p("c/data.seq");
        packed.append(&path, "x.csv", b"a,b\n1,2\n").unwrap();

        assert_eq!(
            packed.lookup(&path, "x.csv").unwrap().as_deref(),
            Some(b"a,b\n1,2\n".as_slice())
        );
        assert_eq!(packed.lookup(&path, "y.csv").unwrap(), None);
    }

    #[test]
    fn header_written_once() {
        let (store, packed) = packed();
        let path = p("c/data.seq");
        packed.append(&path, "a", b"1").unwrap();
        packed.append(&path, "b", b"2").unwrap();
        let bytes = store.get(&path).unwrap().unwrap();
        assert_eq!(&bytes[0..4], b"SLPK");
        assert_eq!(bytes.windows(4).filter(|w| w == b"SLPK").count(), 1);
    }

    #[test]
    fn duplicate_keys_first_match_wins() {
        let (_store, packed) = packed();
        let path = p("c/data.seq");
        packed.append(&path, "dup", b"first").unwrap();
        packed.append(&path, "other", b"x").unwrap();
        packed.append(&path, "dup", b"second").unwrap();

        assert_eq!(packed.lookup(&path, "dup").unwrap().unwrap(), b"first");
        let keys: Vec<String> = packed
            .list_keys(&path)
            .unwrap()
            .collect::<PackResult<_>>()
            .unwrap();
        assert_eq!(keys, vec!["dup", "other", "dup"]);
    }

    #[test]
    fn empty_payload() {
        let (_store, packed) = packed();
        let path = p("c/data.seq");
        packed.append(&path, "empty", b"").unwrap();
        assert_eq!(packed.lookup(&path, "empty").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn invalid_key_rejected_before_io() {
        let (store, packed) = packed();
        let path = p("c/data.seq");
        assert!(matches!(
            packed.append(&path, "../evil", b"x"),
            Err(PackError::InvalidKey(_))
        ));
        assert!(matches!(
            packed.append(&path, "", b"x"),
            Err(PackError::InvalidKey(_))
        ));
        assert_eq!(store.file_count(), 0);
    }

    #[test]
    fn missing_container() {
        let (_store, packed) = packed();
        assert!(matches!(
            packed.lookup(&p("nope.seq"), "k"),
            Err(PackError::Store(StoreError::NotFound(_)))
        ));
        assert!(!packed.exists(&p("nope.seq")).unwrap());
    }

    #[test]
    fn foreign_file_is_not_a_container() {
        let (store, packed) = packed();
        store.put(&p("plain.txt"), b"hello world").unwrap();
        assert!(matches!(
            packed.lookup(&p("plain.txt"), "k"),
            Err(PackError::InvalidMagic { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Key listing
    // -----------------------------------------------------------------------

    #[test]
    fn list_keys_is_restartable() {
        let (_store, packed) = packed();
        let path = p("c/data.seq");
        for key in ["a", "b", "c"] {
            packed.append(&path, key, key.as_bytes()).unwrap();
        }
        let mut keys = packed.list_keys(&path).unwrap();
        assert_eq!(keys.next().unwrap().unwrap(), "a");

        let all: Vec<String> = packed.list_keys(&path).unwrap().map(Result::unwrap).collect();
        assert_eq!(all, vec!["a", "b", "c"]);
        assert_eq!(keys.next().unwrap().unwrap(), "b");
    }

    #[test]
    fn list_keys_stops_after_corruption() {
        let (store, packed) = packed();
        let path = p("c/data.seq");
        packed.append(&path, "a", b"1").unwrap();
        let mut bytes = store.get(&path).unwrap().unwrap();
        bytes.push(0x42);
        store.put(&path, bytes).unwrap();

        let results: Vec<_> = packed.list_keys(&path).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    // -----------------------------------------------------------------------
    // Failure injection
    // -----------------------------------------------------------------------

    #[test]
    fn sync_failure_surfaces() {
        let (store, packed) = packed();
        store.fail_sync(true);
        assert!(matches!(
            packed.append(&p("c/data.seq"), "a", b"1"),
            Err(PackError::Store(StoreError::Io(_)))
        ));
    }

    #[test]
    fn close_failure_surfaces() {
        let (store, packed) = packed();
        store.fail_close(true);
        assert!(packed.append(&p("c/data.seq"), "a", b"1").is_err());
    }
}
