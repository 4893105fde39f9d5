//! Lock table shared through a directory of lock files.
//!
//! Each held path owns one file named after the digest of its artifact path,
//! which keeps names short whatever the path length.
//! Acquisition is `O_CREAT | O_EXCL`, so the filesystem arbitrates races
//! between threads and between processes pointing at the same directory.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sluice_crypto::ContentHasher;
use sluice_types::ArtifactPath;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LockError, Result};
use crate::traits::{AcquireOutcome, LockRecord, LockTable, LockToken};

const LOCK_EXT: &str = "lock";

/// Upper bound on create/take-over rounds in one `try_insert`.
const MAX_TAKEOVER_ROUNDS: usize = 4;

/// How long an unreadable lock file counts as a creator still writing it.
/// Past this it is debris from a crashed or failed create and may be taken
/// over.
const UNREADABLE_GRACE: Duration = Duration::from_secs(30);

/// A [`LockTable`] persisted as one JSON file per held path.
///
/// Locks survive process restarts. Expired locks are taken over by renaming
/// the stale file aside and re-creating it exclusively.
#[derive(Debug, Clone)]
pub struct FileLockTable {
    dir: PathBuf,
}

impl FileLockTable {
    /// Open (and create if needed) a lock directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_file(&self, path: &ArtifactPath) -> PathBuf {
        self.dir.join(format!("{}.{LOCK_EXT}", file_stem(path)))
    }

    fn tombstone(&self, path: &ArtifactPath) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.stale",
            file_stem(path),
            Uuid::now_v7().simple()
        ))
    }

    /// Create `file` holding `record`. `false` if it already exists. A file
    /// whose record could not be written is removed again.
    fn create_exclusive(&self, file: &Path, record: &LockRecord) -> Result<bool> {
        let body =
            serde_json::to_vec(record).map_err(|e| LockError::Serialization(e.to_string()))?;
        let mut handle = match OpenOptions::new().write(true).create_new(true).open(file) {
            Ok(handle) => handle,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = handle.write_all(&body).and_then(|()| handle.sync_all()) {
            drop(handle);
            if let Err(rm) = fs::remove_file(file) {
                warn!(file = %file.display(), error = %rm, "failed to remove half-written lock file");
            }
            return Err(e.into());
        }
        Ok(true)
    }
}

fn file_stem(path: &ArtifactPath) -> String {
    ContentHasher::digest_bytes(path.as_str().as_bytes()).to_hex()
}

/// Whether an unreadable lock file has gone untouched past the grace period.
fn abandoned(file: &Path) -> Result<bool> {
    let modified = match fs::metadata(file).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    // A clock step backwards makes the file look new; wait it out.
    Ok(modified
        .elapsed()
        .is_ok_and(|age| age >= UNREADABLE_GRACE))
}

fn read_record(file: &Path) -> Result<Option<LockRecord>> {
    let mut handle = match File::open(file) {
        Ok(handle) => handle,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut body = Vec::new();
    handle.read_to_end(&mut body)?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| LockError::Serialization(format!("{}: {e}", file.display())))
}

impl LockTable for FileLockTable {
    fn try_insert(&self, record: &LockRecord, now: DateTime<Utc>) -> Result<AcquireOutcome> {
        let file = self.lock_file(&record.path);
        let mut displaced = None;

        for _ in 0..MAX_TAKEOVER_ROUNDS {
            if self.create_exclusive(&file, record)? {
                debug!(path = %record.path, "lock file created");
                return Ok(AcquireOutcome::Acquired { displaced });
            }

            let existing = match read_record(&file) {
                Ok(Some(existing)) => Some(existing),
                // Released between our create and our read.
                Ok(None) => continue,
                Err(LockError::Serialization(e)) => {
                    // A creator may still be writing its record.
                    if !abandoned(&file)? {
                        return Ok(AcquireOutcome::Held);
                    }
                    warn!(path = %record.path, error = %e, "taking over unreadable lock file");
                    None
                }
                Err(e) => return Err(e),
            };
            if existing.as_ref().is_some_and(|e| !e.is_expired(now)) {
                return Ok(AcquireOutcome::Held);
            }

            let tomb = self.tombstone(&record.path);
            match fs::rename(&file, &tomb) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            // The file we moved may be a fresh lock that replaced the stale
            // one after our read; put it back if so.
            let moved = read_record(&tomb);
            let live = match &moved {
                Ok(Some(m)) => !m.is_expired(now),
                Ok(None) => false,
                Err(_) => !abandoned(&tomb).unwrap_or(false),
            };
            if live {
                if let Err(e) = fs::hard_link(&tomb, &file) {
                    if e.kind() != ErrorKind::AlreadyExists {
                        fs::remove_file(&tomb)?;
                        return Err(e.into());
                    }
                }
                fs::remove_file(&tomb)?;
                return Ok(AcquireOutcome::Held);
            }
            fs::remove_file(&tomb)?;
            displaced = moved.ok().flatten().or(existing);
        }

        warn!(path = %record.path, "gave up racing for lock file");
        Ok(AcquireOutcome::Held)
    }

    fn remove_if_owner(&self, path: &ArtifactPath, owner: &LockToken) -> Result<bool> {
        let file = self.lock_file(path);
        match read_record(&file)? {
            Some(existing) if existing.owner == *owner => match fs::remove_file(&file) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            },
            _ => Ok(false),
        }
    }

    fn remove(&self, path: &ArtifactPath) -> Result<bool> {
        match fs::remove_file(self.lock_file(path)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, path: &ArtifactPath) -> Result<Option<LockRecord>> {
        read_record(&self.lock_file(path))
    }

    fn list(&self) -> Result<Vec<LockRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file = entry.path();
            if file.extension().and_then(|e| e.to_str()) != Some(LOCK_EXT) {
                continue;
            }
            match read_record(&file) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(file = %file.display(), error = %e, "skipping unreadable lock file"),
            }
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(path: &str, expires_at: Option<DateTime<Utc>>) -> LockRecord {
        LockRecord {
            path: ArtifactPath::parse(path).unwrap(),
            owner: LockToken::generate(),
            acquired_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn second_insert_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let table = FileLockTable::open(dir.path()).unwrap();
        let first = record("a/b.bin", None);
        let second = record("a/b.bin", None);

        assert_eq!(
            table.try_insert(&first, Utc::now()).unwrap(),
            AcquireOutcome::Acquired { displaced: None }
        );
        assert_eq!(
            table.try_insert(&second, Utc::now()).unwrap(),
            AcquireOutcome::Held
        );
        assert_eq!(table.get(&first.path).unwrap(), Some(first));
    }

    #[test]
    fn locks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let r = record("x/y", None);
        FileLockTable::open(dir.path())
            .unwrap()
            .try_insert(&r, Utc::now())
            .unwrap();

        let reopened = FileLockTable::open(dir.path()).unwrap();
        assert_eq!(reopened.list().unwrap(), vec![r.clone()]);
        assert_eq!(
            reopened
                .try_insert(&record("x/y", None), Utc::now())
                .unwrap(),
            AcquireOutcome::Held
        );
    }

    #[test]
    fn expired_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let table = FileLockTable::open(dir.path()).unwrap();
        let now = Utc::now();
        let stale = record("p", Some(now - Duration::seconds(5)));
        let fresh = record("p", None);
        table.try_insert(&stale, now).unwrap();

        assert_eq!(
            table.try_insert(&fresh, now).unwrap(),
            AcquireOutcome::Acquired {
                displaced: Some(stale)
            }
        );
        assert_eq!(table.get(&fresh.path).unwrap().unwrap().owner, fresh.owner);
        // No tombstones left behind.
        let names: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(names.len(), 1);
    }

    fn backdate(file: &Path, secs: u64) {
        let mtime = std::time::SystemTime::now() - std::time::Duration::from_secs(secs);
        File::options()
            .write(true)
            .open(file)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    #[test]
    fn fresh_unreadable_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let table = FileLockTable::open(dir.path()).unwrap();
        let r = record("p", None);
        fs::write(table.lock_file(&r.path), b"{\"path\":").unwrap();

        assert_eq!(table.try_insert(&r, Utc::now()).unwrap(), AcquireOutcome::Held);
    }

    #[test]
    fn abandoned_empty_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let table = FileLockTable::open(dir.path()).unwrap();
        let r = record("p", None);
        let file = table.lock_file(&r.path);
        // What a create that died before writing its record leaves behind.
        File::create(&file).unwrap();
        backdate(&file, 60);

        assert_eq!(
            table.try_insert(&r, Utc::now()).unwrap(),
            AcquireOutcome::Acquired { displaced: None }
        );
        assert_eq!(table.get(&r.path).unwrap().unwrap().owner, r.owner);
        let names: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn remove_if_owner_respects_token() {
        let dir = tempfile::tempdir().unwrap();
        let table = FileLockTable::open(dir.path()).unwrap();
        let r = record("p", None);
        table.try_insert(&r, Utc::now()).unwrap();

        assert!(!table.remove_if_owner(&r.path, &LockToken::generate()).unwrap());
        assert!(table.get(&r.path).unwrap().is_some());
        assert!(table.remove_if_owner(&r.path, &r.owner).unwrap());
        assert!(table.get(&r.path).unwrap().is_none());
    }

    #[test]
    fn force_remove() {
        let dir = tempfile::tempdir().unwrap();
        let table = FileLockTable::open(dir.path()).unwrap();
        let r = record("p", None);
        table.try_insert(&r, Utc::now()).unwrap();
        assert!(table.remove(&r.path).unwrap());
        assert!(!table.remove(&r.path).unwrap());
    }

    #[test]
    fn list_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let table = FileLockTable::open(dir.path()).unwrap();
        fs::write(dir.path().join("README"), b"not a lock").unwrap();
        table.try_insert(&record("b", None), Utc::now()).unwrap();
        table.try_insert(&record("a", None), Utc::now()).unwrap();
        let paths: Vec<String> = table
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.path.to_string())
            .collect();
        assert_eq!(paths, vec!["a", "b"]);
    }

    #[test]
    fn long_paths_get_short_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let table = FileLockTable::open(dir.path()).unwrap();
        let long = vec!["segment"; 100].join("/");
        let r = record(&long, None);
        table.try_insert(&r, Utc::now()).unwrap();
        assert_eq!(table.get(&r.path).unwrap(), Some(r));
    }
}
