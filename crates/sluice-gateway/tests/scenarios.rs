//! End-to-end gateway scenarios: concurrent uploads, checks during uploads,
//! packed containers and failure recovery.

use std::io::{self, Cursor, Read};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::{json, Value};
use sluice_crypto::ContentHasher;
use sluice_gateway::{
    AccessLevel, ApiKey, ArtifactId, ArtifactPath, Backends, ClientError, Gateway, GatewayConfig,
    GatewayError, MemoryAuditLog, StaticAuthDb, UploadStatus,
};
use sluice_ledger::{InMemoryLedger, UploadLedger};
use sluice_lock::{FileLockTable, InMemoryLockTable, LockManager};
use sluice_store::InMemoryObjectStore;

const KEY: &str = "k-ingest";

struct Harness {
    gateway: Arc<Gateway>,
    store: Arc<InMemoryObjectStore>,
    ledger: Arc<InMemoryLedger>,
    locks: LockManager,
}

fn harness() -> Harness {
    let config = GatewayConfig::default();
    let store = Arc::new(InMemoryObjectStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let locks = LockManager::new(Arc::new(InMemoryLockTable::new()));
    let backends = Backends {
        store: store.clone(),
        ledger: ledger.clone(),
        locks: locks.clone(),
    };
    let auth = StaticAuthDb::new([ApiKey {
        key: KEY.into(),
        name: "ingest".into(),
        access: AccessLevel::READ | AccessLevel::WRITE | AccessLevel::ADMIN,
    }]);
    let gateway = Gateway::new(
        config,
        backends,
        Arc::new(auth),
        Arc::new(MemoryAuditLog::new()),
    );
    Harness {
        gateway: Arc::new(gateway),
        store,
        ledger,
        locks,
    }
}

fn meta() -> Value {
    json!({"msmntCampaign": "c1", "format": "bin"})
}

fn p(s: &str) -> ArtifactPath {
    ArtifactPath::parse(s).unwrap()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Body that hands out `pause_at` bytes, reports that it has paused, and
/// blocks until told to go on.
struct GatedBody {
    data: Cursor<Vec<u8>>,
    pause_at: u64,
    paused: Option<Sender<()>>,
    resume: Receiver<()>,
}

impl GatedBody {
    fn new(data: Vec<u8>, pause_at: u64) -> (Self, Receiver<()>, Sender<()>) {
        let (paused_tx, paused_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        let body = Self {
            data: Cursor::new(data),
            pause_at,
            paused: Some(paused_tx),
            resume: resume_rx,
        };
        (body, paused_rx, resume_tx)
    }
}

impl Read for GatedBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pos = self.data.position();
        if pos >= self.pause_at {
            if let Some(paused) = self.paused.take() {
                let _ = paused.send(());
                self.resume
                    .recv()
                    .map_err(|_| io::Error::other("gate dropped"))?;
            }
        } else {
            let room = (self.pause_at - pos) as usize;
            let len = buf.len().min(room);
            return self.data.read(&mut buf[..len]);
        }
        self.data.read(buf)
    }
}

// ---------------------------------------------------------------------------
// Check during a large upload
// ---------------------------------------------------------------------------

#[test]
fn check_during_upload_reports_locked() {
    let h = harness();
    let data = payload(10 * 1024 * 1024);
    let expected = ContentHasher::digest_bytes(&data);
    let (body, paused, resume) = GatedBody::new(data, 4 * 1024 * 1024);

    let gateway = Arc::clone(&h.gateway);
    let upload = thread::spawn(move || gateway.upload(KEY, "a/b.bin", meta(), body));

    paused.recv().unwrap();
    let during = h.gateway.check(KEY, "a/b.bin").unwrap();
    assert!(during.locked);
    assert!(during.file_present);
    assert!(during.ledger_present);
    assert_eq!(
        during.ledger_entry.as_ref().map(|e| e.status),
        Some(UploadStatus::Pending)
    );
    assert_eq!(during.observed_digest, None);

    resume.send(()).unwrap();
    let receipt = upload.join().unwrap().unwrap();
    assert_eq!(receipt.digest, expected);
    assert_eq!(receipt.bytes, 10 * 1024 * 1024);

    let after = h.gateway.check(KEY, "a/b.bin").unwrap();
    assert!(!after.locked);
    assert!(after.file_present);
    assert!(after.ledger_present);
    assert_eq!(after.observed_digest, Some(receipt.digest));
    assert_eq!(after.digest_matches(), Some(true));
}

#[test]
fn upload_during_upload_is_busy() {
    let h = harness();
    let (body, paused, resume) = GatedBody::new(payload(64 * 1024), 1024);

    let gateway = Arc::clone(&h.gateway);
    let first = thread::spawn(move || gateway.put(KEY, "a/b.bin", body));
    paused.recv().unwrap();

    let err = h
        .gateway
        .put(KEY, "a/b.bin", Cursor::new(b"other".to_vec()))
        .unwrap_err();
    assert!(matches!(err, GatewayError::Client(ClientError::Busy(_))));

    resume.send(()).unwrap();
    first.join().unwrap().unwrap();
    assert_eq!(h.store.get(&p("a/b.bin")).unwrap().unwrap(), payload(64 * 1024));
}

// ---------------------------------------------------------------------------
// Concurrent uploads
// ---------------------------------------------------------------------------

#[test]
fn concurrent_uploads_yield_one_digest() {
    for _ in 0..20 {
        let h = harness();
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2u8)
            .map(|n| {
                let gateway = Arc::clone(&h.gateway);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    gateway.upload(KEY, "race/b.bin", meta(), Cursor::new(vec![n; 256 * 1024]))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        for loser in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(
                matches!(
                    loser,
                    GatewayError::Client(
                        ClientError::Busy(_) | ClientError::Duplicate(_) | ClientError::AlreadyExists(_)
                    )
                ),
                "unexpected error: {loser}"
            );
        }

        let stored = h.store.get(&p("race/b.bin")).unwrap().unwrap();
        assert_eq!(ContentHasher::digest_bytes(&stored), winners[0].digest);
        assert!(h.locks.held().unwrap().is_empty());
        let history = h
            .ledger
            .history(&ArtifactId::plain(p("race/b.bin")))
            .unwrap();
        assert_eq!(history.len(), 1);
    }
}

#[test]
fn concurrent_packed_uploads_to_one_container() {
    let h = harness();
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|n| {
            let gateway = Arc::clone(&h.gateway);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let key = format!("part-{n}.csv");
                gateway
                    .packed_upload(KEY, "c/data.seq", &key, meta(), Cursor::new(key.clone().into_bytes()))
                    .map(|_| key)
            })
        })
        .collect();

    let mut stored = Vec::new();
    for handle in handles {
        match handle.join().unwrap() {
            Ok(key) => stored.push(key),
            Err(GatewayError::Client(ClientError::Busy(_))) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(!stored.is_empty());

    let mut keys = h.gateway.packed_list_keys(KEY, "c/data.seq").unwrap();
    keys.sort();
    stored.sort();
    assert_eq!(keys, stored);
    for key in &stored {
        assert_eq!(
            h.gateway.packed_lookup(KEY, "c/data.seq", key).unwrap(),
            key.as_bytes()
        );
    }
}

// ---------------------------------------------------------------------------
// Packed containers
// ---------------------------------------------------------------------------

#[test]
fn packed_upload_then_lookup() {
    let h = harness();
    let csv = b"ts,value\n1,0.5\n2,0.7\n".to_vec();
    let receipt = h
        .gateway
        .packed_upload(KEY, "c/data.seq", "x.csv", meta(), Cursor::new(csv.clone()))
        .unwrap();
    assert_eq!(receipt.digest, ContentHasher::digest_bytes(&csv));

    assert_eq!(h.gateway.packed_lookup(KEY, "c/data.seq", "x.csv").unwrap(), csv);
    assert!(matches!(
        h.gateway.packed_lookup(KEY, "c/data.seq", "y.csv"),
        Err(GatewayError::NotFound(_))
    ));

    let report = h.gateway.packed_check(KEY, "c/data.seq", "x.csv").unwrap();
    assert_eq!(report.observed_digest, Some(receipt.digest));
    let missing = h.gateway.packed_check(KEY, "c/data.seq", "y.csv").unwrap();
    assert!(missing.file_present);
    assert!(!missing.ledger_present);
    assert_eq!(missing.file_in_container, Some(false));
}

// ---------------------------------------------------------------------------
// Failure and recovery
// ---------------------------------------------------------------------------

#[test]
fn lock_is_free_after_every_outcome() {
    let h = harness();
    let path = p("c/f.bin");
    let free = |h: &Harness| assert!(h.locks.holder(&path).unwrap().is_none());

    // Success.
    h.gateway
        .upload(KEY, "c/f.bin", meta(), Cursor::new(b"ok".to_vec()))
        .unwrap();
    free(&h);

    // Client error after the lock: duplicate packed key.
    h.gateway
        .packed_upload(KEY, "c/f.seq", "k", meta(), Cursor::new(b"1".to_vec()))
        .unwrap();
    assert!(h
        .gateway
        .packed_upload(KEY, "c/f.seq", "k", meta(), Cursor::new(b"2".to_vec()))
        .unwrap_err()
        .is_client());
    assert!(h.locks.holder(&p("c/f.seq")).unwrap().is_none());

    // Server error mid-write.
    h.store.fail_writes_after(3);
    assert!(matches!(
        h.gateway.put(KEY, "c/f.bin", Cursor::new(b"0123456789".to_vec())),
        Err(GatewayError::Server(_))
    ));
    free(&h);
    h.store.clear_faults();

    // Server error on sync.
    h.store.fail_sync(true);
    assert!(h
        .gateway
        .put(KEY, "c/f.bin", Cursor::new(b"x".to_vec()))
        .is_err());
    free(&h);
}

#[test]
fn failed_attempt_then_retry() {
    let h = harness();
    let id = ArtifactId::packed(p("c/data.seq"), "x.csv").unwrap();

    h.store.fail_writes_after(0);
    let err = h
        .gateway
        .packed_upload(KEY, "c/data.seq", "x.csv", meta(), Cursor::new(b"a,b".to_vec()))
        .unwrap_err();
    assert!(matches!(err, GatewayError::Server(_)));

    let failed = h.ledger.get(&id).unwrap().unwrap();
    assert_eq!(failed.status, UploadStatus::Failed);
    assert_eq!(failed.error_history.len(), 1);

    h.store.clear_faults();
    let receipt = h
        .gateway
        .packed_upload(KEY, "c/data.seq", "x.csv", meta(), Cursor::new(b"a,b".to_vec()))
        .unwrap();
    assert_eq!(receipt.attempt, Some(2));

    let history = h.ledger.history(&id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, UploadStatus::Failed);
    assert_eq!(history[1].status, UploadStatus::Complete);
    assert_eq!(h.gateway.packed_lookup(KEY, "c/data.seq", "x.csv").unwrap(), b"a,b");

    let report = h.gateway.packed_check(KEY, "c/data.seq", "x.csv").unwrap();
    assert_eq!(report.digest_matches(), Some(true));
}

#[test]
fn stuck_lock_needs_force_release() {
    let h = harness();
    let stuck = h.locks.try_acquire(&p("a/b.bin")).unwrap().unwrap();
    std::mem::forget(stuck);

    assert!(matches!(
        h.gateway.upload(KEY, "a/b.bin", meta(), Cursor::new(b"x".to_vec())),
        Err(GatewayError::Client(ClientError::Busy(_)))
    ));
    assert!(h.gateway.force_release(KEY, "a/b.bin").unwrap());
    h.gateway
        .upload(KEY, "a/b.bin", meta(), Cursor::new(b"x".to_vec()))
        .unwrap();
}

// ---------------------------------------------------------------------------
// Local backends
// ---------------------------------------------------------------------------

#[test]
fn lock_directory_is_shared_between_gateways() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GatewayConfig::default();
    config.storage.root = dir.path().join("store");
    config.storage.ledger_journal = dir.path().join("ledger.journal");
    config.storage.lock_dir = dir.path().join("locks");

    let auth = || {
        Arc::new(StaticAuthDb::new([ApiKey {
            key: KEY.into(),
            name: "ingest".into(),
            access: AccessLevel::READ | AccessLevel::WRITE,
        }]))
    };
    let first = Arc::new(Gateway::new(
        config.clone(),
        Backends::open_local(&config).unwrap(),
        auth(),
        Arc::new(MemoryAuditLog::new()),
    ));
    // A second lock manager over the same directory stands in for another
    // gateway process.
    let other_locks =
        LockManager::new(Arc::new(FileLockTable::open(&config.storage.lock_dir).unwrap()));

    let (body, paused, resume) = GatedBody::new(payload(8192), 100);
    let uploader = {
        let first = Arc::clone(&first);
        thread::spawn(move || first.upload(KEY, "c/f.bin", meta(), body))
    };
    paused.recv().unwrap();
    assert!(other_locks.try_acquire(&p("c/f.bin")).unwrap().is_none());
    resume.send(()).unwrap();
    let receipt = uploader.join().unwrap().unwrap();

    let guard = other_locks.try_acquire(&p("c/f.bin")).unwrap();
    assert!(guard.is_some());
    drop(guard);

    let report = first.check(KEY, "c/f.bin").unwrap();
    assert_eq!(report.observed_digest, Some(receipt.digest));
}
