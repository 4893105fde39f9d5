use std::io::Read;
use std::sync::Arc;

use serde_json::Value;
use sluice_pack::{PackError, PackedStore};
use sluice_store::{ReadHandle, StoreError};
use sluice_types::{AccessLevel, ArtifactId, ArtifactPath};
use tracing::debug;

use crate::auth::{AuditLog, AuthDb};
use crate::backends::Backends;
use crate::config::GatewayConfig;
use crate::coordinator::{UploadCoordinator, UploadReceipt};
use crate::error::{ClientError, GatewayError, GatewayResult};
use crate::metadata;
use crate::reconcile::{CheckReport, ReconciliationService};

/// The authenticated front door.
///
/// Every operation resolves the caller's credential, checks its access bits,
/// writes an audit record and maps the request path under the configured
/// prefix before handing off to the coordinator, the reconciliation service
/// or the store. Paths given to and returned by the facade are relative to
/// that prefix; reports and receipts carry the full stored path.
pub struct Gateway {
    config: GatewayConfig,
    backends: Backends,
    packed: PackedStore,
    coordinator: UploadCoordinator,
    reconciler: ReconciliationService,
    auth: Arc<dyn AuthDb>,
    audit: Arc<dyn AuditLog>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        backends: Backends,
        auth: Arc<dyn AuthDb>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            packed: backends.packed(),
            coordinator: backends.coordinator(&config),
            reconciler: backends.reconciler(&config),
            config,
            backends,
            auth,
            audit,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    // -- Credentials --------------------------------------------------------

    /// Access bits of `credential`; unknown credentials have none.
    pub fn access_level(&self, credential: &str) -> AccessLevel {
        let level = self.auth.access_level(credential);
        if let Some(identity) = self.auth.resolve_identity(credential) {
            self.audit.record("", "access_level", &identity);
        }
        level
    }

    /// Revoke the caller's own credential.
    pub fn revoke(&self, credential: &str) -> GatewayResult<()> {
        self.authorize(credential, AccessLevel::NONE, "", "revoke")?;
        if self.auth.revoke(credential) {
            Ok(())
        } else {
            Err(GatewayError::Unauthorized)
        }
    }

    // -- Plain files --------------------------------------------------------

    /// Stream a stored file.
    pub fn fetch(&self, credential: &str, path: &str) -> GatewayResult<ReadHandle> {
        self.authorize(credential, AccessLevel::READ, path, "fetch")?;
        let path = self.resolve(path)?;
        self.open_file("fetch", &path)
    }

    /// A stored file as text. Invalid UTF-8 is replaced, not rejected.
    pub fn read_text(&self, credential: &str, path: &str) -> GatewayResult<String> {
        self.authorize(credential, AccessLevel::READ, path, "read_text")?;
        let path = self.resolve(path)?;
        let mut bytes = Vec::new();
        self.open_file("read_text", &path)?
            .read_to_end(&mut bytes)
            .map_err(|e| GatewayError::server("read_text", &e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Names of the files directly under a directory.
    pub fn list(&self, credential: &str, path: &str) -> GatewayResult<Vec<String>> {
        self.authorize(credential, AccessLevel::READ, path, "list")?;
        let dir = self.resolve(path)?;
        Ok(self
            .list_dir("list", &dir, false)?
            .iter()
            .map(|p| p.file_name().to_string())
            .collect())
    }

    /// Every file beneath a directory, as paths relative to the prefix.
    pub fn list_recursive(&self, credential: &str, path: &str) -> GatewayResult<Vec<String>> {
        self.authorize(credential, AccessLevel::READ, path, "list_recursive")?;
        let dir = self.resolve(path)?;
        Ok(self
            .list_dir("list_recursive", &dir, true)?
            .iter()
            .map(|p| self.relative(p))
            .collect())
    }

    pub fn check(&self, credential: &str, path: &str) -> GatewayResult<CheckReport> {
        self.authorize(credential, AccessLevel::READ, path, "check")?;
        let path = self.resolve(path)?;
        self.reconciler.check(&path)
    }

    // -- Packed containers --------------------------------------------------

    pub fn packed_check(&self, credential: &str, path: &str, key: &str) -> GatewayResult<CheckReport> {
        self.authorize(credential, AccessLevel::READ, path, "packed_check")?;
        let id = self.packed_id(path, key)?;
        self.reconciler.packed_check(&id)
    }

    /// Payload of the first record named `key`.
    pub fn packed_lookup(&self, credential: &str, path: &str, key: &str) -> GatewayResult<Vec<u8>> {
        self.authorize(credential, AccessLevel::READ, path, "packed_lookup")?;
        let id = self.packed_id(path, key)?;
        self.lookup_record("packed_lookup", &id)
    }

    pub fn packed_read_text(&self, credential: &str, path: &str, key: &str) -> GatewayResult<String> {
        self.authorize(credential, AccessLevel::READ, path, "packed_read_text")?;
        let id = self.packed_id(path, key)?;
        let payload = self.lookup_record("packed_read_text", &id)?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// Every key in a container, in record order, duplicates included.
    pub fn packed_list_keys(&self, credential: &str, path: &str) -> GatewayResult<Vec<String>> {
        self.authorize(credential, AccessLevel::WRITE, path, "packed_list_keys")?;
        let path = self.resolve(path)?;
        self.packed
            .list_keys(&path)
            .and_then(|keys| keys.collect::<Result<Vec<_>, _>>())
            .map_err(|e| pack_error("packed_list_keys", &path, e))
    }

    // -- Uploads ------------------------------------------------------------

    pub fn upload(
        &self,
        credential: &str,
        path: &str,
        metadata: Value,
        mut body: impl Read,
    ) -> GatewayResult<UploadReceipt> {
        let identity = self.authorize(credential, AccessLevel::WRITE, path, "upload")?;
        let path = self.resolve(path)?;
        self.coordinator.upload(&path, metadata, &identity, &mut body)
    }

    pub fn packed_upload(
        &self,
        credential: &str,
        path: &str,
        key: &str,
        metadata: Value,
        mut body: impl Read,
    ) -> GatewayResult<UploadReceipt> {
        let identity = self.authorize(credential, AccessLevel::WRITE, path, "packed_upload")?;
        let id = self.packed_id(path, key)?;
        self.coordinator
            .packed_upload(&id, metadata, &identity, &mut body)
    }

    /// Upload to `<msmntCampaign>/<format>/<file_name>`.
    pub fn upload_by_metadata(
        &self,
        credential: &str,
        file_name: &str,
        metadata: Value,
        mut body: impl Read,
    ) -> GatewayResult<UploadReceipt> {
        let identity =
            self.authorize(credential, AccessLevel::WRITE, file_name, "upload_by_metadata")?;
        metadata::require_fields(&metadata, &self.config.upload.required_fields)?;
        let path = self.resolve(&metadata::plain_layout(&metadata, file_name)?)?;
        self.coordinator.upload(&path, metadata, &identity, &mut body)
    }

    /// Append to `<msmntCampaign>/<format>/<seq>.seq` under key `file_name`.
    pub fn packed_upload_by_metadata(
        &self,
        credential: &str,
        file_name: &str,
        metadata: Value,
        mut body: impl Read,
    ) -> GatewayResult<UploadReceipt> {
        let identity = self.authorize(
            credential,
            AccessLevel::WRITE,
            file_name,
            "packed_upload_by_metadata",
        )?;
        metadata::require_fields(&metadata, &self.config.upload.packed_required_fields)?;
        let id = self.packed_id(&metadata::packed_layout(&metadata)?, file_name)?;
        self.coordinator
            .packed_upload(&id, metadata, &identity, &mut body)
    }

    // -- Administration -----------------------------------------------------

    /// Overwrite a file without a ledger entry.
    pub fn put(&self, credential: &str, path: &str, mut body: impl Read) -> GatewayResult<UploadReceipt> {
        self.authorize(credential, AccessLevel::ADMIN, path, "put")?;
        let path = self.resolve(path)?;
        self.coordinator.put(&path, &mut body)
    }

    /// Clear the lock on `path` whoever holds it. Returns whether one was held.
    pub fn force_release(&self, credential: &str, path: &str) -> GatewayResult<bool> {
        self.authorize(credential, AccessLevel::ADMIN, path, "force_release")?;
        let path = self.resolve(path)?;
        self.backends
            .locks
            .force_release(&path)
            .map_err(|e| GatewayError::server("force_release", &e))
    }

    // -- Helpers ------------------------------------------------------------

    /// Check access bits and audit the request. Returns the caller's identity.
    fn authorize(
        &self,
        credential: &str,
        required: AccessLevel,
        target: &str,
        operation: &str,
    ) -> GatewayResult<String> {
        if !self.auth.access_level(credential).allows(required) {
            debug!(operation, required = %required, "access denied");
            return Err(GatewayError::Unauthorized);
        }
        let identity = self
            .auth
            .resolve_identity(credential)
            .ok_or(GatewayError::Unauthorized)?;
        self.audit.record(target, operation, &identity);
        Ok(identity)
    }

    fn resolve(&self, relative: &str) -> GatewayResult<ArtifactPath> {
        ArtifactPath::with_prefix(&self.config.path_prefix, relative)
            .map_err(|e| ClientError::InvalidPath(e.to_string()).into())
    }

    fn packed_id(&self, relative: &str, key: &str) -> GatewayResult<ArtifactId> {
        let path = self.resolve(relative)?;
        ArtifactId::packed(path, key).map_err(|e| ClientError::InvalidPath(e.to_string()).into())
    }

    fn relative(&self, path: &ArtifactPath) -> String {
        let prefix = self.config.path_prefix.trim_matches('/');
        if prefix.is_empty() {
            return path.to_string();
        }
        path.as_str()
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(path.as_str())
            .to_string()
    }

    fn open_file(&self, operation: &str, path: &ArtifactPath) -> GatewayResult<ReadHandle> {
        let store = &self.backends.store;
        let is_file = store
            .is_file(path)
            .map_err(|e| GatewayError::server(operation, &e))?;
        if !is_file {
            return Err(GatewayError::NotFound(path.to_string()));
        }
        store.open(path).map_err(|e| store_error(operation, path, e))
    }

    fn list_dir(
        &self,
        operation: &str,
        dir: &ArtifactPath,
        recursive: bool,
    ) -> GatewayResult<Vec<ArtifactPath>> {
        let store = &self.backends.store;
        let is_dir = store
            .is_dir(dir)
            .map_err(|e| GatewayError::server(operation, &e))?;
        if !is_dir {
            return Err(GatewayError::NotFound(dir.to_string()));
        }
        store
            .list(dir, recursive)
            .map_err(|e| store_error(operation, dir, e))
    }

    fn lookup_record(&self, operation: &str, id: &ArtifactId) -> GatewayResult<Vec<u8>> {
        let key = id.logical_key.as_deref().unwrap_or_default();
        match self.packed.lookup(&id.path, key) {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(GatewayError::NotFound(id.to_string())),
            Err(e) => Err(pack_error(operation, &id.path, e)),
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

/// Missing things are 404s; everything else is the server's problem.
fn store_error(operation: &str, path: &ArtifactPath, err: StoreError) -> GatewayError {
    match err {
        StoreError::NotFound(_) | StoreError::NotAFile(_) | StoreError::NotADirectory(_) => {
            GatewayError::NotFound(path.to_string())
        }
        other => GatewayError::server(operation, &other),
    }
}

fn pack_error(operation: &str, path: &ArtifactPath, err: PackError) -> GatewayError {
    match err {
        PackError::Store(e) => store_error(operation, path, e),
        other => GatewayError::server(operation, &format_args!("{path}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ApiKey, MemoryAuditLog, StaticAuthDb};
    use serde_json::json;
    use sluice_crypto::ContentHasher;
    use std::io::Cursor;

    const READER: &str = "k-read";
    const WRITER: &str = "k-write";
    const ADMIN: &str = "k-admin";

    struct Fixture {
        gateway: Gateway,
        audit: Arc<MemoryAuditLog>,
    }

    fn fixture_with(config: GatewayConfig) -> Fixture {
        let auth = StaticAuthDb::new([
            ApiKey {
                key: READER.into(),
                name: "reader".into(),
                access: AccessLevel::READ,
            },
            ApiKey {
                key: WRITER.into(),
                name: "writer".into(),
                access: AccessLevel::READ | AccessLevel::WRITE,
            },
            ApiKey {
                key: ADMIN.into(),
                name: "admin".into(),
                access: AccessLevel::READ | AccessLevel::WRITE | AccessLevel::ADMIN,
            },
        ]);
        let audit = Arc::new(MemoryAuditLog::new());
        let backends = Backends::in_memory(&config);
        let gateway = Gateway::new(config, backends, Arc::new(auth), audit.clone());
        Fixture { gateway, audit }
    }

    fn fixture() -> Fixture {
        fixture_with(GatewayConfig::default())
    }

    fn meta() -> Value {
        json!({"msmntCampaign": "c1", "format": "csv"})
    }

    fn body(bytes: &[u8]) -> Cursor<Vec<u8>> {
        Cursor::new(bytes.to_vec())
    }

    // -----------------------------------------------------------------------
    // Access control and audit
    // -----------------------------------------------------------------------

    #[test]
    fn unknown_credential_is_unauthorized() {
        let f = fixture();
        assert!(matches!(
            f.gateway.check("nope", "a/b.bin"),
            Err(GatewayError::Unauthorized)
        ));
        assert!(f.audit.records().is_empty());
    }

    #[test]
    fn reader_cannot_upload_or_list_keys() {
        let f = fixture();
        assert!(matches!(
            f.gateway.upload(READER, "a/b.bin", meta(), body(b"x")),
            Err(GatewayError::Unauthorized)
        ));
        assert!(matches!(
            f.gateway.packed_list_keys(READER, "c/data.seq"),
            Err(GatewayError::Unauthorized)
        ));
    }

    #[test]
    fn writer_cannot_put_or_force_release() {
        let f = fixture();
        assert!(matches!(
            f.gateway.put(WRITER, "a/b.bin", body(b"x")),
            Err(GatewayError::Unauthorized)
        ));
        assert!(matches!(
            f.gateway.force_release(WRITER, "a/b.bin"),
            Err(GatewayError::Unauthorized)
        ));
    }

    #[test]
    fn every_operation_is_audited() {
        let f = fixture();
        f.gateway.upload(WRITER, "a/b.bin", meta(), body(b"x")).unwrap();
        f.gateway.check(READER, "a/b.bin").unwrap();
        let _ = f.gateway.fetch(READER, "missing");

        let records = f.audit.records();
        let ops: Vec<_> = records.iter().map(|r| r.operation.as_str()).collect();
        assert_eq!(ops, vec!["upload", "check", "fetch"]);
        assert_eq!(records[0].identity, "writer");
        assert_eq!(records[0].path, "a/b.bin");
    }

    #[test]
    fn access_level_and_revoke() {
        let f = fixture();
        assert_eq!(f.gateway.access_level(WRITER).bits(), 3);
        assert_eq!(f.gateway.access_level("nope"), AccessLevel::NONE);

        f.gateway.revoke(WRITER).unwrap();
        assert_eq!(f.gateway.access_level(WRITER), AccessLevel::NONE);
        assert!(matches!(
            f.gateway.revoke(WRITER),
            Err(GatewayError::Unauthorized)
        ));
    }

    // -----------------------------------------------------------------------
    // Plain files
    // -----------------------------------------------------------------------

    #[test]
    fn upload_then_read_back() {
        let f = fixture();
        let receipt = f
            .gateway
            .upload(WRITER, "a/b.txt", meta(), body(b"hello"))
            .unwrap();
        assert_eq!(receipt.digest, ContentHasher::digest_bytes(b"hello"));

        assert_eq!(f.gateway.read_text(READER, "a/b.txt").unwrap(), "hello");
        let mut fetched = Vec::new();
        f.gateway
            .fetch(READER, "a/b.txt")
            .unwrap()
            .read_to_end(&mut fetched)
            .unwrap();
        assert_eq!(fetched, b"hello");

        let report = f.gateway.check(READER, "a/b.txt").unwrap();
        assert_eq!(report.observed_digest, Some(receipt.digest));
    }

    #[test]
    fn second_upload_to_same_path_already_exists() {
        let f = fixture();
        f.gateway.upload(WRITER, "a/b.txt", meta(), body(b"1")).unwrap();
        let err = f
            .gateway
            .upload(WRITER, "a/b.txt", meta(), body(b"2"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Client(ClientError::AlreadyExists(_))));
    }

    #[test]
    fn invalid_path_is_client_error() {
        let f = fixture();
        let err = f
            .gateway
            .upload(WRITER, "../etc/passwd", meta(), body(b"x"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Client(ClientError::InvalidPath(_))));
    }

    #[test]
    fn missing_things_are_not_found() {
        let f = fixture();
        assert!(matches!(
            f.gateway.fetch(READER, "nope.bin"),
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            f.gateway.list(READER, "nope"),
            Err(GatewayError::NotFound(_))
        ));
        f.gateway.upload(WRITER, "d/f.txt", meta(), body(b"x")).unwrap();
        assert!(matches!(
            f.gateway.fetch(READER, "d"),
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            f.gateway.list(READER, "d/f.txt"),
            Err(GatewayError::NotFound(_))
        ));
    }

    #[test]
    fn listings() {
        let f = fixture();
        for path in ["d/a.txt", "d/b.txt", "d/sub/c.txt"] {
            f.gateway.upload(WRITER, path, meta(), body(b"x")).unwrap();
        }
        assert_eq!(f.gateway.list(READER, "d").unwrap(), vec!["a.txt", "b.txt"]);
        assert_eq!(
            f.gateway.list_recursive(READER, "d").unwrap(),
            vec!["d/a.txt", "d/b.txt", "d/sub/c.txt"]
        );
    }

    #[test]
    fn prefix_is_applied_and_hidden() {
        let f = fixture_with(GatewayConfig {
            path_prefix: "/data/".into(),
            ..Default::default()
        });
        let receipt = f
            .gateway
            .upload(WRITER, "d/a.txt", meta(), body(b"x"))
            .unwrap();
        assert_eq!(receipt.id.path.as_str(), "data/d/a.txt");
        assert!(f.gateway.backends().store.is_file(&receipt.id.path).unwrap());
        assert_eq!(f.gateway.list_recursive(READER, "d").unwrap(), vec!["d/a.txt"]);
        assert_eq!(f.gateway.read_text(READER, "d/a.txt").unwrap(), "x");
    }

    #[test]
    fn upload_by_metadata_derives_path() {
        let f = fixture();
        let receipt = f
            .gateway
            .upload_by_metadata(WRITER, "day1.csv", meta(), body(b"a,b"))
            .unwrap();
        assert_eq!(receipt.id.path.as_str(), "c1/csv/day1.csv");

        let err = f
            .gateway
            .upload_by_metadata(WRITER, "day2.csv", json!({"format": "csv"}), body(b"a,b"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Client(ClientError::InvalidMetadata(_))));
    }

    // -----------------------------------------------------------------------
    // Packed containers
    // -----------------------------------------------------------------------

    #[test]
    fn packed_roundtrip_through_facade() {
        let f = fixture();
        f.gateway
            .packed_upload(WRITER, "c/data.seq", "x.csv", meta(), body(b"1,2"))
            .unwrap();
        f.gateway
            .packed_upload(WRITER, "c/data.seq", "z.csv", meta(), body(b"\xff\xfe"))
            .unwrap();

        assert_eq!(
            f.gateway.packed_lookup(READER, "c/data.seq", "x.csv").unwrap(),
            b"1,2"
        );
        assert_eq!(
            f.gateway.packed_read_text(READER, "c/data.seq", "z.csv").unwrap(),
            "\u{fffd}\u{fffd}"
        );
        assert!(matches!(
            f.gateway.packed_lookup(READER, "c/data.seq", "y.csv"),
            Err(GatewayError::NotFound(_))
        ));
        assert_eq!(
            f.gateway.packed_list_keys(WRITER, "c/data.seq").unwrap(),
            vec!["x.csv", "z.csv"]
        );
    }

    #[test]
    fn packed_missing_container_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.gateway.packed_lookup(READER, "c/none.seq", "x.csv"),
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            f.gateway.packed_list_keys(WRITER, "c/none.seq"),
            Err(GatewayError::NotFound(_))
        ));
    }

    #[test]
    fn packed_invalid_key_is_client_error() {
        let f = fixture();
        let err = f
            .gateway
            .packed_upload(WRITER, "c/data.seq", "a/b", meta(), body(b"x"))
            .unwrap_err();
        assert!(err.is_client());
    }

    #[test]
    fn packed_upload_by_metadata_uses_seq_container() {
        let f = fixture();
        let meta = json!({"msmntCampaign": "c1", "format": "csv", "seq": "week1"});
        let receipt = f
            .gateway
            .packed_upload_by_metadata(WRITER, "mon.csv", meta, body(b"m"))
            .unwrap();
        assert_eq!(receipt.id.path.as_str(), "c1/csv/week1.seq");
        assert_eq!(receipt.id.logical_key.as_deref(), Some("mon.csv"));

        let report = f
            .gateway
            .packed_check(READER, "c1/csv/week1.seq", "mon.csv")
            .unwrap();
        assert_eq!(report.file_in_container, Some(true));
        assert_eq!(report.digest_matches(), Some(true));
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    #[test]
    fn admin_put_and_force_release() {
        let f = fixture();
        f.gateway.put(ADMIN, "cfg/x.txt", body(b"one")).unwrap();
        f.gateway.put(ADMIN, "cfg/x.txt", body(b"two")).unwrap();
        assert_eq!(f.gateway.read_text(READER, "cfg/x.txt").unwrap(), "two");

        let path = ArtifactPath::parse("cfg/x.txt").unwrap();
        let stuck = f.gateway.backends().locks.try_acquire(&path).unwrap().unwrap();
        assert!(f.gateway.check(READER, "cfg/x.txt").unwrap().locked);
        assert!(f.gateway.force_release(ADMIN, "cfg/x.txt").unwrap());
        assert!(!f.gateway.check(READER, "cfg/x.txt").unwrap().locked);
        drop(stuck);
        assert!(!f.gateway.force_release(ADMIN, "cfg/x.txt").unwrap());
    }
}
