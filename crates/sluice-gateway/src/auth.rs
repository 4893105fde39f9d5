//! Credential lookup and request auditing.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_types::AccessLevel;
use tracing::{info, warn};

/// Resolves presented credentials (API keys) to identities and access bits.
pub trait AuthDb: Send + Sync {
    /// The identity behind `credential`, or `None` if unknown or revoked.
    fn resolve_identity(&self, credential: &str) -> Option<String>;

    /// Access bits granted to `credential`; [`AccessLevel::NONE`] if unknown.
    fn access_level(&self, credential: &str) -> AccessLevel;

    /// Revoke `credential`. Returns whether it was known and active.
    fn revoke(&self, credential: &str) -> bool;
}

/// One configured API key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub name: String,
    pub access: AccessLevel,
}

/// Fixed table of API keys, with revocation held in memory.
#[derive(Debug, Default)]
pub struct StaticAuthDb {
    keys: RwLock<HashMap<String, ApiKey>>,
}

impl StaticAuthDb {
    pub fn new(keys: impl IntoIterator<Item = ApiKey>) -> Self {
        Self {
            keys: RwLock::new(keys.into_iter().map(|k| (k.key.clone(), k)).collect()),
        }
    }

    /// Add or replace a key.
    pub fn insert(&self, key: ApiKey) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(key.key.clone(), key);
        }
    }

    fn lookup(&self, credential: &str) -> Option<ApiKey> {
        self.keys.read().ok()?.get(credential).cloned()
    }
}

impl AuthDb for StaticAuthDb {
    fn resolve_identity(&self, credential: &str) -> Option<String> {
        self.lookup(credential).map(|k| k.name)
    }

    fn access_level(&self, credential: &str) -> AccessLevel {
        self.lookup(credential)
            .map(|k| k.access)
            .unwrap_or(AccessLevel::NONE)
    }

    fn revoke(&self, credential: &str) -> bool {
        let Ok(mut keys) = self.keys.write() else {
            warn!("auth table poisoned; revoke ignored");
            return false;
        };
        match keys.remove(credential) {
            Some(key) => {
                info!(identity = %key.name, "credential revoked");
                true
            }
            None => false,
        }
    }
}

/// Fire-and-forget sink for request audit records. Must never fail the
/// operation being audited.
pub trait AuditLog: Send + Sync {
    fn record(&self, path: &str, operation: &str, identity: &str);
}

/// Emits every audit record as an `info!` event on the `sluice::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, path: &str, operation: &str, identity: &str) {
        info!(target: "sluice::audit", path, operation, identity, "audit");
    }
}

/// A captured audit record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub path: String,
    pub operation: String,
    pub identity: String,
}

/// Keeps audit records in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, path: &str, operation: &str, identity: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(AuditRecord {
                at: Utc::now(),
                path: path.to_string(),
                operation: operation.to_string(),
                identity: identity.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> StaticAuthDb {
        StaticAuthDb::new([
            ApiKey {
                key: "k-read".into(),
                name: "reader".into(),
                access: AccessLevel::READ,
            },
            ApiKey {
                key: "k-admin".into(),
                name: "root".into(),
                access: AccessLevel::READ | AccessLevel::WRITE | AccessLevel::ADMIN,
            },
        ])
    }

    #[test]
    fn resolve_known_and_unknown() {
        let db = db();
        assert_eq!(db.resolve_identity("k-read").as_deref(), Some("reader"));
        assert_eq!(db.resolve_identity("nope"), None);
        assert_eq!(db.access_level("nope"), AccessLevel::NONE);
        assert!(db.access_level("k-admin").allows(AccessLevel::ADMIN));
        assert!(!db.access_level("k-read").allows(AccessLevel::WRITE));
    }

    #[test]
    fn revoke_removes_access() {
        let db = db();
        assert!(db.revoke("k-read"));
        assert!(!db.revoke("k-read"));
        assert_eq!(db.resolve_identity("k-read"), None);
        assert_eq!(db.access_level("k-read"), AccessLevel::NONE);
    }

    #[test]
    fn memory_audit_captures_in_order() {
        let log = MemoryAuditLog::new();
        log.record("a/b", "check", "alice");
        log.record("c", "upload", "bob");
        let ops: Vec<_> = log.records().into_iter().map(|r| r.operation).collect();
        assert_eq!(ops, vec!["check", "upload"]);
    }

    #[test]
    fn api_key_toml_shape() {
        let key: ApiKey = toml::from_str("key = \"abc\"\nname = \"svc\"\naccess = 3").unwrap();
        assert!(key.access.allows(AccessLevel::READ | AccessLevel::WRITE));
    }
}
