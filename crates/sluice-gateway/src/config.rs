use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_crypto::DEFAULT_CHUNK_SIZE;

use crate::auth::ApiKey;
use crate::error::ConfigError;

/// Top-level gateway configuration, usually loaded from TOML.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Prepended to every request path before it reaches the store.
    pub path_prefix: String,
    /// Buffer size for streaming copies and digest computation.
    pub chunk_size: usize,
    pub lock: LockConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            path_prefix: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            lock: LockConfig::default(),
            upload: UploadConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be > 0".into()));
        }
        if self.upload.max_body_size == 0 {
            return Err(ConfigError::Invalid(
                "upload.max_body_size must be > 0".into(),
            ));
        }
        if self.upload.required_fields.iter().any(String::is_empty)
            || self.upload.packed_required_fields.iter().any(String::is_empty)
        {
            return Err(ConfigError::Invalid(
                "required metadata field names must not be empty".into(),
            ));
        }
        for key in &self.auth.keys {
            if key.key.is_empty() || key.name.is_empty() {
                return Err(ConfigError::Invalid(
                    "auth keys need a non-empty key and name".into(),
                ));
            }
        }
        if self.path_prefix.contains("..") {
            return Err(ConfigError::Invalid(
                "path_prefix must not contain '..'".into(),
            ));
        }
        Ok(())
    }
}

/// Lock behavior.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Seconds after which a held lock may be taken over. Unset means locks
    /// never expire and a stuck lock needs an operator.
    pub lease_ttl_secs: Option<u64>,
}

impl LockConfig {
    pub fn lease_ttl(&self) -> Option<Duration> {
        self.lease_ttl_secs.map(Duration::from_secs)
    }
}

/// Upload validation and limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Metadata fields every upload must carry as non-empty strings.
    pub required_fields: Vec<String>,
    /// Metadata fields a packed upload laid out by metadata must carry.
    pub packed_required_fields: Vec<String>,
    /// Largest request body the transport accepts, in bytes.
    pub max_body_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            required_fields: vec!["msmntCampaign".into(), "format".into()],
            packed_required_fields: vec!["msmntCampaign".into(), "format".into(), "seq".into()],
            max_body_size: 1024 * 1024 * 1024,
        }
    }
}

/// Where the local backends keep their data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the object store.
    pub root: PathBuf,
    /// Ledger journal file.
    pub ledger_journal: PathBuf,
    /// Directory holding one file per held lock.
    pub lock_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/store"),
            ledger_journal: PathBuf::from("data/ledger.journal"),
            lock_dir: PathBuf::from("data/locks"),
        }
    }
}

/// Transport settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8642),
        }
    }
}

/// API keys accepted by the gateway.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub keys: Vec<ApiKey>,
}
