use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::names::{validate_file_name, validate_path};

/// Canonical key of a physical artifact in the backing store.
///
/// The same value addresses the lock slot and the ledger slot, so two
/// requests that name the same file always collide on both. Canonical form
/// has no leading or trailing `/`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactPath(String);

impl ArtifactPath {
    /// Validate `relative` and join it under `prefix`.
    ///
    /// The prefix comes from configuration and is trusted; only surrounding
    /// slashes are normalized.
    pub fn with_prefix(prefix: &str, relative: &str) -> Result<Self, TypeError> {
        validate_path(relative)?;
        let relative = relative.trim_matches('/');
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            Ok(Self(relative.to_string()))
        } else {
            Ok(Self(format!("{prefix}/{relative}")))
        }
    }

    /// Validate and canonicalize a path with no prefix.
    pub fn parse(path: &str) -> Result<Self, TypeError> {
        Self::with_prefix("", path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last component of the path.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Everything before the last component, if any.
    pub fn parent(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(parent, _)| parent)
    }
}

impl fmt::Debug for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactPath({})", self.0)
    }
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of one logical artifact: a plain file, or one record key inside a
/// packed container. This is the ledger key; locks use only [`Self::path`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId {
    pub path: ArtifactPath,
    pub logical_key: Option<String>,
}

impl ArtifactId {
    /// A plain (unpacked) artifact.
    pub fn plain(path: ArtifactPath) -> Self {
        Self {
            path,
            logical_key: None,
        }
    }

    /// A record inside a packed container. The key is validated as a file name.
    pub fn packed(path: ArtifactPath, key: impl Into<String>) -> Result<Self, TypeError> {
        let key = key.into();
        validate_file_name(&key)?;
        Ok(Self {
            path,
            logical_key: Some(key),
        })
    }

    pub fn is_packed(&self) -> bool {
        self.logical_key.is_some()
    }
}

impl fmt::Debug for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactId({self})")
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.logical_key {
            Some(key) => write!(f, "{}#{key}", self.path),
            None => write!(f, "{}", self.path),
        }
    }
}
