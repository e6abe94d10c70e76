//! Synchronization settings.
//!
//! Settings come from a JSON file, then the environment, then explicit
//! overrides (CLI flags or `with_*` calls), each layer replacing the last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::AssetPaths;
use crate::sync::lock::DEFAULT_LOCK_TIMEOUT;

/// Environment variable holding the remote repository URL.
pub const ENV_REMOTE: &str = "DORI_ASSETS_REMOTE";
/// Environment variable holding the asset root directory.
pub const ENV_ROOT: &str = "DORI_ASSETS_ROOT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no remote configured (set remote_url or DORI_ASSETS_REMOTE)")]
    MissingRemote,
}

/// Settings for an [`AssetSync`](crate::AssetSync) handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// URL or path of the repository holding one branch per bundle.
    pub remote_url: Option<String>,
    /// Directory holding working copies and locks.
    pub root: PathBuf,
    /// How long to wait for another process working on the same branch.
    pub lock_timeout_ms: u64,
    /// Abort transfers that run longer than this.
    pub transfer_timeout_ms: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            root: AssetPaths::default().root().to_path_buf(),
            lock_timeout_ms: millis(DEFAULT_LOCK_TIMEOUT),
            transfer_timeout_ms: None,
        }
    }
}

impl SyncConfig {
    pub fn new(remote_url: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            remote_url: Some(remote_url.into()),
            root: root.into(),
            ..Self::default()
        }
    }

    /// Read a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `DORI_ASSETS_REMOTE` and `DORI_ASSETS_ROOT` when set and non-empty.
    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(remote) = lookup(ENV_REMOTE).filter(|v| !v.is_empty()) {
            self.remote_url = Some(remote);
        }
        if let Some(root) = lookup(ENV_ROOT).filter(|v| !v.is_empty()) {
            self.root = PathBuf::from(root);
        }
        self
    }

    pub fn with_remote(mut self, remote_url: impl Into<String>) -> Self {
        self.remote_url = Some(remote_url.into());
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = millis(timeout);
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transfer_timeout_ms = timeout.map(millis);
        self
    }

    pub fn remote(&self) -> Result<&str, ConfigError> {
        self.remote_url
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or(ConfigError::MissingRemote)
    }

    pub fn paths(&self) -> AssetPaths {
        AssetPaths::new(&self.root)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Option<Duration> {
        self.transfer_timeout_ms.map(Duration::from_millis)
    }
}

/// Whole milliseconds, rounding up so a non-zero timeout never becomes zero.
fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}
