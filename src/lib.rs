//! Offline asset bundles kept in sync from per-locale git branches.
//!
//! Each (locale, resource type) pair lives on its own branch of a remote
//! repository (`jp/basic`, `en/movie`, ...). [`AssetSync`] downloads a branch
//! into a local working copy and later fast-forwards (or resets) it to the
//! remote tip, reporting transfer progress to a caller callback that can
//! cancel the transfer.

pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod resolve;
pub mod sync;
pub mod types;

pub use config::{ConfigError, SyncConfig};
pub use error::{ERROR_DOMAIN, EngineError, EngineErrorKind, SyncError, check_code, error_for_code};
pub use progress::{ProgressAction, TransferStats};
pub use resolve::{OfflineBehavior, Resolution};
pub use sync::{AssetPaths, AssetSync, LocalResource, SyncOutcome, UpdateStatus};
pub use types::{BranchName, Locale, ParseError, Refspec, ResourceType, branch_name_for, refspec_for};
