//! Error domain for asset synchronization.
//!
//! Every failure reported by libgit2 is carried as an [`EngineError`] that
//! keeps the original integer code and belongs to the [`ERROR_DOMAIN`]
//! domain. [`SyncError`] wraps it together with the failures the façade
//! itself can produce (cancellation, timeouts, locking, local layout).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::{BranchName, ParseError};

/// Domain shared by every error produced by this crate.
pub const ERROR_DOMAIN: &str = "GitError";

/// Generic libgit2 failure code.
pub const CODE_GENERIC: i32 = -1;
/// libgit2 code for a callback that aborted the operation.
pub const CODE_USER: i32 = -7;
/// libgit2 code for an operation that timed out.
pub const CODE_TIMEOUT: i32 = -37;

/// Classification of a libgit2 return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    Generic,
    NotFound,
    Exists,
    Ambiguous,
    BufferTooShort,
    User,
    BareRepo,
    UnbornBranch,
    Unmerged,
    NotFastForward,
    InvalidSpec,
    Conflict,
    Locked,
    Modified,
    Auth,
    Certificate,
    Applied,
    Peel,
    Eof,
    Invalid,
    Uncommitted,
    Directory,
    MergeConflict,
    Passthrough,
    IterOver,
    Retry,
    HashMismatch,
    IndexDirty,
    ApplyFail,
    Owner,
    Timeout,
    /// A code this crate does not know about.
    Unknown,
}

impl EngineErrorKind {
    /// Classify a raw libgit2 code. Zero is not an error and maps to `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        let kind = match code {
            0 => return None,
            -1 => Self::Generic,
            -3 => Self::NotFound,
            -4 => Self::Exists,
            -5 => Self::Ambiguous,
            -6 => Self::BufferTooShort,
            -7 => Self::User,
            -8 => Self::BareRepo,
            -9 => Self::UnbornBranch,
            -10 => Self::Unmerged,
            -11 => Self::NotFastForward,
            -12 => Self::InvalidSpec,
            -13 => Self::Conflict,
            -14 => Self::Locked,
            -15 => Self::Modified,
            -16 => Self::Auth,
            -17 => Self::Certificate,
            -18 => Self::Applied,
            -19 => Self::Peel,
            -20 => Self::Eof,
            -21 => Self::Invalid,
            -22 => Self::Uncommitted,
            -23 => Self::Directory,
            -24 => Self::MergeConflict,
            -30 => Self::Passthrough,
            -31 => Self::IterOver,
            -32 => Self::Retry,
            -33 => Self::HashMismatch,
            -34 => Self::IndexDirty,
            -35 => Self::ApplyFail,
            -36 => Self::Owner,
            -37 => Self::Timeout,
            _ => Self::Unknown,
        };
        Some(kind)
    }

    /// Short human readable description.
    pub fn description(self) -> &'static str {
        match self {
            Self::Generic => "generic error",
            Self::NotFound => "requested object could not be found",
            Self::Exists => "object exists preventing operation",
            Self::Ambiguous => "more than one object matches",
            Self::BufferTooShort => "output buffer too short",
            Self::User => "operation aborted by callback",
            Self::BareRepo => "operation not allowed on bare repository",
            Self::UnbornBranch => "HEAD refers to branch with no commits",
            Self::Unmerged => "merge in progress prevented operation",
            Self::NotFastForward => "reference was not fast-forwardable",
            Self::InvalidSpec => "name or refspec is not in a valid format",
            Self::Conflict => "checkout conflicts prevented operation",
            Self::Locked => "lock file prevented operation",
            Self::Modified => "reference value does not match expected",
            Self::Auth => "authentication failed",
            Self::Certificate => "server certificate is invalid",
            Self::Applied => "patch or merge has already been applied",
            Self::Peel => "requested peel operation is not possible",
            Self::Eof => "unexpected end of file",
            Self::Invalid => "invalid operation or input",
            Self::Uncommitted => "uncommitted changes in index prevented operation",
            Self::Directory => "operation not valid for a directory",
            Self::MergeConflict => "merge conflict exists and cannot continue",
            Self::Passthrough => "callback refused to act",
            Self::IterOver => "iteration is over",
            Self::Retry => "internal retry",
            Self::HashMismatch => "hashsum mismatch in object",
            Self::IndexDirty => "unsaved changes in the index would be overwritten",
            Self::ApplyFail => "patch application failed",
            Self::Owner => "repository is not owned by current user",
            Self::Timeout => "operation timed out",
            Self::Unknown => "unknown error",
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A failure reported by libgit2, in the [`ERROR_DOMAIN`] domain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("GitError {code}: {message}")]
pub struct EngineError {
    /// Original libgit2 return code (never zero).
    pub code: i32,
    pub kind: EngineErrorKind,
    /// libgit2 error class (net, ssl, odb, ...) when known.
    pub class: Option<String>,
    pub message: String,
}

impl EngineError {
    pub fn domain(&self) -> &'static str {
        ERROR_DOMAIN
    }
}

impl From<git2::Error> for EngineError {
    fn from(err: git2::Error) -> Self {
        // Some libgit2 paths fail with a class but no code; keep them non-zero.
        let code = match err.raw_code() {
            0 => CODE_GENERIC,
            code => code,
        };
        let kind = EngineErrorKind::from_code(code).unwrap_or(EngineErrorKind::Generic);
        let class = match err.class() {
            git2::ErrorClass::None => None,
            class => Some(format!("{:?}", class).to_lowercase()),
        };
        Self {
            code,
            kind,
            class,
            message: err.message().to_string(),
        }
    }
}

/// Map a raw engine code to a domain error.
///
/// Returns `None` for `0`, the success code, and a stable error carrying
/// `code` for every other value.
pub fn error_for_code(code: i32) -> Option<EngineError> {
    let kind = EngineErrorKind::from_code(code)?;
    Some(EngineError {
        code,
        kind,
        class: None,
        message: kind.description().to_string(),
    })
}

/// Turn a raw engine code into a `Result`.
pub fn check_code(code: i32) -> Result<(), EngineError> {
    match error_for_code(code) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

/// Errors returned by download and update operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Engine(#[from] EngineError),
    /// The progress callback asked to stop.
    #[error("transfer of {0} cancelled by progress callback")]
    Cancelled(BranchName),
    /// The transfer deadline passed.
    #[error("transfer of {branch} timed out after {after:?}")]
    TimedOut { branch: BranchName, after: Duration },
    /// A local copy of the branch is already present.
    #[error("{0} is already downloaded")]
    AlreadyDownloaded(BranchName),
    /// There is no local copy of the branch to update.
    #[error("{0} has not been downloaded")]
    NotDownloaded(BranchName),
    /// Failed to acquire the branch lock within the timeout.
    #[error("lock acquisition failed for {0}")]
    LockFailed(BranchName),
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    /// Engine-style integer for this error; always negative.
    pub fn code(&self) -> i32 {
        match self {
            SyncError::Engine(e) => e.code,
            SyncError::Cancelled(_) => CODE_USER,
            SyncError::TimedOut { .. } => CODE_TIMEOUT,
            _ => CODE_GENERIC,
        }
    }

    pub fn domain(&self) -> &'static str {
        ERROR_DOMAIN
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled(_))
    }
}

impl From<git2::Error> for SyncError {
    fn from(err: git2::Error) -> Self {
        SyncError::Engine(err.into())
    }
}

impl From<ParseError> for SyncError {
    fn from(err: ParseError) -> Self {
        SyncError::InvalidInput(err.to_string())
    }
}
