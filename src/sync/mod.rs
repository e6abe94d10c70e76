//! Download and update manager for offline asset branches.
//!
//! [`AssetSync`] ties together the engine lease, per-branch locks, the
//! on-disk layout and the libgit2 transfers. Each (locale, resource type)
//! pair is one branch on the remote and one working copy on disk.

mod git;
pub(crate) mod lock;
mod paths;

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::config::SyncConfig;
use crate::engine::EngineLease;
use crate::error::SyncError;
use crate::progress::{ProgressAction, StopReason, TransferMonitor, TransferStats};
use crate::types::{BranchName, Locale, ResourceType, branch_name_for, refspec_for};

use self::git::Movement;
use self::lock::BranchLock;

pub use self::git::REMOTE_NAME;
pub use self::paths::AssetPaths;

/// A downloaded branch on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalResource {
    #[serde(serialize_with = "serialize_display")]
    pub branch: BranchName,
    /// Working copy holding the branch's files.
    pub path: PathBuf,
    /// Commit checked out in the working copy.
    pub commit: String,
}

/// Outcome of a successful update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateStatus {
    /// The local copy already matched the remote.
    UpToDate { commit: String },
    /// The local copy moved forward to the remote tip.
    FastForwarded { from: String, to: String },
    /// Local history diverged and was replaced by the remote tip.
    Reset { from: Option<String>, to: String },
}

impl UpdateStatus {
    /// Integer status: 0 up to date, 1 fast-forwarded, 2 reset.
    pub fn code(&self) -> i32 {
        match self {
            UpdateStatus::UpToDate { .. } => 0,
            UpdateStatus::FastForwarded { .. } => 1,
            UpdateStatus::Reset { .. } => 2,
        }
    }

    /// Commit checked out after the update.
    pub fn commit(&self) -> &str {
        match self {
            UpdateStatus::UpToDate { commit } => commit,
            UpdateStatus::FastForwarded { to, .. } | UpdateStatus::Reset { to, .. } => to,
        }
    }

    pub fn changed(&self) -> bool {
        !matches!(self, UpdateStatus::UpToDate { .. })
    }
}

impl From<Movement> for UpdateStatus {
    fn from(movement: Movement) -> Self {
        match movement {
            Movement::UpToDate(commit) => UpdateStatus::UpToDate {
                commit: commit.to_string(),
            },
            Movement::FastForwarded { from, to } => UpdateStatus::FastForwarded {
                from: from.to_string(),
                to: to.to_string(),
            },
            Movement::Reset { from, to } => UpdateStatus::Reset {
                from: from.map(|id| id.to_string()),
                to: to.to_string(),
            },
        }
    }
}

/// Result of [`AssetSync::sync`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncOutcome {
    Downloaded(LocalResource),
    Updated {
        #[serde(flatten)]
        status: UpdateStatus,
    },
}

fn serialize_display<T: std::fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn no_progress(_: &TransferStats, _: &mut ()) -> ProgressAction {
    ProgressAction::Continue
}

fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to clean up {}: {}", path.display(), e);
        }
    }
}

/// Handle on the asset store. Holds a lease on process-wide engine state
/// until [`shutdown`](AssetSync::shutdown) or drop.
#[derive(Debug)]
pub struct AssetSync {
    config: SyncConfig,
    paths: AssetPaths,
    lease: EngineLease,
}

impl AssetSync {
    /// Start the engine (if this is the first live handle) and return a handle.
    pub fn startup(config: SyncConfig) -> Self {
        let lease = EngineLease::acquire();
        let paths = config.paths();
        log::debug!("Asset sync rooted at {}", paths.root().display());
        Self {
            config,
            paths,
            lease,
        }
    }

    /// Release this handle's engine lease. The last handle tears the engine down.
    pub fn shutdown(self) {
        log::debug!("Asset sync handle for {} shut down", self.paths.root().display());
    }

    /// Engine cold-start counter this handle started under. A startup after
    /// every earlier handle shut down sees a higher value.
    pub fn engine_epoch(&self) -> u64 {
        self.lease.epoch()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn paths(&self) -> &AssetPaths {
        &self.paths
    }

    /// Working copy directory for a (locale, resource type) pair.
    pub fn resource_dir(&self, locale: &Locale, resource_type: &ResourceType) -> PathBuf {
        self.paths.working_dir(&branch_name_for(locale, resource_type))
    }

    pub fn is_downloaded(&self, locale: &Locale, resource_type: &ResourceType) -> bool {
        git::repository_exists(&self.resource_dir(locale, resource_type))
    }

    /// Whether `relative` exists inside the pair's working copy.
    ///
    /// Paths that try to climb out of the working copy never exist.
    pub fn file_exists(&self, relative: &str, locale: &Locale, resource_type: &ResourceType) -> bool {
        self.local_file(relative, locale, resource_type).is_some()
    }

    /// Absolute path of `relative` inside the pair's working copy, if present.
    pub fn local_file(
        &self,
        relative: &str,
        locale: &Locale,
        resource_type: &ResourceType,
    ) -> Option<PathBuf> {
        let relative = relative.trim_start_matches('/');
        let escapes = relative
            .split('/')
            .any(|part| part == ".." || part == ".git");
        if relative.is_empty() || escapes {
            return None;
        }
        let path = self.resource_dir(locale, resource_type).join(relative);
        path.is_file().then_some(path)
    }

    /// Every working copy under the root, sorted by branch name.
    ///
    /// Branches with a download or update in flight are left out.
    pub fn downloaded_resources(&self) -> Result<Vec<LocalResource>, SyncError> {
        let mut found = Vec::new();
        let resources = self.paths.resources_dir();
        let locales = match std::fs::read_dir(&resources) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        for locale_entry in locales.flatten() {
            if !locale_entry.path().is_dir() {
                continue;
            }
            let Some(locale) = locale_entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<Locale>().ok())
            else {
                continue;
            };
            for type_entry in std::fs::read_dir(locale_entry.path())?.flatten() {
                let Some(resource_type) = type_entry
                    .file_name()
                    .to_str()
                    .and_then(|s| s.parse::<ResourceType>().ok())
                else {
                    continue;
                };
                let branch = branch_name_for(&locale, &resource_type);
                let path = self.paths.working_dir(&branch);
                if !git::repository_exists(&path) {
                    continue;
                }
                let Some(_lock) = BranchLock::try_acquire(&self.paths.lock_path(&branch))? else {
                    log::debug!("Skipping {} while a transfer holds it", branch);
                    continue;
                };
                let repo = git::open_repository(&path)?;
                let commit = match git::head_commit(&repo) {
                    Ok(id) => id.to_string(),
                    Err(e) => {
                        log::warn!("Skipping {} with unreadable HEAD: {}", branch, e);
                        continue;
                    }
                };
                found.push(LocalResource {
                    branch,
                    path,
                    commit,
                });
            }
        }
        found.sort_by(|a, b| a.branch.cmp(&b.branch));
        Ok(found)
    }

    /// Clone the pair's branch, reporting progress to `on_progress`.
    ///
    /// `payload` is handed back to every `on_progress` call. Returning
    /// [`ProgressAction::Cancel`] aborts the transfer with
    /// [`SyncError::Cancelled`]. A failed download leaves nothing on disk.
    pub fn download_resource<C, F>(
        &self,
        locale: &Locale,
        resource_type: &ResourceType,
        payload: &mut C,
        on_progress: F,
    ) -> Result<LocalResource, SyncError>
    where
        F: FnMut(&TransferStats, &mut C) -> ProgressAction,
    {
        let branch = branch_name_for(locale, resource_type);
        self.remote()?;
        let _lock = self.lock(&branch)?;
        self.download_locked(branch, payload, on_progress)
    }

    /// Fetch the pair's branch and move the local copy to the remote tip.
    ///
    /// Same progress and cancellation contract as
    /// [`download_resource`](AssetSync::download_resource). A cancelled
    /// update leaves the checked-out files untouched.
    pub fn update_resource<C, F>(
        &self,
        locale: &Locale,
        resource_type: &ResourceType,
        payload: &mut C,
        on_progress: F,
    ) -> Result<UpdateStatus, SyncError>
    where
        F: FnMut(&TransferStats, &mut C) -> ProgressAction,
    {
        let branch = branch_name_for(locale, resource_type);
        let _lock = self.lock(&branch)?;
        self.update_locked(branch, payload, on_progress)
    }

    /// [`download_resource`](AssetSync::download_resource) without progress reporting.
    pub fn download(
        &self,
        locale: &Locale,
        resource_type: &ResourceType,
    ) -> Result<LocalResource, SyncError> {
        self.download_resource(locale, resource_type, &mut (), no_progress)
    }

    /// [`update_resource`](AssetSync::update_resource) without progress reporting.
    pub fn update(
        &self,
        locale: &Locale,
        resource_type: &ResourceType,
    ) -> Result<UpdateStatus, SyncError> {
        self.update_resource(locale, resource_type, &mut (), no_progress)
    }

    /// Download the pair if it is missing, update it otherwise.
    ///
    /// The choice is made while holding the branch lock, so concurrent
    /// callers end up with one download followed by updates.
    pub fn sync<C, F>(
        &self,
        locale: &Locale,
        resource_type: &ResourceType,
        payload: &mut C,
        on_progress: F,
    ) -> Result<SyncOutcome, SyncError>
    where
        F: FnMut(&TransferStats, &mut C) -> ProgressAction,
    {
        let branch = branch_name_for(locale, resource_type);
        let _lock = self.lock(&branch)?;
        if git::repository_exists(&self.paths.working_dir(&branch)) {
            self.update_locked(branch, payload, on_progress)
                .map(|status| SyncOutcome::Updated { status })
        } else {
            self.download_locked(branch, payload, on_progress)
                .map(SyncOutcome::Downloaded)
        }
    }

    /// Clone `branch`. The caller holds its lock.
    fn download_locked<C, F>(
        &self,
        branch: BranchName,
        payload: &mut C,
        on_progress: F,
    ) -> Result<LocalResource, SyncError>
    where
        F: FnMut(&TransferStats, &mut C) -> ProgressAction,
    {
        let url = self.remote()?;
        let dest = self.paths.working_dir(&branch);
        if git::repository_exists(&dest) {
            return Err(SyncError::AlreadyDownloaded(branch));
        }
        // Leftovers from an interrupted download.
        remove_partial(&dest);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let refspec = refspec_for(&branch);
        log::info!("Downloading {} from {} ({})", branch, url, refspec);

        let stopped = Cell::new(None);
        let monitor = RefCell::new(TransferMonitor::new(
            payload,
            on_progress,
            self.config.transfer_timeout(),
            &stopped,
        ));
        let result = git::clone_branch(url, &branch, &refspec, &dest, &monitor);
        drop(monitor);

        let repo = match result {
            Ok(repo) => repo,
            Err(e) => {
                remove_partial(&dest);
                let err = transfer_error(&branch, stopped.get(), e);
                log::warn!("Download of {} failed: {}", branch, err);
                return Err(err);
            }
        };

        let commit = git::head_commit(&repo)?.to_string();
        log::info!("Downloaded {} at {}", branch, commit);
        Ok(LocalResource {
            branch,
            path: dest,
            commit,
        })
    }

    /// Fetch `branch` and move its working copy. The caller holds its lock.
    fn update_locked<C, F>(
        &self,
        branch: BranchName,
        payload: &mut C,
        on_progress: F,
    ) -> Result<UpdateStatus, SyncError>
    where
        F: FnMut(&TransferStats, &mut C) -> ProgressAction,
    {
        let path = self.paths.working_dir(&branch);
        let repo = match git::open_repository(&path) {
            Ok(repo) => repo,
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                return Err(SyncError::NotDownloaded(branch));
            }
            Err(e) => return Err(e.into()),
        };

        let refspec = refspec_for(&branch);
        log::info!("Updating {} ({})", branch, refspec);

        let stopped = Cell::new(None);
        let monitor = RefCell::new(TransferMonitor::new(
            payload,
            on_progress,
            self.config.transfer_timeout(),
            &stopped,
        ));
        let result = git::fetch_branch(&repo, &refspec, &monitor);
        drop(monitor);

        if let Err(e) = result {
            let err = transfer_error(&branch, stopped.get(), e);
            log::warn!("Update of {} failed: {}", branch, err);
            return Err(err);
        }

        let status = UpdateStatus::from(git::move_to_tracking(&repo, &branch)?);
        match &status {
            UpdateStatus::UpToDate { commit } => log::info!("{} is up to date at {}", branch, commit),
            other => log::info!("Updated {} to {}", branch, other.commit()),
        }
        Ok(status)
    }

    fn remote(&self) -> Result<&str, SyncError> {
        self.config
            .remote()
            .map_err(|e| SyncError::InvalidInput(e.to_string()))
    }

    fn lock(&self, branch: &BranchName) -> Result<BranchLock, SyncError> {
        let lock_path = self.paths.lock_path(branch);
        match BranchLock::acquire_with_timeout(&lock_path, self.config.lock_timeout()) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                Err(SyncError::LockFailed(branch.clone()))
            }
            Err(e) => Err(SyncError::Io(e)),
        }
    }
}

/// Prefer the recorded stop reason over libgit2's generic callback error.
fn transfer_error(branch: &BranchName, stopped: Option<StopReason>, err: git2::Error) -> SyncError {
    match stopped {
        Some(StopReason::Cancelled) => SyncError::Cancelled(branch.clone()),
        Some(StopReason::TimedOut(after)) => SyncError::TimedOut {
            branch: branch.clone(),
            after,
        },
        None => SyncError::from(err),
    }
}

/// Timeout used when a caller asks for "no waiting" on a busy branch.
pub const NO_WAIT: Duration = Duration::ZERO;
