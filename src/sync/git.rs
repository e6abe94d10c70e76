//! libgit2 operations on single-branch working copies.
//!
//! - `clone_branch` - initial clone restricted to one branch's refspec
//! - `fetch_branch` - refresh the remote-tracking ref of that branch
//! - `move_to_tracking` - fast-forward or hard reset onto the fetched tip
//! - `open_repository` / `repository_exists` / `head_commit` - local reads
//!
//! Transfers take a [`TransferMonitor`] so progress and cancellation reach
//! the caller's callback on every libgit2 tick.

use std::cell::RefCell;
use std::path::Path;

use git2::build::{CheckoutBuilder, CloneLocal, RepoBuilder};
use git2::{AutotagOption, FetchOptions, Oid, RemoteCallbacks, Repository, ResetType};

use crate::progress::{ProgressAction, TransferMonitor, TransferStats};
use crate::types::{BranchName, Refspec};

/// Name of the only remote a working copy has.
pub const REMOTE_NAME: &str = "origin";

/// How the local branch moved during an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    UpToDate(Oid),
    FastForwarded { from: Oid, to: Oid },
    /// Local history diverged (or the local branch was missing) and was
    /// replaced by the remote tip.
    Reset { from: Option<Oid>, to: Oid },
}

fn fetch_options<'cb, 'a, C, F>(monitor: &'cb RefCell<TransferMonitor<'a, C, F>>) -> FetchOptions<'cb>
where
    'a: 'cb,
    C: 'cb,
    F: FnMut(&TransferStats, &mut C) -> ProgressAction + 'cb,
{
    let mut callbacks = RemoteCallbacks::new();
    callbacks.transfer_progress(move |progress| {
        monitor
            .borrow_mut()
            .on_transfer(&TransferStats::from(progress))
    });
    callbacks.sideband_progress(move |_| monitor.borrow().on_tick());
    callbacks.update_tips(move |refname, from, to| {
        log::debug!("{}: {} -> {}", refname, from, to);
        monitor.borrow().on_tick()
    });

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options.download_tags(AutotagOption::None);
    options
}

/// Clone `branch` from `url` into `dest`, fetching only its refspec.
///
/// Local paths go through the transport rather than a hardlink copy so the
/// progress callbacks fire for every kind of remote.
pub fn clone_branch<C, F>(
    url: &str,
    branch: &BranchName,
    refspec: &Refspec,
    dest: &Path,
    monitor: &RefCell<TransferMonitor<'_, C, F>>,
) -> Result<Repository, git2::Error>
where
    F: FnMut(&TransferStats, &mut C) -> ProgressAction,
{
    let spec = refspec.as_str().to_string();
    let mut builder = RepoBuilder::new();
    builder
        .branch(&branch.to_string())
        .clone_local(CloneLocal::None)
        .fetch_options(fetch_options(monitor))
        .remote_create(move |repo, name, url| repo.remote_with_fetch(name, url, &spec));
    builder.clone(url, dest)
}

/// Fetch the branch's refspec from `origin` into its remote-tracking ref.
pub fn fetch_branch<C, F>(
    repo: &Repository,
    refspec: &Refspec,
    monitor: &RefCell<TransferMonitor<'_, C, F>>,
) -> Result<(), git2::Error>
where
    F: FnMut(&TransferStats, &mut C) -> ProgressAction,
{
    let mut remote = repo.find_remote(REMOTE_NAME)?;
    let mut options = fetch_options(monitor);
    remote.fetch(&[refspec.as_str()], Some(&mut options), None)
}

/// Point the local branch, HEAD, index and working tree at the fetched tip.
pub fn move_to_tracking(repo: &Repository, branch: &BranchName) -> Result<Movement, git2::Error> {
    let target = repo.refname_to_id(&branch.tracking_ref())?;
    let local_ref = branch.local_ref();
    let local = repo.refname_to_id(&local_ref).ok();

    let movement = match local {
        Some(from) if from == target => Movement::UpToDate(target),
        Some(from) if repo.graph_descendant_of(target, from)? => {
            Movement::FastForwarded { from, to: target }
        }
        from => Movement::Reset { from, to: target },
    };

    if local.is_none() {
        repo.reference(&local_ref, target, true, "dori-assets: recreate branch")?;
    }
    repo.set_head(&local_ref)?;

    let commit = repo.find_commit(target)?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    // Reset also repairs a working tree that drifted while HEAD stayed put.
    repo.reset(commit.as_object(), ResetType::Hard, Some(&mut checkout))?;

    Ok(movement)
}

/// Open an existing working copy.
pub fn open_repository(path: &Path) -> Result<Repository, git2::Error> {
    Repository::open(path)
}

/// Check if a path contains a valid git repository.
pub fn repository_exists(path: &Path) -> bool {
    Repository::open(path).is_ok()
}

/// Commit HEAD currently points at.
pub fn head_commit(repo: &Repository) -> Result<Oid, git2::Error> {
    Ok(repo.head()?.peel_to_commit()?.id())
}


#[cfg(test)]
mod tests {
    use super::testing::Remote;
    use super::*;
    use crate::progress::StopReason;
    use crate::types::refspec_for;
    use std::cell::Cell;
    use tempfile::tempdir;

    fn branch(s: &str) -> BranchName {
        s.parse().unwrap()
    }

    fn quiet_clone(url: &str, b: &BranchName, dest: &Path) -> Repository {
        let stopped = Cell::new(None);
        let mut payload = ();
        let monitor = RefCell::new(TransferMonitor::new(
            &mut payload,
            |_: &TransferStats, _: &mut ()| ProgressAction::Continue,
            None,
            &stopped,
        ));
        clone_branch(url, b, &refspec_for(b), dest, &monitor).expect("Clone failed")
    }

    #[test]
    fn repository_exists_returns_false_for_regular_directory() {
        let temp_dir = tempdir().unwrap();
        assert!(!repository_exists(temp_dir.path()));
        assert!(!repository_exists(&temp_dir.path().join("nonexistent")));
    }

    #[test]
    fn clone_fetches_only_the_requested_branch() {
        let temp_dir = tempdir().unwrap();
        let remote = Remote::init(&temp_dir.path().join("remote.git"));
        let basic = remote.commit("jp/basic", &[("jp/a.txt", "a")], None);
        remote.commit("jp/movie", &[("jp/m.mp4", "m")], None);

        let dest = temp_dir.path().join("work");
        let b = branch("jp/basic");
        let repo = quiet_clone(&remote.url(), &b, &dest);

        assert_eq!(head_commit(&repo).unwrap(), basic);
        assert_eq!(repo.head().unwrap().name(), Some("refs/heads/jp/basic"));
        assert!(dest.join("jp/a.txt").exists());
        assert!(!dest.join("jp/m.mp4").exists());
        assert!(repo.find_reference("refs/remotes/origin/jp/movie").is_err());
    }

    #[test]
    fn clone_reports_progress_with_payload() {
        let temp_dir = tempdir().unwrap();
        let remote = Remote::init(&temp_dir.path().join("remote.git"));
        remote.commit("en/sound", &[("en/s1.mp3", "1"), ("en/s2.mp3", "2")], None);

        let b = branch("en/sound");
        let stopped = Cell::new(None);
        let mut last = TransferStats::default();
        let monitor = RefCell::new(TransferMonitor::new(
            &mut last,
            |s: &TransferStats, last: &mut TransferStats| {
                *last = *s;
                ProgressAction::Continue
            },
            None,
            &stopped,
        ));
        clone_branch(
            &remote.url(),
            &b,
            &refspec_for(&b),
            &temp_dir.path().join("work"),
            &monitor,
        )
        .expect("Clone failed");
        drop(monitor);

        assert!(last.total_objects > 0);
        assert!(last.indexed_objects <= last.total_objects);
    }

    #[test]
    fn clone_missing_branch_fails() {
        let temp_dir = tempdir().unwrap();
        let remote = Remote::init(&temp_dir.path().join("remote.git"));
        remote.commit("jp/basic", &[("jp/a.txt", "a")], None);

        let b = branch("kr/basic");
        let stopped = Cell::new(None);
        let mut payload = ();
        let monitor = RefCell::new(TransferMonitor::new(
            &mut payload,
            |_: &TransferStats, _: &mut ()| ProgressAction::Continue,
            None,
            &stopped,
        ));
        let result = clone_branch(
            &remote.url(),
            &b,
            &refspec_for(&b),
            &temp_dir.path().join("work"),
            &monitor,
        );
        assert!(result.is_err());
        assert_eq!(stopped.get(), None);
    }

    #[test]
    fn cancelled_clone_records_reason() {
        let temp_dir = tempdir().unwrap();
        let remote = Remote::init(&temp_dir.path().join("remote.git"));
        remote.commit("jp/basic", &[("jp/a.txt", "a")], None);

        let b = branch("jp/basic");
        let stopped = Cell::new(None);
        let mut payload = ();
        let monitor = RefCell::new(TransferMonitor::new(
            &mut payload,
            |_: &TransferStats, _: &mut ()| ProgressAction::Cancel,
            None,
            &stopped,
        ));
        let result = clone_branch(
            &remote.url(),
            &b,
            &refspec_for(&b),
            &temp_dir.path().join("work"),
            &monitor,
        );
        assert!(result.is_err(), "Cancelled clone must fail");
        assert_eq!(stopped.get(), Some(StopReason::Cancelled));
    }

    #[test]
    fn fetch_and_fast_forward() {
        let temp_dir = tempdir().unwrap();
        let remote = Remote::init(&temp_dir.path().join("remote.git"));
        let first = remote.commit("jp/basic", &[("jp/a.txt", "a")], None);

        let b = branch("jp/basic");
        let dest = temp_dir.path().join("work");
        let repo = quiet_clone(&remote.url(), &b, &dest);

        let second = remote.commit(
            "jp/basic",
            &[("jp/a.txt", "a2"), ("jp/b.txt", "b")],
            Some(first),
        );

        let stopped = Cell::new(None);
        let mut payload = ();
        let monitor = RefCell::new(TransferMonitor::new(
            &mut payload,
            |_: &TransferStats, _: &mut ()| ProgressAction::Continue,
            None,
            &stopped,
        ));
        fetch_branch(&repo, &refspec_for(&b), &monitor).expect("Fetch failed");

        let movement = move_to_tracking(&repo, &b).unwrap();
        assert_eq!(
            movement,
            Movement::FastForwarded {
                from: first,
                to: second
            }
        );
        assert_eq!(head_commit(&repo).unwrap(), second);
        assert_eq!(std::fs::read_to_string(dest.join("jp/a.txt")).unwrap(), "a2");
        assert!(dest.join("jp/b.txt").exists());

        assert_eq!(
            move_to_tracking(&repo, &b).unwrap(),
            Movement::UpToDate(second)
        );
    }

    #[test]
    fn diverged_history_is_reset() {
        let temp_dir = tempdir().unwrap();
        let remote = Remote::init(&temp_dir.path().join("remote.git"));
        let first = remote.commit("jp/basic", &[("jp/old.txt", "old")], None);

        let b = branch("jp/basic");
        let dest = temp_dir.path().join("work");
        let repo = quiet_clone(&remote.url(), &b, &dest);

        // Force-push an unrelated history.
        let rewritten = remote.commit("jp/basic", &[("jp/new.txt", "new")], None);

        let stopped = Cell::new(None);
        let mut payload = ();
        let monitor = RefCell::new(TransferMonitor::new(
            &mut payload,
            |_: &TransferStats, _: &mut ()| ProgressAction::Continue,
            None,
            &stopped,
        ));
        fetch_branch(&repo, &refspec_for(&b), &monitor).expect("Fetch failed");

        assert_eq!(
            move_to_tracking(&repo, &b).unwrap(),
            Movement::Reset {
                from: Some(first),
                to: rewritten
            }
        );
        assert!(dest.join("jp/new.txt").exists());
        assert!(!dest.join("jp/old.txt").exists());
    }
}
