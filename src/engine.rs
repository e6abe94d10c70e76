//! Process-wide libgit2 state, shared by every `AssetSync` handle.
//!
//! The first lease configures the engine and the last one to drop tears that
//! configuration down again, so a startup after a full shutdown sees the same
//! state as a fresh process.

use std::sync::{Mutex, PoisonError};

#[derive(Debug)]
struct LeaseCount {
    leases: usize,
    /// Bumped on every cold start.
    epoch: u64,
}

impl LeaseCount {
    const fn new() -> Self {
        Self {
            leases: 0,
            epoch: 0,
        }
    }

    /// Returns the current epoch and whether this lease started the engine.
    fn take(&mut self) -> (u64, bool) {
        let cold = self.leases == 0;
        if cold {
            self.epoch += 1;
        }
        self.leases += 1;
        (self.epoch, cold)
    }

    /// Returns true when this release dropped the last lease.
    fn release(&mut self) -> bool {
        if self.leases == 0 {
            return false;
        }
        self.leases -= 1;
        self.leases == 0
    }
}

static ENGINE: Mutex<LeaseCount> = Mutex::new(LeaseCount::new());

/// Keeps the engine configured while alive.
#[derive(Debug)]
pub struct EngineLease {
    epoch: u64,
}

impl EngineLease {
    /// Take a lease, configuring the engine if no other lease is live.
    pub fn acquire() -> Self {
        let mut state = ENGINE.lock().unwrap_or_else(PoisonError::into_inner);
        let (epoch, cold) = state.take();
        if cold {
            configure();
            log::info!("Git engine started (epoch {})", epoch);
        }
        log::debug!("Engine lease taken ({} live)", state.leases);
        Self { epoch }
    }

    /// Cold-start counter at the time this lease was taken.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        let mut state = ENGINE.lock().unwrap_or_else(PoisonError::into_inner);
        let last = state.release();
        log::debug!("Engine lease released ({} live)", state.leases);
        if last {
            teardown();
            log::info!("Git engine shut down (epoch {})", state.epoch);
        }
    }
}

/// Number of live leases across the process.
pub fn live_leases() -> usize {
    ENGINE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .leases
}

fn configure() {
    git2::opts::enable_caching(true);
    git2::opts::strict_hash_verification(true);
}

fn teardown() {
    // Disabling the object cache drops everything libgit2 cached so far.
    git2::opts::enable_caching(false);
}
