//! Observable sync state and pass results.

use offsync_protocol::Cursor;
use std::fmt;
use std::time::Duration;

/// The current state of the sync engine.
///
/// Transitions: `Idle → Syncing → Pulling → Idle`, `Syncing → RateLimited`,
/// and `Syncing | Pulling → Error`. `RateLimited` and `Error` persist until
/// the next trigger supersedes them.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SyncState {
    /// No pass running.
    #[default]
    Idle,
    /// Pushing local mutations.
    Syncing {
        /// Mutations processed so far.
        synced: usize,
        /// Mutations in this pass.
        total: usize,
    },
    /// Pulling remote changes.
    Pulling,
    /// The circuit breaker is open.
    RateLimited {
        /// Time until attempts resume.
        retry_after: Duration,
        /// Mutations waiting to be pushed.
        pending: usize,
    },
    /// The last pass failed.
    Error(String),
}

impl SyncState {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing { .. } | SyncState::Pulling)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => f.write_str("idle"),
            SyncState::Syncing { synced, total } => write!(f, "syncing {synced}/{total}"),
            SyncState::Pulling => f.write_str("pulling"),
            SyncState::RateLimited {
                retry_after,
                pending,
            } => write!(
                f,
                "rate limited for {}s ({pending} pending)",
                retry_after.as_secs()
            ),
            SyncState::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Counters for one completed pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Mutations confirmed by the remote.
    pub pushed: usize,
    /// Creates the remote already had.
    pub duplicates: usize,
    /// Mutations that failed and stay queued.
    pub failed: usize,
    /// Mutations dropped after exhausting their attempts.
    pub abandoned: usize,
    /// Mutations held back because their entity's create failed.
    pub deferred: usize,
    /// Remote changes or entities applied locally.
    pub pulled: usize,
    /// Remote changes dropped by resurrection prevention.
    pub skipped_resurrections: usize,
    /// Whether this pass bootstrapped.
    pub bootstrapped: bool,
    /// Cursor after the pass.
    pub cursor: Cursor,
    /// Wall time of the pass.
    pub duration: Duration,
}

/// Result of one call to `perform_sync`.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Another pass was running; nothing was done.
    Skipped,
    /// The health check failed; nothing was done.
    Offline,
    /// The circuit breaker is open.
    RateLimited {
        /// Time until attempts resume.
        retry_after: Duration,
        /// Mutations waiting to be pushed.
        pending: usize,
    },
    /// The pass aborted.
    Failed(String),
    /// The pass completed.
    Completed(SyncReport),
}

impl SyncOutcome {
    /// Returns the report of a completed pass.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }

    /// Returns true if the pass completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }
}

/// Point-in-time view for UI mirrors.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    /// Current state.
    pub state: SyncState,
    /// Mutations waiting to be pushed.
    pub pending_mutations: usize,
    /// When the last pass completed, unix millis.
    pub last_sync_at: Option<u64>,
    /// When the circuit breaker closes, unix millis.
    pub circuit_open_until: Option<u64>,
}
