//! Notifications for subsystems that react to sync passes.

use crate::state::SyncReport;
use offsync_protocol::{Cursor, EntityId, EntityKind, MutationOperation};

/// Something notable happened during a pass.
///
/// Delivered over a broadcast channel; slow subscribers may miss events.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A pass passed its guards and is about to push.
    PassStarted,
    /// Local state was rebuilt from the remote. Dependent caches should reset.
    BootstrapCompleted {
        /// Baseline cursor persisted by the bootstrap.
        cursor: Cursor,
    },
    /// A mutation exhausted its attempts and its entity was flagged failed.
    MutationAbandoned {
        /// Affected entity.
        entity_id: EntityId,
        /// Kind of the affected entity.
        kind: EntityKind,
        /// Abandoned operation.
        operation: MutationOperation,
    },
    /// A pass completed.
    PassCompleted(SyncReport),
}
