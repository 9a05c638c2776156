//! Server-side change history.

use offsync_protocol::{ChangeOperation, ChangeRecord, ChangesPage, Cursor, EntityId, EntityKind};
use serde_json::Value;

/// Cursor-ordered history of every accepted change.
///
/// The change log maintains:
/// - All changes in commit order
/// - The latest cursor (sequence of the newest change, 0 when empty)
///
/// It is not internally synchronized; the owning server guards it.
#[derive(Debug, Default, Clone)]
pub struct ChangeLog {
    records: Vec<ChangeRecord>,
}

impl ChangeLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cursor of the newest change.
    pub fn latest(&self) -> Cursor {
        self.records.last().map(|r| r.sequence).unwrap_or(0)
    }

    /// Appends a change and returns its sequence.
    pub fn append(
        &mut self,
        operation: ChangeOperation,
        entity_kind: EntityKind,
        entity_id: EntityId,
        payload: Value,
    ) -> Cursor {
        let sequence = self.latest() + 1;
        self.records.push(ChangeRecord {
            sequence,
            operation,
            entity_kind,
            entity_id,
            payload,
        });
        sequence
    }

    /// Returns up to `limit` changes after `since`.
    ///
    /// `next_cursor` is the sequence of the last change returned, or `since`
    /// when nothing is returned.
    pub fn page_since(&self, since: Cursor, limit: u32) -> ChangesPage {
        // Sequences are dense and start at 1, so `since` is also an index.
        let start = usize::try_from(since)
            .unwrap_or(usize::MAX)
            .min(self.records.len());
        let end = start.saturating_add(limit as usize).min(self.records.len());
        let changes = self.records[start..end].to_vec();
        let next_cursor = changes.last().map(|c| c.sequence).unwrap_or(since);
        ChangesPage::new(changes, next_cursor, end < self.records.len())
    }

    /// Returns the number of changes.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
