//! Change-feed and collection pages returned by the remote.

use crate::entity::EntityKind;
use crate::id::EntityId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Position in the remote change history.
///
/// Monotonically increasing; `0` means "never synced".
pub type Cursor = u64;

/// Type of change reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    /// Entity was created.
    Create,
    /// Entity was updated.
    Update,
    /// Entity was deleted.
    Delete,
}

/// A single entry in the remote change history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Position of this entry in the history.
    pub sequence: Cursor,
    /// Type of change.
    pub operation: ChangeOperation,
    /// Kind of the affected entity.
    pub entity_kind: EntityKind,
    /// Affected entity.
    pub entity_id: EntityId,
    /// Entity fields after the change (`null` for deletes).
    pub payload: Value,
}

impl ChangeRecord {
    /// Returns true if applying this change would create or modify a local row.
    pub fn writes_entity(&self) -> bool {
        matches!(
            self.operation,
            ChangeOperation::Create | ChangeOperation::Update
        )
    }
}

/// One page of the change feed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangesPage {
    /// Changes in history order.
    pub changes: Vec<ChangeRecord>,
    /// Cursor to request the next page from.
    pub next_cursor: Cursor,
    /// Whether more changes exist after `next_cursor`.
    pub has_more: bool,
}

impl ChangesPage {
    /// Creates a page.
    pub fn new(changes: Vec<ChangeRecord>, next_cursor: Cursor, has_more: bool) -> Self {
        Self {
            changes,
            next_cursor,
            has_more,
        }
    }
}

/// One page of a full collection listing, used by bootstrap.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityPage {
    /// `(id, payload)` pairs.
    pub items: Vec<(EntityId, Value)>,
    /// Offset of the next page, or `None` once exhausted.
    pub next_offset: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deletes_do_not_write() {
        let mut change = ChangeRecord {
            sequence: 1,
            operation: ChangeOperation::Delete,
            entity_kind: EntityKind::Event,
            entity_id: EntityId::new(),
            payload: Value::Null,
        };
        assert!(!change.writes_entity());

        change.operation = ChangeOperation::Update;
        assert!(change.writes_entity());
    }

    #[test]
    fn empty_page_defaults() {
        let page = ChangesPage::default();
        assert!(page.changes.is_empty());
        assert_eq!(page.next_cursor, 0);
        assert!(!page.has_more);
    }
}
