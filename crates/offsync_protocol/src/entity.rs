//! Syncable entity kinds and their records.
//!
//! Relationships between entities are stored as denormalized foreign-key
//! ids, never as live references, so a record can be detached from one
//! storage context and re-fetched in another by id alone.

use crate::id::EntityId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// The kinds of entity the engine synchronises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Grouping for events and property definitions.
    Category,
    /// Geographic area events can be attached to.
    Region,
    /// User-defined property schema, optionally scoped to a category.
    PropertyDefinition,
    /// A recorded event.
    Event,
}

impl EntityKind {
    /// All kinds in dependency order: kinds without foreign keys first.
    ///
    /// Bootstrap loads kinds in exactly this order.
    pub const DEPENDENCY_ORDER: [EntityKind; 4] = [
        EntityKind::Category,
        EntityKind::Region,
        EntityKind::PropertyDefinition,
        EntityKind::Event,
    ];

    /// Returns true if creates of this kind may be grouped into one batch call.
    pub fn supports_batch_create(&self) -> bool {
        matches!(self, EntityKind::Event)
    }

    /// Returns a stable lowercase name, used in paths and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Category => "category",
            EntityKind::Region => "region",
            EntityKind::PropertyDefinition => "property_definition",
            EntityKind::Event => "event",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local synchronisation status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local changes not yet confirmed by the remote.
    #[default]
    Pending,
    /// Matches the remote.
    Synced,
    /// A mutation was abandoned after exhausting its retries.
    Failed,
}

/// A category.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Category {
    /// Entity ID.
    #[serde(default)]
    pub id: EntityId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Optional hex colour.
    #[serde(default)]
    pub color: Option<String>,
    /// Local sync status, never sent over the wire.
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

/// A circular region.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Region {
    /// Entity ID.
    #[serde(default)]
    pub id: EntityId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Centre latitude in degrees.
    #[serde(default)]
    pub latitude: f64,
    /// Centre longitude in degrees.
    #[serde(default)]
    pub longitude: f64,
    /// Radius in metres.
    #[serde(default)]
    pub radius_m: f64,
    /// Local sync status, never sent over the wire.
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

/// Value type of a user-defined property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValueType {
    /// Free text.
    #[default]
    Text,
    /// Numeric value.
    Number,
    /// Boolean flag.
    Boolean,
}

/// A user-defined property schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertyDefinition {
    /// Entity ID.
    #[serde(default)]
    pub id: EntityId,
    /// Property name.
    #[serde(default)]
    pub name: String,
    /// Value type.
    #[serde(default)]
    pub value_type: PropertyValueType,
    /// Owning category, if scoped.
    #[serde(default)]
    pub category_id: Option<EntityId>,
    /// Local sync status, never sent over the wire.
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    /// Entity ID.
    #[serde(default)]
    pub id: EntityId,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Free-form notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Start time, unix millis.
    #[serde(default)]
    pub starts_at: u64,
    /// End time, unix millis.
    #[serde(default)]
    pub ends_at: Option<u64>,
    /// Category this event belongs to.
    #[serde(default)]
    pub category_id: Option<EntityId>,
    /// Region this event happened in.
    #[serde(default)]
    pub region_id: Option<EntityId>,
    /// Property values keyed by property name.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Local sync status, never sent over the wire.
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

/// Any syncable entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    /// A category.
    Category(Category),
    /// A region.
    Region(Region),
    /// A property definition.
    PropertyDefinition(PropertyDefinition),
    /// An event.
    Event(Event),
}

impl Entity {
    /// Creates a blank entity of the given kind.
    ///
    /// Used as the starting point when an upsert finds no existing record.
    pub fn empty(kind: EntityKind, id: EntityId) -> Self {
        match kind {
            EntityKind::Category => Entity::Category(Category {
                id,
                ..Default::default()
            }),
            EntityKind::Region => Entity::Region(Region {
                id,
                ..Default::default()
            }),
            EntityKind::PropertyDefinition => Entity::PropertyDefinition(PropertyDefinition {
                id,
                ..Default::default()
            }),
            EntityKind::Event => Entity::Event(Event {
                id,
                ..Default::default()
            }),
        }
    }

    /// Returns the kind of this entity.
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Category(_) => EntityKind::Category,
            Entity::Region(_) => EntityKind::Region,
            Entity::PropertyDefinition(_) => EntityKind::PropertyDefinition,
            Entity::Event(_) => EntityKind::Event,
        }
    }

    /// Returns the entity ID.
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Category(e) => e.id,
            Entity::Region(e) => e.id,
            Entity::PropertyDefinition(e) => e.id,
            Entity::Event(e) => e.id,
        }
    }

    /// Returns the local sync status.
    pub fn sync_status(&self) -> SyncStatus {
        match self {
            Entity::Category(e) => e.sync_status,
            Entity::Region(e) => e.sync_status,
            Entity::PropertyDefinition(e) => e.sync_status,
            Entity::Event(e) => e.sync_status,
        }
    }

    /// Sets the local sync status.
    pub fn set_sync_status(&mut self, status: SyncStatus) {
        match self {
            Entity::Category(e) => e.sync_status = status,
            Entity::Region(e) => e.sync_status = status,
            Entity::PropertyDefinition(e) => e.sync_status = status,
            Entity::Event(e) => e.sync_status = status,
        }
    }

    /// Returns the foreign keys this entity holds, with the kind they point at.
    pub fn foreign_keys(&self) -> Vec<(EntityKind, EntityId)> {
        let mut keys = Vec::new();
        match self {
            Entity::Category(_) | Entity::Region(_) => {}
            Entity::PropertyDefinition(e) => {
                if let Some(id) = e.category_id {
                    keys.push((EntityKind::Category, id));
                }
            }
            Entity::Event(e) => {
                if let Some(id) = e.category_id {
                    keys.push((EntityKind::Category, id));
                }
                if let Some(id) = e.region_id {
                    keys.push((EntityKind::Region, id));
                }
            }
        }
        keys
    }

    /// Serializes the wire fields of this entity.
    pub fn to_payload(&self) -> serde_json::Result<Value> {
        match self {
            Entity::Category(e) => serde_json::to_value(e),
            Entity::Region(e) => serde_json::to_value(e),
            Entity::PropertyDefinition(e) => serde_json::to_value(e),
            Entity::Event(e) => serde_json::to_value(e),
        }
    }

    /// Builds an entity of `kind` from a wire payload.
    ///
    /// The id argument wins over any id inside the payload.
    pub fn from_payload(kind: EntityKind, id: EntityId, payload: &Value) -> serde_json::Result<Self> {
        let mut entity = Entity::empty(kind, id);
        entity.apply_payload(payload)?;
        Ok(entity)
    }

    /// Overlays the fields present in `payload` onto this entity.
    ///
    /// Fields absent from the payload keep their current value, so both full
    /// snapshots and partial updates apply. The id and sync status are
    /// preserved.
    pub fn apply_payload(&mut self, payload: &Value) -> serde_json::Result<()> {
        let id = self.id();
        let status = self.sync_status();

        let mut merged = match self.to_payload()? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Value::Object(fields) = payload {
            for (key, value) in fields {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged.insert("id".into(), serde_json::to_value(id)?);
        let merged = Value::Object(merged);

        *self = match self.kind() {
            EntityKind::Category => Entity::Category(serde_json::from_value(merged)?),
            EntityKind::Region => Entity::Region(serde_json::from_value(merged)?),
            EntityKind::PropertyDefinition => {
                Entity::PropertyDefinition(serde_json::from_value(merged)?)
            }
            EntityKind::Event => Entity::Event(serde_json::from_value(merged)?),
        };
        self.set_sync_status(status);
        Ok(())
    }
}

impl From<Category> for Entity {
    fn from(e: Category) -> Self {
        Entity::Category(e)
    }
}

impl From<Region> for Entity {
    fn from(e: Region) -> Self {
        Entity::Region(e)
    }
}

impl From<PropertyDefinition> for Entity {
    fn from(e: PropertyDefinition) -> Self {
        Entity::PropertyDefinition(e)
    }
}

impl From<Event> for Entity {
    fn from(e: Event) -> Self {
        Entity::Event(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dependency_order_puts_events_last() {
        let order = EntityKind::DEPENDENCY_ORDER;
        assert_eq!(order.last(), Some(&EntityKind::Event));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn only_events_batch() {
        assert!(EntityKind::Event.supports_batch_create());
        assert!(!EntityKind::Category.supports_batch_create());
        assert!(!EntityKind::Region.supports_batch_create());
        assert!(!EntityKind::PropertyDefinition.supports_batch_create());
    }

    #[test]
    fn payload_omits_sync_status() {
        let mut entity = Entity::empty(EntityKind::Category, EntityId::new());
        entity.set_sync_status(SyncStatus::Failed);
        let payload = entity.to_payload().unwrap();
        assert!(payload.get("sync_status").is_none());
        assert!(payload.get("name").is_some());
    }

    #[test]
    fn partial_payload_keeps_other_fields() {
        let id = EntityId::new();
        let mut entity = Entity::Event(Event {
            id,
            title: "Walk".into(),
            starts_at: 1_000,
            notes: Some("morning".into()),
            ..Default::default()
        });
        entity.set_sync_status(SyncStatus::Synced);

        entity.apply_payload(&json!({ "title": "Run" })).unwrap();

        let Entity::Event(event) = &entity else {
            panic!("kind changed");
        };
        assert_eq!(event.title, "Run");
        assert_eq!(event.notes.as_deref(), Some("morning"));
        assert_eq!(event.starts_at, 1_000);
        assert_eq!(event.id, id);
        assert_eq!(entity.sync_status(), SyncStatus::Synced);
    }

    #[test]
    fn payload_id_cannot_move_entity() {
        let id = EntityId::new();
        let other = EntityId::new();
        let entity =
            Entity::from_payload(EntityKind::Region, id, &json!({ "id": other, "name": "Park" }))
                .unwrap();
        assert_eq!(entity.id(), id);
    }

    #[test]
    fn event_foreign_keys() {
        let category = EntityId::new();
        let region = EntityId::new();
        let entity = Entity::Event(Event {
            category_id: Some(category),
            region_id: Some(region),
            ..Default::default()
        });
        let keys = entity.foreign_keys();
        assert!(keys.contains(&(EntityKind::Category, category)));
        assert!(keys.contains(&(EntityKind::Region, region)));
    }

    #[test]
    fn invalid_payload_is_rejected() {
        let mut entity = Entity::empty(EntityKind::Region, EntityId::new());
        let result = entity.apply_payload(&json!({ "latitude": "north" }));
        assert!(result.is_err());
    }
}
