//! Partial export and import of event data.
//!
//! Offline orga tools fetch a [`PartialExport`], work on it and send back a
//! [`PartialImportData`] delta. Within each entity map a negative id creates
//! a new entity, `null` deletes the entity and an object with a positive id
//! updates the given keys. Entities are processed in dependency order so
//! that freshly created parents receive real ids before children refer to
//! them.
//!
//! The changes actually applied, together with the values they replace,
//! are hashed into a transaction token. Importing with the token obtained
//! from a dry run fails if the online data changed in between.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha512};

use crate::error::{CoreError, Result};
use crate::event::{Course, Event, Lodgement, LodgementGroup};
use crate::ids::{CourseId, EventId, LodgementGroupId, LodgementId, RegistrationId};
use crate::registration::Registration;

/// Version of the export format.
pub const EXPORT_VERSION: u32 = 15;

/// Kind marker of partial exports.
pub const PARTIAL_KIND: &str = "partial";

/// Entity kinds handled by the partial import, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Lodgement groups.
    LodgementGroups,
    /// Lodgements, referring to groups.
    Lodgements,
    /// Courses.
    Courses,
    /// Registrations, referring to lodgements and courses.
    Registrations,
}

impl EntityKind {
    /// All kinds in dependency order.
    pub const ORDER: [Self; 4] = [
        Self::LodgementGroups,
        Self::Lodgements,
        Self::Courses,
        Self::Registrations,
    ];

    /// Key of the entity map in import and export documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LodgementGroups => "lodgement_groups",
            Self::Lodgements => "lodgements",
            Self::Courses => "courses",
            Self::Registrations => "registrations",
        }
    }

    /// Keys that a delta must not touch on existing entities.
    #[must_use]
    pub const fn immutable_keys(self) -> &'static [&'static str] {
        match self {
            Self::LodgementGroups | Self::Lodgements | Self::Courses => &["id", "event_id"],
            Self::Registrations => &[
                "id",
                "event_id",
                "persona_id",
                "amount_owed",
                "amount_paid",
                "created_at",
            ],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delta for one entity map: `None` deletes, `Some` creates or updates.
pub type EntityDelta<K> = BTreeMap<K, Option<Map<String, Value>>>;

/// Changes sent back by an offline tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialImportData {
    /// The event the changes belong to.
    pub id: EventId,

    /// Export format version the tool worked with.
    #[serde(rename = "CDEDB_EXPORT_EVENT_VERSION", default)]
    pub version: Option<u32>,

    /// Lodgement group changes.
    #[serde(default)]
    pub lodgement_groups: EntityDelta<LodgementGroupId>,

    /// Lodgement changes.
    #[serde(default)]
    pub lodgements: EntityDelta<LodgementId>,

    /// Course changes.
    #[serde(default)]
    pub courses: EntityDelta<CourseId>,

    /// Registration changes.
    #[serde(default)]
    pub registrations: EntityDelta<RegistrationId>,
}

impl PartialImportData {
    /// Whether the document carries no changes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lodgement_groups.is_empty()
            && self.lodgements.is_empty()
            && self.courses.is_empty()
            && self.registrations.is_empty()
    }

    /// Check format version and basic shape.
    ///
    /// # Errors
    ///
    /// Returns a validation error for foreign format versions or entity
    /// deltas that touch immutable keys.
    pub fn validate(&self) -> Result<()> {
        if let Some(version) = self.version {
            if version != EXPORT_VERSION {
                return Err(CoreError::Validation(format!(
                    "export version {version} does not match {EXPORT_VERSION}"
                )));
            }
        }
        check_keys(EntityKind::LodgementGroups, &self.lodgement_groups)?;
        check_keys(EntityKind::Lodgements, &self.lodgements)?;
        check_keys(EntityKind::Courses, &self.courses)?;
        check_keys(EntityKind::Registrations, &self.registrations)
    }
}

fn check_keys<K: Copy + Into<i64>>(kind: EntityKind, deltas: &EntityDelta<K>) -> Result<()> {
    for (id, data) in deltas {
        let raw: i64 = (*id).into();
        let Some(data) = data else {
            if raw < 0 {
                return Err(CoreError::Validation(format!(
                    "cannot delete {kind} {raw} that does not exist yet"
                )));
            }
            continue;
        };
        for key in kind.immutable_keys() {
            // persona_id is how a new registration names its persona
            let creating_registration =
                raw < 0 && kind == EntityKind::Registrations && *key == "persona_id";
            if data.contains_key(*key) && !creating_registration {
                return Err(CoreError::Validation(format!(
                    "{kind} {raw}: key {key} cannot be imported"
                )));
            }
        }
    }
    Ok(())
}

/// Snapshot of an event's mutable data handed to offline tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialExport {
    /// The event id.
    pub id: EventId,

    /// Always [`PARTIAL_KIND`].
    pub kind: String,

    /// Export format version.
    #[serde(rename = "CDEDB_EXPORT_EVENT_VERSION")]
    pub version: u32,

    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,

    /// The event definition.
    pub event: Event,

    /// Lodgement groups by id.
    pub lodgement_groups: BTreeMap<LodgementGroupId, LodgementGroup>,

    /// Lodgements by id.
    pub lodgements: BTreeMap<LodgementId, Lodgement>,

    /// Courses by id.
    pub courses: BTreeMap<CourseId, Course>,

    /// Registrations by id.
    pub registrations: BTreeMap<RegistrationId, Registration>,
}

/// Placeholder ids mapped to the ids the import created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    /// Lodgement groups.
    pub lodgement_groups: BTreeMap<LodgementGroupId, LodgementGroupId>,
    /// Lodgements.
    pub lodgements: BTreeMap<LodgementId, LodgementId>,
    /// Courses.
    pub courses: BTreeMap<CourseId, CourseId>,
    /// Registrations.
    pub registrations: BTreeMap<RegistrationId, RegistrationId>,
}

/// Outcome of a partial import (or its dry run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialImportResult {
    /// Token identifying the applied change set.
    pub token: String,

    /// Changes applied per entity kind.
    pub delta: Value,

    /// Placeholder ids resolved to real ids.
    pub id_map: IdMapping,

    /// Whether the changes were discarded.
    pub dryrun: bool,
}

/// Accumulates applied changes and the values they replaced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeLedger {
    delta: BTreeMap<EntityKind, Map<String, Value>>,
    previous: BTreeMap<EntityKind, Map<String, Value>>,
}

impl ChangeLedger {
    /// Record a change of one entity. Empty updates are ignored.
    pub fn record(&mut self, kind: EntityKind, id: i64, delta: Value, previous: Value) {
        if matches!(&delta, Value::Object(map) if map.is_empty()) {
            return;
        }
        self.delta
            .entry(kind)
            .or_default()
            .insert(id.to_string(), delta);
        self.previous
            .entry(kind)
            .or_default()
            .insert(id.to_string(), previous);
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    /// Number of entities changed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.delta.values().map(Map::len).sum()
    }

    /// The token over the recorded delta and previous values.
    #[must_use]
    pub fn token(&self) -> String {
        transaction_token(&by_kind(&self.delta), &by_kind(&self.previous))
    }

    /// Consume the ledger, returning the canonical delta.
    #[must_use]
    pub fn into_delta(self) -> Value {
        canonicalize(&by_kind(&self.delta))
    }
}

fn by_kind(changes: &BTreeMap<EntityKind, Map<String, Value>>) -> Value {
    Value::Object(
        changes
            .iter()
            .map(|(kind, map)| (kind.as_str().to_string(), Value::Object(map.clone())))
            .collect(),
    )
}

/// Compare `update` against `current`, returning the keys that actually
/// change together with their old values. Nested objects are compared
/// key-wise; everything else is replaced as a whole.
#[must_use]
pub fn diff_object(
    current: &Map<String, Value>,
    update: &Map<String, Value>,
) -> (Map<String, Value>, Map<String, Value>) {
    let mut delta = Map::new();
    let mut previous = Map::new();
    for (key, new) in update {
        match (current.get(key), new) {
            (Some(Value::Object(old_inner)), Value::Object(new_inner)) => {
                let (d, p) = diff_object(old_inner, new_inner);
                if !d.is_empty() {
                    delta.insert(key.clone(), Value::Object(d));
                    previous.insert(key.clone(), Value::Object(p));
                }
            }
            (Some(old), new) if old == new => {}
            (old, new) => {
                delta.insert(key.clone(), new.clone());
                previous.insert(key.clone(), old.cloned().unwrap_or(Value::Null));
            }
        }
    }
    (delta, previous)
}

/// Take the values of `source` at the key paths present in `shape`.
///
/// Objects present in both are followed key-wise; anywhere else the value of
/// `source` is taken as a whole. Used to record a delta as it was sent,
/// with placeholder ids, after diffing its resolved form.
#[must_use]
pub fn select_paths(
    source: &Map<String, Value>,
    shape: &Map<String, Value>,
) -> Map<String, Value> {
    shape
        .iter()
        .filter_map(|(key, shaped)| {
            let value = source.get(key)?;
            let selected = match (shaped, value) {
                (Value::Object(inner_shape), Value::Object(inner)) => {
                    Value::Object(select_paths(inner, inner_shape))
                }
                _ => value.clone(),
            };
            Some((key.clone(), selected))
        })
        .collect()
}

/// Apply `delta` to `target`, merging nested objects key-wise.
pub fn merge_object(target: &mut Map<String, Value>, delta: &Map<String, Value>) {
    for (key, new) in delta {
        match (target.get_mut(key), new) {
            (Some(Value::Object(inner)), Value::Object(new_inner)) => {
                merge_object(inner, new_inner);
            }
            _ => {
                target.insert(key.clone(), new.clone());
            }
        }
    }
}

/// Rebuild `value` with object keys in sorted order at every level.
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// SHA-512 over the canonical JSON of `[delta, previous]`, hex encoded.
#[must_use]
pub fn transaction_token(delta: &Value, previous: &Value) -> String {
    let payload = Value::Array(vec![canonicalize(delta), canonicalize(previous)]);
    let digest = Sha512::digest(payload.to_string().as_bytes());
    hex::encode(digest)
}

/// Serialize an entity into a JSON object.
///
/// # Errors
///
/// Returns a serialization error if the entity does not serialize to an object.
pub fn to_object<T: Serialize>(entity: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(CoreError::Serialization(format!(
            "expected object, got {other}"
        ))),
    }
}

/// Deserialize a merged JSON object back into the entity type.
///
/// # Errors
///
/// Returns a validation error naming the entity if the object does not fit.
pub fn from_object<T: serde::de::DeserializeOwned>(
    kind: EntityKind,
    id: i64,
    object: Map<String, Value>,
) -> Result<T> {
    serde_json::from_value(Value::Object(object))
        .map_err(|e| CoreError::Validation(format!("{kind} {id}: {e}")))
}

/// Check that an update only names keys the entity has.
///
/// # Errors
///
/// Returns a validation error for the first unknown key.
pub fn check_known_keys(
    kind: EntityKind,
    id: i64,
    template: &Map<String, Value>,
    update: &Map<String, Value>,
) -> Result<()> {
    match update.keys().find(|key| !template.contains_key(*key)) {
        Some(key) => Err(CoreError::Validation(format!(
            "{kind} {id}: unknown key {key}"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn diff_reports_changed_keys_only() {
        let current = obj(json!({"title": "Haus A", "regular_capacity": 4, "notes": null}));
        let update = obj(json!({"title": "Haus A", "regular_capacity": 6}));
        let (delta, previous) = diff_object(&current, &update);
        assert_eq!(Value::Object(delta), json!({"regular_capacity": 6}));
        assert_eq!(Value::Object(previous), json!({"regular_capacity": 4}));
    }

    #[test]
    fn diff_recurses_into_nested_objects() {
        let current = obj(json!({
            "parts": {"1": {"status": "applied", "lodgement_id": null}},
            "fields": {"is_child": false}
        }));
        let update = obj(json!({
            "parts": {"1": {"status": "participant", "lodgement_id": null}},
            "fields": {"is_child": false, "room_wish": "lake"}
        }));
        let (delta, previous) = diff_object(&current, &update);
        assert_eq!(
            Value::Object(delta),
            json!({
                "parts": {"1": {"status": "participant"}},
                "fields": {"room_wish": "lake"}
            })
        );
        assert_eq!(
            Value::Object(previous),
            json!({
                "parts": {"1": {"status": "applied"}},
                "fields": {"room_wish": null}
            })
        );
    }

    #[test]
    fn merge_applies_nested_delta() {
        let mut target = obj(json!({"parts": {"1": {"status": "applied", "is_camping_mat": false}}}));
        merge_object(&mut target, &obj(json!({"parts": {"1": {"status": "guest"}}})));
        assert_eq!(
            Value::Object(target),
            json!({"parts": {"1": {"status": "guest", "is_camping_mat": false}}})
        );
    }

    #[test]
    fn select_paths_keeps_values_as_sent() {
        let sent = obj(json!({
            "parts": {"1": {"status": "participant", "lodgement_id": -1}},
            "notes": "Zimmer am See"
        }));
        let changed = obj(json!({"parts": {"1": {"lodgement_id": 17}}}));
        assert_eq!(
            Value::Object(select_paths(&sent, &changed)),
            json!({"parts": {"1": {"lodgement_id": -1}}})
        );
    }

    #[test]
    fn token_is_deterministic_and_order_independent() {
        let a = json!({"courses": {"3": {"title": "Chor"}}, "lodgements": {"-1": {"title": "Zelt"}}});
        let b = json!({"lodgements": {"-1": {"title": "Zelt"}}, "courses": {"3": {"title": "Chor"}}});
        let prev = json!({"courses": {"3": {"title": "Orchester"}}});
        assert_eq!(transaction_token(&a, &prev), transaction_token(&b, &prev));
        assert_eq!(transaction_token(&a, &prev).len(), 128);

        let other_prev = json!({"courses": {"3": {"title": "Band"}}});
        assert_ne!(transaction_token(&a, &prev), transaction_token(&a, &other_prev));
    }

    #[test]
    fn ledger_skips_empty_updates() {
        let mut ledger = ChangeLedger::default();
        ledger.record(EntityKind::Courses, 3, json!({}), json!({}));
        assert!(ledger.is_empty());
        ledger.record(EntityKind::Courses, 3, json!({"title": "Chor"}), json!({"title": "Band"}));
        ledger.record(EntityKind::Lodgements, -1, json!({"title": "Zelt"}), Value::Null);
        assert_eq!(ledger.len(), 2);
        assert_eq!(
            ledger.into_delta(),
            json!({"courses": {"3": {"title": "Chor"}}, "lodgements": {"-1": {"title": "Zelt"}}})
        );
    }

    #[test]
    fn immutable_keys_are_rejected() {
        let data: PartialImportData = serde_json::from_value(json!({
            "id": 1,
            "courses": {"4": {"event_id": 2}}
        }))
        .unwrap();
        assert!(data.validate().is_err());

        let data: PartialImportData = serde_json::from_value(json!({
            "id": 1,
            "registrations": {"-1": {"persona_id": 9, "parts": {}}}
        }))
        .unwrap();
        data.validate().unwrap();
    }

    #[test]
    fn deleting_placeholder_is_rejected() {
        let data: PartialImportData =
            serde_json::from_value(json!({"id": 1, "lodgements": {"-2": null}})).unwrap();
        assert!(data.validate().is_err());
    }

    #[test]
    fn null_entries_parse_as_deletions() {
        let data: PartialImportData = serde_json::from_value(json!({
            "id": 1,
            "CDEDB_EXPORT_EVENT_VERSION": EXPORT_VERSION,
            "lodgement_groups": {"2": null, "-1": {"title": "Neubau"}}
        }))
        .unwrap();
        data.validate().unwrap();
        assert!(data.lodgement_groups[&LodgementGroupId::new(2)].is_none());
        assert!(data.lodgement_groups[&LodgementGroupId::new(-1)].is_some());
    }

    #[test]
    fn unknown_keys_are_reported() {
        let template = obj(json!({"title": "", "group_id": null}));
        let update = obj(json!({"titel": "typo"}));
        assert!(check_known_keys(EntityKind::Lodgements, 3, &template, &update).is_err());
    }
}
