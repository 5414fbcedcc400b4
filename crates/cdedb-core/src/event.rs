//! Events, their parts and the entities organised within them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::ids::{
    CourseId, EventId, FeeModifierId, FieldId, LodgementGroupId, LodgementId, PartId, TrackId,
};

/// An event organised by the association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// The event id.
    pub id: EventId,

    /// Full title.
    pub title: String,

    /// Short name used in mails and exports.
    pub shortname: String,

    /// The parts of the event, each with its own fee.
    pub parts: BTreeMap<PartId, EventPart>,

    /// Custom data fields.
    pub fields: BTreeMap<FieldId, FieldDefinition>,

    /// Surcharges conditioned on registration fields.
    pub fee_modifiers: BTreeMap<FeeModifierId, FeeModifier>,

    /// Flat surcharge for participants who are not members.
    pub nonmember_surcharge: Decimal,

    /// Set while the event is managed offline.
    pub offline_lock: bool,

    /// When the event was created.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Iterate over all course tracks of all parts.
    pub fn tracks(&self) -> impl Iterator<Item = (&TrackId, &CourseTrack)> {
        self.parts.values().flat_map(|part| part.tracks.iter())
    }

    /// The part a track belongs to.
    #[must_use]
    pub fn part_of_track(&self, track_id: TrackId) -> Option<PartId> {
        self.parts
            .iter()
            .find(|(_, part)| part.tracks.contains_key(&track_id))
            .map(|(id, _)| *id)
    }

    /// Look up a field definition by its name.
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.values().find(|f| f.field_name == name)
    }

    /// Fee modifiers attached to the given part.
    pub fn fee_modifiers_of(&self, part_id: PartId) -> impl Iterator<Item = &FeeModifier> {
        self.fee_modifiers
            .values()
            .filter(move |modifier| modifier.part_id == part_id)
    }

    /// Check internal consistency of the event definition.
    ///
    /// # Errors
    ///
    /// Returns a validation error on negative fees, dangling fee modifiers,
    /// non-boolean fee modifier fields or duplicate field names.
    pub fn validate(&self) -> Result<()> {
        if self.nonmember_surcharge.is_sign_negative() {
            return Err(CoreError::InvalidAmount(
                "nonmember surcharge must not be negative".into(),
            ));
        }
        for part in self.parts.values() {
            if part.fee.is_sign_negative() {
                return Err(CoreError::InvalidAmount(format!(
                    "fee of part {} must not be negative",
                    part.id
                )));
            }
            if part.part_end < part.part_begin {
                return Err(CoreError::Validation(format!(
                    "part {} ends before it begins",
                    part.id
                )));
            }
        }

        let mut names = BTreeSet::new();
        for field in self.fields.values() {
            if !names.insert(field.field_name.as_str()) {
                return Err(CoreError::Validation(format!(
                    "duplicate field name {}",
                    field.field_name
                )));
            }
        }

        for modifier in self.fee_modifiers.values() {
            if !self.parts.contains_key(&modifier.part_id) {
                return Err(CoreError::UnknownReference {
                    entity: "part",
                    id: modifier.part_id.get(),
                });
            }
            let field = self
                .fields
                .get(&modifier.field_id)
                .ok_or(CoreError::UnknownReference {
                    entity: "field",
                    id: modifier.field_id.get(),
                })?;
            if field.kind != FieldKind::Bool || field.association != FieldAssociation::Registration
            {
                return Err(CoreError::Validation(format!(
                    "fee modifier {} needs a boolean registration field",
                    modifier.modifier_name
                )));
            }
        }
        Ok(())
    }
}

/// A part of an event, e.g. one week of a two-week academy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPart {
    /// The part id.
    pub id: PartId,

    /// Full title.
    pub title: String,

    /// Short name.
    pub shortname: String,

    /// First day.
    pub part_begin: NaiveDate,

    /// Last day.
    pub part_end: NaiveDate,

    /// Base fee for participating in this part.
    pub fee: Decimal,

    /// Course tracks taking place during this part.
    #[serde(default)]
    pub tracks: BTreeMap<TrackId, CourseTrack>,
}

/// A slot in which every participant attends one course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseTrack {
    /// The track id.
    pub id: TrackId,

    /// Full title.
    pub title: String,

    /// Short name.
    pub shortname: String,

    /// Number of course choices collected.
    pub num_choices: u32,

    /// Minimum number of choices a registration must state.
    pub min_choices: u32,
}

/// Value type of a custom field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// Free text.
    Str,
    /// Floating point number.
    Float,
    /// Calendar date.
    Date,
}

/// Entity a custom field is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAssociation {
    /// Registrations.
    Registration,
    /// Courses.
    Course,
    /// Lodgements.
    Lodgement,
}

/// Definition of a custom data field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// The field id.
    pub id: FieldId,

    /// Key under which values are stored.
    pub field_name: String,

    /// Value type.
    pub kind: FieldKind,

    /// Entity the field belongs to.
    pub association: FieldAssociation,
}

impl FieldDefinition {
    /// Whether `value` fits this field. `null` is always accepted.
    #[must_use]
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match (self.kind, value) {
            (_, Value::Null)
            | (FieldKind::Bool, Value::Bool(_))
            | (FieldKind::Str, Value::String(_))
            | (FieldKind::Float, Value::Number(_)) => true,
            (FieldKind::Int, Value::Number(n)) => n.is_i64(),
            (FieldKind::Date, Value::String(s)) => s.parse::<NaiveDate>().is_ok(),
            _ => false,
        }
    }
}

/// A surcharge applied when a boolean registration field is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeModifier {
    /// The modifier id.
    pub id: FeeModifierId,

    /// The part whose fee is modified.
    pub part_id: PartId,

    /// The boolean registration field that triggers the modifier.
    pub field_id: FieldId,

    /// Human-readable name.
    pub modifier_name: String,

    /// Amount added (may be negative for discounts).
    pub amount: Decimal,
}

/// A course offered at an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// The course id.
    pub id: CourseId,

    /// The event the course belongs to.
    pub event_id: EventId,

    /// Course number as printed.
    pub nr: String,

    /// Full title.
    pub title: String,

    /// Short name.
    pub shortname: String,

    /// Description text.
    pub description: Option<String>,

    /// Instructors as free text.
    pub instructors: Option<String>,

    /// Minimum number of participants.
    pub min_size: Option<u32>,

    /// Maximum number of participants.
    pub max_size: Option<u32>,

    /// Tracks the course is offered in.
    pub segments: BTreeSet<TrackId>,

    /// Tracks the course actually takes place in.
    pub active_segments: BTreeSet<TrackId>,

    /// Custom field values.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// A group of lodgements, e.g. one building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LodgementGroup {
    /// The group id.
    pub id: LodgementGroupId,

    /// The event the group belongs to.
    pub event_id: EventId,

    /// Title.
    pub title: String,
}

/// A room or tent participants are lodged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lodgement {
    /// The lodgement id.
    pub id: LodgementId,

    /// The event the lodgement belongs to.
    pub event_id: EventId,

    /// Title.
    pub title: String,

    /// Optional grouping.
    pub group_id: Option<LodgementGroupId>,

    /// Number of beds.
    pub regular_capacity: u32,

    /// Number of camping mat places.
    pub camping_mat_capacity: u32,

    /// Free-form notes.
    pub notes: Option<String>,

    /// Custom field values.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}


#[cfg(test)]
mod tests {
    use super::fixtures::academy;
    use super::*;
    use serde_json::json;

    #[test]
    fn fixture_is_valid() {
        academy().validate().unwrap();
    }

    #[test]
    fn fee_modifier_requires_bool_field() {
        let mut event = academy();
        event
            .fee_modifiers
            .get_mut(&FeeModifierId::new(1))
            .unwrap()
            .field_id = FieldId::new(2);
        assert!(matches!(event.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn fee_modifier_requires_known_part() {
        let mut event = academy();
        event
            .fee_modifiers
            .get_mut(&FeeModifierId::new(1))
            .unwrap()
            .part_id = PartId::new(99);
        assert!(matches!(
            event.validate(),
            Err(CoreError::UnknownReference { entity: "part", id: 99 })
        ));
    }

    #[test]
    fn track_lookup() {
        let event = academy();
        assert_eq!(event.tracks().count(), 2);
        assert_eq!(event.part_of_track(TrackId::new(20)), Some(PartId::new(2)));
        assert_eq!(event.part_of_track(TrackId::new(30)), None);
    }

    #[test]
    fn field_kinds_accept_matching_values() {
        let event = academy();
        let is_child = event.field_by_name("is_child").unwrap();
        assert!(is_child.accepts(&json!(true)));
        assert!(is_child.accepts(&json!(null)));
        assert!(!is_child.accepts(&json!("yes")));
        let room = event.field_by_name("room_wish").unwrap();
        assert!(room.accepts(&json!("near the lake")));
        assert!(!room.accepts(&json!(3)));
    }
}
