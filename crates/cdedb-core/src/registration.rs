//! Event registrations.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::event::{Event, FieldAssociation};
use crate::ids::{CourseId, EventId, LodgementId, PartId, PersonaId, RegistrationId, TrackId};

/// Status of a registration within one event part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPartStatus {
    /// Not registered for this part.
    NotApplied,
    /// Registered, not yet decided.
    Applied,
    /// Confirmed participant.
    Participant,
    /// On the waiting list.
    Waitlist,
    /// Guest (e.g. speaker), present without regular participation.
    Guest,
    /// Cancelled by the participant.
    Cancelled,
    /// Rejected by the orgas.
    Rejected,
}

impl RegistrationPartStatus {
    /// Whether the registration takes part in the part in any form, which
    /// makes the part's fee due.
    #[must_use]
    pub const fn is_involved(self) -> bool {
        matches!(
            self,
            Self::Applied | Self::Participant | Self::Waitlist | Self::Guest
        )
    }

    /// Whether the person will be on site.
    #[must_use]
    pub const fn is_present(self) -> bool {
        matches!(self, Self::Participant | Self::Guest)
    }
}

/// Per-part state of a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationPart {
    /// Participation status.
    pub status: RegistrationPartStatus,

    /// Assigned lodgement.
    #[serde(default)]
    pub lodgement_id: Option<LodgementId>,

    /// Sleeps on a camping mat.
    #[serde(default)]
    pub is_camping_mat: bool,
}

impl RegistrationPart {
    /// A part entry with the given status and no lodgement.
    #[must_use]
    pub const fn with_status(status: RegistrationPartStatus) -> Self {
        Self {
            status,
            lodgement_id: None,
            is_camping_mat: false,
        }
    }
}

/// Per-track state of a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationTrack {
    /// Assigned course.
    #[serde(default)]
    pub course_id: Option<CourseId>,

    /// Course the person instructs.
    #[serde(default)]
    pub course_instructor: Option<CourseId>,

    /// Course choices in order of preference.
    #[serde(default)]
    pub choices: Vec<CourseId>,
}

/// A registration of a persona for an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// The registration id.
    pub id: RegistrationId,

    /// The event.
    pub event_id: EventId,

    /// The persona registered.
    pub persona_id: PersonaId,

    /// State per event part.
    pub parts: BTreeMap<PartId, RegistrationPart>,

    /// State per course track.
    pub tracks: BTreeMap<TrackId, RegistrationTrack>,

    /// Custom field values by field name.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,

    /// Notes by the participant.
    #[serde(default)]
    pub notes: Option<String>,

    /// Notes by the orgas.
    #[serde(default)]
    pub orga_notes: Option<String>,

    /// When the participant checked in on site.
    #[serde(default)]
    pub checkin: Option<DateTime<Utc>>,

    /// Date the last payment arrived.
    #[serde(default)]
    pub payment: Option<NaiveDate>,

    /// Total amount paid so far.
    pub amount_paid: Decimal,

    /// Cached fee; recomputed after every mutation.
    pub amount_owed: Decimal,

    /// When the registration was created.
    pub created_at: DateTime<Utc>,
}

impl Registration {
    /// Status in the given part; parts without entry count as not applied.
    #[must_use]
    pub fn status_in(&self, part_id: PartId) -> RegistrationPartStatus {
        self.parts
            .get(&part_id)
            .map_or(RegistrationPartStatus::NotApplied, |part| part.status)
    }

    /// Whether the registration is involved in any part.
    #[must_use]
    pub fn is_involved_anywhere(&self) -> bool {
        self.parts.values().any(|part| part.status.is_involved())
    }

    /// Amount still to be paid.
    #[must_use]
    pub fn remaining_owed(&self) -> Decimal {
        self.amount_owed - self.amount_paid
    }

    /// Whether a boolean field is set to `true`.
    #[must_use]
    pub fn flag(&self, field_name: &str) -> bool {
        matches!(self.fields.get(field_name), Some(serde_json::Value::Bool(true)))
    }

    /// Check the registration against the event's structure.
    ///
    /// # Errors
    ///
    /// Returns an error when parts, tracks or fields do not exist in the
    /// event, or a field value does not match its declared kind.
    pub fn validate_against(&self, event: &Event) -> Result<()> {
        if self.event_id != event.id {
            return Err(CoreError::Validation(format!(
                "registration {} belongs to event {}, not {}",
                self.id, self.event_id, event.id
            )));
        }
        for part_id in self.parts.keys() {
            if !event.parts.contains_key(part_id) {
                return Err(CoreError::UnknownReference {
                    entity: "part",
                    id: part_id.get(),
                });
            }
        }
        for (track_id, track) in &self.tracks {
            let in_event = event.tracks().find(|(id, _)| *id == track_id);
            let Some((_, definition)) = in_event else {
                return Err(CoreError::UnknownReference {
                    entity: "track",
                    id: track_id.get(),
                });
            };
            if track.choices.len() > definition.num_choices as usize {
                return Err(CoreError::Validation(format!(
                    "too many course choices for track {track_id}"
                )));
            }
        }
        for (name, value) in &self.fields {
            let field = event
                .field_by_name(name)
                .filter(|field| field.association == FieldAssociation::Registration)
                .ok_or_else(|| CoreError::Validation(format!("unknown field {name}")))?;
            if !field.accepts(value) {
                return Err(CoreError::Validation(format!(
                    "value for field {name} does not match its kind"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::event::fixtures::academy;

    /// A registration for both parts of [`academy`], involved in part 1 only.
    pub fn registration(status_part_2: RegistrationPartStatus) -> Registration {
        let event = academy();
        let mut parts = BTreeMap::new();
        parts.insert(
            PartId::new(1),
            RegistrationPart::with_status(RegistrationPartStatus::Participant),
        );
        parts.insert(PartId::new(2), RegistrationPart::with_status(status_part_2));
        let tracks = event
            .tracks()
            .map(|(id, _)| (*id, RegistrationTrack::default()))
            .collect();
        Registration {
            id: RegistrationId::new(1),
            event_id: event.id,
            persona_id: PersonaId::new(7),
            parts,
            tracks,
            fields: BTreeMap::new(),
            notes: None,
            orga_notes: None,
            checkin: None,
            payment: None,
            amount_paid: Decimal::ZERO,
            amount_owed: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }
}
