//! Events, registrations and their fees.
//!
//! Every registration carries its fee as cached `amount_owed`. All
//! operations that change a registration or the fee configuration of its
//! event recompute and persist that value in the same transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use cdedb_core::{
    calculate_single_fee, CourseTrack, Event, EventId, EventLogCode, EventLogEntry, EventPart,
    FeeModifier, FeeModifierId, FieldAssociation, FieldDefinition, FieldId, FieldKind,
    PartId, PartialExport, PersonaId, Registration, RegistrationId, RegistrationPart,
    RegistrationPartStatus, RegistrationTrack, RequestContext, TrackId, EXPORT_VERSION,
};
use cdedb_core::import::PARTIAL_KIND;
use cdedb_store::records::seq;
use cdedb_store::{Records, Store, StoreExt, StoreTx, TxExt};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{BackendError, PreconditionKind, Result};
use crate::finance::{load_persona, run_batch};
use crate::outcome::{BatchOutcome, Outcome, Refusal};

// =============================================================================
// Request types
// =============================================================================

/// Data for a new event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Full title.
    pub title: String,
    /// Short name.
    pub shortname: String,
    /// Parts, at least one.
    pub parts: Vec<NewEventPart>,
    /// Custom fields.
    #[serde(default)]
    pub fields: Vec<NewField>,
    /// Fee modifiers.
    #[serde(default)]
    pub fee_modifiers: Vec<NewFeeModifier>,
    /// Flat surcharge for non-members.
    #[serde(default)]
    pub nonmember_surcharge: Decimal,
}

/// A part of a new event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEventPart {
    /// Title.
    pub title: String,
    /// Short name, unique within the event.
    pub shortname: String,
    /// First day.
    pub part_begin: NaiveDate,
    /// Last day.
    pub part_end: NaiveDate,
    /// Base fee.
    pub fee: Decimal,
    /// Course tracks.
    #[serde(default)]
    pub tracks: Vec<NewCourseTrack>,
}

/// A course track of a new part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCourseTrack {
    /// Title.
    pub title: String,
    /// Short name.
    pub shortname: String,
    /// Number of course choices.
    #[serde(default)]
    pub num_choices: u32,
    /// Minimum number of choices.
    #[serde(default)]
    pub min_choices: u32,
}

/// A custom field of a new event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewField {
    /// Key under which values are stored.
    pub field_name: String,
    /// Value type.
    pub kind: FieldKind,
    /// Entity the field belongs to.
    pub association: FieldAssociation,
}

/// A fee modifier, naming its part and field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFeeModifier {
    /// Short name of the part.
    pub part: String,
    /// Name of the boolean registration field.
    pub field_name: String,
    /// Human-readable name.
    pub modifier_name: String,
    /// Amount added.
    pub amount: Decimal,
}

/// Changes to the fee configuration of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeUpdate {
    /// New base fees by part.
    #[serde(default)]
    pub part_fees: BTreeMap<PartId, Decimal>,
    /// New amounts of existing modifiers.
    #[serde(default)]
    pub modifier_amounts: BTreeMap<FeeModifierId, Decimal>,
    /// Modifiers to add.
    #[serde(default)]
    pub add_modifiers: Vec<NewFeeModifier>,
    /// Modifiers to remove.
    #[serde(default)]
    pub remove_modifiers: Vec<FeeModifierId>,
    /// New non-member surcharge.
    #[serde(default)]
    pub nonmember_surcharge: Option<Decimal>,
}

/// Data for a new registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRegistration {
    /// The persona registering.
    pub persona_id: PersonaId,
    /// State per part.
    #[serde(default)]
    pub parts: BTreeMap<PartId, RegistrationPart>,
    /// State per track.
    #[serde(default)]
    pub tracks: BTreeMap<TrackId, RegistrationTrack>,
    /// Custom field values.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Notes by the participant.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Partial update of a registration. Given entries replace existing ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationUpdate {
    /// Parts to set.
    #[serde(default)]
    pub parts: BTreeMap<PartId, RegistrationPart>,
    /// Tracks to set.
    #[serde(default)]
    pub tracks: BTreeMap<TrackId, RegistrationTrack>,
    /// Fields to set; `null` removes the value.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// New participant notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// New orga notes.
    #[serde(default)]
    pub orga_notes: Option<String>,
}

/// One payment received for a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePayment {
    /// The registration paid for.
    pub registration_id: RegistrationId,
    /// Amount received; negative for refunds.
    pub amount: Decimal,
    /// Booking date.
    pub date: NaiveDate,
}

/// Input of a fee preview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePreview {
    /// Whether the persona is a member.
    #[serde(default)]
    pub is_member: bool,
    /// Status per part.
    #[serde(default)]
    pub parts: BTreeMap<PartId, RegistrationPartStatus>,
    /// Custom field values.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

// =============================================================================
// Backend
// =============================================================================

/// Event capability.
#[derive(Clone)]
pub struct EventBackend {
    store: Arc<dyn Store>,
}

impl EventBackend {
    /// Create the event backend.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create an event with its parts, tracks, fields and fee modifiers.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an inconsistent definition.
    pub fn create_event(&self, ctx: &RequestContext, data: &NewEvent) -> Result<Event> {
        if data.parts.is_empty() {
            return Err(BackendError::Validation(
                "an event needs at least one part".into(),
            ));
        }
        let event = self.store.atomic(|tx| {
            let id = EventId::new(tx.next_id(seq::EVENTS)?);
            let mut event = Event {
                id,
                title: data.title.clone(),
                shortname: data.shortname.clone(),
                parts: BTreeMap::new(),
                fields: BTreeMap::new(),
                fee_modifiers: BTreeMap::new(),
                nonmember_surcharge: data.nonmember_surcharge,
                offline_lock: false,
                created_at: ctx.now,
            };
            for part in &data.parts {
                if event.parts.values().any(|p| p.shortname == part.shortname) {
                    return Err(BackendError::Validation(format!(
                        "duplicate part shortname {}",
                        part.shortname
                    )));
                }
                let part = new_part(tx, part)?;
                event.parts.insert(part.id, part);
            }
            for field in &data.fields {
                let id = FieldId::new(tx.next_id(seq::FIELDS)?);
                event.fields.insert(
                    id,
                    FieldDefinition {
                        id,
                        field_name: field.field_name.clone(),
                        kind: field.kind,
                        association: field.association,
                    },
                );
            }
            for modifier in &data.fee_modifiers {
                add_fee_modifier(tx, &mut event, modifier)?;
            }
            event.validate()?;

            tx.put_event(&event)?;
            tx.append_event_log(&EventLogEntry::new(
                id,
                EventLogCode::EventCreated,
                ctx.now,
                ctx.submitted_by,
            ))?;
            Ok(event)
        })?;
        info!(event_id = %event.id, parts = event.parts.len(), "Event created");
        Ok(event)
    }

    /// Get an event.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the event does not exist.
    pub fn get_event(&self, event_id: EventId) -> Result<Event> {
        self.store.atomic(|tx| load_event(tx, event_id))
    }

    /// All events, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_events(&self) -> Result<Vec<Event>> {
        Ok(self.store.atomic(|tx| tx.list_events())?)
    }

    /// Lock or unlock the event for offline use.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the event does not exist.
    pub fn set_offline_lock(&self, event_id: EventId, locked: bool) -> Result<Event> {
        let event = self.store.atomic(|tx| {
            let mut event = load_event(tx, event_id)?;
            event.offline_lock = locked;
            tx.put_event(&event)?;
            Ok::<_, BackendError>(event)
        })?;
        info!(event_id = %event_id, locked, "Offline lock changed");
        Ok(event)
    }

    /// Change the fee configuration and recompute every registration.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown parts or modifiers and a
    /// precondition error while the event is locked.
    pub fn set_event_fees(
        &self,
        ctx: &RequestContext,
        event_id: EventId,
        update: &FeeUpdate,
    ) -> Result<Event> {
        let (event, changed) = self.store.atomic(|tx| {
            let mut event = load_unlocked_event(tx, event_id)?;
            for (part_id, fee) in &update.part_fees {
                let part = event
                    .parts
                    .get_mut(part_id)
                    .ok_or_else(|| BackendError::Validation(format!("unknown part {part_id}")))?;
                part.fee = *fee;
            }
            for (modifier_id, amount) in &update.modifier_amounts {
                let modifier = event.fee_modifiers.get_mut(modifier_id).ok_or_else(|| {
                    BackendError::Validation(format!("unknown fee modifier {modifier_id}"))
                })?;
                modifier.amount = *amount;
            }
            for modifier_id in &update.remove_modifiers {
                if event.fee_modifiers.remove(modifier_id).is_none() {
                    return Err(BackendError::Validation(format!(
                        "unknown fee modifier {modifier_id}"
                    )));
                }
            }
            for modifier in &update.add_modifiers {
                add_fee_modifier(tx, &mut event, modifier)?;
            }
            if let Some(surcharge) = update.nonmember_surcharge {
                event.nonmember_surcharge = surcharge;
            }
            event.validate()?;
            tx.put_event(&event)?;

            let changed = recompute_event_fees(tx, &event)?;
            tx.append_event_log(
                &EventLogEntry::new(
                    event_id,
                    EventLogCode::EventFeesChanged,
                    ctx.now,
                    ctx.submitted_by,
                )
                .note(format!("{changed} registrations changed")),
            )?;
            Ok((event, changed))
        })?;
        info!(event_id = %event_id, changed, "Event fees changed");
        Ok(event)
    }

    /// Register a persona for an event.
    ///
    /// Refused if the persona is already registered.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the registration does not fit the event
    /// and a precondition error while the event is locked.
    pub fn create_registration(
        &self,
        ctx: &RequestContext,
        event_id: EventId,
        data: &NewRegistration,
    ) -> Result<Outcome<Registration>> {
        let outcome = self.store.atomic(|tx| {
            let event = load_unlocked_event(tx, event_id)?;
            if let Some(existing) = tx
                .registrations_of(event_id)?
                .into_iter()
                .find(|r| r.persona_id == data.persona_id)
            {
                return Ok(Outcome::Refused(Refusal::DuplicateRegistration {
                    persona_id: data.persona_id,
                    event_id,
                    existing: existing.id,
                }));
            }
            let mut registration = Registration {
                id: RegistrationId::new(tx.next_id(seq::REGISTRATIONS)?),
                event_id,
                persona_id: data.persona_id,
                parts: data.parts.clone(),
                tracks: data.tracks.clone(),
                fields: data.fields.clone(),
                notes: data.notes.clone(),
                orga_notes: None,
                checkin: None,
                payment: None,
                amount_paid: Decimal::ZERO,
                amount_owed: Decimal::ZERO,
                created_at: ctx.now,
            };
            fill_missing_parts(&event, &mut registration);
            registration.validate_against(&event)?;
            recompute_fee(tx, &event, &mut registration)?;
            tx.put_registration(&registration)?;
            tx.append_event_log(
                &EventLogEntry::new(
                    event_id,
                    EventLogCode::RegistrationCreated,
                    ctx.now,
                    ctx.submitted_by,
                )
                .persona(registration.persona_id),
            )?;
            Ok::<_, BackendError>(Outcome::Granted(registration))
        })?;
        match &outcome {
            Outcome::Granted(registration) => info!(
                event_id = %event_id,
                registration_id = %registration.id,
                amount_owed = %registration.amount_owed,
                "Registration created"
            ),
            Outcome::Refused(refusal) => debug!(%refusal, "Registration refused"),
        }
        Ok(outcome)
    }

    /// Get a registration.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the registration does not exist.
    pub fn get_registration(&self, registration_id: RegistrationId) -> Result<Registration> {
        self.store
            .atomic(|tx| load_registration(tx, registration_id))
    }

    /// Registrations of an event, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the event does not exist.
    pub fn list_registrations(&self, event_id: EventId) -> Result<Vec<Registration>> {
        self.store.atomic(|tx| {
            load_event(tx, event_id)?;
            Ok(tx.registrations_of(event_id)?)
        })
    }

    /// Apply a partial update and recompute the fee.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the result does not fit the event and a
    /// precondition error while the event is locked.
    pub fn set_registration(
        &self,
        ctx: &RequestContext,
        registration_id: RegistrationId,
        update: &RegistrationUpdate,
    ) -> Result<Registration> {
        let registration = self.store.atomic(|tx| {
            let mut registration = load_registration(tx, registration_id)?;
            let event = load_unlocked_event(tx, registration.event_id)?;
            registration.parts.extend(update.parts.clone());
            registration.tracks.extend(update.tracks.clone());
            for (name, value) in &update.fields {
                if value.is_null() {
                    registration.fields.remove(name);
                } else {
                    registration.fields.insert(name.clone(), value.clone());
                }
            }
            if let Some(notes) = &update.notes {
                registration.notes = Some(notes.clone());
            }
            if let Some(orga_notes) = &update.orga_notes {
                registration.orga_notes = Some(orga_notes.clone());
            }
            registration.validate_against(&event)?;
            recompute_fee(tx, &event, &mut registration)?;
            tx.put_registration(&registration)?;
            tx.append_event_log(
                &EventLogEntry::new(
                    registration.event_id,
                    EventLogCode::RegistrationChanged,
                    ctx.now,
                    ctx.submitted_by,
                )
                .persona(registration.persona_id),
            )?;
            Ok::<_, BackendError>(registration)
        })?;
        info!(
            registration_id = %registration_id,
            amount_owed = %registration.amount_owed,
            "Registration changed"
        );
        Ok(registration)
    }

    /// Delete a registration.
    ///
    /// # Errors
    ///
    /// Returns a precondition error while the event is locked.
    pub fn delete_registration(
        &self,
        ctx: &RequestContext,
        registration_id: RegistrationId,
    ) -> Result<()> {
        self.store.atomic(|tx| {
            let registration = load_registration(tx, registration_id)?;
            load_unlocked_event(tx, registration.event_id)?;
            tx.delete_registration(&registration)?;
            tx.append_event_log(
                &EventLogEntry::new(
                    registration.event_id,
                    EventLogCode::RegistrationDeleted,
                    ctx.now,
                    ctx.submitted_by,
                )
                .persona(registration.persona_id),
            )?;
            Ok::<_, BackendError>(())
        })?;
        info!(registration_id = %registration_id, "Registration deleted");
        Ok(())
    }

    /// Book a list of received payments in one transaction.
    ///
    /// # Errors
    ///
    /// Only storage failures outside of row processing are errors; failing
    /// rows and conflicts are reported in the [`BatchOutcome`].
    pub fn book_fees(
        &self,
        ctx: &RequestContext,
        event_id: EventId,
        payments: &[FeePayment],
    ) -> Result<BatchOutcome<Vec<Registration>>> {
        let outcome = run_batch(self.store.as_ref(), payments, |tx, payment| {
            load_unlocked_event(tx, event_id)?;
            let mut registration = load_registration(tx, payment.registration_id)?;
            if registration.event_id != event_id {
                return Err(BackendError::Validation(format!(
                    "registration {} does not belong to event {event_id}",
                    registration.id
                )));
            }
            if payment.amount.is_zero() {
                return Err(BackendError::Validation("payment amount must not be zero".into()));
            }
            let paid = registration.amount_paid + payment.amount;
            if paid.is_sign_negative() && !paid.is_zero() {
                return Err(BackendError::Validation(format!(
                    "refund exceeds the amount paid for registration {}",
                    registration.id
                )));
            }
            registration.amount_paid = paid;
            registration.payment = Some(payment.date);
            tx.put_registration(&registration)?;
            tx.append_event_log(
                &EventLogEntry::new(
                    event_id,
                    EventLogCode::RegistrationPaymentReceived,
                    ctx.now,
                    ctx.submitted_by,
                )
                .persona(registration.persona_id)
                .note(payment.amount.to_string()),
            )?;
            Ok(registration)
        })?;
        if outcome.is_success() {
            info!(event_id = %event_id, count = payments.len(), "Event fees booked");
        }
        Ok(outcome)
    }

    /// Compute the fee a registration would owe, without storing anything.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the event does not exist.
    pub fn calculate_fee(&self, event_id: EventId, preview: &FeePreview) -> Result<Decimal> {
        let event = self.get_event(event_id)?;
        let registration = Registration {
            id: RegistrationId::new(0),
            event_id,
            persona_id: PersonaId::new(0),
            parts: preview
                .parts
                .iter()
                .map(|(id, status)| (*id, RegistrationPart::with_status(*status)))
                .collect(),
            tracks: BTreeMap::new(),
            fields: preview.fields.clone(),
            notes: None,
            orga_notes: None,
            checkin: None,
            payment: None,
            amount_paid: Decimal::ZERO,
            amount_owed: Decimal::ZERO,
            created_at: event.created_at,
        };
        Ok(calculate_single_fee(&event, &registration, preview.is_member))
    }

    /// Snapshot of the event's mutable data for offline tools.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the event does not exist.
    pub fn partial_export_event(
        &self,
        ctx: &RequestContext,
        event_id: EventId,
    ) -> Result<PartialExport> {
        self.store.atomic(|tx| {
            let event = load_event(tx, event_id)?;
            Ok(PartialExport {
                id: event_id,
                kind: PARTIAL_KIND.to_string(),
                version: EXPORT_VERSION,
                timestamp: ctx.now,
                lodgement_groups: tx
                    .lodgement_groups_of(event_id)?
                    .into_iter()
                    .map(|g| (g.id, g))
                    .collect(),
                lodgements: tx
                    .lodgements_of(event_id)?
                    .into_iter()
                    .map(|l| (l.id, l))
                    .collect(),
                courses: tx
                    .courses_of(event_id)?
                    .into_iter()
                    .map(|c| (c.id, c))
                    .collect(),
                registrations: tx
                    .registrations_of(event_id)?
                    .into_iter()
                    .map(|r| (r.id, r))
                    .collect(),
                event,
            })
        })
    }

    /// The log of an event, oldest entry first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn event_log(&self, event_id: EventId) -> Result<Vec<EventLogEntry>> {
        Ok(self.store.atomic(|tx| tx.event_log(event_id))?)
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

pub(crate) fn load_event(tx: &mut dyn StoreTx, event_id: EventId) -> Result<Event> {
    tx.get_event(event_id)?
        .ok_or_else(|| BackendError::not_found("event", event_id))
}

fn load_unlocked_event(tx: &mut dyn StoreTx, event_id: EventId) -> Result<Event> {
    let event = load_event(tx, event_id)?;
    if event.offline_lock {
        return Err(PreconditionKind::OfflineLock(event_id).into());
    }
    Ok(event)
}

pub(crate) fn load_registration(tx: &mut dyn StoreTx, registration_id: RegistrationId) -> Result<Registration> {
    tx.get_registration(registration_id)?
        .ok_or_else(|| BackendError::not_found("registration", registration_id))
}

/// Recompute `amount_owed` from the event and the persona's membership.
pub(crate) fn recompute_fee(
    tx: &mut dyn StoreTx,
    event: &Event,
    registration: &mut Registration,
) -> Result<bool> {
    let persona = load_persona(tx, registration.persona_id)?;
    let fee = calculate_single_fee(event, registration, persona.is_member);
    let changed = fee != registration.amount_owed;
    registration.amount_owed = fee;
    Ok(changed)
}

/// Recompute and store the fee of every registration of the event.
/// Returns how many fees changed.
pub(crate) fn recompute_event_fees(tx: &mut dyn StoreTx, event: &Event) -> Result<usize> {
    let mut changed = 0;
    for mut registration in tx.registrations_of(event.id)? {
        if recompute_fee(tx, event, &mut registration)? {
            tx.put_registration(&registration)?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// Parts the registration does not mention are stored as not applied.
pub(crate) fn fill_missing_parts(event: &Event, registration: &mut Registration) {
    for part_id in event.parts.keys() {
        registration
            .parts
            .entry(*part_id)
            .or_insert_with(|| RegistrationPart::with_status(RegistrationPartStatus::NotApplied));
    }
    for (track_id, _) in event.tracks() {
        registration.tracks.entry(*track_id).or_default();
    }
}

fn new_part(tx: &mut dyn StoreTx, data: &NewEventPart) -> Result<EventPart> {
    let id = PartId::new(tx.next_id(seq::PARTS)?);
    let mut tracks = BTreeMap::new();
    for track in &data.tracks {
        if track.min_choices > track.num_choices {
            return Err(BackendError::Validation(format!(
                "track {} requires more choices than it offers",
                track.shortname
            )));
        }
        let track_id = TrackId::new(tx.next_id(seq::TRACKS)?);
        tracks.insert(
            track_id,
            CourseTrack {
                id: track_id,
                title: track.title.clone(),
                shortname: track.shortname.clone(),
                num_choices: track.num_choices,
                min_choices: track.min_choices,
            },
        );
    }
    Ok(EventPart {
        id,
        title: data.title.clone(),
        shortname: data.shortname.clone(),
        part_begin: data.part_begin,
        part_end: data.part_end,
        fee: data.fee,
        tracks,
    })
}

fn add_fee_modifier(tx: &mut dyn StoreTx, event: &mut Event, data: &NewFeeModifier) -> Result<()> {
    let part_id = event
        .parts
        .values()
        .find(|part| part.shortname == data.part)
        .map(|part| part.id)
        .ok_or_else(|| BackendError::Validation(format!("unknown part {}", data.part)))?;
    let field_id = event
        .field_by_name(&data.field_name)
        .map(|field| field.id)
        .ok_or_else(|| BackendError::Validation(format!("unknown field {}", data.field_name)))?;
    let id = FeeModifierId::new(tx.next_id(seq::FEE_MODIFIERS)?);
    event.fee_modifiers.insert(
        id,
        FeeModifier {
            id,
            part_id,
            field_id,
            modifier_name: data.modifier_name.clone(),
            amount: data.amount,
        },
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cdedb_core::Persona;
    use cdedb_store::MemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use serde_json::json;

    pub(crate) fn academy() -> NewEvent {
        let day = |d| NaiveDate::from_ymd_opt(2026, 8, d).unwrap();
        NewEvent {
            title: "Sommerakademie".into(),
            shortname: "sak".into(),
            parts: vec![
                NewEventPart {
                    title: "Erste Hälfte".into(),
                    shortname: "H1".into(),
                    part_begin: day(1),
                    part_end: day(7),
                    fee: dec!(120.00),
                    tracks: vec![NewCourseTrack {
                        title: "Kursschiene".into(),
                        shortname: "KS".into(),
                        num_choices: 3,
                        min_choices: 1,
                    }],
                },
                NewEventPart {
                    title: "Zweite Hälfte".into(),
                    shortname: "H2".into(),
                    part_begin: day(8),
                    part_end: day(14),
                    fee: dec!(95.50),
                    tracks: vec![],
                },
            ],
            fields: vec![NewField {
                field_name: "is_child".into(),
                kind: FieldKind::Bool,
                association: FieldAssociation::Registration,
            }],
            fee_modifiers: vec![NewFeeModifier {
                part: "H1".into(),
                field_name: "is_child".into(),
                modifier_name: "child_discount".into(),
                amount: dec!(-20.00),
            }],
            nonmember_surcharge: dec!(5.00),
        }
    }

    fn setup() -> (EventBackend, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store
            .atomic(|tx| {
                let mut member = Persona::new(PersonaId::new(1), "Anton", "Armin", Utc::now());
                member.is_member = true;
                tx.put_persona(&member)?;
                tx.put_persona(&Persona::new(PersonaId::new(2), "Berta", "Beispiel", Utc::now()))
            })
            .unwrap();
        (EventBackend::new(store.clone()), store)
    }

    fn part_ids(event: &Event) -> (PartId, PartId) {
        let mut ids = event.parts.keys().copied();
        (ids.next().unwrap(), ids.next().unwrap())
    }

    fn registration_for(persona: i64, parts: &[(PartId, RegistrationPartStatus)]) -> NewRegistration {
        NewRegistration {
            persona_id: PersonaId::new(persona),
            parts: parts
                .iter()
                .map(|(id, status)| (*id, RegistrationPart::with_status(*status)))
                .collect(),
            tracks: BTreeMap::new(),
            fields: BTreeMap::new(),
            notes: None,
        }
    }

    #[test]
    fn registration_fee_is_cached() {
        let (backend, _) = setup();
        let ctx = RequestContext::system();
        let event = backend.create_event(&ctx, &academy()).unwrap();
        let (h1, h2) = part_ids(&event);

        let member = backend
            .create_registration(
                &ctx,
                event.id,
                &registration_for(1, &[(h1, RegistrationPartStatus::Participant)]),
            )
            .unwrap()
            .granted()
            .unwrap();
        assert_eq!(member.amount_owed, dec!(120.00));
        assert_eq!(member.status_in(h2), RegistrationPartStatus::NotApplied);

        let guest = backend
            .create_registration(
                &ctx,
                event.id,
                &registration_for(
                    2,
                    &[
                        (h1, RegistrationPartStatus::Applied),
                        (h2, RegistrationPartStatus::Waitlist),
                    ],
                ),
            )
            .unwrap()
            .granted()
            .unwrap();
        assert_eq!(guest.amount_owed, dec!(220.50));
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let (backend, _) = setup();
        let ctx = RequestContext::system();
        let event = backend.create_event(&ctx, &academy()).unwrap();
        let (h1, _) = part_ids(&event);
        let data = registration_for(1, &[(h1, RegistrationPartStatus::Applied)]);
        let first = backend.create_registration(&ctx, event.id, &data).unwrap();
        let second = backend.create_registration(&ctx, event.id, &data).unwrap();
        assert!(first.is_granted());
        assert!(matches!(
            second.refusal(),
            Some(Refusal::DuplicateRegistration { .. })
        ));
    }

    #[test]
    fn updates_recompute_fee() {
        let (backend, _) = setup();
        let ctx = RequestContext::system();
        let event = backend.create_event(&ctx, &academy()).unwrap();
        let (h1, _) = part_ids(&event);
        let registration = backend
            .create_registration(
                &ctx,
                event.id,
                &registration_for(1, &[(h1, RegistrationPartStatus::Participant)]),
            )
            .unwrap()
            .granted()
            .unwrap();

        let mut update = RegistrationUpdate::default();
        update.fields.insert("is_child".into(), json!(true));
        let changed = backend
            .set_registration(&ctx, registration.id, &update)
            .unwrap();
        assert_eq!(changed.amount_owed, dec!(100.00));

        let mut update = RegistrationUpdate::default();
        update.parts.insert(
            h1,
            RegistrationPart::with_status(RegistrationPartStatus::Cancelled),
        );
        let cancelled = backend
            .set_registration(&ctx, registration.id, &update)
            .unwrap();
        assert_eq!(cancelled.amount_owed, Decimal::ZERO);
    }

    #[test]
    fn fee_changes_reach_every_registration() {
        let (backend, _) = setup();
        let ctx = RequestContext::system();
        let event = backend.create_event(&ctx, &academy()).unwrap();
        let (h1, _) = part_ids(&event);
        for persona in [1, 2] {
            backend
                .create_registration(
                    &ctx,
                    event.id,
                    &registration_for(persona, &[(h1, RegistrationPartStatus::Participant)]),
                )
                .unwrap();
        }

        let mut update = FeeUpdate {
            nonmember_surcharge: Some(dec!(10.00)),
            ..FeeUpdate::default()
        };
        update.part_fees.insert(h1, dec!(130.00));
        backend.set_event_fees(&ctx, event.id, &update).unwrap();

        let owed: Vec<Decimal> = backend
            .list_registrations(event.id)
            .unwrap()
            .iter()
            .map(|r| r.amount_owed)
            .collect();
        assert_eq!(owed, vec![dec!(130.00), dec!(140.00)]);
    }

    #[test]
    fn invalid_field_value_is_rejected() {
        let (backend, _) = setup();
        let ctx = RequestContext::system();
        let event = backend.create_event(&ctx, &academy()).unwrap();
        let mut data = registration_for(1, &[]);
        data.fields.insert("is_child".into(), json!("ja"));
        assert!(matches!(
            backend.create_registration(&ctx, event.id, &data),
            Err(BackendError::Validation(_))
        ));
    }

    #[test]
    fn offline_lock_blocks_changes() {
        let (backend, _) = setup();
        let ctx = RequestContext::system();
        let event = backend.create_event(&ctx, &academy()).unwrap();
        backend.set_offline_lock(event.id, true).unwrap();
        let err = backend
            .create_registration(&ctx, event.id, &registration_for(1, &[]))
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::Precondition(PreconditionKind::OfflineLock(_))
        ));
    }

    #[test]
    fn payments_are_booked_all_or_nothing() {
        let (backend, _) = setup();
        let ctx = RequestContext::system();
        let event = backend.create_event(&ctx, &academy()).unwrap();
        let (h1, _) = part_ids(&event);
        let registration = backend
            .create_registration(
                &ctx,
                event.id,
                &registration_for(1, &[(h1, RegistrationPartStatus::Participant)]),
            )
            .unwrap()
            .granted()
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();

        let outcome = backend
            .book_fees(
                &ctx,
                event.id,
                &[
                    FeePayment {
                        registration_id: registration.id,
                        amount: dec!(100.00),
                        date,
                    },
                    FeePayment {
                        registration_id: RegistrationId::new(99),
                        amount: dec!(5.00),
                        date,
                    },
                ],
            )
            .unwrap();
        assert!(matches!(outcome, BatchOutcome::Failed { row: 1, .. }));
        assert_eq!(
            backend.get_registration(registration.id).unwrap().amount_paid,
            Decimal::ZERO
        );

        let outcome = backend
            .book_fees(
                &ctx,
                event.id,
                &[FeePayment {
                    registration_id: registration.id,
                    amount: dec!(100.00),
                    date,
                }],
            )
            .unwrap();
        assert!(outcome.is_success());
        let paid = backend.get_registration(registration.id).unwrap();
        assert_eq!(paid.remaining_owed(), dec!(20.00));
        assert_eq!(paid.payment, Some(date));
    }

    #[test]
    fn fee_preview_matches_rules() {
        let (backend, _) = setup();
        let ctx = RequestContext::system();
        let event = backend.create_event(&ctx, &academy()).unwrap();
        let (h1, h2) = part_ids(&event);
        let mut preview = FeePreview::default();
        preview.parts.insert(h1, RegistrationPartStatus::Participant);
        preview.parts.insert(h2, RegistrationPartStatus::Rejected);
        preview.fields.insert("is_child".into(), json!(true));
        assert_eq!(
            backend.calculate_fee(event.id, &preview).unwrap(),
            dec!(105.00)
        );
        preview.is_member = true;
        assert_eq!(
            backend.calculate_fee(event.id, &preview).unwrap(),
            dec!(100.00)
        );
    }

    #[test]
    fn export_contains_registrations() {
        let (backend, _) = setup();
        let ctx = RequestContext::system();
        let event = backend.create_event(&ctx, &academy()).unwrap();
        backend
            .create_registration(&ctx, event.id, &registration_for(1, &[]))
            .unwrap();
        let export = backend.partial_export_event(&ctx, event.id).unwrap();
        assert_eq!(export.kind, "partial");
        assert_eq!(export.version, EXPORT_VERSION);
        assert_eq!(export.registrations.len(), 1);
        assert_eq!(export.event, event);
    }
}
