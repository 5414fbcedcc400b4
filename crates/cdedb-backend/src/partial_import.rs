//! Partial import of event data edited offline.
//!
//! The delta is applied entity kind by entity kind in dependency order.
//! Every change that actually alters stored data is recorded in a
//! [`ChangeLedger`] as sent, with placeholder ids, together with the values
//! it replaces; the ledger's hash is the transaction token. A dry run
//! applies everything inside a transaction that is never committed, so it
//! reports the token a real import would compute against the same event
//! data, whatever ids other events allocated in between.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cdedb_core::import::{
    check_known_keys, diff_object, from_object, merge_object, select_paths, to_object,
};
use cdedb_core::{
    ChangeLedger, Course, CourseId, EntityKind, Event, EventLogCode, EventLogEntry, IdMapping,
    Lodgement, LodgementGroup, LodgementGroupId, LodgementId, PartialImportData,
    PartialImportResult, PersonaId, Registration, RegistrationId, RequestContext,
};
use cdedb_store::records::seq;
use cdedb_store::{Records, Store, StoreExt, StoreTx, TxExt};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{BackendError, Result};
use crate::event::{fill_missing_parts, load_event, recompute_fee};

/// Partial import capability.
#[derive(Clone)]
pub struct PartialImportBackend {
    store: Arc<dyn Store>,
}

impl PartialImportBackend {
    /// Create the partial import backend.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Apply an offline delta to an event.
    ///
    /// With `dryrun` nothing is stored and `token` is ignored. Otherwise a
    /// given `token` must equal the token computed against the current data.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed deltas or unknown ids and
    /// [`BackendError::PartialImportConflict`] on a token mismatch. Nothing
    /// is stored in either case.
    pub fn partial_import(
        &self,
        ctx: &RequestContext,
        data: &PartialImportData,
        token: Option<&str>,
        dryrun: bool,
    ) -> Result<PartialImportResult> {
        data.validate()?;
        let run = |tx: &mut dyn StoreTx| -> Result<PartialImportResult> {
            let event = load_event(tx, data.id)?;
            let mut import = Import::new(tx, ctx, event)?;
            for kind in EntityKind::ORDER {
                match kind {
                    EntityKind::LodgementGroups => import.lodgement_groups(tx, data)?,
                    EntityKind::Lodgements => import.lodgements(tx, data)?,
                    EntityKind::Courses => import.courses(tx, data)?,
                    EntityKind::Registrations => import.registrations(tx, data)?,
                }
            }
            let Import { ledger, id_map, .. } = import;

            let actual = ledger.token();
            if let (Some(expected), false) = (token, dryrun) {
                if expected != actual {
                    return Err(BackendError::PartialImportConflict {
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
            tx.append_event_log(
                &EventLogEntry::new(
                    data.id,
                    EventLogCode::EventPartialImport,
                    ctx.now,
                    ctx.submitted_by,
                )
                .note(format!("{} entities changed", ledger.len())),
            )?;
            Ok(PartialImportResult {
                token: actual,
                delta: ledger.into_delta(),
                id_map,
                dryrun,
            })
        };

        let result = if dryrun {
            self.store.simulate(run)?
        } else {
            self.store.atomic(run)?
        };
        info!(
            event_id = %data.id,
            dryrun,
            token = %result.token,
            "Partial import processed"
        );
        Ok(result)
    }
}

/// State of one import run.
struct Import<'a> {
    ctx: &'a RequestContext,
    event: Event,
    ledger: ChangeLedger,
    id_map: IdMapping,
    lodgement_groups: BTreeSet<LodgementGroupId>,
    lodgements: BTreeSet<LodgementId>,
    courses: BTreeSet<CourseId>,
}

impl<'a> Import<'a> {
    fn new(tx: &mut dyn StoreTx, ctx: &'a RequestContext, event: Event) -> Result<Self> {
        Ok(Self {
            lodgement_groups: tx
                .lodgement_groups_of(event.id)?
                .iter()
                .map(|g| g.id)
                .collect(),
            lodgements: tx.lodgements_of(event.id)?.iter().map(|l| l.id).collect(),
            courses: tx.courses_of(event.id)?.iter().map(|c| c.id).collect(),
            ctx,
            event,
            ledger: ChangeLedger::default(),
            id_map: IdMapping::default(),
        })
    }

    fn log(&self, tx: &mut dyn StoreTx, code: EventLogCode, note: String) -> Result<()> {
        tx.append_event_log(
            &EventLogEntry::new(self.event.id, code, self.ctx.now, self.ctx.submitted_by).note(note),
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lodgement groups
    // -------------------------------------------------------------------------

    fn lodgement_groups(&mut self, tx: &mut dyn StoreTx, data: &PartialImportData) -> Result<()> {
        const KIND: EntityKind = EntityKind::LodgementGroups;
        for (id, delta) in &data.lodgement_groups {
            let raw = id.get();
            match delta {
                Some(update) if raw < 0 => {
                    let new_id = LodgementGroupId::new(tx.next_id(seq::LODGEMENT_GROUPS)?);
                    let blank = LodgementGroup {
                        id: new_id,
                        event_id: self.event.id,
                        title: String::new(),
                    };
                    let group = build(KIND, raw, &blank, update)?;
                    tx.put_lodgement_group(&group)?;
                    self.lodgement_groups.insert(new_id);
                    self.id_map.lodgement_groups.insert(*id, new_id);
                    self.ledger
                        .record(KIND, raw, Value::Object(update.clone()), Value::Null);
                    self.log(tx, EventLogCode::LodgementGroupCreated, group.title)?;
                }
                Some(update) => {
                    let group = self.existing_group(tx, *id)?;
                    if let Some((group, delta, previous)) =
                        change(KIND, raw, &group, update, update)?
                    {
                        tx.put_lodgement_group(&group)?;
                        self.ledger.record(KIND, raw, delta, previous);
                        self.log(tx, EventLogCode::LodgementGroupChanged, group.title)?;
                    }
                }
                None => {
                    let group = self.existing_group(tx, *id)?;
                    for mut lodgement in tx.lodgements_of(self.event.id)? {
                        if lodgement.group_id == Some(group.id) {
                            lodgement.group_id = None;
                            tx.put_lodgement(&lodgement)?;
                        }
                    }
                    tx.delete_lodgement_group(&group)?;
                    self.lodgement_groups.remove(&group.id);
                    self.ledger
                        .record(KIND, raw, Value::Null, Value::Object(to_object(&group)?));
                    self.log(tx, EventLogCode::LodgementGroupDeleted, group.title)?;
                }
            }
        }
        Ok(())
    }

    fn existing_group(&self, tx: &mut dyn StoreTx, id: LodgementGroupId) -> Result<LodgementGroup> {
        tx.get_lodgement_group(id)?
            .filter(|g| g.event_id == self.event.id)
            .ok_or_else(|| unknown(EntityKind::LodgementGroups, id.get()))
    }

    // -------------------------------------------------------------------------
    // Lodgements
    // -------------------------------------------------------------------------

    fn lodgements(&mut self, tx: &mut dyn StoreTx, data: &PartialImportData) -> Result<()> {
        const KIND: EntityKind = EntityKind::Lodgements;
        for (id, delta) in &data.lodgements {
            let raw = id.get();
            match delta {
                Some(update) if raw < 0 => {
                    let new_id = LodgementId::new(tx.next_id(seq::LODGEMENTS)?);
                    let blank = Lodgement {
                        id: new_id,
                        event_id: self.event.id,
                        title: String::new(),
                        group_id: None,
                        regular_capacity: 0,
                        camping_mat_capacity: 0,
                        notes: None,
                        fields: BTreeMap::new(),
                    };
                    let lodgement = build(KIND, raw, &blank, &self.resolve_lodgement(update)?)?;
                    self.check_lodgement(&lodgement)?;
                    tx.put_lodgement(&lodgement)?;
                    self.lodgements.insert(new_id);
                    self.id_map.lodgements.insert(*id, new_id);
                    self.ledger
                        .record(KIND, raw, Value::Object(update.clone()), Value::Null);
                    self.log(tx, EventLogCode::LodgementCreated, lodgement.title)?;
                }
                Some(update) => {
                    let lodgement = self.existing_lodgement(tx, *id)?;
                    let resolved = self.resolve_lodgement(update)?;
                    if let Some((lodgement, delta, previous)) =
                        change(KIND, raw, &lodgement, &resolved, update)?
                    {
                        self.check_lodgement(&lodgement)?;
                        tx.put_lodgement(&lodgement)?;
                        self.ledger.record(KIND, raw, delta, previous);
                        self.log(tx, EventLogCode::LodgementChanged, lodgement.title)?;
                    }
                }
                None => {
                    let lodgement = self.existing_lodgement(tx, *id)?;
                    for mut registration in tx.registrations_of(self.event.id)? {
                        let mut touched = false;
                        for part in registration.parts.values_mut() {
                            if part.lodgement_id == Some(lodgement.id) {
                                part.lodgement_id = None;
                                touched = true;
                            }
                        }
                        if touched {
                            tx.put_registration(&registration)?;
                        }
                    }
                    tx.delete_lodgement(&lodgement)?;
                    self.lodgements.remove(&lodgement.id);
                    self.ledger
                        .record(KIND, raw, Value::Null, Value::Object(to_object(&lodgement)?));
                    self.log(tx, EventLogCode::LodgementDeleted, lodgement.title)?;
                }
            }
        }
        Ok(())
    }

    fn existing_lodgement(&self, tx: &mut dyn StoreTx, id: LodgementId) -> Result<Lodgement> {
        tx.get_lodgement(id)?
            .filter(|l| l.event_id == self.event.id)
            .ok_or_else(|| unknown(EntityKind::Lodgements, id.get()))
    }

    fn resolve_lodgement(&self, update: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut update = update.clone();
        if let Some(group_id) = update.get_mut("group_id") {
            resolve(group_id, &self.id_map.lodgement_groups, EntityKind::LodgementGroups)?;
        }
        Ok(update)
    }

    fn check_lodgement(&self, lodgement: &Lodgement) -> Result<()> {
        match lodgement.group_id {
            Some(group_id) if !self.lodgement_groups.contains(&group_id) => {
                Err(unknown(EntityKind::LodgementGroups, group_id.get()))
            }
            _ => Ok(()),
        }
    }

    // -------------------------------------------------------------------------
    // Courses
    // -------------------------------------------------------------------------

    fn courses(&mut self, tx: &mut dyn StoreTx, data: &PartialImportData) -> Result<()> {
        const KIND: EntityKind = EntityKind::Courses;
        for (id, delta) in &data.courses {
            let raw = id.get();
            match delta {
                Some(update) if raw < 0 => {
                    let new_id = CourseId::new(tx.next_id(seq::COURSES)?);
                    let blank = Course {
                        id: new_id,
                        event_id: self.event.id,
                        nr: String::new(),
                        title: String::new(),
                        shortname: String::new(),
                        description: None,
                        instructors: None,
                        min_size: None,
                        max_size: None,
                        segments: BTreeSet::new(),
                        active_segments: BTreeSet::new(),
                        fields: BTreeMap::new(),
                    };
                    let course = build(KIND, raw, &blank, update)?;
                    self.check_course(&course)?;
                    tx.put_course(&course)?;
                    self.courses.insert(new_id);
                    self.id_map.courses.insert(*id, new_id);
                    self.ledger
                        .record(KIND, raw, Value::Object(update.clone()), Value::Null);
                    self.log(tx, EventLogCode::CourseCreated, course.shortname)?;
                }
                Some(update) => {
                    let course = self.existing_course(tx, *id)?;
                    if let Some((course, delta, previous)) =
                        change(KIND, raw, &course, update, update)?
                    {
                        self.check_course(&course)?;
                        tx.put_course(&course)?;
                        self.ledger.record(KIND, raw, delta, previous);
                        self.log(tx, EventLogCode::CourseChanged, course.shortname)?;
                    }
                }
                None => {
                    let course = self.existing_course(tx, *id)?;
                    for mut registration in tx.registrations_of(self.event.id)? {
                        let mut touched = false;
                        for track in registration.tracks.values_mut() {
                            if track.course_id == Some(course.id) {
                                track.course_id = None;
                                touched = true;
                            }
                            if track.course_instructor == Some(course.id) {
                                track.course_instructor = None;
                                touched = true;
                            }
                            let before = track.choices.len();
                            track.choices.retain(|choice| *choice != course.id);
                            touched |= track.choices.len() != before;
                        }
                        if touched {
                            tx.put_registration(&registration)?;
                        }
                    }
                    tx.delete_course(&course)?;
                    self.courses.remove(&course.id);
                    self.ledger
                        .record(KIND, raw, Value::Null, Value::Object(to_object(&course)?));
                    self.log(tx, EventLogCode::CourseDeleted, course.shortname)?;
                }
            }
        }
        Ok(())
    }

    fn existing_course(&self, tx: &mut dyn StoreTx, id: CourseId) -> Result<Course> {
        tx.get_course(id)?
            .filter(|c| c.event_id == self.event.id)
            .ok_or_else(|| unknown(EntityKind::Courses, id.get()))
    }

    fn check_course(&self, course: &Course) -> Result<()> {
        for track_id in &course.segments {
            if self.event.part_of_track(*track_id).is_none() {
                return Err(BackendError::Validation(format!(
                    "courses {}: unknown track {track_id}",
                    course.id
                )));
            }
        }
        if !course.active_segments.is_subset(&course.segments) {
            return Err(BackendError::Validation(format!(
                "courses {}: active segments must be offered segments",
                course.id
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Registrations
    // -------------------------------------------------------------------------

    fn registrations(&mut self, tx: &mut dyn StoreTx, data: &PartialImportData) -> Result<()> {
        const KIND: EntityKind = EntityKind::Registrations;
        for (id, delta) in &data.registrations {
            let raw = id.get();
            match delta {
                Some(update) if raw < 0 => {
                    let Some(persona_id) = update.get("persona_id").and_then(Value::as_i64) else {
                        return Err(BackendError::Validation(format!(
                            "{KIND} {raw}: new registrations need a persona_id"
                        )));
                    };
                    let persona_id = PersonaId::new(persona_id);
                    if tx
                        .registrations_of(self.event.id)?
                        .iter()
                        .any(|r| r.persona_id == persona_id)
                    {
                        return Err(BackendError::Validation(format!(
                            "{KIND} {raw}: persona {persona_id} is already registered"
                        )));
                    }
                    let new_id = RegistrationId::new(tx.next_id(seq::REGISTRATIONS)?);
                    let blank = Registration {
                        id: new_id,
                        event_id: self.event.id,
                        persona_id,
                        parts: BTreeMap::new(),
                        tracks: BTreeMap::new(),
                        fields: BTreeMap::new(),
                        notes: None,
                        orga_notes: None,
                        checkin: None,
                        payment: None,
                        amount_paid: Decimal::ZERO,
                        amount_owed: Decimal::ZERO,
                        created_at: self.ctx.now,
                    };
                    let mut registration =
                        build(KIND, raw, &blank, &self.resolve_registration(update)?)?;
                    fill_missing_parts(&self.event, &mut registration);
                    self.check_registration(&registration)?;
                    recompute_fee(tx, &self.event, &mut registration)?;
                    tx.put_registration(&registration)?;
                    self.id_map.registrations.insert(*id, new_id);
                    self.ledger
                        .record(KIND, raw, Value::Object(update.clone()), Value::Null);
                    tx.append_event_log(
                        &EventLogEntry::new(
                            self.event.id,
                            EventLogCode::RegistrationCreated,
                            self.ctx.now,
                            self.ctx.submitted_by,
                        )
                        .persona(persona_id),
                    )?;
                }
                Some(update) => {
                    let registration = self.existing_registration(tx, *id)?;
                    let resolved = self.resolve_registration(update)?;
                    if let Some((mut registration, delta, previous)) =
                        change(KIND, raw, &registration, &resolved, update)?
                    {
                        self.check_registration(&registration)?;
                        recompute_fee(tx, &self.event, &mut registration)?;
                        tx.put_registration(&registration)?;
                        self.ledger.record(KIND, raw, delta, previous);
                        tx.append_event_log(
                            &EventLogEntry::new(
                                self.event.id,
                                EventLogCode::RegistrationChanged,
                                self.ctx.now,
                                self.ctx.submitted_by,
                            )
                            .persona(registration.persona_id),
                        )?;
                    }
                }
                None => {
                    let registration = self.existing_registration(tx, *id)?;
                    tx.delete_registration(&registration)?;
                    self.ledger.record(
                        KIND,
                        raw,
                        Value::Null,
                        Value::Object(to_object(&registration)?),
                    );
                    tx.append_event_log(
                        &EventLogEntry::new(
                            self.event.id,
                            EventLogCode::RegistrationDeleted,
                            self.ctx.now,
                            self.ctx.submitted_by,
                        )
                        .persona(registration.persona_id),
                    )?;
                }
            }
            debug!(registration = raw, "Registration imported");
        }
        Ok(())
    }

    fn existing_registration(
        &self,
        tx: &mut dyn StoreTx,
        id: RegistrationId,
    ) -> Result<Registration> {
        tx.get_registration(id)?
            .filter(|r| r.event_id == self.event.id)
            .ok_or_else(|| unknown(EntityKind::Registrations, id.get()))
    }

    /// Translate placeholder lodgement and course ids in part and track
    /// entries.
    fn resolve_registration(&self, update: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut update = update.clone();
        if let Some(Value::Object(parts)) = update.get_mut("parts") {
            for part in parts.values_mut() {
                if let Some(lodgement_id) = part.get_mut("lodgement_id") {
                    resolve(lodgement_id, &self.id_map.lodgements, EntityKind::Lodgements)?;
                }
            }
        }
        if let Some(Value::Object(tracks)) = update.get_mut("tracks") {
            for track in tracks.values_mut() {
                for key in ["course_id", "course_instructor"] {
                    if let Some(course_id) = track.get_mut(key) {
                        resolve(course_id, &self.id_map.courses, EntityKind::Courses)?;
                    }
                }
                if let Some(Value::Array(choices)) = track.get_mut("choices") {
                    for choice in choices {
                        resolve(choice, &self.id_map.courses, EntityKind::Courses)?;
                    }
                }
            }
        }
        Ok(update)
    }

    fn check_registration(&self, registration: &Registration) -> Result<()> {
        registration.validate_against(&self.event)?;
        for part in registration.parts.values() {
            if let Some(lodgement_id) = part.lodgement_id {
                if !self.lodgements.contains(&lodgement_id) {
                    return Err(unknown(EntityKind::Lodgements, lodgement_id.get()));
                }
            }
        }
        for track in registration.tracks.values() {
            let referenced = track
                .course_id
                .iter()
                .chain(track.course_instructor.iter())
                .chain(track.choices.iter());
            for course_id in referenced {
                if !self.courses.contains(course_id) {
                    return Err(unknown(EntityKind::Courses, course_id.get()));
                }
            }
        }
        Ok(())
    }
}

/// Merge `data` into a blank entity, rejecting keys the entity lacks.
fn build<T: Serialize + DeserializeOwned>(
    kind: EntityKind,
    raw: i64,
    blank: &T,
    data: &Map<String, Value>,
) -> Result<T> {
    let mut object = to_object(blank)?;
    check_known_keys(kind, raw, &object, data)?;
    merge_object(&mut object, data);
    Ok(from_object(kind, raw, object)?)
}

/// Apply the resolved `update` to `entity`. Returns `None` if nothing
/// changes, otherwise the changed entity, the effective delta as `sent`
/// (placeholder ids kept) and the values it replaces.
///
/// Ids created by this import come from sequences shared by all events, so
/// they must stay out of the ledger or the token would depend on them.
fn change<T: Serialize + DeserializeOwned>(
    kind: EntityKind,
    raw: i64,
    entity: &T,
    update: &Map<String, Value>,
    sent: &Map<String, Value>,
) -> Result<Option<(T, Value, Value)>> {
    let mut current = to_object(entity)?;
    check_known_keys(kind, raw, &current, update)?;
    let (delta, previous) = diff_object(&current, update);
    if delta.is_empty() {
        return Ok(None);
    }
    merge_object(&mut current, &delta);
    let changed = from_object(kind, raw, current)?;
    let recorded = select_paths(sent, &delta);
    Ok(Some((changed, Value::Object(recorded), Value::Object(previous))))
}

/// Replace a placeholder (negative) id with the id created for it.
fn resolve<K>(value: &mut Value, created: &BTreeMap<K, K>, kind: EntityKind) -> Result<()>
where
    K: Copy + Ord + From<i64> + Into<i64>,
{
    let Some(raw) = value.as_i64().filter(|raw| *raw < 0) else {
        return Ok(());
    };
    let id = created
        .get(&K::from(raw))
        .ok_or_else(|| unknown(kind, raw))?;
    *value = Value::from((*id).into());
    Ok(())
}

fn unknown(kind: EntityKind, raw: i64) -> BackendError {
    BackendError::Validation(format!("{kind} {raw} does not exist in this event"))
}
