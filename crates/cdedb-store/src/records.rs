//! Typed accessors for every domain record.
//!
//! Writes keep the secondary indexes in sync with the primary records, so
//! callers never touch index families directly.

use cdedb_core::{
    CdeLogEntry, Course, CourseId, Event, EventId, EventLogEntry, ExpulsPeriod, Lastschrift,
    LastschriftId, LastschriftTransaction, Lodgement, LodgementGroup, LodgementGroupId,
    LodgementId, Period, PeriodId, Persona, PersonaId, Registration, RegistrationId,
    TransactionId,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::keys;
use crate::schema::cf;
use crate::TxExt;

/// Sequence names used for id allocation.
pub mod seq {
    /// Persona ids.
    pub const PERSONAS: &str = "personas";
    /// Permit ids.
    pub const LASTSCHRIFTEN: &str = "lastschriften";
    /// Transaction ids.
    pub const TRANSACTIONS: &str = "lastschrift_transactions";
    /// Event ids.
    pub const EVENTS: &str = "events";
    /// Event part ids.
    pub const PARTS: &str = "event_parts";
    /// Course track ids.
    pub const TRACKS: &str = "course_tracks";
    /// Custom field ids.
    pub const FIELDS: &str = "field_definitions";
    /// Fee modifier ids.
    pub const FEE_MODIFIERS: &str = "fee_modifiers";
    /// Registration ids.
    pub const REGISTRATIONS: &str = "registrations";
    /// Course ids.
    pub const COURSES: &str = "courses";
    /// Lodgement ids.
    pub const LODGEMENTS: &str = "lodgements";
    /// Lodgement group ids.
    pub const LODGEMENT_GROUPS: &str = "lodgement_groups";
}

/// Typed record access inside a transaction.
pub trait Records: TxExt {
    // =========================================================================
    // Personas
    // =========================================================================

    /// Get a persona by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_persona(&mut self, id: PersonaId) -> Result<Option<Persona>> {
        self.get_record(cf::PERSONAS, &keys::id_key(id.get()))
    }

    /// Insert or update a persona.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_persona(&mut self, persona: &Persona) -> Result<()> {
        self.put_record(cf::PERSONAS, &keys::id_key(persona.id.get()), persona)
    }

    /// All personas, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_personas(&mut self) -> Result<Vec<Persona>> {
        self.scan_records(cf::PERSONAS, &[])
    }

    // =========================================================================
    // Periods
    // =========================================================================

    /// Get a semester period by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_period(&mut self, id: PeriodId) -> Result<Option<Period>> {
        self.get_record(cf::PERIODS, &keys::id_key(id.get()))
    }

    /// Insert or update a semester period.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_period(&mut self, period: &Period) -> Result<()> {
        self.put_record(cf::PERIODS, &keys::id_key(period.id.get()), period)
    }

    /// The period with the highest id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn current_period(&mut self) -> Result<Option<Period>> {
        Ok(self.scan_records::<Period>(cf::PERIODS, &[])?.pop())
    }

    /// Insert or update an ExPuls period.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_expuls_period(&mut self, period: &ExpulsPeriod) -> Result<()> {
        self.put_record(cf::EXPULS_PERIODS, &keys::id_key(period.id.get()), period)
    }

    /// The ExPuls period with the highest id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn current_expuls_period(&mut self) -> Result<Option<ExpulsPeriod>> {
        Ok(self
            .scan_records::<ExpulsPeriod>(cf::EXPULS_PERIODS, &[])?
            .pop())
    }

    // =========================================================================
    // Direct debit
    // =========================================================================

    /// Get a permit by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_lastschrift(&mut self, id: LastschriftId) -> Result<Option<Lastschrift>> {
        self.get_record(cf::LASTSCHRIFTEN, &keys::id_key(id.get()))
    }

    /// Insert or update a permit, maintaining the persona index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_lastschrift(&mut self, permit: &Lastschrift) -> Result<()> {
        put_indexed(
            self,
            cf::LASTSCHRIFTEN,
            cf::LASTSCHRIFTEN_BY_PERSONA,
            permit.persona_id.get(),
            permit.id.get(),
            permit,
        )
    }

    /// Delete a permit together with its transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_lastschrift(&mut self, permit: &Lastschrift) -> Result<()> {
        for tx_id in self.index_children(cf::TRANSACTIONS_BY_LASTSCHRIFT, permit.id.get())? {
            self.delete(cf::TRANSACTIONS, &keys::id_key(tx_id))?;
            self.delete(
                cf::TRANSACTIONS_BY_LASTSCHRIFT,
                &keys::index_key(permit.id.get(), tx_id),
            )?;
        }
        delete_indexed(
            self,
            cf::LASTSCHRIFTEN,
            cf::LASTSCHRIFTEN_BY_PERSONA,
            permit.persona_id.get(),
            permit.id.get(),
        )
    }

    /// All permits of a persona, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn lastschriften_of(&mut self, persona_id: PersonaId) -> Result<Vec<Lastschrift>> {
        children(
            self,
            cf::LASTSCHRIFTEN,
            cf::LASTSCHRIFTEN_BY_PERSONA,
            persona_id.get(),
        )
    }

    /// All permits, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_lastschriften(&mut self) -> Result<Vec<Lastschrift>> {
        self.scan_records(cf::LASTSCHRIFTEN, &[])
    }

    /// Get a transaction by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&mut self, id: TransactionId) -> Result<Option<LastschriftTransaction>> {
        self.get_record(cf::TRANSACTIONS, &keys::id_key(id.get()))
    }

    /// Insert or update a transaction, maintaining the permit index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_transaction(&mut self, transaction: &LastschriftTransaction) -> Result<()> {
        put_indexed(
            self,
            cf::TRANSACTIONS,
            cf::TRANSACTIONS_BY_LASTSCHRIFT,
            transaction.lastschrift_id.get(),
            transaction.id.get(),
            transaction,
        )
    }

    /// All transactions of a permit, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn transactions_of(&mut self, lastschrift_id: LastschriftId) -> Result<Vec<LastschriftTransaction>> {
        children(
            self,
            cf::TRANSACTIONS,
            cf::TRANSACTIONS_BY_LASTSCHRIFT,
            lastschrift_id.get(),
        )
    }

    /// All transactions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions(&mut self) -> Result<Vec<LastschriftTransaction>> {
        self.scan_records(cf::TRANSACTIONS, &[])
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Get an event by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_event(&mut self, id: EventId) -> Result<Option<Event>> {
        self.get_record(cf::EVENTS, &keys::id_key(id.get()))
    }

    /// Insert or update an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_event(&mut self, event: &Event) -> Result<()> {
        self.put_record(cf::EVENTS, &keys::id_key(event.id.get()), event)
    }

    /// All events, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_events(&mut self) -> Result<Vec<Event>> {
        self.scan_records(cf::EVENTS, &[])
    }

    /// Get a registration by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_registration(&mut self, id: RegistrationId) -> Result<Option<Registration>> {
        self.get_record(cf::REGISTRATIONS, &keys::id_key(id.get()))
    }

    /// Insert or update a registration, maintaining the event index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_registration(&mut self, registration: &Registration) -> Result<()> {
        put_indexed(
            self,
            cf::REGISTRATIONS,
            cf::REGISTRATIONS_BY_EVENT,
            registration.event_id.get(),
            registration.id.get(),
            registration,
        )
    }

    /// Delete a registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_registration(&mut self, registration: &Registration) -> Result<()> {
        delete_indexed(
            self,
            cf::REGISTRATIONS,
            cf::REGISTRATIONS_BY_EVENT,
            registration.event_id.get(),
            registration.id.get(),
        )
    }

    /// All registrations of an event, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn registrations_of(&mut self, event_id: EventId) -> Result<Vec<Registration>> {
        children(
            self,
            cf::REGISTRATIONS,
            cf::REGISTRATIONS_BY_EVENT,
            event_id.get(),
        )
    }

    /// Get a course by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_course(&mut self, id: CourseId) -> Result<Option<Course>> {
        self.get_record(cf::COURSES, &keys::id_key(id.get()))
    }

    /// Insert or update a course.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_course(&mut self, course: &Course) -> Result<()> {
        put_indexed(
            self,
            cf::COURSES,
            cf::COURSES_BY_EVENT,
            course.event_id.get(),
            course.id.get(),
            course,
        )
    }

    /// Delete a course.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_course(&mut self, course: &Course) -> Result<()> {
        delete_indexed(
            self,
            cf::COURSES,
            cf::COURSES_BY_EVENT,
            course.event_id.get(),
            course.id.get(),
        )
    }

    /// All courses of an event, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn courses_of(&mut self, event_id: EventId) -> Result<Vec<Course>> {
        children(self, cf::COURSES, cf::COURSES_BY_EVENT, event_id.get())
    }

    /// Get a lodgement by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_lodgement(&mut self, id: LodgementId) -> Result<Option<Lodgement>> {
        self.get_record(cf::LODGEMENTS, &keys::id_key(id.get()))
    }

    /// Insert or update a lodgement.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_lodgement(&mut self, lodgement: &Lodgement) -> Result<()> {
        put_indexed(
            self,
            cf::LODGEMENTS,
            cf::LODGEMENTS_BY_EVENT,
            lodgement.event_id.get(),
            lodgement.id.get(),
            lodgement,
        )
    }

    /// Delete a lodgement.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_lodgement(&mut self, lodgement: &Lodgement) -> Result<()> {
        delete_indexed(
            self,
            cf::LODGEMENTS,
            cf::LODGEMENTS_BY_EVENT,
            lodgement.event_id.get(),
            lodgement.id.get(),
        )
    }

    /// All lodgements of an event, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn lodgements_of(&mut self, event_id: EventId) -> Result<Vec<Lodgement>> {
        children(self, cf::LODGEMENTS, cf::LODGEMENTS_BY_EVENT, event_id.get())
    }

    /// Get a lodgement group by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_lodgement_group(&mut self, id: LodgementGroupId) -> Result<Option<LodgementGroup>> {
        self.get_record(cf::LODGEMENT_GROUPS, &keys::id_key(id.get()))
    }

    /// Insert or update a lodgement group.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_lodgement_group(&mut self, group: &LodgementGroup) -> Result<()> {
        put_indexed(
            self,
            cf::LODGEMENT_GROUPS,
            cf::LODGEMENT_GROUPS_BY_EVENT,
            group.event_id.get(),
            group.id.get(),
            group,
        )
    }

    /// Delete a lodgement group.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_lodgement_group(&mut self, group: &LodgementGroup) -> Result<()> {
        delete_indexed(
            self,
            cf::LODGEMENT_GROUPS,
            cf::LODGEMENT_GROUPS_BY_EVENT,
            group.event_id.get(),
            group.id.get(),
        )
    }

    /// All lodgement groups of an event, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn lodgement_groups_of(&mut self, event_id: EventId) -> Result<Vec<LodgementGroup>> {
        children(
            self,
            cf::LODGEMENT_GROUPS,
            cf::LODGEMENT_GROUPS_BY_EVENT,
            event_id.get(),
        )
    }

    // =========================================================================
    // Logs
    // =========================================================================

    /// Append a finance log entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_cde_log(&mut self, entry: &CdeLogEntry) -> Result<()> {
        self.put_record(cf::CDE_LOG, &keys::cde_log_key(&entry.id), entry)
    }

    /// The finance log, oldest entry first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn cde_log(&mut self) -> Result<Vec<CdeLogEntry>> {
        self.scan_records(cf::CDE_LOG, &[])
    }

    /// Append an event log entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_event_log(&mut self, entry: &EventLogEntry) -> Result<()> {
        self.put_record(
            cf::EVENT_LOG,
            &keys::event_log_key(entry.event_id.get(), &entry.id),
            entry,
        )
    }

    /// The log of one event, oldest entry first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn event_log(&mut self, event_id: EventId) -> Result<Vec<EventLogEntry>> {
        self.scan_records(cf::EVENT_LOG, &keys::index_prefix(event_id.get()))
    }
}

impl<T: TxExt + ?Sized> Records for T {}

fn put_indexed<T, V>(
    tx: &mut T,
    family: &str,
    index: &str,
    parent: i64,
    id: i64,
    value: &V,
) -> Result<()>
where
    T: TxExt + ?Sized,
    V: Serialize,
{
    tx.put_record(family, &keys::id_key(id), value)?;
    tx.put(index, &keys::index_key(parent, id), Vec::new())
}

fn delete_indexed<T>(tx: &mut T, family: &str, index: &str, parent: i64, id: i64) -> Result<()>
where
    T: TxExt + ?Sized,
{
    tx.delete(family, &keys::id_key(id))?;
    tx.delete(index, &keys::index_key(parent, id))
}

fn children<T, V>(tx: &mut T, family: &str, index: &str, parent: i64) -> Result<Vec<V>>
where
    T: TxExt + ?Sized,
    V: DeserializeOwned,
{
    let mut records = Vec::new();
    for id in tx.index_children(index, parent)? {
        if let Some(record) = tx.get_record(family, &keys::id_key(id))? {
            records.push(record);
        }
    }
    Ok(records)
}
