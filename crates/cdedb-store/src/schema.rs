//! Database schema definitions and column families.

/// Column family names.
pub mod cf {
    /// Personas, keyed by `persona_id`.
    pub const PERSONAS: &str = "personas";

    /// Semester periods, keyed by `period_id`.
    pub const PERIODS: &str = "periods";

    /// ExPuls periods, keyed by `expuls_period_id`.
    pub const EXPULS_PERIODS: &str = "expuls_periods";

    /// Direct-debit permits, keyed by `lastschrift_id`.
    pub const LASTSCHRIFTEN: &str = "lastschriften";

    /// Index: permits by persona, keyed by `persona_id || lastschrift_id`.
    /// Value is empty (index only).
    pub const LASTSCHRIFTEN_BY_PERSONA: &str = "lastschriften_by_persona";

    /// Direct-debit transactions, keyed by `transaction_id`.
    pub const TRANSACTIONS: &str = "lastschrift_transactions";

    /// Index: transactions by permit, keyed by `lastschrift_id || transaction_id`.
    pub const TRANSACTIONS_BY_LASTSCHRIFT: &str = "transactions_by_lastschrift";

    /// Events, keyed by `event_id`.
    pub const EVENTS: &str = "events";

    /// Registrations, keyed by `registration_id`.
    pub const REGISTRATIONS: &str = "registrations";

    /// Index: registrations by event, keyed by `event_id || registration_id`.
    pub const REGISTRATIONS_BY_EVENT: &str = "registrations_by_event";

    /// Courses, keyed by `course_id`.
    pub const COURSES: &str = "courses";

    /// Index: courses by event.
    pub const COURSES_BY_EVENT: &str = "courses_by_event";

    /// Lodgements, keyed by `lodgement_id`.
    pub const LODGEMENTS: &str = "lodgements";

    /// Index: lodgements by event.
    pub const LODGEMENTS_BY_EVENT: &str = "lodgements_by_event";

    /// Lodgement groups, keyed by `lodgement_group_id`.
    pub const LODGEMENT_GROUPS: &str = "lodgement_groups";

    /// Index: lodgement groups by event.
    pub const LODGEMENT_GROUPS_BY_EVENT: &str = "lodgement_groups_by_event";

    /// Finance and membership log, keyed by entry ULID.
    pub const CDE_LOG: &str = "cde_log";

    /// Event log, keyed by `event_id || entry ULID`.
    pub const EVENT_LOG: &str = "event_log";

    /// Id sequences, keyed by sequence name. Value is the last id handed out.
    pub const SEQUENCES: &str = "sequences";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::PERSONAS,
        cf::PERIODS,
        cf::EXPULS_PERIODS,
        cf::LASTSCHRIFTEN,
        cf::LASTSCHRIFTEN_BY_PERSONA,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_LASTSCHRIFT,
        cf::EVENTS,
        cf::REGISTRATIONS,
        cf::REGISTRATIONS_BY_EVENT,
        cf::COURSES,
        cf::COURSES_BY_EVENT,
        cf::LODGEMENTS,
        cf::LODGEMENTS_BY_EVENT,
        cf::LODGEMENT_GROUPS,
        cf::LODGEMENT_GROUPS_BY_EVENT,
        cf::CDE_LOG,
        cf::EVENT_LOG,
        cf::SEQUENCES,
    ]
}
