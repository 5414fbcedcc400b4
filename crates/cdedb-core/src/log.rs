//! Persistent audit log entries.
//!
//! Every state change of finance data writes a [`CdeLogEntry`]; changes to
//! event data write an [`EventLogEntry`]. Both are append-only.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{EventId, LogEntryId, PersonaId};

/// What happened, for finance and membership log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdeLogCode {
    /// A semester step was finished.
    SemesterStepFinished,
    /// A new semester period started.
    SemesterAdvanced,
    /// The ExPuls address check was finished.
    ExpulsAddresscheckFinished,
    /// A new ExPuls period started.
    ExpulsAdvanced,
    /// Members were billed.
    MembersBilled,
    /// A persona was told about the upcoming archival.
    ArchivalNotified,
    /// A persona was archived.
    PersonaArchived,
    /// A membership ended for lack of funds.
    MembershipEjected,
    /// A membership was granted.
    MembershipGranted,
    /// A trial membership ended.
    TrialMembershipEnded,
    /// The periodic membership fee was deducted.
    FeeDeducted,
    /// A bank transfer was booked.
    MoneyTransferReceived,
    /// A manual balance correction.
    BalanceChanged,
    /// A persona was admitted.
    PersonaAdmitted,
    /// A direct-debit permit was granted.
    LastschriftCreated,
    /// A direct-debit permit was revoked.
    LastschriftRevoked,
    /// A direct-debit permit was deleted.
    LastschriftDeleted,
    /// A direct-debit transaction was issued.
    TransactionIssued,
    /// A direct-debit transaction succeeded.
    TransactionSuccess,
    /// A direct-debit transaction failed.
    TransactionFailure,
    /// A direct-debit transaction was cancelled.
    TransactionCancelled,
    /// A direct-debit collection was skipped.
    TransactionSkipped,
    /// A successful direct-debit transaction was reversed.
    TransactionRollback,
    /// The part of a collection exceeding the fee, kept as donation.
    DonationReceived,
}

/// A finance or membership log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdeLogEntry {
    /// Time-ordered entry id.
    pub id: LogEntryId,

    /// When it happened.
    pub ctime: DateTime<Utc>,

    /// What happened.
    pub code: CdeLogCode,

    /// Who did it.
    pub submitted_by: Option<PersonaId>,

    /// Whom it concerns.
    pub persona_id: Option<PersonaId>,

    /// Balance change, if any.
    pub delta: Option<Decimal>,

    /// Balance after the change, if any.
    pub new_balance: Option<Decimal>,

    /// Free-form note.
    pub change_note: Option<String>,
}

impl CdeLogEntry {
    /// Start a log entry.
    #[must_use]
    pub fn new(code: CdeLogCode, now: DateTime<Utc>, submitted_by: Option<PersonaId>) -> Self {
        Self {
            id: LogEntryId::generate(),
            ctime: now,
            code,
            submitted_by,
            persona_id: None,
            delta: None,
            new_balance: None,
            change_note: None,
        }
    }

    /// Set the persona the entry concerns.
    #[must_use]
    pub fn persona(mut self, persona_id: PersonaId) -> Self {
        self.persona_id = Some(persona_id);
        self
    }

    /// Record a balance change.
    #[must_use]
    pub fn balance(mut self, delta: Decimal, new_balance: Decimal) -> Self {
        self.delta = Some(delta);
        self.new_balance = Some(new_balance);
        self
    }

    /// Attach a note.
    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.change_note = Some(note.into());
        self
    }
}

/// What happened, for event log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLogCode {
    /// The event was created.
    EventCreated,
    /// Fees or fee modifiers changed.
    EventFeesChanged,
    /// A registration was created.
    RegistrationCreated,
    /// A registration changed.
    RegistrationChanged,
    /// A registration was deleted.
    RegistrationDeleted,
    /// A payment was booked.
    RegistrationPaymentReceived,
    /// A course was created.
    CourseCreated,
    /// A course changed.
    CourseChanged,
    /// A course was deleted.
    CourseDeleted,
    /// A lodgement was created.
    LodgementCreated,
    /// A lodgement changed.
    LodgementChanged,
    /// A lodgement was deleted.
    LodgementDeleted,
    /// A lodgement group was created.
    LodgementGroupCreated,
    /// A lodgement group changed.
    LodgementGroupChanged,
    /// A lodgement group was deleted.
    LodgementGroupDeleted,
    /// A partial import was applied.
    EventPartialImport,
}

/// An event log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Time-ordered entry id.
    pub id: LogEntryId,

    /// When it happened.
    pub ctime: DateTime<Utc>,

    /// The event concerned.
    pub event_id: EventId,

    /// What happened.
    pub code: EventLogCode,

    /// Who did it.
    pub submitted_by: Option<PersonaId>,

    /// Whom it concerns.
    pub persona_id: Option<PersonaId>,

    /// Free-form note.
    pub change_note: Option<String>,
}

impl EventLogEntry {
    /// Start an event log entry.
    #[must_use]
    pub fn new(
        event_id: EventId,
        code: EventLogCode,
        now: DateTime<Utc>,
        submitted_by: Option<PersonaId>,
    ) -> Self {
        Self {
            id: LogEntryId::generate(),
            ctime: now,
            event_id,
            code,
            submitted_by,
            persona_id: None,
            change_note: None,
        }
    }

    /// Set the persona the entry concerns.
    #[must_use]
    pub fn persona(mut self, persona_id: PersonaId) -> Self {
        self.persona_id = Some(persona_id);
        self
    }

    /// Attach a note.
    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.change_note = Some(note.into());
        self
    }
}
