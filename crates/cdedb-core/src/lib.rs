//! Core types and rules for the CdEDB membership, finance and event data.
//!
//! This crate provides the foundational types used throughout the workspace:
//!
//! - **Identifiers**: `PersonaId`, `PeriodId`, `LastschriftId`, `EventId`, ...
//! - **Members**: `Persona`, `CdeConfig`
//! - **Semester**: `Period`, `PeriodStep`, `ExpulsPeriod`
//! - **Direct debit**: `Lastschrift`, `LastschriftTransaction`, `TransactionStatus`
//! - **Events**: `Event`, `Registration`, `Course`, `Lodgement`, fee computation
//! - **Partial import**: `PartialImportData`, `PartialExport`, transaction tokens
//! - **Audit logs**: `CdeLogEntry`, `EventLogEntry`
//!
//! # Money
//!
//! All amounts are [`rust_decimal::Decimal`] in euros with two decimal places.
//! Nothing in this crate touches floating point.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod fee;
pub mod ids;
pub mod import;
pub mod lastschrift;
pub mod log;
pub mod period;
pub mod persona;
pub mod registration;

pub use config::{
    CdeConfig, DEFAULT_ARCHIVAL_INACTIVITY_DAYS, DEFAULT_LASTSCHRIFT_FAILED_FEE,
    DEFAULT_MEMBERSHIP_FEE, DEFAULT_PERIODS_PER_YEAR,
};
pub use context::RequestContext;
pub use error::{CoreError, Result};
pub use event::{
    Course, CourseTrack, Event, EventPart, FeeModifier, FieldAssociation, FieldDefinition,
    FieldKind, Lodgement, LodgementGroup,
};
pub use fee::calculate_single_fee;
pub use ids::{
    CourseId, EventId, ExpulsPeriodId, FeeModifierId, FieldId, IdError, LastschriftId,
    LodgementGroupId, LodgementId, LogEntryId, PartId, PeriodId, PersonaId, RegistrationId,
    TrackId, TransactionId,
};
pub use import::{
    ChangeLedger, EntityDelta, EntityKind, IdMapping, PartialExport, PartialImportData,
    PartialImportResult, EXPORT_VERSION,
};
pub use lastschrift::{
    credited_amount, deletion_blockers, may_skip, DeletionBlocker, Lastschrift,
    LastschriftTransaction, TransactionStatus, TransactionViolation,
};
pub use log::{CdeLogCode, CdeLogEntry, EventLogCode, EventLogEntry};
pub use period::{ExpulsPeriod, Period, PeriodStep, StepViolation};
pub use persona::Persona;
pub use registration::{
    Registration, RegistrationPart, RegistrationPartStatus, RegistrationTrack,
};
