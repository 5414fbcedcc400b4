//! Business operations of the CdEDB membership, finance and event core.
//!
//! Each capability is a small backend holding a shared [`Store`]:
//!
//! - [`SemesterBackend`]: semester steps and ExPuls periods
//! - [`LastschriftBackend`]: direct-debit permits and transactions
//! - [`FinanceBackend`]: personas, balances, money transfers, admissions
//! - [`EventBackend`]: events, registrations, fees, partial export
//! - [`PartialImportBackend`]: offline delta import
//!
//! [`Backend`] composes all of them. Every operation takes a
//! [`RequestContext`] (or needs none) and runs in exactly one store
//! transaction.
//!
//! # Results
//!
//! - Precondition violations and invalid input are [`BackendError`]s; the
//!   transaction is discarded.
//! - Expected business refusals are [`Outcome::Refused`] values.
//! - Batches report per-row failures and retryable conflicts through
//!   [`BatchOutcome`].
//!
//! [`RequestContext`]: cdedb_core::RequestContext

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod event;
pub mod finance;
pub mod lastschrift;
pub mod outcome;
pub mod partial_import;
pub mod semester;

use std::sync::Arc;

use cdedb_core::CdeConfig;
use cdedb_store::Store;

pub use error::{BackendError, PreconditionKind, Result};
pub use event::{
    EventBackend, FeePayment, FeePreview, FeeUpdate, NewCourseTrack, NewEvent, NewEventPart,
    NewFeeModifier, NewField, NewRegistration, RegistrationUpdate,
};
pub use finance::{FinanceBackend, MoneyTransfer, NewPersona, TransferReceipt};
pub use lastschrift::{LastschriftBackend, NewLastschrift, TransactionOutcome};
pub use outcome::{BatchOutcome, Outcome, Refusal};
pub use partial_import::PartialImportBackend;
pub use semester::{SemesterBackend, StepReport};

/// All capabilities over one store and one configuration.
#[derive(Clone)]
pub struct Backend {
    /// Semester and ExPuls periods.
    pub semester: SemesterBackend,
    /// Direct debits.
    pub lastschrift: LastschriftBackend,
    /// Personas and balances.
    pub finance: FinanceBackend,
    /// Events and registrations.
    pub event: EventBackend,
    /// Partial import.
    pub partial_import: PartialImportBackend,
    config: Arc<CdeConfig>,
}

impl Backend {
    /// Compose all capabilities.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the configuration is inconsistent.
    pub fn new(store: Arc<dyn Store>, config: CdeConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Self {
            semester: SemesterBackend::new(store.clone(), config.clone()),
            lastschrift: LastschriftBackend::new(store.clone(), config.clone()),
            finance: FinanceBackend::new(store.clone(), config.clone()),
            event: EventBackend::new(store.clone()),
            partial_import: PartialImportBackend::new(store),
            config,
        })
    }

    /// The finance settings in use.
    #[must_use]
    pub fn config(&self) -> &CdeConfig {
        &self.config
    }
}
