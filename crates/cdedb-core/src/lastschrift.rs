//! Direct-debit permits ("Lastschrift") and their transactions.
//!
//! Transaction status transitions are one-directional:
//!
//! ```text
//! issued -> success -> rollback
//!        -> failure
//!        -> cancelled
//! skipped (recorded directly, never transitions)
//! ```

use std::fmt;

use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::CdeConfig;
use crate::ids::{LastschriftId, PeriodId, PersonaId, TransactionId};

/// Age below which a permit may always skip a collection.
pub const NEW_PERMIT_SKIP_DAYS: i64 = 2 * 365;

/// Months a revoked permit must be kept before it may be deleted.
pub const RETENTION_MONTHS: u32 = 18;

/// A direct-debit permit granted by a persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lastschrift {
    /// The permit id.
    pub id: LastschriftId,

    /// The persona paying.
    pub persona_id: PersonaId,

    /// Account holder, if different from the persona.
    pub account_owner: Option<String>,

    /// IBAN to debit.
    pub iban: String,

    /// When the permit was granted.
    pub granted_at: DateTime<Utc>,

    /// When the permit was revoked; `None` while active.
    pub revoked_at: Option<DateTime<Utc>>,

    /// Free-form notes.
    pub notes: Option<String>,
}

impl Lastschrift {
    /// Whether the permit is still active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }

    /// Revoke the permit, keeping an earlier revocation date.
    pub fn revoke(&mut self, now: DateTime<Utc>) {
        if self.revoked_at.is_none() {
            self.revoked_at = Some(now);
        }
    }
}

/// Status of a direct-debit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Sent to the bank, outcome unknown.
    Issued,
    /// Collection was skipped for this period.
    Skipped,
    /// Money arrived.
    Success,
    /// The bank refused the debit.
    Failure,
    /// Withdrawn before the bank processed it.
    Cancelled,
    /// A former success reversed by the bank.
    Rollback,
}

impl TransactionStatus {
    /// Whether the transaction still awaits its outcome.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Issued)
    }

    /// Whether a transaction may be finalized into this status.
    #[must_use]
    pub const fn is_final_outcome(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }

    /// Whether `self -> target` is a permitted transition.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Issued, Self::Success | Self::Failure | Self::Cancelled)
                | (Self::Success, Self::Rollback)
        )
    }

    /// Status name as stored and logged.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Skipped => "skipped",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transaction transition was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransactionViolation {
    /// The transaction already has a final outcome.
    #[error("transaction {id} is already tallied ({status})")]
    AlreadyTallied {
        /// The transaction.
        id: TransactionId,
        /// Its current status.
        status: TransactionStatus,
    },

    /// The requested status is not a valid outcome.
    #[error("transaction cannot be finalized as {0}")]
    InvalidOutcome(TransactionStatus),

    /// Only successful transactions can be rolled back.
    #[error("transaction {id} cannot be rolled back from {status}")]
    NotRollbackable {
        /// The transaction.
        id: TransactionId,
        /// Its current status.
        status: TransactionStatus,
    },
}

/// One collection attempt under a permit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastschriftTransaction {
    /// The transaction id.
    pub id: TransactionId,

    /// The permit collected from.
    pub lastschrift_id: LastschriftId,

    /// The persona paying (denormalized from the permit).
    pub persona_id: PersonaId,

    /// The period the collection belongs to.
    pub period_id: PeriodId,

    /// Current status.
    pub status: TransactionStatus,

    /// Amount requested from the bank.
    pub amount: Decimal,

    /// Amount actually booked; only set once finalized.
    pub tally: Option<Decimal>,

    /// When the transaction was created.
    pub issued_at: DateTime<Utc>,

    /// When the outcome was recorded.
    pub processed_at: Option<DateTime<Utc>>,

    /// Who issued the transaction.
    pub submitted_by: Option<PersonaId>,
}

impl LastschriftTransaction {
    /// Record the bank's outcome.
    ///
    /// # Errors
    ///
    /// Rejects non-outcome statuses and transactions that are already tallied.
    pub fn finalize(
        &mut self,
        status: TransactionStatus,
        tally: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionViolation> {
        if !status.is_final_outcome() {
            return Err(TransactionViolation::InvalidOutcome(status));
        }
        if !self.status.can_transition_to(status) {
            return Err(TransactionViolation::AlreadyTallied {
                id: self.id,
                status: self.status,
            });
        }
        self.status = status;
        self.tally = Some(tally);
        self.processed_at = Some(now);
        Ok(())
    }

    /// Reverse a successful transaction. `tally` is what the bank booked
    /// for the return, usually its charge as a negative amount.
    ///
    /// # Errors
    ///
    /// Rejects transactions that are not successful.
    pub fn rollback(
        &mut self,
        tally: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionViolation> {
        if !self.status.can_transition_to(TransactionStatus::Rollback) {
            return Err(TransactionViolation::NotRollbackable {
                id: self.id,
                status: self.status,
            });
        }
        self.status = TransactionStatus::Rollback;
        self.tally = Some(tally);
        self.processed_at = Some(now);
        Ok(())
    }

    /// Default tally when the outcome is recorded without one.
    #[must_use]
    pub fn default_tally(&self, status: TransactionStatus, config: &CdeConfig) -> Decimal {
        match status {
            TransactionStatus::Success => self.amount,
            TransactionStatus::Failure | TransactionStatus::Rollback => {
                -config.lastschrift_failed_fee
            }
            _ => Decimal::ZERO,
        }
    }
}

/// Amount credited to the balance for a successful collection.
#[must_use]
pub fn credited_amount(tally: Decimal, fee: Decimal) -> Decimal {
    tally.min(fee).max(Decimal::ZERO)
}

/// Whether the permit may skip a collection.
///
/// Young permits may always skip. Older ones may skip as long as a successful
/// collection happened within the trailing `3 * periods_per_year` periods,
/// the current period included.
#[must_use]
pub fn may_skip(
    permit: &Lastschrift,
    transactions: &[LastschriftTransaction],
    current_period: PeriodId,
    config: &CdeConfig,
    now: DateTime<Utc>,
) -> bool {
    if now - permit.granted_at < Duration::days(NEW_PERMIT_SKIP_DAYS) {
        return true;
    }
    let current = current_period.get();
    let window = (current - config.skip_window_periods() + 1)..=current;
    transactions.iter().any(|tx| {
        tx.lastschrift_id == permit.id
            && tx.status == TransactionStatus::Success
            && window.contains(&tx.period_id.get())
    })
}

/// Reasons a permit may not be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionBlocker {
    /// The permit has not been revoked.
    Active,
    /// The revocation is younger than the retention period.
    RetentionPeriod,
    /// Transactions are still awaiting their outcome.
    OpenTransactions,
}

/// Collect everything preventing deletion of the permit.
#[must_use]
pub fn deletion_blockers(
    permit: &Lastschrift,
    transactions: &[LastschriftTransaction],
    now: DateTime<Utc>,
) -> Vec<DeletionBlocker> {
    let mut blockers = Vec::new();
    match permit.revoked_at {
        None => blockers.push(DeletionBlocker::Active),
        Some(revoked_at) => {
            let retained_until = revoked_at.checked_add_months(Months::new(RETENTION_MONTHS));
            if retained_until.map_or(true, |until| now < until) {
                blockers.push(DeletionBlocker::RetentionPeriod);
            }
        }
    }
    if transactions
        .iter()
        .any(|tx| tx.lastschrift_id == permit.id && tx.status.is_open())
    {
        blockers.push(DeletionBlocker::OpenTransactions);
    }
    blockers
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn permit(granted_at: DateTime<Utc>) -> Lastschrift {
        Lastschrift {
            id: LastschriftId::new(1),
            persona_id: PersonaId::new(7),
            account_owner: None,
            iban: "DE12500105170648489890".into(),
            granted_at,
            revoked_at: None,
            notes: None,
        }
    }

    fn transaction(period: i64, status: TransactionStatus) -> LastschriftTransaction {
        LastschriftTransaction {
            id: TransactionId::new(period),
            lastschrift_id: LastschriftId::new(1),
            persona_id: PersonaId::new(7),
            period_id: PeriodId::new(period),
            status,
            amount: dec!(48.00),
            tally: None,
            issued_at: Utc::now(),
            processed_at: None,
            submitted_by: None,
        }
    }

    #[test]
    fn transitions_are_one_directional() {
        use TransactionStatus::*;
        assert!(Issued.can_transition_to(Success));
        assert!(Issued.can_transition_to(Failure));
        assert!(Issued.can_transition_to(Cancelled));
        assert!(Success.can_transition_to(Rollback));
        assert!(!Success.can_transition_to(Issued));
        assert!(!Failure.can_transition_to(Rollback));
        assert!(!Rollback.can_transition_to(Success));
        assert!(!Skipped.can_transition_to(Success));
    }

    #[test]
    fn finalize_twice_is_rejected() {
        let now = Utc::now();
        let mut tx = transaction(1, TransactionStatus::Issued);
        tx.finalize(TransactionStatus::Success, dec!(50.00), now)
            .unwrap();
        assert_eq!(tx.tally, Some(dec!(50.00)));
        let err = tx
            .finalize(TransactionStatus::Failure, dec!(0), now)
            .unwrap_err();
        assert!(matches!(err, TransactionViolation::AlreadyTallied { .. }));
        assert_eq!(tx.status, TransactionStatus::Success);
    }

    #[test]
    fn finalize_rejects_non_outcomes() {
        let mut tx = transaction(1, TransactionStatus::Issued);
        let err = tx
            .finalize(TransactionStatus::Rollback, dec!(0), Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            TransactionViolation::InvalidOutcome(TransactionStatus::Rollback)
        );
    }

    #[test]
    fn rollback_only_from_success() {
        let now = Utc::now();
        let mut tx = transaction(1, TransactionStatus::Failure);
        assert!(tx.rollback(dec!(-4.50), now).is_err());
        let mut tx = transaction(1, TransactionStatus::Success);
        tx.rollback(dec!(-4.50), now).unwrap();
        assert_eq!(tx.status, TransactionStatus::Rollback);
        assert_eq!(tx.tally, Some(dec!(-4.50)));
    }

    #[test]
    fn credit_is_capped_by_fee() {
        assert_eq!(credited_amount(dec!(50.00), dec!(48.00)), dec!(48.00));
        assert_eq!(credited_amount(dec!(30.00), dec!(48.00)), dec!(30.00));
    }

    #[test]
    fn default_tallies() {
        let config = CdeConfig::default();
        let tx = transaction(1, TransactionStatus::Issued);
        assert_eq!(
            tx.default_tally(TransactionStatus::Success, &config),
            dec!(48.00)
        );
        assert_eq!(
            tx.default_tally(TransactionStatus::Failure, &config),
            dec!(-4.50)
        );
        assert_eq!(
            tx.default_tally(TransactionStatus::Cancelled, &config),
            Decimal::ZERO
        );
    }

    #[test]
    fn young_permit_may_always_skip() {
        let now = Utc::now();
        let p = permit(now - Duration::days(100));
        assert!(may_skip(&p, &[], PeriodId::new(20), &CdeConfig::default(), now));
    }

    #[test]
    fn old_permit_needs_recent_success() {
        let now = Utc::now();
        let config = CdeConfig::default();
        let p = permit(now - Duration::days(3 * 365));
        let current = PeriodId::new(20);

        assert!(!may_skip(&p, &[], current, &config, now));

        // six periods, the current one included
        let oldest_in_window = [transaction(15, TransactionStatus::Success)];
        assert!(may_skip(&p, &oldest_in_window, current, &config, now));

        let this_period = [transaction(20, TransactionStatus::Success)];
        assert!(may_skip(&p, &this_period, current, &config, now));

        let too_old = [transaction(14, TransactionStatus::Success)];
        assert!(!may_skip(&p, &too_old, current, &config, now));

        let not_successful = [transaction(18, TransactionStatus::Failure)];
        assert!(!may_skip(&p, &not_successful, current, &config, now));
    }

    #[test]
    fn deletion_needs_retention_and_no_open_transactions() {
        let now = Utc::now();
        let mut p = permit(now - Duration::days(2000));
        assert_eq!(deletion_blockers(&p, &[], now), [DeletionBlocker::Active]);

        p.revoke(now - Duration::days(30));
        assert_eq!(
            deletion_blockers(&p, &[], now),
            [DeletionBlocker::RetentionPeriod]
        );

        p.revoked_at = Some(now - Duration::days(600));
        assert!(deletion_blockers(&p, &[], now).is_empty());

        let open = [transaction(3, TransactionStatus::Issued)];
        assert_eq!(
            deletion_blockers(&p, &open, now),
            [DeletionBlocker::OpenTransactions]
        );
    }

    #[test]
    fn revoke_keeps_first_date() {
        let now = Utc::now();
        let mut p = permit(now);
        let first = now - Duration::days(1);
        p.revoke(first);
        p.revoke(now);
        assert_eq!(p.revoked_at, Some(first));
        assert!(!p.is_active());
    }
}
