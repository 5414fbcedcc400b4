//! Semester and ExPuls periods.
//!
//! A semester period closes in ordered steps. Each step may start once its
//! prerequisites are done and it is not done itself:
//!
//! ```text
//! billing -> archival_notification -> { ejection, archival } -> balance
//! ```
//!
//! The period can only be advanced once all five steps are done.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{ExpulsPeriodId, PeriodId};

/// One of the closing steps of a semester period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStep {
    /// Members are billed for the next period.
    Billing,
    /// Inactive personas are told about their upcoming archival.
    ArchivalNotification,
    /// Members who did not pay lose their membership.
    Ejection,
    /// Notified personas that stayed inactive are archived.
    Archival,
    /// The membership fee is deducted from the remaining members.
    Balance,
}

impl PeriodStep {
    /// All steps in execution order.
    pub const ALL: [Self; 5] = [
        Self::Billing,
        Self::ArchivalNotification,
        Self::Ejection,
        Self::Archival,
        Self::Balance,
    ];

    /// Steps that must be done before this one may start.
    #[must_use]
    pub const fn prerequisites(self) -> &'static [Self] {
        match self {
            Self::Billing => &[],
            Self::ArchivalNotification => &[Self::Billing],
            Self::Ejection | Self::Archival => &[Self::ArchivalNotification],
            Self::Balance => &[Self::Ejection, Self::Archival],
        }
    }

    /// Step name as used in logs and routes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Billing => "billing",
            Self::ArchivalNotification => "archival_notification",
            Self::Ejection => "ejection",
            Self::Archival => "archival",
            Self::Balance => "balance",
        }
    }
}

impl fmt::Display for PeriodStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a period transition was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StepViolation {
    /// The step has already been finished in this period.
    #[error("step {0} is already done")]
    AlreadyDone(PeriodStep),

    /// A prerequisite step is still pending.
    #[error("step {step} requires {missing} to be done first")]
    PrerequisiteMissing {
        /// The step that was attempted.
        step: PeriodStep,
        /// The first pending prerequisite.
        missing: PeriodStep,
    },

    /// The period cannot be advanced while a step is pending.
    #[error("period cannot advance, step {0} is pending")]
    Incomplete(PeriodStep),
}

/// A semester period with its closing progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// Consecutive period number.
    pub id: PeriodId,

    /// When the period began.
    pub semester_start: DateTime<Utc>,

    /// When billing was finished.
    pub billing_done: Option<DateTime<Utc>>,
    /// Number of members billed.
    pub billing_count: u32,

    /// When archival notification was finished.
    pub archival_notification_done: Option<DateTime<Utc>>,
    /// Number of personas notified.
    pub archival_notification_count: u32,

    /// When ejection was finished.
    pub ejection_done: Option<DateTime<Utc>>,
    /// Number of members ejected.
    pub ejection_count: u32,
    /// Remaining balance of ejected members.
    pub ejection_balance: Decimal,

    /// When archival was finished.
    pub archival_done: Option<DateTime<Utc>>,
    /// Number of personas archived.
    pub archival_count: u32,

    /// When the balance update was finished.
    pub balance_done: Option<DateTime<Utc>>,
    /// Number of trial members whose trial ended.
    pub balance_trialmembers: u32,
    /// Total fees deducted.
    pub balance_total: Decimal,

    /// When the period was closed by advancing to the next one.
    pub semester_done: Option<DateTime<Utc>>,
}

impl Period {
    /// Open a fresh period.
    #[must_use]
    pub fn new(id: PeriodId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            semester_start: now,
            billing_done: None,
            billing_count: 0,
            archival_notification_done: None,
            archival_notification_count: 0,
            ejection_done: None,
            ejection_count: 0,
            ejection_balance: Decimal::ZERO,
            archival_done: None,
            archival_count: 0,
            balance_done: None,
            balance_trialmembers: 0,
            balance_total: Decimal::ZERO,
            semester_done: None,
        }
    }

    /// When the given step was finished, if it was.
    #[must_use]
    pub fn done_at(&self, step: PeriodStep) -> Option<DateTime<Utc>> {
        match step {
            PeriodStep::Billing => self.billing_done,
            PeriodStep::ArchivalNotification => self.archival_notification_done,
            PeriodStep::Ejection => self.ejection_done,
            PeriodStep::Archival => self.archival_done,
            PeriodStep::Balance => self.balance_done,
        }
    }

    fn done_slot(&mut self, step: PeriodStep) -> &mut Option<DateTime<Utc>> {
        match step {
            PeriodStep::Billing => &mut self.billing_done,
            PeriodStep::ArchivalNotification => &mut self.archival_notification_done,
            PeriodStep::Ejection => &mut self.ejection_done,
            PeriodStep::Archival => &mut self.archival_done,
            PeriodStep::Balance => &mut self.balance_done,
        }
    }

    /// Check whether `step` may start now.
    ///
    /// # Errors
    ///
    /// Returns the violated rule if the step is done or a prerequisite is pending.
    pub fn check_may_start(&self, step: PeriodStep) -> Result<(), StepViolation> {
        if self.done_at(step).is_some() {
            return Err(StepViolation::AlreadyDone(step));
        }
        if let Some(missing) = step
            .prerequisites()
            .iter()
            .copied()
            .find(|prereq| self.done_at(*prereq).is_none())
        {
            return Err(StepViolation::PrerequisiteMissing { step, missing });
        }
        Ok(())
    }

    /// Whether `step` may start now.
    #[must_use]
    pub fn may_start(&self, step: PeriodStep) -> bool {
        self.check_may_start(step).is_ok()
    }

    /// Stamp `step` as done.
    ///
    /// # Errors
    ///
    /// Returns the violated rule if the step may not start; the period is unchanged.
    pub fn finish(&mut self, step: PeriodStep, now: DateTime<Utc>) -> Result<(), StepViolation> {
        self.check_may_start(step)?;
        *self.done_slot(step) = Some(now);
        Ok(())
    }

    /// Check whether all steps are done.
    ///
    /// # Errors
    ///
    /// Returns the first pending step.
    pub fn check_may_advance(&self) -> Result<(), StepViolation> {
        match PeriodStep::ALL
            .iter()
            .copied()
            .find(|step| self.done_at(*step).is_none())
        {
            Some(pending) => Err(StepViolation::Incomplete(pending)),
            None => Ok(()),
        }
    }

    /// Whether the period may be advanced.
    #[must_use]
    pub fn may_advance(&self) -> bool {
        self.check_may_advance().is_ok()
    }

    /// Close this period and open the next one.
    ///
    /// # Errors
    ///
    /// Returns the first pending step; the period is unchanged.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<Self, StepViolation> {
        self.check_may_advance()?;
        self.semester_done = Some(now);
        Ok(Self::new(self.id.next(), now))
    }
}

/// An ExPuls period: one issue of the member magazine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpulsPeriod {
    /// Consecutive issue number.
    pub id: ExpulsPeriodId,

    /// When the address check was finished.
    pub addresscheck_done: Option<DateTime<Utc>>,

    /// Number of members asked to check their address.
    pub addresscheck_count: u32,

    /// When the issue was closed by advancing.
    pub expuls_done: Option<DateTime<Utc>>,
}

impl ExpulsPeriod {
    /// Open a fresh ExPuls period.
    #[must_use]
    pub const fn new(id: ExpulsPeriodId) -> Self {
        Self {
            id,
            addresscheck_done: None,
            addresscheck_count: 0,
            expuls_done: None,
        }
    }

    /// Whether the address check may start.
    #[must_use]
    pub const fn may_start_addresscheck(&self) -> bool {
        self.addresscheck_done.is_none()
    }

    /// Whether the ExPuls period may be advanced.
    #[must_use]
    pub const fn may_advance(&self) -> bool {
        self.addresscheck_done.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period() -> Period {
        Period::new(PeriodId::new(1), Utc::now())
    }

    #[test]
    fn only_billing_may_start_in_fresh_period() {
        let p = period();
        assert!(p.may_start(PeriodStep::Billing));
        for step in &PeriodStep::ALL[1..] {
            assert!(!p.may_start(*step), "{step} should wait");
        }
    }

    #[test]
    fn steps_follow_fixed_order() {
        let now = Utc::now();
        let mut p = period();
        assert_eq!(
            p.finish(PeriodStep::Ejection, now),
            Err(StepViolation::PrerequisiteMissing {
                step: PeriodStep::Ejection,
                missing: PeriodStep::ArchivalNotification,
            })
        );
        p.finish(PeriodStep::Billing, now).unwrap();
        p.finish(PeriodStep::ArchivalNotification, now).unwrap();
        // ejection and archival are independent of each other
        p.finish(PeriodStep::Archival, now).unwrap();
        assert!(!p.may_start(PeriodStep::Balance));
        p.finish(PeriodStep::Ejection, now).unwrap();
        assert!(p.may_start(PeriodStep::Balance));
    }

    #[test]
    fn finishing_twice_fails() {
        let now = Utc::now();
        let mut p = period();
        p.finish(PeriodStep::Billing, now).unwrap();
        let before = p.clone();
        assert_eq!(
            p.finish(PeriodStep::Billing, now),
            Err(StepViolation::AlreadyDone(PeriodStep::Billing))
        );
        assert_eq!(p, before);
    }

    #[test]
    fn advance_requires_every_step() {
        let now = Utc::now();
        for skipped in PeriodStep::ALL {
            let mut p = period();
            for step in PeriodStep::ALL {
                if step != skipped && p.may_start(step) {
                    p.finish(step, now).unwrap();
                }
            }
            let before = p.clone();
            assert!(p.advance(now).is_err());
            assert_eq!(p, before);
        }

        let mut p = period();
        for step in PeriodStep::ALL {
            p.finish(step, now).unwrap();
        }
        let next = p.advance(now).unwrap();
        assert_eq!(next.id, PeriodId::new(2));
        assert_eq!(p.semester_done, Some(now));
        assert!(next.may_start(PeriodStep::Billing));
    }

    #[test]
    fn expuls_advance_needs_addresscheck() {
        let mut expuls = ExpulsPeriod::new(ExpulsPeriodId::new(1));
        assert!(expuls.may_start_addresscheck());
        assert!(!expuls.may_advance());
        expuls.addresscheck_done = Some(Utc::now());
        assert!(!expuls.may_start_addresscheck());
        assert!(expuls.may_advance());
    }
}
