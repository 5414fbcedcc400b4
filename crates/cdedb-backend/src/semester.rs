//! Semester and ExPuls period management.
//!
//! Every step of the semester runs in one transaction: the persona updates,
//! the step's counters and its "done" stamp are committed together or not at
//! all. A precondition violation aborts before anything is written.

use std::collections::HashSet;
use std::sync::Arc;

use cdedb_core::{
    CdeConfig, CdeLogCode, CdeLogEntry, ExpulsPeriod, ExpulsPeriodId, Period, PeriodId,
    PeriodStep, PersonaId, RequestContext,
};
use cdedb_store::{Records, Store, StoreExt, StoreTx};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BackendError, PreconditionKind, Result};

/// Summary of one processed semester step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// The period the step belongs to.
    pub period_id: PeriodId,
    /// The step.
    pub step: PeriodStep,
    /// Personas looked at.
    pub processed: u32,
    /// Personas changed or notified.
    pub affected: u32,
    /// Money moved by the step, if any.
    pub amount: Decimal,
}

/// Semester capability: period steps and ExPuls periods.
#[derive(Clone)]
pub struct SemesterBackend {
    store: Arc<dyn Store>,
    config: Arc<CdeConfig>,
}

impl SemesterBackend {
    /// Create the semester backend.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: Arc<CdeConfig>) -> Self {
        Self { store, config }
    }

    /// The current period; the first one is opened on first access.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn current_period(&self, ctx: &RequestContext) -> Result<Period> {
        self.store.atomic(|tx| load_current_period(tx, ctx))
    }

    /// Whether `step` may start in the current period.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn may_start(&self, ctx: &RequestContext, step: PeriodStep) -> Result<bool> {
        Ok(self.current_period(ctx)?.may_start(step))
    }

    /// Process `step` for all personas and mark it done.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the step may not start now; nothing
    /// is changed in that case.
    pub fn run_step(&self, ctx: &RequestContext, step: PeriodStep) -> Result<StepReport> {
        let report = self.store.atomic(|tx| {
            let mut period = load_current_period(tx, ctx)?;
            period.check_may_start(step)?;
            let report = match step {
                PeriodStep::Billing => self.bill(tx, ctx, &mut period)?,
                PeriodStep::ArchivalNotification => self.notify_archival(tx, ctx, &mut period)?,
                PeriodStep::Ejection => self.eject(tx, ctx, &mut period)?,
                PeriodStep::Archival => self.archive(tx, ctx, &mut period)?,
                PeriodStep::Balance => self.update_balances(tx, ctx, &mut period)?,
            };
            finish(tx, ctx, &mut period, step)?;
            Ok::<_, BackendError>(report)
        })?;
        info!(
            period_id = %report.period_id,
            step = %step,
            processed = report.processed,
            affected = report.affected,
            "Semester step processed"
        );
        Ok(report)
    }

    /// Mark `step` done without processing any persona.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the step is already done or a
    /// prerequisite is pending; nothing is changed in that case.
    pub fn finish_step(&self, ctx: &RequestContext, step: PeriodStep) -> Result<Period> {
        let period = self.store.atomic(|tx| {
            let mut period = load_current_period(tx, ctx)?;
            finish(tx, ctx, &mut period, step)?;
            Ok::<_, BackendError>(period)
        })?;
        info!(period_id = %period.id, step = %step, "Semester step finished");
        Ok(period)
    }

    /// Close the current period and open the next one.
    ///
    /// # Errors
    ///
    /// Returns a precondition error naming the first pending step; the
    /// period is unchanged in that case.
    pub fn advance_semester(&self, ctx: &RequestContext) -> Result<Period> {
        let next = self.store.atomic(|tx| {
            let mut period = load_current_period(tx, ctx)?;
            let next = period.advance(ctx.now)?;
            tx.put_period(&period)?;
            tx.put_period(&next)?;
            tx.append_cde_log(
                &CdeLogEntry::new(CdeLogCode::SemesterAdvanced, ctx.now, ctx.submitted_by)
                    .note(format!("Semester {}", next.id)),
            )?;
            Ok::<_, BackendError>(next)
        })?;
        info!(period_id = %next.id, "Semester advanced");
        Ok(next)
    }

    /// The current ExPuls period; the first one is opened on first access.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn current_expuls(&self) -> Result<ExpulsPeriod> {
        self.store.atomic(load_current_expuls)
    }

    /// Whether the ExPuls address check may start.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn may_start_expuls_addresscheck(&self) -> Result<bool> {
        Ok(self.current_expuls()?.may_start_addresscheck())
    }

    /// Ask every member to check their address, then mark the check done.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the check is already done.
    pub fn expuls_addresscheck(&self, ctx: &RequestContext) -> Result<ExpulsPeriod> {
        let period = self.store.atomic(|tx| {
            let mut period = load_current_expuls(tx)?;
            if !period.may_start_addresscheck() {
                return Err(BackendError::Precondition(
                    PreconditionKind::AddresscheckDone,
                ));
            }
            let members = tx
                .list_personas()?
                .into_iter()
                .filter(|p| p.is_member && !p.is_archived)
                .count();
            period.addresscheck_count = count(members);
            finish_addresscheck(tx, ctx, &mut period)?;
            Ok(period)
        })?;
        info!(
            expuls_id = %period.id,
            count = period.addresscheck_count,
            "ExPuls address check processed"
        );
        Ok(period)
    }

    /// Mark the ExPuls address check done without contacting anyone.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the check is already done.
    pub fn finish_expuls_addresscheck(&self, ctx: &RequestContext) -> Result<ExpulsPeriod> {
        self.store.atomic(|tx| {
            let mut period = load_current_expuls(tx)?;
            if !period.may_start_addresscheck() {
                return Err(BackendError::Precondition(
                    PreconditionKind::AddresscheckDone,
                ));
            }
            finish_addresscheck(tx, ctx, &mut period)?;
            Ok(period)
        })
    }

    /// Close the current ExPuls period and open the next one.
    ///
    /// # Errors
    ///
    /// Returns a precondition error while the address check is pending.
    pub fn advance_expuls(&self, ctx: &RequestContext) -> Result<ExpulsPeriod> {
        let next = self.store.atomic(|tx| {
            let mut period = load_current_expuls(tx)?;
            if !period.may_advance() {
                return Err(BackendError::Precondition(
                    PreconditionKind::AddresscheckPending,
                ));
            }
            period.expuls_done = Some(ctx.now);
            let next = ExpulsPeriod::new(period.id.next());
            tx.put_expuls_period(&period)?;
            tx.put_expuls_period(&next)?;
            tx.append_cde_log(
                &CdeLogEntry::new(CdeLogCode::ExpulsAdvanced, ctx.now, ctx.submitted_by)
                    .note(format!("ExPuls {}", next.id)),
            )?;
            Ok(next)
        })?;
        info!(expuls_id = %next.id, "ExPuls advanced");
        Ok(next)
    }

    // =========================================================================
    // Step processing
    // =========================================================================

    /// Count members and remind those whose balance does not cover the next
    /// period and who do not pay by direct debit.
    fn bill(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RequestContext,
        period: &mut Period,
    ) -> Result<StepReport> {
        let debited = active_permit_holders(tx)?;
        let mut report = StepReport::new(period.id, PeriodStep::Billing);
        for persona in tx.list_personas()? {
            if !persona.is_member || persona.is_archived {
                continue;
            }
            report.processed += 1;
            if !persona.trial_member
                && !debited.contains(&persona.id)
                && !persona.covers_fee(self.config.membership_fee)
            {
                report.affected += 1;
                debug!(persona_id = %persona.id, balance = %persona.balance, "Member reminded to pay");
            }
        }
        period.billing_count = report.processed;
        tx.append_cde_log(
            &CdeLogEntry::new(CdeLogCode::MembersBilled, ctx.now, ctx.submitted_by).note(format!(
                "{} members billed, {} lacking balance",
                report.processed, report.affected
            )),
        )?;
        Ok(report)
    }

    /// Notify inactive non-members that their account will be archived.
    fn notify_archival(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RequestContext,
        period: &mut Period,
    ) -> Result<StepReport> {
        let mut report = StepReport::new(period.id, PeriodStep::ArchivalNotification);
        for mut persona in tx.list_personas()? {
            if persona.is_member || persona.is_archived {
                continue;
            }
            report.processed += 1;
            if persona.archival_notified_at.is_none()
                && persona.is_inactive(ctx.now, self.config.archival_inactivity_days)
            {
                persona.archival_notified_at = Some(ctx.now);
                tx.put_persona(&persona)?;
                tx.append_cde_log(
                    &CdeLogEntry::new(CdeLogCode::ArchivalNotified, ctx.now, ctx.submitted_by)
                        .persona(persona.id),
                )?;
                report.affected += 1;
            }
        }
        period.archival_notification_count = report.affected;
        Ok(report)
    }

    /// End the membership of members who can no longer pay.
    fn eject(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RequestContext,
        period: &mut Period,
    ) -> Result<StepReport> {
        let debited = active_permit_holders(tx)?;
        let mut report = StepReport::new(period.id, PeriodStep::Ejection);
        for mut persona in tx.list_personas()? {
            if !persona.is_member {
                continue;
            }
            report.processed += 1;
            let pays = persona.trial_member
                || debited.contains(&persona.id)
                || persona.covers_fee(self.config.membership_fee);
            if pays {
                continue;
            }
            persona.is_member = false;
            tx.put_persona(&persona)?;
            tx.append_cde_log(
                &CdeLogEntry::new(CdeLogCode::MembershipEjected, ctx.now, ctx.submitted_by)
                    .persona(persona.id)
                    .note(format!("Balance {}", persona.balance)),
            )?;
            report.affected += 1;
            report.amount += persona.balance;
        }
        period.ejection_count = report.affected;
        period.ejection_balance = report.amount;
        Ok(report)
    }

    /// Archive notified personas that stayed inactive.
    fn archive(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RequestContext,
        period: &mut Period,
    ) -> Result<StepReport> {
        let mut report = StepReport::new(period.id, PeriodStep::Archival);
        for mut persona in tx.list_personas()? {
            let Some(notified_at) = persona.archival_notified_at else {
                continue;
            };
            if persona.is_archived {
                continue;
            }
            report.processed += 1;
            let still_inactive = persona.last_activity <= notified_at
                && persona.is_inactive(ctx.now, self.config.archival_inactivity_days);
            if persona.is_member || !still_inactive {
                // they came back, so the notification is void
                persona.archival_notified_at = None;
                tx.put_persona(&persona)?;
                continue;
            }
            persona.is_archived = true;
            tx.put_persona(&persona)?;
            tx.append_cde_log(
                &CdeLogEntry::new(CdeLogCode::PersonaArchived, ctx.now, ctx.submitted_by)
                    .persona(persona.id),
            )?;
            report.affected += 1;
        }
        period.archival_count = report.affected;
        Ok(report)
    }

    /// End trial memberships and deduct the fee from all other members.
    fn update_balances(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RequestContext,
        period: &mut Period,
    ) -> Result<StepReport> {
        let fee = self.config.membership_fee;
        let mut report = StepReport::new(period.id, PeriodStep::Balance);
        let mut trial_members = 0;
        for mut persona in tx.list_personas()? {
            if !persona.is_member {
                continue;
            }
            report.processed += 1;
            if persona.trial_member {
                persona.trial_member = false;
                tx.put_persona(&persona)?;
                tx.append_cde_log(
                    &CdeLogEntry::new(CdeLogCode::TrialMembershipEnded, ctx.now, ctx.submitted_by)
                        .persona(persona.id),
                )?;
                trial_members += 1;
                continue;
            }
            let deducted = fee.min(persona.balance).max(Decimal::ZERO);
            persona.balance -= deducted;
            tx.put_persona(&persona)?;
            tx.append_cde_log(
                &CdeLogEntry::new(CdeLogCode::FeeDeducted, ctx.now, ctx.submitted_by)
                    .persona(persona.id)
                    .balance(-deducted, persona.balance),
            )?;
            report.affected += 1;
            report.amount += deducted;
        }
        period.balance_trialmembers = trial_members;
        period.balance_total = report.amount;
        Ok(report)
    }
}

impl StepReport {
    fn new(period_id: PeriodId, step: PeriodStep) -> Self {
        Self {
            period_id,
            step,
            processed: 0,
            affected: 0,
            amount: Decimal::ZERO,
        }
    }
}

/// Load the current period, opening period 1 in an empty database.
pub(crate) fn load_current_period(tx: &mut dyn StoreTx, ctx: &RequestContext) -> Result<Period> {
    if let Some(period) = tx.current_period()? {
        return Ok(period);
    }
    let period = Period::new(PeriodId::new(1), ctx.now);
    tx.put_period(&period)?;
    Ok(period)
}

fn load_current_expuls(tx: &mut dyn StoreTx) -> Result<ExpulsPeriod> {
    if let Some(period) = tx.current_expuls_period()? {
        return Ok(period);
    }
    let period = ExpulsPeriod::new(ExpulsPeriodId::new(1));
    tx.put_expuls_period(&period)?;
    Ok(period)
}

fn finish(
    tx: &mut dyn StoreTx,
    ctx: &RequestContext,
    period: &mut Period,
    step: PeriodStep,
) -> Result<()> {
    period.finish(step, ctx.now)?;
    tx.put_period(period)?;
    tx.append_cde_log(
        &CdeLogEntry::new(CdeLogCode::SemesterStepFinished, ctx.now, ctx.submitted_by)
            .note(format!("Semester {}: {step}", period.id)),
    )?;
    Ok(())
}

fn finish_addresscheck(
    tx: &mut dyn StoreTx,
    ctx: &RequestContext,
    period: &mut ExpulsPeriod,
) -> Result<()> {
    period.addresscheck_done = Some(ctx.now);
    tx.put_expuls_period(period)?;
    tx.append_cde_log(
        &CdeLogEntry::new(
            CdeLogCode::ExpulsAddresscheckFinished,
            ctx.now,
            ctx.submitted_by,
        )
        .note(format!("ExPuls {}", period.id)),
    )?;
    Ok(())
}

fn active_permit_holders(tx: &mut dyn StoreTx) -> Result<HashSet<PersonaId>> {
    Ok(tx
        .list_lastschriften()?
        .into_iter()
        .filter(|permit| permit.is_active())
        .map(|permit| permit.persona_id)
        .collect())
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdedb_core::Persona;
    use cdedb_store::MemoryStore;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn setup() -> (SemesterBackend, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let backend = SemesterBackend::new(store.clone(), Arc::new(CdeConfig::default()));
        (backend, store)
    }

    fn member(id: i64, balance: Decimal) -> Persona {
        let mut persona = Persona::new(PersonaId::new(id), "Ferdinand", "Findus", Utc::now());
        persona.is_member = true;
        persona.balance = balance;
        persona
    }

    #[test]
    fn fresh_database_opens_period_one() {
        let (backend, _) = setup();
        let ctx = RequestContext::system();
        let period = backend.current_period(&ctx).unwrap();
        assert_eq!(period.id, PeriodId::new(1));
        assert!(backend.may_start(&ctx, PeriodStep::Billing).unwrap());
        assert!(!backend.may_start(&ctx, PeriodStep::Balance).unwrap());
    }

    #[test]
    fn out_of_order_step_changes_nothing() {
        let (backend, store) = setup();
        let ctx = RequestContext::system();
        store
            .atomic(|tx| tx.put_persona(&member(1, dec!(0))))
            .unwrap();

        let err = backend.run_step(&ctx, PeriodStep::Ejection).unwrap_err();
        assert!(matches!(err, BackendError::Precondition(_)));
        let persona = store
            .atomic(|tx| tx.get_persona(PersonaId::new(1)))
            .unwrap()
            .unwrap();
        assert!(persona.is_member);
    }

    #[test]
    fn full_semester_cycle() {
        let (backend, store) = setup();
        let ctx = RequestContext::system();
        let mut trial = member(3, dec!(0));
        trial.trial_member = true;
        let mut inactive = Persona::new(PersonaId::new(4), "Inga", "Inaktiv", Utc::now());
        inactive.last_activity = Utc::now() - Duration::days(800);
        store
            .atomic(|tx| {
                tx.put_persona(&member(1, dec!(100.00)))?;
                tx.put_persona(&member(2, dec!(10.00)))?;
                tx.put_persona(&trial)?;
                tx.put_persona(&inactive)
            })
            .unwrap();

        let billing = backend.run_step(&ctx, PeriodStep::Billing).unwrap();
        assert_eq!((billing.processed, billing.affected), (3, 1));

        let notified = backend
            .run_step(&ctx, PeriodStep::ArchivalNotification)
            .unwrap();
        assert_eq!(notified.affected, 1);

        let ejected = backend.run_step(&ctx, PeriodStep::Ejection).unwrap();
        assert_eq!(ejected.affected, 1);
        assert_eq!(ejected.amount, dec!(10.00));

        let archived = backend.run_step(&ctx, PeriodStep::Archival).unwrap();
        assert_eq!(archived.affected, 1);

        let balance = backend.run_step(&ctx, PeriodStep::Balance).unwrap();
        assert_eq!(balance.amount, dec!(24.00));

        let period = backend.current_period(&ctx).unwrap();
        assert_eq!(period.ejection_count, 1);
        assert_eq!(period.balance_trialmembers, 1);
        assert!(period.may_advance());

        let next = backend.advance_semester(&ctx).unwrap();
        assert_eq!(next.id, PeriodId::new(2));

        let rich = store
            .atomic(|tx| tx.get_persona(PersonaId::new(1)))
            .unwrap()
            .unwrap();
        assert_eq!(rich.balance, dec!(76.00));
        let trial = store
            .atomic(|tx| tx.get_persona(PersonaId::new(3)))
            .unwrap()
            .unwrap();
        assert!(trial.is_member && !trial.trial_member);
        let inactive = store
            .atomic(|tx| tx.get_persona(PersonaId::new(4)))
            .unwrap()
            .unwrap();
        assert!(inactive.is_archived);
    }

    #[test]
    fn advance_requires_all_steps() {
        let (backend, _) = setup();
        let ctx = RequestContext::system();
        for step in &PeriodStep::ALL[..4] {
            backend.finish_step(&ctx, *step).unwrap();
        }
        let before = backend.current_period(&ctx).unwrap();
        assert!(backend.advance_semester(&ctx).is_err());
        assert_eq!(backend.current_period(&ctx).unwrap(), before);

        backend.finish_step(&ctx, PeriodStep::Balance).unwrap();
        assert_eq!(backend.advance_semester(&ctx).unwrap().id, PeriodId::new(2));
    }

    #[test]
    fn finishing_twice_fails() {
        let (backend, _) = setup();
        let ctx = RequestContext::system();
        backend.finish_step(&ctx, PeriodStep::Billing).unwrap();
        assert!(backend.finish_step(&ctx, PeriodStep::Billing).is_err());
        assert!(backend.run_step(&ctx, PeriodStep::Billing).is_err());
    }

    #[test]
    fn expuls_cycle() {
        let (backend, store) = setup();
        let ctx = RequestContext::system();
        store
            .atomic(|tx| tx.put_persona(&member(1, dec!(5))))
            .unwrap();

        assert!(backend.advance_expuls(&ctx).is_err());
        let period = backend.expuls_addresscheck(&ctx).unwrap();
        assert_eq!(period.addresscheck_count, 1);
        assert!(!backend.may_start_expuls_addresscheck().unwrap());
        assert!(backend.finish_expuls_addresscheck(&ctx).is_err());

        let next = backend.advance_expuls(&ctx).unwrap();
        assert_eq!(next.id, ExpulsPeriodId::new(2));
        assert!(backend.may_start_expuls_addresscheck().unwrap());
    }
}
