//! Direct-debit permits and their transactions.

use std::sync::Arc;

use cdedb_core::{
    credited_amount, deletion_blockers, may_skip, CdeConfig, CdeLogCode, CdeLogEntry,
    DeletionBlocker, Lastschrift, LastschriftId, LastschriftTransaction, PeriodId, PersonaId,
    RequestContext, TransactionId, TransactionStatus,
};
use cdedb_store::records::seq;
use cdedb_store::{Records, Store, StoreExt, StoreTx, TxExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BackendError, PreconditionKind, Result};
use crate::finance::{credit_balance, load_persona, run_batch};
use crate::outcome::{BatchOutcome, Outcome, Refusal};
use crate::semester::load_current_period;

/// Data for a new permit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLastschrift {
    /// The persona paying.
    pub persona_id: PersonaId,
    /// IBAN to debit.
    pub iban: String,
    /// Account holder, if different from the persona.
    #[serde(default)]
    pub account_owner: Option<String>,
    /// Free-form notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// One bank outcome to record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    /// The transaction.
    pub transaction_id: TransactionId,
    /// `success`, `failure` or `cancelled`.
    pub status: TransactionStatus,
    /// Amount actually booked; defaults by status when omitted.
    #[serde(default)]
    pub tally: Option<Decimal>,
}

/// Direct-debit capability.
#[derive(Clone)]
pub struct LastschriftBackend {
    store: Arc<dyn Store>,
    config: Arc<CdeConfig>,
}

impl LastschriftBackend {
    /// Create the direct-debit backend.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: Arc<CdeConfig>) -> Self {
        Self { store, config }
    }

    /// Record a new permit.
    ///
    /// Refused if the persona already has an active permit.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown persona and a validation error for
    /// an empty IBAN.
    pub fn create(&self, ctx: &RequestContext, data: &NewLastschrift) -> Result<Outcome<Lastschrift>> {
        let outcome = self.store.atomic(|tx| {
            let persona = load_persona(tx, data.persona_id)?;
            if persona.is_archived {
                return Err(BackendError::Precondition(PreconditionKind::Archived(
                    persona.id,
                )));
            }
            let iban: String = data.iban.chars().filter(|c| !c.is_whitespace()).collect();
            if iban.is_empty() {
                return Err(BackendError::Validation("IBAN must not be empty".into()));
            }
            if let Some(existing) = tx
                .lastschriften_of(persona.id)?
                .into_iter()
                .find(Lastschrift::is_active)
            {
                return Ok(Outcome::Refused(Refusal::DuplicateLastschrift {
                    persona_id: persona.id,
                    existing: existing.id,
                }));
            }

            let permit = Lastschrift {
                id: LastschriftId::new(tx.next_id(seq::LASTSCHRIFTEN)?),
                persona_id: persona.id,
                account_owner: data.account_owner.clone(),
                iban: iban.to_uppercase(),
                granted_at: ctx.now,
                revoked_at: None,
                notes: data.notes.clone(),
            };
            tx.put_lastschrift(&permit)?;
            tx.append_cde_log(
                &CdeLogEntry::new(CdeLogCode::LastschriftCreated, ctx.now, ctx.submitted_by)
                    .persona(persona.id),
            )?;
            Ok(Outcome::Granted(permit))
        })?;
        match &outcome {
            Outcome::Granted(permit) => {
                info!(lastschrift_id = %permit.id, persona_id = %permit.persona_id, "Lastschrift created");
            }
            Outcome::Refused(refusal) => debug!(%refusal, "Lastschrift creation refused"),
        }
        Ok(outcome)
    }

    /// Get a permit.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the permit does not exist.
    pub fn get(&self, lastschrift_id: LastschriftId) -> Result<Lastschrift> {
        self.store.atomic(|tx| load_permit(tx, lastschrift_id))
    }

    /// Permits of a persona, active and revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_of(&self, persona_id: PersonaId) -> Result<Vec<Lastschrift>> {
        Ok(self.store.atomic(|tx| tx.lastschriften_of(persona_id))?)
    }

    /// Revoke a permit. Revoking twice keeps the first date.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the permit does not exist.
    pub fn revoke(&self, ctx: &RequestContext, lastschrift_id: LastschriftId) -> Result<Lastschrift> {
        let permit = self.store.atomic(|tx| {
            let mut permit = load_permit(tx, lastschrift_id)?;
            revoke_permit(tx, ctx, &mut permit, None)?;
            Ok::<_, BackendError>(permit)
        })?;
        info!(lastschrift_id = %lastschrift_id, "Lastschrift revoked");
        Ok(permit)
    }

    /// Everything currently preventing deletion of the permit.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the permit does not exist.
    pub fn delete_blockers(
        &self,
        ctx: &RequestContext,
        lastschrift_id: LastschriftId,
    ) -> Result<Vec<DeletionBlocker>> {
        self.store.atomic(|tx| {
            let permit = load_permit(tx, lastschrift_id)?;
            let transactions = tx.transactions_of(lastschrift_id)?;
            Ok(deletion_blockers(&permit, &transactions, ctx.now))
        })
    }

    /// Delete a permit together with its finished transactions.
    ///
    /// Refused while any deletion blocker remains.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the permit does not exist.
    pub fn delete(&self, ctx: &RequestContext, lastschrift_id: LastschriftId) -> Result<Outcome<()>> {
        let outcome = self.store.atomic(|tx| {
            let permit = load_permit(tx, lastschrift_id)?;
            let transactions = tx.transactions_of(lastschrift_id)?;
            let blockers = deletion_blockers(&permit, &transactions, ctx.now);
            if !blockers.is_empty() {
                return Ok(Outcome::Refused(Refusal::DeletionBlocked {
                    lastschrift_id,
                    blockers,
                }));
            }
            tx.delete_lastschrift(&permit)?;
            tx.append_cde_log(
                &CdeLogEntry::new(CdeLogCode::LastschriftDeleted, ctx.now, ctx.submitted_by)
                    .persona(permit.persona_id),
            )?;
            Ok::<_, BackendError>(Outcome::Granted(()))
        })?;
        if outcome.is_granted() {
            info!(lastschrift_id = %lastschrift_id, "Lastschrift deleted");
        }
        Ok(outcome)
    }

    /// Issue a collection of one year's fee for the current period.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the permit is revoked, already awaits
    /// an outcome, or was already collected or skipped in this period.
    pub fn issue_transaction(
        &self,
        ctx: &RequestContext,
        lastschrift_id: LastschriftId,
    ) -> Result<LastschriftTransaction> {
        let transaction = self.store.atomic(|tx| {
            let permit = load_permit(tx, lastschrift_id)?;
            let period = load_current_period(tx, ctx)?;
            check_collectable(tx, &permit, period.id)?;

            let transaction = LastschriftTransaction {
                id: TransactionId::new(tx.next_id(seq::TRANSACTIONS)?),
                lastschrift_id,
                persona_id: permit.persona_id,
                period_id: period.id,
                status: TransactionStatus::Issued,
                amount: self.config.annual_fee(),
                tally: None,
                issued_at: ctx.now,
                processed_at: None,
                submitted_by: ctx.submitted_by,
            };
            tx.put_transaction(&transaction)?;
            tx.append_cde_log(
                &CdeLogEntry::new(CdeLogCode::TransactionIssued, ctx.now, ctx.submitted_by)
                    .persona(permit.persona_id)
                    .note(format!("{} {}", transaction.id, transaction.amount)),
            )?;
            Ok::<_, BackendError>(transaction)
        })?;
        info!(
            transaction_id = %transaction.id,
            lastschrift_id = %lastschrift_id,
            amount = %transaction.amount,
            "Lastschrift transaction issued"
        );
        Ok(transaction)
    }

    /// Record the bank's outcome for a list of transactions, all or nothing.
    ///
    /// # Errors
    ///
    /// Only storage failures outside of row processing are errors; rows that
    /// are already tallied fail the batch and are reported in the
    /// [`BatchOutcome`].
    pub fn finalize_transactions(
        &self,
        ctx: &RequestContext,
        outcomes: &[TransactionOutcome],
    ) -> Result<BatchOutcome<Vec<LastschriftTransaction>>> {
        let batch = run_batch(self.store.as_ref(), outcomes, |tx, outcome| {
            self.finalize_one(tx, ctx, outcome)
        })?;
        if batch.is_success() {
            info!(count = outcomes.len(), "Lastschrift transactions finalized");
        }
        Ok(batch)
    }

    fn finalize_one(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RequestContext,
        outcome: &TransactionOutcome,
    ) -> Result<LastschriftTransaction> {
        let mut transaction = load_transaction(tx, outcome.transaction_id)?;
        let tally = outcome
            .tally
            .unwrap_or_else(|| transaction.default_tally(outcome.status, &self.config));
        transaction.finalize(outcome.status, tally, ctx.now)?;
        tx.put_transaction(&transaction)?;

        match outcome.status {
            TransactionStatus::Success => {
                let fee = self.config.annual_fee();
                let credited = credited_amount(tally, fee);
                let mut persona = load_persona(tx, transaction.persona_id)?;
                let note = format!("Lastschrift {}", transaction.id);
                credit_balance(
                    tx,
                    ctx,
                    &self.config,
                    &mut persona,
                    credited,
                    CdeLogCode::TransactionSuccess,
                    Some(&note),
                )?;
                if tally > fee {
                    tx.append_cde_log(
                        &CdeLogEntry::new(CdeLogCode::DonationReceived, ctx.now, ctx.submitted_by)
                            .persona(persona.id)
                            .note((tally - fee).to_string()),
                    )?;
                }
            }
            TransactionStatus::Failure => {
                tx.append_cde_log(
                    &CdeLogEntry::new(CdeLogCode::TransactionFailure, ctx.now, ctx.submitted_by)
                        .persona(transaction.persona_id)
                        .note(format!("{} tally {tally}", transaction.id)),
                )?;
                let mut permit = load_permit(tx, transaction.lastschrift_id)?;
                revoke_permit(tx, ctx, &mut permit, Some("collection failed"))?;
            }
            _ => {
                tx.append_cde_log(
                    &CdeLogEntry::new(CdeLogCode::TransactionCancelled, ctx.now, ctx.submitted_by)
                        .persona(transaction.persona_id)
                        .note(transaction.id.to_string()),
                )?;
            }
        }
        debug!(transaction_id = %transaction.id, status = %transaction.status, %tally, "Transaction finalized");
        Ok(transaction)
    }

    /// Reverse a successful collection: deduct what it credited and revoke
    /// the permit. `tally` is what the bank booked for the return and
    /// defaults to minus the bank charge.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the transaction is not successful.
    pub fn rollback_transaction(
        &self,
        ctx: &RequestContext,
        transaction_id: TransactionId,
        tally: Option<Decimal>,
    ) -> Result<LastschriftTransaction> {
        let transaction = self.store.atomic(|tx| {
            let mut transaction = load_transaction(tx, transaction_id)?;
            let collected = transaction.tally.unwrap_or(transaction.amount);
            let tally = tally.unwrap_or_else(|| {
                transaction.default_tally(TransactionStatus::Rollback, &self.config)
            });
            transaction.rollback(tally, ctx.now)?;
            tx.put_transaction(&transaction)?;

            let credited = credited_amount(collected, self.config.annual_fee());
            let mut persona = load_persona(tx, transaction.persona_id)?;
            persona.balance -= credited;
            tx.put_persona(&persona)?;
            tx.append_cde_log(
                &CdeLogEntry::new(CdeLogCode::TransactionRollback, ctx.now, ctx.submitted_by)
                    .persona(persona.id)
                    .balance(-credited, persona.balance)
                    .note(format!("{} tally {tally}", transaction.id)),
            )?;

            let mut permit = load_permit(tx, transaction.lastschrift_id)?;
            revoke_permit(tx, ctx, &mut permit, Some("collection rolled back"))?;
            Ok::<_, BackendError>(transaction)
        })?;
        info!(transaction_id = %transaction_id, "Lastschrift transaction rolled back");
        Ok(transaction)
    }

    /// Whether the permit may skip the collection of the current period.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the permit does not exist.
    pub fn may_skip(&self, ctx: &RequestContext, lastschrift_id: LastschriftId) -> Result<bool> {
        self.store.atomic(|tx| {
            let permit = load_permit(tx, lastschrift_id)?;
            let period = load_current_period(tx, ctx)?;
            let transactions = tx.transactions_of(lastschrift_id)?;
            Ok(may_skip(&permit, &transactions, period.id, &self.config, ctx.now))
        })
    }

    /// Skip the collection of the current period.
    ///
    /// Refused when the permit has not paid recently enough.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the permit is revoked or already
    /// collected in this period.
    pub fn skip(
        &self,
        ctx: &RequestContext,
        lastschrift_id: LastschriftId,
    ) -> Result<Outcome<LastschriftTransaction>> {
        let outcome = self.store.atomic(|tx| {
            let permit = load_permit(tx, lastschrift_id)?;
            let period = load_current_period(tx, ctx)?;
            let transactions = tx.transactions_of(lastschrift_id)?;
            if !may_skip(&permit, &transactions, period.id, &self.config, ctx.now) {
                return Ok(Outcome::Refused(Refusal::SkipNotAllowed { lastschrift_id }));
            }
            check_collectable(tx, &permit, period.id)?;

            let transaction = LastschriftTransaction {
                id: TransactionId::new(tx.next_id(seq::TRANSACTIONS)?),
                lastschrift_id,
                persona_id: permit.persona_id,
                period_id: period.id,
                status: TransactionStatus::Skipped,
                amount: Decimal::ZERO,
                tally: Some(Decimal::ZERO),
                issued_at: ctx.now,
                processed_at: Some(ctx.now),
                submitted_by: ctx.submitted_by,
            };
            tx.put_transaction(&transaction)?;
            tx.append_cde_log(
                &CdeLogEntry::new(CdeLogCode::TransactionSkipped, ctx.now, ctx.submitted_by)
                    .persona(permit.persona_id)
                    .note(format!("Semester {}", period.id)),
            )?;
            Ok::<_, BackendError>(Outcome::Granted(transaction))
        })?;
        if let Outcome::Granted(transaction) = &outcome {
            info!(lastschrift_id = %lastschrift_id, period_id = %transaction.period_id, "Lastschrift skipped");
        }
        Ok(outcome)
    }

    /// Transactions, optionally restricted to one permit, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_transactions(
        &self,
        lastschrift_id: Option<LastschriftId>,
    ) -> Result<Vec<LastschriftTransaction>> {
        Ok(self.store.atomic(|tx| match lastschrift_id {
            Some(id) => tx.transactions_of(id),
            None => tx.list_transactions(),
        })?)
    }
}

fn load_permit(tx: &mut dyn StoreTx, lastschrift_id: LastschriftId) -> Result<Lastschrift> {
    tx.get_lastschrift(lastschrift_id)?
        .ok_or_else(|| BackendError::not_found("lastschrift", lastschrift_id))
}

fn load_transaction(
    tx: &mut dyn StoreTx,
    transaction_id: TransactionId,
) -> Result<LastschriftTransaction> {
    tx.get_transaction(transaction_id)?
        .ok_or_else(|| BackendError::not_found("lastschrift transaction", transaction_id))
}

/// A permit may be collected or skipped once per period, while active and
/// not awaiting an outcome.
fn check_collectable(
    tx: &mut dyn StoreTx,
    permit: &Lastschrift,
    period_id: PeriodId,
) -> Result<()> {
    if !permit.is_active() {
        return Err(PreconditionKind::PermitRevoked(permit.id).into());
    }
    let transactions = tx.transactions_of(permit.id)?;
    if transactions.iter().any(|t| t.status.is_open()) {
        return Err(PreconditionKind::OpenTransaction(permit.id).into());
    }
    let collected = transactions.iter().any(|t| {
        t.period_id == period_id
            && !matches!(
                t.status,
                TransactionStatus::Cancelled | TransactionStatus::Failure
            )
    });
    if collected {
        return Err(PreconditionKind::AlreadyCollected {
            lastschrift_id: permit.id,
        }
        .into());
    }
    Ok(())
}

fn revoke_permit(
    tx: &mut dyn StoreTx,
    ctx: &RequestContext,
    permit: &mut Lastschrift,
    reason: Option<&str>,
) -> Result<()> {
    if !permit.is_active() {
        return Ok(());
    }
    permit.revoke(ctx.now);
    tx.put_lastschrift(permit)?;
    let mut entry = CdeLogEntry::new(CdeLogCode::LastschriftRevoked, ctx.now, ctx.submitted_by)
        .persona(permit.persona_id);
    if let Some(reason) = reason {
        entry = entry.note(reason);
    }
    tx.append_cde_log(&entry)?;
    Ok(())
}
