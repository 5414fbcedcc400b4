//! Personas, balances and the finance batch operations.

use std::sync::Arc;

use cdedb_core::{
    CdeConfig, CdeLogCode, CdeLogEntry, Persona, PersonaId, RequestContext,
};
use cdedb_store::records::seq;
use cdedb_store::{Records, Store, StoreError, StoreExt, StoreTx, TxExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BackendError, PreconditionKind, Result};
use crate::outcome::BatchOutcome;

/// Data for a new persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPersona {
    /// Given names.
    pub given_names: String,
    /// Family name.
    pub family_name: String,
    /// Login / mail address.
    #[serde(default)]
    pub username: Option<String>,
    /// Start as member.
    #[serde(default)]
    pub is_member: bool,
    /// Start as trial member; implies membership.
    #[serde(default)]
    pub trial_member: bool,
}

/// One booked bank transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyTransfer {
    /// Who paid.
    pub persona_id: PersonaId,
    /// Amount received.
    pub amount: Decimal,
    /// Family name from the bank statement, checked against the persona.
    #[serde(default)]
    pub family_name: Option<String>,
    /// Booking note.
    #[serde(default)]
    pub note: Option<String>,
}

/// What a transfer did to the persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// The persona credited.
    pub persona_id: PersonaId,
    /// Balance after booking.
    pub new_balance: Decimal,
    /// Whether the transfer made the persona a member.
    pub membership_granted: bool,
}

/// Finance capability: personas, balances and batch bookings.
#[derive(Clone)]
pub struct FinanceBackend {
    store: Arc<dyn Store>,
    config: Arc<CdeConfig>,
}

impl FinanceBackend {
    /// Create the finance backend.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: Arc<CdeConfig>) -> Self {
        Self { store, config }
    }

    /// Create a single persona.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty names or a taken username.
    pub fn create_persona(&self, ctx: &RequestContext, data: &NewPersona) -> Result<Persona> {
        let persona = self
            .store
            .atomic(|tx| insert_persona(tx, ctx, data))?;
        info!(persona_id = %persona.id, "Persona created");
        Ok(persona)
    }

    /// Get a persona.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the persona does not exist.
    pub fn get_persona(&self, persona_id: PersonaId) -> Result<Persona> {
        self.store.atomic(|tx| load_persona(tx, persona_id))
    }

    /// All personas, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_personas(&self) -> Result<Vec<Persona>> {
        Ok(self.store.atomic(|tx| tx.list_personas())?)
    }

    /// Apply a manual balance correction.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the balance would become negative and a
    /// precondition error for archived personas.
    pub fn change_balance(
        &self,
        ctx: &RequestContext,
        persona_id: PersonaId,
        delta: Decimal,
        note: &str,
    ) -> Result<Persona> {
        let persona = self.store.atomic(|tx| {
            let mut persona = load_persona(tx, persona_id)?;
            if persona.is_archived {
                return Err(BackendError::Precondition(PreconditionKind::Archived(
                    persona_id,
                )));
            }
            let new_balance = persona.balance + delta;
            if new_balance.is_sign_negative() && !new_balance.is_zero() {
                return Err(BackendError::Validation(format!(
                    "balance of persona {persona_id} would become negative"
                )));
            }
            persona.balance = new_balance;
            tx.put_persona(&persona)?;
            tx.append_cde_log(
                &CdeLogEntry::new(CdeLogCode::BalanceChanged, ctx.now, ctx.submitted_by)
                    .persona(persona_id)
                    .balance(delta, new_balance)
                    .note(note),
            )?;
            Ok(persona)
        })?;
        info!(persona_id = %persona_id, %delta, balance = %persona.balance, "Balance changed");
        Ok(persona)
    }

    /// Book a list of bank transfers in one transaction.
    ///
    /// Each transfer credits the persona's balance; personas whose balance
    /// then covers the membership fee become members.
    ///
    /// # Errors
    ///
    /// Only storage failures outside of row processing are errors; failing
    /// rows and conflicts are reported in the [`BatchOutcome`].
    pub fn perform_money_transfers(
        &self,
        ctx: &RequestContext,
        transfers: &[MoneyTransfer],
    ) -> Result<BatchOutcome<Vec<TransferReceipt>>> {
        let outcome = run_batch(self.store.as_ref(), transfers, |tx, transfer| {
            if transfer.amount <= Decimal::ZERO {
                return Err(BackendError::Validation(format!(
                    "transfer amount {} must be positive",
                    transfer.amount
                )));
            }
            let mut persona = load_persona(tx, transfer.persona_id)?;
            if let Some(family_name) = &transfer.family_name {
                if !family_name.trim().eq_ignore_ascii_case(persona.family_name.trim()) {
                    return Err(BackendError::Validation(format!(
                        "family name {family_name} does not match persona {}",
                        persona.id
                    )));
                }
            }
            let membership_granted = credit_balance(
                tx,
                ctx,
                &self.config,
                &mut persona,
                transfer.amount,
                CdeLogCode::MoneyTransferReceived,
                transfer.note.as_deref(),
            )?;
            debug!(persona_id = %persona.id, amount = %transfer.amount, "Transfer booked");
            Ok(TransferReceipt {
                persona_id: persona.id,
                new_balance: persona.balance,
                membership_granted,
            })
        })?;
        if outcome.is_success() {
            info!(count = transfers.len(), "Money transfers booked");
        }
        Ok(outcome)
    }

    /// Admit a list of new members in one transaction.
    ///
    /// # Errors
    ///
    /// Only storage failures outside of row processing are errors; failing
    /// rows and conflicts are reported in the [`BatchOutcome`].
    pub fn perform_batch_admission(
        &self,
        ctx: &RequestContext,
        admissions: &[NewPersona],
    ) -> Result<BatchOutcome<Vec<PersonaId>>> {
        let outcome = run_batch(self.store.as_ref(), admissions, |tx, data| {
            let admitted = NewPersona {
                is_member: true,
                ..data.clone()
            };
            let persona = insert_persona(tx, ctx, &admitted)?;
            tx.append_cde_log(
                &CdeLogEntry::new(CdeLogCode::PersonaAdmitted, ctx.now, ctx.submitted_by)
                    .persona(persona.id),
            )?;
            Ok(persona.id)
        })?;
        if outcome.is_success() {
            info!(count = admissions.len(), "Batch admission applied");
        }
        Ok(outcome)
    }

    /// The finance log, oldest entry first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn cde_log(&self) -> Result<Vec<CdeLogEntry>> {
        Ok(self.store.atomic(|tx| tx.cde_log())?)
    }
}

/// Load a persona or fail with `NotFound`.
pub(crate) fn load_persona(tx: &mut dyn StoreTx, persona_id: PersonaId) -> Result<Persona> {
    tx.get_persona(persona_id)?
        .ok_or_else(|| BackendError::not_found("persona", persona_id))
}

/// Credit `amount` to the persona and grant membership once the balance
/// covers the fee. Returns whether membership was granted.
pub(crate) fn credit_balance(
    tx: &mut dyn StoreTx,
    ctx: &RequestContext,
    config: &CdeConfig,
    persona: &mut Persona,
    amount: Decimal,
    code: CdeLogCode,
    note: Option<&str>,
) -> Result<bool> {
    if persona.is_archived {
        return Err(PreconditionKind::Archived(persona.id).into());
    }
    persona.balance += amount;
    let granted = !persona.is_member && persona.covers_fee(config.membership_fee);
    if granted {
        persona.is_member = true;
    }
    tx.put_persona(persona)?;

    let mut entry = CdeLogEntry::new(code, ctx.now, ctx.submitted_by)
        .persona(persona.id)
        .balance(amount, persona.balance);
    if let Some(note) = note {
        entry = entry.note(note);
    }
    tx.append_cde_log(&entry)?;
    if granted {
        tx.append_cde_log(
            &CdeLogEntry::new(CdeLogCode::MembershipGranted, ctx.now, ctx.submitted_by)
                .persona(persona.id),
        )?;
    }
    Ok(granted)
}

fn insert_persona(tx: &mut dyn StoreTx, ctx: &RequestContext, data: &NewPersona) -> Result<Persona> {
    if data.given_names.trim().is_empty() || data.family_name.trim().is_empty() {
        return Err(BackendError::Validation("names must not be empty".into()));
    }
    if let Some(username) = &data.username {
        let taken = tx
            .list_personas()?
            .iter()
            .any(|p| p.username.as_deref() == Some(username.as_str()));
        if taken {
            return Err(BackendError::Validation(format!(
                "username {username} is already taken"
            )));
        }
    }
    let id = PersonaId::new(tx.next_id(seq::PERSONAS)?);
    let mut persona = Persona::new(id, data.given_names.trim(), data.family_name.trim(), ctx.now);
    persona.username.clone_from(&data.username);
    persona.trial_member = data.trial_member;
    persona.is_member = data.is_member || data.trial_member;
    tx.put_persona(&persona)?;
    if persona.is_member {
        tx.append_cde_log(
            &CdeLogEntry::new(CdeLogCode::MembershipGranted, ctx.now, ctx.submitted_by)
                .persona(id),
        )?;
    }
    Ok(persona)
}

enum BatchError {
    Row { row: usize, source: BackendError },
    Store(StoreError),
}

impl From<StoreError> for BatchError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Apply `apply` to every row inside one transaction.
///
/// A failing row aborts the whole batch and is reported by index. A
/// serialization conflict, during a row or at commit, is reported as
/// [`BatchOutcome::Conflict`].
pub(crate) fn run_batch<R, T, F>(
    store: &dyn Store,
    rows: &[R],
    mut apply: F,
) -> Result<BatchOutcome<Vec<T>>>
where
    F: FnMut(&mut dyn StoreTx, &R) -> Result<T>,
{
    let result = store.atomic(|tx| {
        let mut results = Vec::with_capacity(rows.len());
        for (row, item) in rows.iter().enumerate() {
            let value = apply(tx, item).map_err(|source| BatchError::Row { row, source })?;
            results.push(value);
        }
        Ok(results)
    });

    match result {
        Ok(result) => Ok(BatchOutcome::Success { result }),
        Err(
            BatchError::Store(StoreError::Conflict)
            | BatchError::Row {
                source: BackendError::Store(StoreError::Conflict),
                ..
            },
        ) => {
            warn!(rows = rows.len(), "Batch aborted by serialization conflict");
            Ok(BatchOutcome::Conflict)
        }
        Err(BatchError::Row { row, source }) => {
            warn!(row, error = %source, "Batch row failed");
            Ok(BatchOutcome::Failed {
                row,
                reason: source.to_string(),
            })
        }
        Err(BatchError::Store(err)) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdedb_store::MemoryStore;
    use rust_decimal_macros::dec;

    fn backend() -> FinanceBackend {
        FinanceBackend::new(Arc::new(MemoryStore::new()), Arc::new(CdeConfig::default()))
    }

    fn new_persona(family_name: &str) -> NewPersona {
        NewPersona {
            given_names: "Emilia".into(),
            family_name: family_name.into(),
            username: None,
            is_member: false,
            trial_member: false,
        }
    }

    #[test]
    fn transfer_grants_membership_once_fee_is_covered() {
        let backend = backend();
        let ctx = RequestContext::system();
        let persona = backend.create_persona(&ctx, &new_persona("Eventis")).unwrap();

        let outcome = backend
            .perform_money_transfers(
                &ctx,
                &[MoneyTransfer {
                    persona_id: persona.id,
                    amount: dec!(10.00),
                    family_name: None,
                    note: None,
                }],
            )
            .unwrap();
        let BatchOutcome::Success { result } = outcome else {
            panic!("transfer failed: {outcome:?}");
        };
        assert!(!result[0].membership_granted);

        let outcome = backend
            .perform_money_transfers(
                &ctx,
                &[MoneyTransfer {
                    persona_id: persona.id,
                    amount: dec!(14.00),
                    family_name: Some("eventis".into()),
                    note: Some("Überweisung".into()),
                }],
            )
            .unwrap();
        let BatchOutcome::Success { result } = outcome else {
            panic!("transfer failed: {outcome:?}");
        };
        assert!(result[0].membership_granted);
        assert_eq!(result[0].new_balance, dec!(24.00));
        assert!(backend.get_persona(persona.id).unwrap().is_member);
    }

    #[test]
    fn failing_row_is_reported_and_nothing_applied() {
        let backend = backend();
        let ctx = RequestContext::system();
        let persona = backend.create_persona(&ctx, &new_persona("Eventis")).unwrap();

        let outcome = backend
            .perform_money_transfers(
                &ctx,
                &[
                    MoneyTransfer {
                        persona_id: persona.id,
                        amount: dec!(5.00),
                        family_name: None,
                        note: None,
                    },
                    MoneyTransfer {
                        persona_id: PersonaId::new(999),
                        amount: dec!(5.00),
                        family_name: None,
                        note: None,
                    },
                ],
            )
            .unwrap();
        assert!(matches!(outcome, BatchOutcome::Failed { row: 1, .. }));
        assert!(!outcome.is_retryable());
        assert_eq!(backend.get_persona(persona.id).unwrap().balance, Decimal::ZERO);
    }

    #[test]
    fn batch_admission_rejects_duplicate_usernames() {
        let backend = backend();
        let ctx = RequestContext::system();
        let mut first = new_persona("Dino");
        first.username = Some("dino@example.cde".into());
        let mut second = new_persona("Dino");
        second.username = Some("dino@example.cde".into());
        second.trial_member = true;

        let outcome = backend
            .perform_batch_admission(&ctx, &[first.clone(), second])
            .unwrap();
        assert!(matches!(outcome, BatchOutcome::Failed { row: 1, .. }));
        assert!(backend.list_personas().unwrap().is_empty());

        let outcome = backend.perform_batch_admission(&ctx, &[first]).unwrap();
        let BatchOutcome::Success { result } = outcome else {
            panic!("admission failed: {outcome:?}");
        };
        let admitted = backend.get_persona(result[0]).unwrap();
        assert!(admitted.is_member);
        assert!(!admitted.trial_member);
    }

    #[test]
    fn balance_cannot_go_negative() {
        let backend = backend();
        let ctx = RequestContext::system();
        let persona = backend.create_persona(&ctx, &new_persona("Garcia")).unwrap();
        let err = backend
            .change_balance(&ctx, persona.id, dec!(-1.00), "Korrektur")
            .unwrap_err();
        assert!(matches!(err, BackendError::Validation(_)));

        let persona = backend
            .change_balance(&ctx, persona.id, dec!(3.50), "Korrektur")
            .unwrap();
        assert_eq!(persona.balance, dec!(3.50));
        let log = backend.cde_log().unwrap();
        assert_eq!(log.last().map(|e| e.code), Some(CdeLogCode::BalanceChanged));
    }

    #[test]
    fn concurrent_change_turns_batch_into_conflict() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let backend = FinanceBackend::new(store.clone(), Arc::new(CdeConfig::default()));
        let ctx = RequestContext::system();
        let persona = backend.create_persona(&ctx, &new_persona("Eventis")).unwrap();

        let outcome = run_batch(store.as_ref(), &[persona.id], |tx, id| {
            let mut ours = tx.get_persona(*id)?.unwrap();
            // another request books a transfer in between
            store.atomic(|other| {
                let mut theirs = other.get_persona(*id)?.unwrap();
                theirs.balance += dec!(5.00);
                other.put_persona(&theirs)
            })?;
            ours.balance += dec!(10.00);
            tx.put_persona(&ours)?;
            Ok(ours.balance)
        })
        .unwrap();

        assert_eq!(outcome, BatchOutcome::Conflict);
        assert!(outcome.is_retryable());
        assert_eq!(backend.get_persona(persona.id).unwrap().balance, dec!(5.00));
    }
}
