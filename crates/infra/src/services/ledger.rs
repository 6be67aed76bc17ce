//! Account ledger service: serialized balance mutation over account streams.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use shopledger_accounting::{
    Account, AccountCommand, AccountId, AccountKind, DisableAccount, Leg, LedgerTransaction,
    OpenAccount, PostTransaction, ReinstateTransaction, RenameAccount, ReversalReason,
    ReverseTransaction, TransactionId, TransactionKind, TransactionRecord,
};
use shopledger_core::{Aggregate, Amount, BusinessCalendar, DomainError};
use shopledger_events::{EventBus, EventEnvelope};

use crate::cache::TtlCache;
use crate::command_dispatcher::CommandDispatcher;
use crate::error::EngineResult;
use crate::event_store::EventStore;
use crate::locks::KeyedLocks;
use crate::read_model::{InMemoryKeyIndex, KeyIndex};

pub const ACCOUNT_AGGREGATE: &str = "accounting.account";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub balance: Amount,
}

/// Balances of every account a transaction touched, after the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_id: TransactionId,
    pub balances: Vec<AccountBalance>,
}

impl TransactionReceipt {
    pub fn balance_of(&self, account_id: AccountId) -> Option<Amount> {
        self.balances
            .iter()
            .find(|b| b.account_id == account_id)
            .map(|b| b.balance)
    }
}

pub struct LedgerService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    calendar: BusinessCalendar,
    locks: KeyedLocks<AccountId>,
    owners: InMemoryKeyIndex<TransactionId, AccountId>,
    categories: TtlCache<(), Vec<String>>,
}

impl<S, B> LedgerService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        calendar: BusinessCalendar,
        categories_ttl: std::time::Duration,
    ) -> Self {
        Self {
            dispatcher,
            calendar,
            locks: KeyedLocks::new(),
            owners: InMemoryKeyIndex::new(),
            categories: TtlCache::new(categories_ttl),
        }
    }

    pub fn calendar(&self) -> &BusinessCalendar {
        &self.calendar
    }

    fn load(&self, account_id: AccountId) -> EngineResult<Account> {
        self.dispatcher
            .load(account_id.0, |_| Account::empty(account_id))
    }

    /// Load an account that must exist.
    pub fn account(&self, account_id: AccountId) -> EngineResult<Account> {
        let account = self.load(account_id)?;
        if !account.is_created() {
            return Err(DomainError::not_found(format!("account {account_id}")).into());
        }
        Ok(account)
    }

    pub fn accounts(&self) -> EngineResult<Vec<Account>> {
        self.dispatcher
            .stream_ids(ACCOUNT_AGGREGATE)?
            .into_iter()
            .map(|id| self.account(AccountId::new(id)))
            .collect()
    }

    fn execute(&self, account_id: AccountId, command: AccountCommand) -> EngineResult<Account> {
        self.locks.with_locked([account_id], || {
            self.dispatcher.dispatch(
                account_id.0,
                ACCOUNT_AGGREGATE,
                &command,
                |_| Account::empty(account_id),
            )
        })?
    }

    /// Open an account. A non-zero opening balance is recorded as an ordinary
    /// transaction so the balance stays derivable from history.
    pub fn open_account(
        &self,
        name: impl Into<String>,
        kind: AccountKind,
        opening_balance: Amount,
    ) -> EngineResult<Account> {
        let account_id = AccountId::generate();
        let account = self.execute(
            account_id,
            AccountCommand::OpenAccount(OpenAccount {
                account_id,
                name: name.into(),
                kind,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(account_id = %account_id, name = account.name(), "account opened");

        let opening = match opening_balance {
            0 => return Ok(account),
            b if b > 0 => LedgerTransaction::credit(account_id, b, "Opening balance"),
            b => LedgerTransaction::debit(account_id, -b, "Opening balance"),
        };
        self.apply_transaction(opening)?;
        self.account(account_id)
    }

    pub fn rename_account(&self, account_id: AccountId, name: impl Into<String>) -> EngineResult<Account> {
        self.execute(
            account_id,
            AccountCommand::RenameAccount(RenameAccount {
                account_id,
                name: name.into(),
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn disable_account(&self, account_id: AccountId) -> EngineResult<Account> {
        let account = self.execute(
            account_id,
            AccountCommand::DisableAccount(DisableAccount {
                account_id,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(account_id = %account_id, "account disabled");
        Ok(account)
    }

    /// Record a credit, debit or transfer.
    ///
    /// Every account involved is locked for the duration. Both legs of a
    /// transfer are validated before either is committed; if the destination
    /// leg still fails to commit, the source leg is reversed with
    /// [`ReversalReason::Rollback`].
    pub fn apply_transaction(&self, tx: LedgerTransaction) -> EngineResult<TransactionReceipt> {
        tx.validate()?;
        let receipt = self
            .locks
            .with_locked(tx.touched_accounts(), || self.apply_locked(&tx))??;

        self.owners.upsert(tx.id, tx.account);
        if tx.category.is_some() {
            self.categories.invalidate(&());
        }
        tracing::info!(
            transaction_id = %tx.id,
            kind = ?tx.kind,
            amount = tx.amount,
            account_id = %tx.account,
            "transaction applied"
        );
        Ok(receipt)
    }

    fn apply_locked(&self, tx: &LedgerTransaction) -> EngineResult<TransactionReceipt> {
        let post = |account_id: AccountId, leg: Leg| {
            AccountCommand::PostTransaction(PostTransaction {
                account_id,
                transaction: tx.clone(),
                leg,
                occurred_at: Utc::now(),
            })
        };

        let mut source = self.account(tx.account)?;
        let source_events = source.handle(&post(tx.account, Leg::Source))?;

        let destination = match (tx.kind, tx.to_account) {
            (TransactionKind::Transfer, Some(to)) => {
                let account = self.account(to)?;
                let events = account.handle(&post(to, Leg::Destination))?;
                Some((account, events))
            }
            _ => None,
        };

        self.dispatcher
            .commit(tx.account.0, ACCOUNT_AGGREGATE, &mut source, source_events)?;
        let mut balances = vec![AccountBalance {
            account_id: tx.account,
            balance: source.balance(),
        }];

        if let Some((mut dest, events)) = destination {
            let dest_id = dest.id_typed();
            if let Err(err) = self
                .dispatcher
                .commit(dest_id.0, ACCOUNT_AGGREGATE, &mut dest, events)
            {
                tracing::warn!(
                    transaction_id = %tx.id,
                    destination = %dest_id,
                    error = %err,
                    "destination leg failed; rolling back source leg"
                );
                if let Err(rollback_err) =
                    self.reverse_leg(&mut source, tx.id, ReversalReason::Rollback)
                {
                    tracing::error!(
                        transaction_id = %tx.id,
                        error = %rollback_err,
                        "source leg rollback failed"
                    );
                }
                return Err(err);
            }
            balances.push(AccountBalance {
                account_id: dest_id,
                balance: dest.balance(),
            });
        }

        Ok(TransactionReceipt {
            transaction_id: tx.id,
            balances,
        })
    }

    fn reverse_leg(
        &self,
        account: &mut Account,
        transaction_id: TransactionId,
        reason: ReversalReason,
    ) -> EngineResult<()> {
        let account_id = account.id_typed();
        let events = account.handle(&AccountCommand::ReverseTransaction(ReverseTransaction {
            account_id,
            transaction_id,
            reason,
            occurred_at: Utc::now(),
        }))?;
        self.dispatcher
            .commit(account_id.0, ACCOUNT_AGGREGATE, account, events)?;
        Ok(())
    }

    /// Account that owns (is the source of) a transaction.
    fn owner_of(&self, transaction_id: TransactionId) -> EngineResult<AccountId> {
        if let Some(owner) = self.owners.get(&transaction_id) {
            return Ok(owner);
        }
        for account in self.accounts()? {
            if let Some(record) = account.posting(transaction_id) {
                if record.leg == Leg::Source {
                    self.owners.upsert(transaction_id, account.id_typed());
                    return Ok(account.id_typed());
                }
            }
        }
        Err(DomainError::not_found(format!("transaction {transaction_id}")).into())
    }

    /// Reverse a transaction on every account it touched.
    ///
    /// A second call fails with `AlreadyUndone` and changes nothing. Invoice
    /// payments are refused: they change only through the invoice, which
    /// keeps its `paid` total and the ledger in step.
    pub fn undo_transaction(&self, transaction_id: TransactionId) -> EngineResult<TransactionReceipt> {
        ensure_standalone(&self.posted(transaction_id)?)?;
        self.reverse(transaction_id, ReversalReason::Undo)
    }

    /// Reverse an invoice payment on behalf of the invoice that owns it.
    pub(crate) fn undo_invoice_posting(&self, transaction_id: TransactionId) -> EngineResult<TransactionReceipt> {
        self.reverse(transaction_id, ReversalReason::Undo)
    }

    /// Like [`undo_transaction`](Self::undo_transaction) but marks the reversal
    /// as a rollback of a failed multi-step operation.
    pub(crate) fn rollback_transaction(&self, transaction_id: TransactionId) -> EngineResult<TransactionReceipt> {
        self.reverse(transaction_id, ReversalReason::Rollback)
    }

    /// The transaction as recorded on its source account.
    fn posted(&self, transaction_id: TransactionId) -> EngineResult<LedgerTransaction> {
        let owner = self.owner_of(transaction_id)?;
        let account = self.account(owner)?;
        let record = account
            .posting(transaction_id)
            .ok_or_else(|| DomainError::not_found(format!("transaction {transaction_id}")))?;
        Ok(record.transaction.clone())
    }

    fn touched_by(&self, transaction_id: TransactionId) -> EngineResult<Vec<AccountId>> {
        Ok(self.posted(transaction_id)?.touched_accounts())
    }

    fn reverse(&self, transaction_id: TransactionId, reason: ReversalReason) -> EngineResult<TransactionReceipt> {
        let touched = self.touched_by(transaction_id)?;
        let receipt = self.locks.with_locked(touched.clone(), || {
            self.reverse_locked(transaction_id, &touched, reason)
        })??;
        tracing::info!(transaction_id = %transaction_id, ?reason, "transaction reversed");
        Ok(receipt)
    }

    fn reverse_locked(
        &self,
        transaction_id: TransactionId,
        touched: &[AccountId],
        reason: ReversalReason,
    ) -> EngineResult<TransactionReceipt> {
        // Decide on every leg before committing any.
        let mut decided = Vec::with_capacity(touched.len());
        for account_id in touched {
            let account = self.account(*account_id)?;
            let events = account.handle(&AccountCommand::ReverseTransaction(ReverseTransaction {
                account_id: *account_id,
                transaction_id,
                reason,
                occurred_at: Utc::now(),
            }))?;
            decided.push((account, events));
        }

        let mut done: Vec<Account> = Vec::with_capacity(decided.len());
        for (mut account, events) in decided {
            let account_id = account.id_typed();
            if let Err(err) = self
                .dispatcher
                .commit(account_id.0, ACCOUNT_AGGREGATE, &mut account, events)
            {
                tracing::warn!(
                    transaction_id = %transaction_id,
                    account_id = %account_id,
                    error = %err,
                    "reversal leg failed; reinstating reversed legs"
                );
                for mut reversed in done {
                    if let Err(e) = self.reinstate_leg(&mut reversed, transaction_id) {
                        tracing::error!(transaction_id = %transaction_id, error = %e, "reinstate failed");
                    }
                }
                return Err(err);
            }
            done.push(account);
        }

        Ok(TransactionReceipt {
            transaction_id,
            balances: done
                .iter()
                .map(|a| AccountBalance {
                    account_id: a.id_typed(),
                    balance: a.balance(),
                })
                .collect(),
        })
    }

    fn reinstate_leg(&self, account: &mut Account, transaction_id: TransactionId) -> EngineResult<()> {
        let account_id = account.id_typed();
        let events = account.handle(&AccountCommand::ReinstateTransaction(ReinstateTransaction {
            account_id,
            transaction_id,
            occurred_at: Utc::now(),
        }))?;
        self.dispatcher
            .commit(account_id.0, ACCOUNT_AGGREGATE, account, events)?;
        Ok(())
    }

    /// Put back a reversed transaction on every account it touched. Invoice
    /// payments are refused, as for [`undo_transaction`](Self::undo_transaction).
    pub fn reinstate_transaction(&self, transaction_id: TransactionId) -> EngineResult<()> {
        ensure_standalone(&self.posted(transaction_id)?)?;
        self.reinstate(transaction_id)
    }

    pub(crate) fn reinstate_invoice_posting(&self, transaction_id: TransactionId) -> EngineResult<()> {
        self.reinstate(transaction_id)
    }

    fn reinstate(&self, transaction_id: TransactionId) -> EngineResult<()> {
        let touched = self.touched_by(transaction_id)?;
        self.locks.with_locked(touched.clone(), || -> EngineResult<()> {
            for account_id in &touched {
                let mut account = self.account(*account_id)?;
                self.reinstate_leg(&mut account, transaction_id)?;
            }
            Ok(())
        })?
    }

    pub fn balance(&self, account_id: AccountId) -> EngineResult<Amount> {
        Ok(self.account(account_id)?.balance())
    }

    /// Balance at the end of business day `as_of` in the configured timezone.
    ///
    /// Reads without taking the account lock; a concurrent posting is either
    /// fully visible or not at all.
    pub fn balance_as_of(&self, account_id: AccountId, as_of: NaiveDate) -> EngineResult<Amount> {
        let account = self.account(account_id)?;
        Ok(account.balance_as_of(as_of, self.calendar.today(), &self.calendar))
    }

    /// Every posting on an account, undone ones included.
    pub fn transactions(&self, account_id: AccountId) -> EngineResult<Vec<TransactionRecord>> {
        Ok(self.account(account_id)?.postings().to_vec())
    }

    /// Every transaction in the ledger, once each (by its source leg).
    pub fn all_transactions(&self) -> EngineResult<Vec<TransactionRecord>> {
        let mut out = Vec::new();
        for account in self.accounts()? {
            out.extend(
                account
                    .postings()
                    .iter()
                    .filter(|r| r.leg == Leg::Source)
                    .cloned(),
            );
        }
        out.sort_by_key(|r| (r.transaction.date, r.transaction.id));
        Ok(out)
    }

    /// Live credits tied to an invoice on the given accounts.
    pub fn invoice_postings(
        &self,
        accounts: &[AccountId],
        invoice_number: &str,
    ) -> EngineResult<Vec<LedgerTransaction>> {
        let accounts: BTreeSet<AccountId> = accounts.iter().copied().collect();
        let mut out = Vec::new();
        for account_id in accounts {
            let account = self.account(account_id)?;
            out.extend(
                account
                    .postings()
                    .iter()
                    .filter(|r| r.leg == Leg::Source && !r.is_undone())
                    .filter(|r| r.transaction.invoice_number.as_deref() == Some(invoice_number))
                    .map(|r| r.transaction.clone()),
            );
        }
        Ok(out)
    }

    /// Distinct expense categories, cached for the configured TTL.
    pub fn categories(&self) -> EngineResult<Vec<String>> {
        self.categories.get_or_try_insert_with((), || {
            let mut categories: Vec<String> = self
                .all_transactions()?
                .into_iter()
                .filter_map(|r| r.transaction.category)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            categories.sort();
            Ok(categories)
        })
    }
}

fn ensure_standalone(tx: &LedgerTransaction) -> EngineResult<()> {
    match &tx.invoice_number {
        Some(number) => Err(DomainError::validation(format!(
            "transaction {} is a payment on invoice {number}; change the invoice's payments instead",
            tx.id
        ))
        .into()),
        None => Ok(()),
    }
}
