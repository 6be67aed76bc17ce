use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{
    Aggregate, AggregateRoot, Amount, BusinessCalendar, DomainError, typed_id,
};
use shopledger_events::Event;

use crate::history::{self, TransactionRecord};
use crate::transaction::{Leg, LedgerTransaction, ReversalReason, TransactionId};

typed_id!(
    /// Account identifier.
    AccountId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Bank,
    MobileMoney,
    Cash,
    Other,
}

/// Aggregate root: Account.
///
/// Holds the running balance together with every transaction posted to the
/// account. The balance always equals the sum of effects of the postings that
/// have not been reversed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AccountId,
    name: String,
    kind: AccountKind,
    balance: Amount,
    disabled: bool,
    postings: Vec<TransactionRecord>,
    version: u64,
    created: bool,
}

impl Account {
    /// Empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AccountId) -> Self {
        Self {
            id,
            name: String::new(),
            kind: AccountKind::Other,
            balance: 0,
            disabled: false,
            postings: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AccountKind {
        self.kind
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Postings in the order they were recorded.
    pub fn postings(&self) -> &[TransactionRecord] {
        &self.postings
    }

    pub fn posting(&self, transaction_id: TransactionId) -> Option<&TransactionRecord> {
        self.postings
            .iter()
            .find(|r| r.transaction.id == transaction_id)
    }

    /// Balance at the end of business day `as_of`.
    ///
    /// `today` is the current business date under `calendar`; asking for today
    /// or later returns the stored balance without replaying anything.
    pub fn balance_as_of(
        &self,
        as_of: NaiveDate,
        today: NaiveDate,
        calendar: &BusinessCalendar,
    ) -> Amount {
        if as_of >= today {
            return self.balance;
        }
        history::balance_as_of(self.id, self.balance, &self.postings, as_of, calendar)
    }
}

impl AggregateRoot for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub account_id: AccountId,
    pub name: String,
    pub kind: AccountKind,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RenameAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameAccount {
    pub account_id: AccountId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DisableAccount. Accounts with history are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisableAccount {
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostTransaction (one leg of a transaction onto this account).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostTransaction {
    pub account_id: AccountId,
    pub transaction: LedgerTransaction,
    pub leg: Leg,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReverseTransaction (compensate a previously posted leg).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseTransaction {
    pub account_id: AccountId,
    pub transaction_id: TransactionId,
    pub reason: ReversalReason,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReinstateTransaction (undo a reversal that could not be
/// completed on every leg).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReinstateTransaction {
    pub account_id: AccountId,
    pub transaction_id: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountCommand {
    OpenAccount(OpenAccount),
    RenameAccount(RenameAccount),
    DisableAccount(DisableAccount),
    PostTransaction(PostTransaction),
    ReverseTransaction(ReverseTransaction),
    ReinstateTransaction(ReinstateTransaction),
}

/// Event: AccountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub account_id: AccountId,
    pub name: String,
    pub kind: AccountKind,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AccountRenamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRenamed {
    pub account_id: AccountId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AccountDisabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDisabled {
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransactionPosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPosted {
    pub account_id: AccountId,
    pub transaction: LedgerTransaction,
    pub leg: Leg,
    /// Signed change applied to this account's balance.
    pub effect: Amount,
    pub balance_after: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransactionReversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReversed {
    pub account_id: AccountId,
    pub transaction_id: TransactionId,
    pub reason: ReversalReason,
    /// Signed change applied to this account's balance (the inverse effect).
    pub effect: Amount,
    pub balance_after: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransactionReinstated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReinstated {
    pub account_id: AccountId,
    pub transaction_id: TransactionId,
    pub effect: Amount,
    pub balance_after: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    AccountOpened(AccountOpened),
    AccountRenamed(AccountRenamed),
    AccountDisabled(AccountDisabled),
    TransactionPosted(TransactionPosted),
    TransactionReversed(TransactionReversed),
    TransactionReinstated(TransactionReinstated),
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountOpened(_) => "accounting.account.opened",
            AccountEvent::AccountRenamed(_) => "accounting.account.renamed",
            AccountEvent::AccountDisabled(_) => "accounting.account.disabled",
            AccountEvent::TransactionPosted(_) => "accounting.account.transaction_posted",
            AccountEvent::TransactionReversed(_) => "accounting.account.transaction_reversed",
            AccountEvent::TransactionReinstated(_) => "accounting.account.transaction_reinstated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::AccountOpened(e) => e.occurred_at,
            AccountEvent::AccountRenamed(e) => e.occurred_at,
            AccountEvent::AccountDisabled(e) => e.occurred_at,
            AccountEvent::TransactionPosted(e) => e.occurred_at,
            AccountEvent::TransactionReversed(e) => e.occurred_at,
            AccountEvent::TransactionReinstated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Account {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountEvent::AccountOpened(e) => {
                self.id = e.account_id;
                self.name = e.name.clone();
                self.kind = e.kind;
                self.created = true;
            }
            AccountEvent::AccountRenamed(e) => {
                self.name = e.name.clone();
            }
            AccountEvent::AccountDisabled(_) => {
                self.disabled = true;
            }
            AccountEvent::TransactionPosted(e) => {
                self.postings.push(TransactionRecord {
                    transaction: e.transaction.clone(),
                    leg: e.leg,
                    reversal: None,
                });
                self.balance = e.balance_after;
            }
            AccountEvent::TransactionReversed(e) => {
                if let Some(record) = self
                    .postings
                    .iter_mut()
                    .find(|r| r.transaction.id == e.transaction_id)
                {
                    record.reversal = Some(e.reason);
                }
                self.balance = e.balance_after;
            }
            AccountEvent::TransactionReinstated(e) => {
                if let Some(record) = self
                    .postings
                    .iter_mut()
                    .find(|r| r.transaction.id == e.transaction_id)
                {
                    record.reversal = None;
                }
                self.balance = e.balance_after;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AccountCommand::OpenAccount(cmd) => self.handle_open(cmd),
            AccountCommand::RenameAccount(cmd) => self.handle_rename(cmd),
            AccountCommand::DisableAccount(cmd) => self.handle_disable(cmd),
            AccountCommand::PostTransaction(cmd) => self.handle_post(cmd),
            AccountCommand::ReverseTransaction(cmd) => self.handle_reverse(cmd),
            AccountCommand::ReinstateTransaction(cmd) => self.handle_reinstate(cmd),
        }
    }
}

impl Account {
    fn ensure_exists(&self, account_id: AccountId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("account {account_id}")));
        }
        if self.id != account_id {
            return Err(DomainError::validation("account_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenAccount) -> Result<Vec<AccountEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "account {} already exists",
                cmd.account_id
            )));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("account name cannot be empty"));
        }

        Ok(vec![AccountEvent::AccountOpened(AccountOpened {
            account_id: cmd.account_id,
            name: cmd.name.trim().to_string(),
            kind: cmd.kind,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_rename(&self, cmd: &RenameAccount) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;
        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("account name cannot be empty"));
        }
        if name == self.name {
            return Ok(vec![]);
        }

        Ok(vec![AccountEvent::AccountRenamed(AccountRenamed {
            account_id: cmd.account_id,
            name: name.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_disable(&self, cmd: &DisableAccount) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;
        if self.disabled {
            return Ok(vec![]);
        }

        Ok(vec![AccountEvent::AccountDisabled(AccountDisabled {
            account_id: cmd.account_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(&self, cmd: &PostTransaction) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;
        if self.disabled {
            return Err(DomainError::AccountDisabled {
                account: cmd.account_id.to_string(),
            });
        }

        let tx = &cmd.transaction;
        tx.validate()?;

        let leg_matches = match cmd.leg {
            Leg::Source => tx.account == self.id,
            Leg::Destination => tx.to_account == Some(self.id),
        };
        if !leg_matches {
            return Err(DomainError::validation(format!(
                "transaction {} has no {:?} leg on account {}",
                tx.id, cmd.leg, self.id
            )));
        }
        if self.posting(tx.id).is_some() {
            return Err(DomainError::conflict(format!(
                "transaction {} is already posted to account {}",
                tx.id, self.id
            )));
        }

        let effect = tx.effect_on(self.id);
        let balance_after = self.balance.checked_add(effect).ok_or_else(|| {
            DomainError::validation(format!("balance of account {} overflows", self.id))
        })?;

        Ok(vec![AccountEvent::TransactionPosted(TransactionPosted {
            account_id: cmd.account_id,
            transaction: tx.clone(),
            leg: cmd.leg,
            effect,
            balance_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn find_posting(&self, transaction_id: TransactionId) -> Result<&TransactionRecord, DomainError> {
        self.posting(transaction_id).ok_or_else(|| {
            DomainError::not_found(format!("transaction {transaction_id} on account {}", self.id))
        })
    }

    fn handle_reverse(&self, cmd: &ReverseTransaction) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;

        let record = self.find_posting(cmd.transaction_id)?;
        if record.is_undone() {
            return Err(DomainError::already_undone(cmd.transaction_id.to_string()));
        }

        let effect = -record.transaction.effect_on(self.id);
        let balance_after = self.balance.checked_add(effect).ok_or_else(|| {
            DomainError::validation(format!("balance of account {} overflows", self.id))
        })?;

        Ok(vec![AccountEvent::TransactionReversed(TransactionReversed {
            account_id: cmd.account_id,
            transaction_id: cmd.transaction_id,
            reason: cmd.reason,
            effect,
            balance_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reinstate(
        &self,
        cmd: &ReinstateTransaction,
    ) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;

        let record = self.find_posting(cmd.transaction_id)?;
        if !record.is_undone() {
            return Err(DomainError::conflict(format!(
                "transaction {} is not reversed on account {}",
                cmd.transaction_id, self.id
            )));
        }

        let effect = record.transaction.effect_on(self.id);
        let balance_after = self.balance.checked_add(effect).ok_or_else(|| {
            DomainError::validation(format!("balance of account {} overflows", self.id))
        })?;

        Ok(vec![AccountEvent::TransactionReinstated(TransactionReinstated {
            account_id: cmd.account_id,
            transaction_id: cmd.transaction_id,
            effect,
            balance_after,
            occurred_at: cmd.occurred_at,
        })])
    }
}
