use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{Amount, DomainError, typed_id};
use shopledger_parties::CustomerId;

use crate::account::AccountId;

typed_id!(
    /// Ledger transaction identifier.
    TransactionId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
    Transfer,
}

/// Which side of a transaction an account stream holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    /// The owning account (`LedgerTransaction::account`).
    Source,
    /// The receiving account of a transfer.
    Destination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReversalReason {
    /// A user undid the transaction.
    Undo,
    /// The second leg of a transfer failed and the first was compensated.
    Rollback,
}

/// A money movement recorded against one account (or two, for transfers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    /// Owning account; the source of a transfer.
    pub account: AccountId,
    /// Always positive.
    pub amount: Amount,
    pub to_account: Option<AccountId>,
    /// Leaves the system entirely; never credited to either side.
    #[serde(default)]
    pub transfer_fee: Amount,
    pub category: Option<String>,
    pub description: String,
    /// Authoritative business timestamp (may be back-dated).
    pub date: DateTime<Utc>,
    /// Customer the money came from, when it is a due collection.
    pub customer: Option<CustomerId>,
    /// Invoice this payment belongs to.
    pub invoice_number: Option<String>,
}

impl LedgerTransaction {
    pub fn credit(account: AccountId, amount: Amount, description: impl Into<String>) -> Self {
        Self::base(TransactionKind::Credit, account, amount, description)
    }

    pub fn debit(account: AccountId, amount: Amount, description: impl Into<String>) -> Self {
        Self::base(TransactionKind::Debit, account, amount, description)
    }

    pub fn transfer(
        from: AccountId,
        to: AccountId,
        amount: Amount,
        fee: Amount,
        description: impl Into<String>,
    ) -> Self {
        let mut tx = Self::base(TransactionKind::Transfer, from, amount, description);
        tx.to_account = Some(to);
        tx.transfer_fee = fee;
        tx
    }

    fn base(
        kind: TransactionKind,
        account: AccountId,
        amount: Amount,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            kind,
            account,
            amount,
            to_account: None,
            transfer_fee: 0,
            category: None,
            description: description.into(),
            date: Utc::now(),
            customer: None,
            invoice_number: None,
        }
    }

    pub fn dated(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn from_customer(mut self, customer: CustomerId) -> Self {
        self.customer = Some(customer);
        self
    }

    pub fn for_invoice(mut self, invoice_number: impl Into<String>) -> Self {
        self.invoice_number = Some(invoice_number.into());
        self
    }

    /// Accounts whose balance this transaction moves.
    pub fn touched_accounts(&self) -> Vec<AccountId> {
        match self.to_account {
            Some(to) if self.kind == TransactionKind::Transfer => vec![self.account, to],
            _ => vec![self.account],
        }
    }

    /// Signed balance effect on `account`; zero when it is not involved.
    pub fn effect_on(&self, account: AccountId) -> Amount {
        match self.kind {
            TransactionKind::Credit if self.account == account => self.amount,
            TransactionKind::Debit if self.account == account => -self.amount,
            TransactionKind::Transfer if self.account == account => {
                -(self.amount + self.transfer_fee)
            }
            TransactionKind::Transfer if self.to_account == Some(account) => self.amount,
            _ => 0,
        }
    }

    /// Shape checks that need no account state.
    pub fn validate(&self) -> Result<(), DomainError> {
        let entity = format!("transaction {}", self.id);
        if self.amount <= 0 {
            return Err(DomainError::validation(format!(
                "{entity}: amount must be positive"
            )));
        }

        match self.kind {
            TransactionKind::Transfer => {
                let Some(to) = self.to_account else {
                    return Err(DomainError::invalid_transfer(
                        self.id.to_string(),
                        "destination account is not set",
                    ));
                };
                if to == self.account {
                    return Err(DomainError::invalid_transfer(
                        self.id.to_string(),
                        format!("source and destination are the same account {to}"),
                    ));
                }
                if self.transfer_fee < 0 {
                    return Err(DomainError::invalid_transfer(
                        self.id.to_string(),
                        "transfer fee cannot be negative",
                    ));
                }
                if self.amount.checked_add(self.transfer_fee).is_none() {
                    return Err(DomainError::invalid_transfer(
                        self.id.to_string(),
                        "amount plus fee overflows",
                    ));
                }
            }
            TransactionKind::Credit | TransactionKind::Debit => {
                if self.to_account.is_some() {
                    return Err(DomainError::validation(format!(
                        "{entity}: only transfers have a destination account"
                    )));
                }
                if self.transfer_fee != 0 {
                    return Err(DomainError::validation(format!(
                        "{entity}: only transfers carry a fee"
                    )));
                }
            }
        }

        if self.category.is_some() && self.kind != TransactionKind::Debit {
            return Err(DomainError::validation(format!(
                "{entity}: only debits are categorised"
            )));
        }

        Ok(())
    }
}
