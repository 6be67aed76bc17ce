//! Transaction history queries over an account's postings.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use shopledger_core::{Amount, BusinessCalendar};

use crate::account::AccountId;
use crate::transaction::{Leg, LedgerTransaction, ReversalReason};

/// A transaction as seen from one account, plus its reversal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction: LedgerTransaction,
    pub leg: Leg,
    pub reversal: Option<ReversalReason>,
}

impl TransactionRecord {
    pub fn is_undone(&self) -> bool {
        self.reversal.is_some()
    }
}

/// Sum of the effects of all live (not undone) postings on `account`.
pub fn fold_balance(account: AccountId, records: &[TransactionRecord]) -> Amount {
    records
        .iter()
        .filter(|r| !r.is_undone())
        .map(|r| r.transaction.effect_on(account))
        .sum()
}

/// Rewind `current_balance` to the end of business day `as_of`.
///
/// Every live posting whose business date is strictly after `as_of` has its
/// effect removed. Undone postings are skipped since their effect is already
/// absent from the current balance.
pub fn balance_as_of(
    account: AccountId,
    current_balance: Amount,
    records: &[TransactionRecord],
    as_of: NaiveDate,
    calendar: &BusinessCalendar,
) -> Amount {
    records
        .iter()
        .filter(|r| !r.is_undone())
        .filter(|r| calendar.date_of(r.transaction.date) > as_of)
        .fold(current_balance, |balance, r| {
            balance - r.transaction.effect_on(account)
        })
}
