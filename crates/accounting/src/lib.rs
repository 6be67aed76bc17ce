//! Account ledger (event-sourced, single ledger per account).
//!
//! Pure domain logic only: no IO, no persistence. Each account is its own
//! append-only stream; a transfer posts one leg to each of the two accounts
//! involved and an undo appends a compensating reversal to each stream the
//! transaction touched.

pub mod account;
pub mod history;
pub mod transaction;

pub use account::{
    Account, AccountCommand, AccountDisabled, AccountEvent, AccountId, AccountKind, AccountOpened,
    AccountRenamed, DisableAccount, OpenAccount, PostTransaction, ReinstateTransaction,
    RenameAccount, ReverseTransaction, TransactionPosted, TransactionReinstated,
    TransactionReversed,
};
pub use history::{TransactionRecord, balance_as_of, fold_balance};
pub use transaction::{Leg, LedgerTransaction, ReversalReason, TransactionId, TransactionKind};
