//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only (validation, invariants, conflicts).
/// Every variant names the offending entity so callers can surface it as-is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A quantity was negative (or zero) where that is not allowed.
    #[error("invalid quantity for {entity}: {reason}")]
    InvalidQuantity { entity: String, reason: String },

    /// Self-transfer, missing destination, or a malformed transfer.
    #[error("invalid transfer {transaction}: {reason}")]
    InvalidTransfer { transaction: String, reason: String },

    /// The transaction has already been reversed.
    #[error("transaction {transaction} is already undone")]
    AlreadyUndone { transaction: String },

    /// A settlement asked for more than what is still unresolved on an item.
    #[error(
        "over-settlement on {document} line {line_no}: requested {requested}, remaining {remaining}"
    )]
    OverSettlement {
        document: String,
        line_no: u32,
        requested: i64,
        remaining: i64,
    },

    /// Nothing to invoice: no customer and no filled line item.
    #[error("invoice {invoice_number} has no customer and no line items")]
    EmptyInvoice { invoice_number: String },

    /// Create-only path hit an existing invoice number.
    #[error("invoice number {invoice_number} already exists")]
    DuplicateInvoiceNumber { invoice_number: String },

    /// Optimistic concurrency check failed.
    #[error("stale write on {entity}: {detail}")]
    StaleWrite { entity: String, detail: String },

    /// A stock decrement would take on-hand quantity below zero.
    ///
    /// Engine policy rather than a settlement rule: on-hand stock is kept
    /// non-negative, so sales, lending and manual adjustments past zero are
    /// refused.
    #[error("insufficient stock for product {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// Soft-disabled accounts accept no new postings.
    #[error("account {account} is disabled")]
    AccountDisabled { account: String },

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested entity was not found.
    #[error("{entity} not found")]
    NotFound { entity: String },

    /// The entity already exists or is in a state that forbids the command.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn invalid_quantity(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_transfer(transaction: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTransfer {
            transaction: transaction.into(),
            reason: reason.into(),
        }
    }

    pub fn already_undone(transaction: impl Into<String>) -> Self {
        Self::AlreadyUndone {
            transaction: transaction.into(),
        }
    }

    pub fn stale_write(entity: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::StaleWrite {
            entity: entity.into(),
            detail: detail.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    /// Stable, machine-readable error kind for the transport/UI layer.
    ///
    /// `insufficient_stock` comes from the engine's non-negative stock policy,
    /// not from a settlement rule.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::InvalidQuantity { .. } => "invalid_quantity",
            DomainError::InvalidTransfer { .. } => "invalid_transfer",
            DomainError::AlreadyUndone { .. } => "already_undone",
            DomainError::OverSettlement { .. } => "over_settlement",
            DomainError::EmptyInvoice { .. } => "empty_invoice",
            DomainError::DuplicateInvoiceNumber { .. } => "duplicate_invoice_number",
            DomainError::StaleWrite { .. } => "stale_write",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::AccountDisabled { .. } => "account_disabled",
            DomainError::Validation(_) => "validation",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::NotFound { .. } => "not_found",
            DomainError::Conflict(_) => "conflict",
        }
    }
}
