//! Invoicing domain module (event-sourced).
//!
//! Invoice arithmetic lives in [`settlement`] as pure functions; the
//! [`Invoice`] aggregate records each saved revision together with the totals
//! computed for it. Invoices are keyed by their caller-supplied number.

pub mod invoice;
pub mod settlement;

pub use invoice::{
    Invoice, InvoiceCommand, InvoiceContent, InvoiceCreated, InvoiceEvent, InvoiceId,
    InvoiceRevised, IssueInvoice, SaveInvoice,
};
pub use settlement::{
    InvoiceItem, InvoiceTotals, Payment, PaymentMethod, compute_totals, normalize_payments,
    stock_demand,
};
