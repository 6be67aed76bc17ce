//! Application services: each one serializes writes to its own key space and
//! drives the pure aggregates through the [`CommandDispatcher`](crate::command_dispatcher::CommandDispatcher).

pub mod catalog;
mod compensation;
pub mod customers;
pub mod invoices;
pub mod ledger;
pub mod lending;

pub use catalog::{EventSourcedCatalog, PRODUCT_AGGREGATE, ProductCatalog, ProductSummary};
pub use customers::{CUSTOMER_AGGREGATE, CustomerDirectory, EventSourcedCustomers};
pub use invoices::{INVOICE_AGGREGATE, InvoiceDraft, InvoiceService};
pub use ledger::{ACCOUNT_AGGREGATE, AccountBalance, LedgerService, TransactionReceipt};
pub use lending::{CHALLAN_AGGREGATE, ChallanDraft, LendingService, SettlementOutcome};
