//! Read-only consistency check of cached customer dues against history.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use shopledger_accounting::TransactionKind;
use shopledger_core::Amount;
use shopledger_events::{EventBus, EventEnvelope};
use shopledger_parties::CustomerId;

use crate::error::EngineResult;
use crate::event_store::EventStore;
use crate::services::{CustomerDirectory, InvoiceService, LedgerService};

/// A customer whose stored due disagrees with the one derived from history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueDiscrepancy {
    pub customer: CustomerId,
    pub name: String,
    pub stored_due: Amount,
    pub calculated_due: Amount,
    /// `stored_due - calculated_due`.
    pub difference: Amount,
}

/// Recomputes every customer's due as
/// `opening_due + sum(invoice contributions) - sum(due collections)`
/// and reports the customers whose stored due differs.
///
/// Due collections are live ledger credits tagged with the customer and no
/// invoice number; payments made on an invoice are already inside that
/// invoice's contribution. The auditor never writes.
pub struct LedgerAuditor<S, B> {
    invoices: Arc<InvoiceService<S, B>>,
    ledger: Arc<LedgerService<S, B>>,
    customers: Arc<dyn CustomerDirectory>,
}

impl<S, B> LedgerAuditor<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        invoices: Arc<InvoiceService<S, B>>,
        ledger: Arc<LedgerService<S, B>>,
        customers: Arc<dyn CustomerDirectory>,
    ) -> Self {
        Self {
            invoices,
            ledger,
            customers,
        }
    }

    pub fn find_discrepancies(&self) -> EngineResult<Vec<DueDiscrepancy>> {
        let mut derived: HashMap<CustomerId, Amount> = HashMap::new();

        for invoice in self.invoices.invoices()? {
            if let Some(customer) = invoice.customer() {
                *derived.entry(customer).or_insert(0) += invoice.contribution();
            }
        }

        for record in self.ledger.all_transactions()? {
            let tx = &record.transaction;
            if record.is_undone() || tx.kind != TransactionKind::Credit || tx.invoice_number.is_some() {
                continue;
            }
            if let Some(customer) = tx.customer {
                *derived.entry(customer).or_insert(0) -= tx.amount;
            }
        }

        let mut found = Vec::new();
        for customer in self.customers.customers()? {
            let id = customer.id_typed();
            let calculated_due = customer.opening_due() + derived.get(&id).copied().unwrap_or(0);
            if customer.due() == calculated_due {
                continue;
            }
            let discrepancy = DueDiscrepancy {
                customer: id,
                name: customer.name().to_string(),
                stored_due: customer.due(),
                calculated_due,
                difference: customer.due() - calculated_due,
            };
            tracing::warn!(
                customer_id = %id,
                stored_due = discrepancy.stored_due,
                calculated_due,
                difference = discrepancy.difference,
                "customer due does not match history"
            );
            found.push(discrepancy);
        }
        found.sort_by_key(|d| d.customer);
        Ok(found)
    }
}
