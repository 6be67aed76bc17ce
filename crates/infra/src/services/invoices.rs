//! Invoice settlement: one save moves stock, the ledger and the customer's
//! due together, or none of them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use shopledger_accounting::{AccountId, LedgerTransaction};
use shopledger_core::{Aggregate, Amount, DomainError};
use shopledger_events::{EventBus, EventEnvelope};
use shopledger_invoicing::{
    Invoice, InvoiceCommand, InvoiceContent, InvoiceId, InvoiceItem, IssueInvoice, Payment,
    SaveInvoice, normalize_payments, stock_demand,
};
use shopledger_parties::CustomerId;
use shopledger_products::{ProductId, StockMovementReason};

use crate::command_dispatcher::CommandDispatcher;
use crate::error::EngineResult;
use crate::event_store::EventStore;
use crate::locks::KeyedLocks;
use crate::read_model::{InMemoryKeyIndex, KeyIndex};
use crate::services::catalog::ProductCatalog;
use crate::services::compensation::UndoLog;
use crate::services::customers::CustomerDirectory;
use crate::services::ledger::{LedgerService, TransactionReceipt};

pub const INVOICE_AGGREGATE: &str = "invoicing.invoice";

/// Invoice as submitted by a caller, before payment normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDraft {
    pub invoice_number: String,
    pub customer: Option<CustomerId>,
    pub items: Vec<InvoiceItem>,
    pub previous_due: Amount,
    pub discount: Amount,
    pub payments: Vec<Payment>,
    /// Older clients send a single paid amount instead of a payment list.
    pub legacy_paid: Option<Amount>,
    /// Account for `legacy_paid`; the configured default account otherwise.
    pub selected_account: Option<AccountId>,
    pub date: DateTime<Utc>,
}

impl InvoiceDraft {
    pub fn new(invoice_number: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            invoice_number: invoice_number.into(),
            customer: None,
            items: Vec::new(),
            previous_due: 0,
            discount: 0,
            payments: Vec::new(),
            legacy_paid: None,
            selected_account: None,
            date,
        }
    }

    pub fn for_customer(mut self, customer: CustomerId, previous_due: Amount) -> Self {
        self.customer = Some(customer);
        self.previous_due = previous_due;
        self
    }

    pub fn with_item(mut self, item: InvoiceItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_discount(mut self, discount: Amount) -> Self {
        self.discount = discount;
        self
    }

    pub fn with_payment(mut self, payment: Payment) -> Self {
        self.payments.push(payment);
        self
    }

    /// Start a draft from a saved invoice, for editing.
    pub fn from_invoice(invoice: &Invoice) -> Option<Self> {
        let content = invoice.content()?;
        Some(Self {
            invoice_number: content.invoice_number.clone(),
            customer: content.customer,
            items: content.items.clone(),
            previous_due: content.previous_due,
            discount: content.discount,
            payments: content.payments.clone(),
            legacy_paid: None,
            selected_account: None,
            date: content.date,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveMode {
    Upsert,
    CreateOnly,
}

pub struct InvoiceService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    ledger: Arc<LedgerService<S, B>>,
    catalog: Arc<dyn ProductCatalog>,
    customers: Arc<dyn CustomerDirectory>,
    numbers: InMemoryKeyIndex<String, InvoiceId>,
    locks: KeyedLocks<String>,
    default_account: Option<AccountId>,
}

impl<S, B> InvoiceService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        ledger: Arc<LedgerService<S, B>>,
        catalog: Arc<dyn ProductCatalog>,
        customers: Arc<dyn CustomerDirectory>,
        default_account: Option<AccountId>,
    ) -> Self {
        Self {
            dispatcher,
            ledger,
            catalog,
            customers,
            numbers: InMemoryKeyIndex::new(),
            locks: KeyedLocks::new(),
            default_account,
        }
    }

    fn load(&self, invoice_id: InvoiceId) -> EngineResult<Invoice> {
        self.dispatcher
            .load(invoice_id.0, |_| Invoice::empty(invoice_id))
    }

    fn lookup(&self, invoice_number: &str) -> EngineResult<Option<InvoiceId>> {
        if let Some(id) = self.numbers.get(&invoice_number.to_string()) {
            return Ok(Some(id));
        }
        for invoice in self.invoices()? {
            if invoice.invoice_number() == invoice_number {
                self.numbers
                    .upsert(invoice_number.to_string(), invoice.id_typed());
                return Ok(Some(invoice.id_typed()));
            }
        }
        Ok(None)
    }

    pub fn invoice(&self, invoice_number: &str) -> EngineResult<Option<Invoice>> {
        match self.lookup(invoice_number.trim())? {
            Some(id) => Ok(Some(self.load(id)?)),
            None => Ok(None),
        }
    }

    pub fn invoices(&self) -> EngineResult<Vec<Invoice>> {
        let mut out = Vec::new();
        for id in self.dispatcher.stream_ids(INVOICE_AGGREGATE)? {
            let invoice = self.load(InvoiceId::new(id))?;
            if invoice.is_created() {
                out.push(invoice);
            }
        }
        Ok(out)
    }

    pub fn invoices_for_customer(&self, customer: CustomerId) -> EngineResult<Vec<Invoice>> {
        Ok(self
            .invoices()?
            .into_iter()
            .filter(|i| i.customer() == Some(customer))
            .collect())
    }

    /// Create or revise the invoice with `draft.invoice_number`.
    pub fn save(&self, draft: InvoiceDraft) -> EngineResult<Invoice> {
        self.persist(draft, SaveMode::Upsert)
    }

    /// Create a new invoice. An existing number fails with
    /// `DuplicateInvoiceNumber`.
    pub fn issue(&self, draft: InvoiceDraft) -> EngineResult<Invoice> {
        self.persist(draft, SaveMode::CreateOnly)
    }

    fn persist(&self, draft: InvoiceDraft, mode: SaveMode) -> EngineResult<Invoice> {
        let number = draft.invoice_number.trim().to_string();
        self.locks.with_locked([number.clone()], || -> EngineResult<Invoice> {
            let payments = normalize_payments(
                draft.payments,
                draft.legacy_paid,
                draft.selected_account.or(self.default_account),
            )?;
            let content = InvoiceContent {
                invoice_number: number.clone(),
                customer: draft.customer,
                items: draft.items,
                previous_due: draft.previous_due,
                discount: draft.discount,
                payments,
                date: draft.date,
            };

            let existing = self.lookup(&number)?;
            if mode == SaveMode::CreateOnly && existing.is_some() {
                return Err(DomainError::DuplicateInvoiceNumber {
                    invoice_number: number.clone(),
                }
                .into());
            }
            let invoice = self.load(existing.unwrap_or_else(InvoiceId::generate))?;
            self.write(invoice, content, mode)
        })?
    }

    /// Add lines to the invoice `invoice_number`, creating it for `customer`
    /// when it does not exist yet.
    pub fn append_items(
        &self,
        invoice_number: &str,
        customer: Option<CustomerId>,
        items: Vec<InvoiceItem>,
        date: DateTime<Utc>,
    ) -> EngineResult<Invoice> {
        let number = invoice_number.trim().to_string();
        self.locks.with_locked([number.clone()], || -> EngineResult<Invoice> {
            match self.lookup(&number)? {
                Some(id) => {
                    let invoice = self.load(id)?;
                    let mut content = invoice
                        .content()
                        .cloned()
                        .ok_or_else(|| DomainError::not_found(format!("invoice {number}")))?;
                    if let (Some(existing), Some(requested)) = (content.customer, customer) {
                        if existing != requested {
                            return Err(DomainError::validation(format!(
                                "invoice {number} belongs to another customer"
                            ))
                            .into());
                        }
                    }
                    content.customer = content.customer.or(customer);
                    content.items.extend(items);
                    self.write(invoice, content, SaveMode::Upsert)
                }
                None => {
                    let mut content = InvoiceContent::new(number.clone(), date);
                    if let Some(c) = customer {
                        content.previous_due = self.customers.get_due(c)?;
                    }
                    content.customer = customer;
                    content.items = items;
                    let invoice = self.load(InvoiceId::generate())?;
                    self.write(invoice, content, SaveMode::CreateOnly)
                }
            }
        })?
    }

    fn write(&self, mut invoice: Invoice, content: InvoiceContent, mode: SaveMode) -> EngineResult<Invoice> {
        let invoice_id = invoice.id_typed();
        let occurred_at = Utc::now();
        let command = match mode {
            SaveMode::Upsert => InvoiceCommand::SaveInvoice(SaveInvoice {
                invoice_id,
                content: content.clone(),
                occurred_at,
            }),
            SaveMode::CreateOnly => InvoiceCommand::IssueInvoice(IssueInvoice {
                invoice_id,
                content: content.clone(),
                occurred_at,
            }),
        };
        let decided = invoice.handle(&command)?;
        if decided.is_empty() {
            tracing::debug!(invoice_number = %content.invoice_number, "invoice unchanged");
            return Ok(invoice);
        }
        if let Some(customer) = content.customer {
            self.customers.get_customer(customer)?;
        }

        let totals = content.settle()?;
        let previous = invoice.content().cloned();
        let before = previous.as_ref().map(|p| (p.customer, invoice.contribution()));

        let mut undo = UndoLog::new();
        let outcome = self
            .apply_effects(&mut undo, previous.as_ref(), before, &content, totals.contribution(content.previous_due))
            .and_then(|()| {
                self.dispatcher
                    .commit(invoice_id.0, INVOICE_AGGREGATE, &mut invoice, decided)
                    .map(|_| ())
            });
        if let Err(err) = outcome {
            tracing::warn!(
                invoice_number = %content.invoice_number,
                error = %err,
                "invoice save failed; compensating"
            );
            undo.unwind();
            return Err(err);
        }

        self.numbers
            .upsert(content.invoice_number.clone(), invoice_id);
        tracing::info!(
            invoice_number = %content.invoice_number,
            revision = invoice.revision(),
            grand_total = totals.grand_total,
            due = totals.due,
            "invoice saved"
        );
        Ok(invoice)
    }

    /// Stock, then ledger, then customer due. Every committed step pushes its
    /// inverse onto `undo`.
    fn apply_effects<'a>(
        &'a self,
        undo: &mut UndoLog<'a>,
        previous: Option<&InvoiceContent>,
        before: Option<(Option<CustomerId>, Amount)>,
        content: &InvoiceContent,
        contribution: Amount,
    ) -> EngineResult<()> {
        let old_demand = previous.map(|p| stock_demand(&p.items)).unwrap_or_default();
        let new_demand = stock_demand(&content.items);
        let products: BTreeSet<ProductId> = old_demand.keys().chain(new_demand.keys()).copied().collect();
        for product in products {
            let delta = new_demand.get(&product).copied().unwrap_or(0)
                - old_demand.get(&product).copied().unwrap_or(0);
            if delta == 0 {
                continue;
            }
            self.catalog
                .adjust_stock(product, -delta, StockMovementReason::InvoiceSale)?;
            undo.push(format!("stock of {product}"), move || {
                self.catalog
                    .adjust_stock(product, delta, StockMovementReason::Rollback)
                    .map(|_| ())
            });
        }

        let old_payments = previous.map(|p| p.payments.as_slice()).unwrap_or(&[]);
        if old_payments != content.payments.as_slice() {
            let accounts: Vec<AccountId> = old_payments.iter().map(|p| p.account_id).collect();
            for tx in self
                .ledger
                .invoice_postings(&accounts, &content.invoice_number)?
            {
                self.ledger.undo_invoice_posting(tx.id)?;
                undo.push(format!("reinstate {}", tx.id), move || {
                    self.ledger.reinstate_invoice_posting(tx.id)
                });
            }

            for payment in &content.payments {
                let net = payment.net();
                if net == 0 {
                    continue;
                }
                let mut tx = LedgerTransaction::credit(
                    payment.account_id,
                    net,
                    format!("Invoice {}", content.invoice_number),
                )
                .dated(content.date)
                .for_invoice(content.invoice_number.clone());
                if let Some(customer) = content.customer {
                    tx = tx.from_customer(customer);
                }
                let tx_id = tx.id;
                self.ledger.apply_transaction(tx)?;
                undo.push(format!("roll back {tx_id}"), move || {
                    self.ledger.rollback_transaction(tx_id).map(|_| ())
                });
            }
        }

        let mut due_moves: BTreeMap<CustomerId, Amount> = BTreeMap::new();
        if let Some((Some(customer), old_contribution)) = before {
            *due_moves.entry(customer).or_insert(0) -= old_contribution;
        }
        if let Some(customer) = content.customer {
            *due_moves.entry(customer).or_insert(0) += contribution;
        }
        for (customer, delta) in due_moves {
            if delta == 0 {
                continue;
            }
            self.customers.adjust_due(customer, delta)?;
            undo.push(format!("due of {customer}"), move || {
                self.customers.adjust_due(customer, -delta).map(|_| ())
            });
        }
        Ok(())
    }

    /// Record a payment against a customer's outstanding due, outside any
    /// invoice.
    pub fn record_due_payment(
        &self,
        customer: CustomerId,
        payment: Payment,
        date: DateTime<Utc>,
    ) -> EngineResult<TransactionReceipt> {
        payment.validate()?;
        let net = payment.net();
        if net <= 0 {
            return Err(DomainError::validation(format!(
                "payment of {} to account {} leaves nothing after the fee of {}",
                payment.amount, payment.account_id, payment.fee
            ))
            .into());
        }
        self.customers.get_customer(customer)?;

        let tx = LedgerTransaction::credit(payment.account_id, net, "Due collection")
            .dated(date)
            .from_customer(customer);
        let tx_id = tx.id;
        let receipt = self.ledger.apply_transaction(tx)?;

        if let Err(err) = self.customers.adjust_due(customer, -net) {
            tracing::warn!(customer_id = %customer, error = %err, "due update failed; rolling back collection");
            if let Err(e) = self.ledger.rollback_transaction(tx_id) {
                tracing::error!(transaction_id = %tx_id, error = %e, "collection rollback failed");
            }
            return Err(err);
        }
        tracing::info!(customer_id = %customer, amount = net, "due collected");
        Ok(receipt)
    }
}
