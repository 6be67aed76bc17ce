use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{Aggregate, AggregateRoot, Amount, DomainError, typed_id};
use shopledger_events::Event;
use shopledger_parties::CustomerId;

use crate::settlement::{InvoiceItem, InvoiceTotals, Payment, PaymentMethod, compute_totals};

typed_id!(
    /// Invoice identifier. The natural key is the invoice number.
    InvoiceId
);

/// Everything a caller supplies when saving an invoice.
///
/// Payments must already be normalized (see
/// [`normalize_payments`](crate::settlement::normalize_payments)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceContent {
    pub invoice_number: String,
    pub customer: Option<CustomerId>,
    pub items: Vec<InvoiceItem>,
    pub previous_due: Amount,
    pub discount: Amount,
    pub payments: Vec<Payment>,
    pub date: DateTime<Utc>,
}

impl InvoiceContent {
    pub fn new(invoice_number: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            invoice_number: invoice_number.into(),
            customer: None,
            items: Vec::new(),
            previous_due: 0,
            discount: 0,
            payments: Vec::new(),
            date,
        }
    }

    /// Validate and compute totals. Nothing is persisted on failure.
    pub fn settle(&self) -> Result<InvoiceTotals, DomainError> {
        if self.invoice_number.trim().is_empty() {
            return Err(DomainError::validation("invoice number cannot be empty"));
        }
        if self.customer.is_none() && !self.items.iter().any(InvoiceItem::is_filled) {
            return Err(DomainError::EmptyInvoice {
                invoice_number: self.invoice_number.clone(),
            });
        }
        for payment in &self.payments {
            payment.validate()?;
        }
        compute_totals(&self.items, self.previous_due, self.discount, &self.payments)
    }
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    content: Option<InvoiceContent>,
    totals: InvoiceTotals,
    revision: u32,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            content: None,
            totals: InvoiceTotals::default(),
            revision: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn content(&self) -> Option<&InvoiceContent> {
        self.content.as_ref()
    }

    pub fn invoice_number(&self) -> &str {
        self.content.as_ref().map_or("", |c| c.invoice_number.as_str())
    }

    pub fn customer(&self) -> Option<CustomerId> {
        self.content.as_ref().and_then(|c| c.customer)
    }

    pub fn items(&self) -> &[InvoiceItem] {
        self.content.as_ref().map_or(&[], |c| c.items.as_slice())
    }

    pub fn payments(&self) -> &[Payment] {
        self.content.as_ref().map_or(&[], |c| c.payments.as_slice())
    }

    pub fn previous_due(&self) -> Amount {
        self.content.as_ref().map_or(0, |c| c.previous_due)
    }

    pub fn totals(&self) -> InvoiceTotals {
        self.totals
    }

    pub fn due(&self) -> Amount {
        self.totals.due
    }

    pub fn payment_method(&self) -> PaymentMethod {
        PaymentMethod::of(self.payments())
    }

    /// This invoice's share of the customer's outstanding balance.
    pub fn contribution(&self) -> Amount {
        self.totals.contribution(self.previous_due())
    }

    /// Number of times the invoice has been saved (1 after creation).
    pub fn revision(&self) -> u32 {
        self.revision
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SaveInvoice (create or update in place).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveInvoice {
    pub invoice_id: InvoiceId,
    pub content: InvoiceContent,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IssueInvoice (create only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub invoice_id: InvoiceId,
    pub content: InvoiceContent,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    SaveInvoice(SaveInvoice),
    IssueInvoice(IssueInvoice),
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub invoice_id: InvoiceId,
    pub content: InvoiceContent,
    pub totals: InvoiceTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceRevised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRevised {
    pub invoice_id: InvoiceId,
    pub revision: u32,
    pub content: InvoiceContent,
    pub totals: InvoiceTotals,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceCreated(InvoiceCreated),
    InvoiceRevised(InvoiceRevised),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated(_) => "invoicing.invoice.created",
            InvoiceEvent::InvoiceRevised(_) => "invoicing.invoice.revised",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.occurred_at,
            InvoiceEvent::InvoiceRevised(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceCreated(e) => {
                self.id = e.invoice_id;
                self.content = Some(e.content.clone());
                self.totals = e.totals;
                self.revision = 1;
                self.created = true;
            }
            InvoiceEvent::InvoiceRevised(e) => {
                self.content = Some(e.content.clone());
                self.totals = e.totals;
                self.revision = e.revision;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::SaveInvoice(cmd) => self.handle_save(cmd),
            InvoiceCommand::IssueInvoice(cmd) => self.handle_issue(cmd),
        }
    }
}

impl Invoice {
    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.id != invoice_id {
            return Err(DomainError::validation("invoice_id mismatch"));
        }
        Ok(())
    }

    fn created_event(
        invoice_id: InvoiceId,
        content: &InvoiceContent,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        let totals = content.settle()?;
        Ok(vec![InvoiceEvent::InvoiceCreated(InvoiceCreated {
            invoice_id,
            content: content.clone(),
            totals,
            occurred_at,
        })])
    }

    fn handle_save(&self, cmd: &SaveInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_invoice_id(cmd.invoice_id)?;
        if !self.created {
            return Self::created_event(cmd.invoice_id, &cmd.content, cmd.occurred_at);
        }

        if cmd.content.invoice_number != self.invoice_number() {
            return Err(DomainError::validation(format!(
                "invoice {} cannot be renumbered to '{}'",
                self.invoice_number(),
                cmd.content.invoice_number
            )));
        }
        let totals = cmd.content.settle()?;
        if self.content.as_ref() == Some(&cmd.content) {
            return Ok(vec![]);
        }

        Ok(vec![InvoiceEvent::InvoiceRevised(InvoiceRevised {
            invoice_id: cmd.invoice_id,
            revision: self.revision + 1,
            content: cmd.content.clone(),
            totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_invoice_id(cmd.invoice_id)?;
        if self.created {
            return Err(DomainError::DuplicateInvoiceNumber {
                invoice_number: cmd.content.invoice_number.clone(),
            });
        }
        Self::created_event(cmd.invoice_id, &cmd.content, cmd.occurred_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopledger_accounting::AccountId;
    use shopledger_events::execute;

    fn content(number: &str) -> InvoiceContent {
        let mut content = InvoiceContent::new(number, Utc::now());
        content.items = vec![
            InvoiceItem::new(None, "rice 5kg", 2, 100).unwrap(),
            InvoiceItem::new(None, "oil 1l", 1, 50).unwrap(),
        ];
        content.previous_due = 30;
        content.discount = 10;
        content.payments = vec![Payment::new(AccountId::generate(), 150).with_fee(5)];
        content
    }

    fn save(invoice: &mut Invoice, content: InvoiceContent) -> Result<Vec<InvoiceEvent>, DomainError> {
        let cmd = InvoiceCommand::SaveInvoice(SaveInvoice {
            invoice_id: invoice.id_typed(),
            content,
            occurred_at: Utc::now(),
        });
        execute(invoice, &cmd)
    }

    #[test]
    fn first_save_creates_with_computed_totals() {
        let mut invoice = Invoice::empty(InvoiceId::generate());
        let events = save(&mut invoice, content("INV-1001")).unwrap();
        assert!(matches!(events[0], InvoiceEvent::InvoiceCreated(_)));
        assert_eq!(invoice.due(), 125);
        assert_eq!(invoice.contribution(), 95);
        assert_eq!(invoice.revision(), 1);
    }

    #[test]
    fn second_save_revises_in_place() {
        let mut invoice = Invoice::empty(InvoiceId::generate());
        save(&mut invoice, content("INV-1002")).unwrap();

        let mut edited = content("INV-1002");
        edited.discount = 0;
        let events = save(&mut invoice, edited).unwrap();
        match &events[0] {
            InvoiceEvent::InvoiceRevised(e) => assert_eq!(e.revision, 2),
            other => panic!("expected InvoiceRevised, got {other:?}"),
        }
        assert_eq!(invoice.due(), 135);
    }

    #[test]
    fn unchanged_save_emits_nothing() {
        let mut invoice = Invoice::empty(InvoiceId::generate());
        let original = content("INV-1003");
        save(&mut invoice, original.clone()).unwrap();
        assert!(save(&mut invoice, original).unwrap().is_empty());
        assert_eq!(invoice.version(), 1);
    }

    #[test]
    fn no_customer_and_no_items_is_empty() {
        let invoice = Invoice::empty(InvoiceId::generate());
        let mut blank = InvoiceContent::new("INV-1004", Utc::now());
        blank.items = vec![InvoiceItem::new(None, "", 0, 0).unwrap()];
        let err = invoice
            .handle(&InvoiceCommand::SaveInvoice(SaveInvoice {
                invoice_id: invoice.id_typed(),
                content: blank,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err.kind(), "empty_invoice");
    }

    #[test]
    fn customer_without_items_is_a_due_collection() {
        let mut invoice = Invoice::empty(InvoiceId::generate());
        let mut collection = InvoiceContent::new("INV-1005", Utc::now());
        collection.customer = Some(CustomerId::generate());
        collection.previous_due = 400;
        collection.payments = vec![Payment::new(AccountId::generate(), 400)];
        save(&mut invoice, collection).unwrap();
        assert_eq!(invoice.due(), 0);
        assert_eq!(invoice.contribution(), -400);
    }

    #[test]
    fn issuing_twice_is_a_duplicate() {
        let mut invoice = Invoice::empty(InvoiceId::generate());
        let cmd = InvoiceCommand::IssueInvoice(IssueInvoice {
            invoice_id: invoice.id_typed(),
            content: content("INV-1006"),
            occurred_at: Utc::now(),
        });
        execute(&mut invoice, &cmd).unwrap();
        let err = invoice.handle(&cmd).unwrap_err();
        assert_eq!(err.kind(), "duplicate_invoice_number");
    }

    #[test]
    fn renumbering_is_rejected() {
        let mut invoice = Invoice::empty(InvoiceId::generate());
        save(&mut invoice, content("INV-1007")).unwrap();
        let err = save(&mut invoice, content("INV-9999")).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(invoice.invoice_number(), "INV-1007");
    }
}
