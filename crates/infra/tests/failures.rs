//! Ledger and invoice behavior when the store or the bus refuses a write
//! partway through an operation.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value as JsonValue;

use shopledger_accounting::{AccountId, AccountKind, LedgerTransaction, ReversalReason};
use shopledger_core::{AggregateId, ExpectedVersion};
use shopledger_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use shopledger_infra::event_store::{
    EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent,
};
use shopledger_infra::services::{CustomerDirectory, InvoiceDraft, ProductCatalog};
use shopledger_infra::{Engine, EngineConfig, MemoryBus};
use shopledger_invoicing::{InvoiceItem, Payment};

/// In-memory store that reports a concurrent writer on one chosen stream.
#[derive(Default)]
struct ContendedStore {
    inner: InMemoryEventStore,
    contended: Mutex<Option<AggregateId>>,
}

impl ContendedStore {
    fn contend(&self, stream: AggregateId) {
        *self.contended.lock().unwrap() = Some(stream);
    }

    fn release(&self) {
        *self.contended.lock().unwrap() = None;
    }
}

impl EventStore for ContendedStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let contended = *self.contended.lock().unwrap();
        if let Some(stream) = contended {
            if events.iter().any(|e| e.aggregate_id == stream) {
                return Err(EventStoreError::Concurrency {
                    stream,
                    detail: format!("expected {expected_version:?}, another writer got there first"),
                });
            }
        }
        self.inner.append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_stream(aggregate_id)
    }

    fn stream_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, EventStoreError> {
        self.inner.stream_ids(aggregate_type)
    }
}

/// Bus whose transport is down: every publish fails.
struct ClosedBus;

impl EventBus<EventEnvelope<JsonValue>> for ClosedBus {
    type Error = &'static str;

    fn publish(&self, _message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        Err("transport closed")
    }

    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        let (_tx, rx) = std::sync::mpsc::channel();
        Subscription::new(rx)
    }
}

type ContendedEngine = Engine<Arc<ContendedStore>, MemoryBus>;

fn contended_engine() -> (ContendedEngine, Arc<ContendedStore>) {
    shopledger_observability::init_with_default("warn");
    let store = Arc::new(ContendedStore::default());
    let engine = Engine::new(
        EngineConfig::default(),
        Arc::clone(&store),
        Arc::new(InMemoryEventBus::new()),
    );
    (engine, store)
}

fn open<S, B>(engine: &Engine<S, B>, name: &str, opening: i64) -> AccountId
where
    S: EventStore + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    engine
        .ledger
        .open_account(name, AccountKind::Bank, opening)
        .unwrap()
        .id_typed()
}

#[test]
fn failed_destination_leg_rolls_back_the_source() -> anyhow::Result<()> {
    let (engine, store) = contended_engine();
    let bank = open(&engine, "City Bank", 1_000);
    let cash = open(&engine, "Cash drawer", 0);

    store.contend(cash.0);
    let tx = LedgerTransaction::transfer(bank, cash, 100, 5, "float");
    let tx_id = tx.id;
    let err = engine.ledger.apply_transaction(tx).unwrap_err();
    assert_eq!(err.kind(), "stale_write");
    store.release();

    assert_eq!(engine.ledger.balance(bank)?, 1_000);
    assert_eq!(engine.ledger.balance(cash)?, 0);
    let record = engine
        .ledger
        .transactions(bank)?
        .into_iter()
        .find(|r| r.transaction.id == tx_id)
        .expect("source leg is kept in history");
    assert_eq!(record.reversal, Some(ReversalReason::Rollback));
    assert!(engine.ledger.transactions(cash)?.iter().all(|r| r.transaction.id != tx_id));
    Ok(())
}

#[test]
fn failed_reversal_leg_reinstates_the_reversed_one() -> anyhow::Result<()> {
    let (engine, store) = contended_engine();
    let bank = open(&engine, "City Bank", 1_000);
    let cash = open(&engine, "Cash drawer", 0);
    let tx_id = engine
        .ledger
        .apply_transaction(LedgerTransaction::transfer(bank, cash, 300, 10, "float"))?
        .transaction_id;

    // The source leg reverses first; the destination then hits a stale stream.
    store.contend(cash.0);
    let err = engine.ledger.undo_transaction(tx_id).unwrap_err();
    assert_eq!(err.kind(), "stale_write");
    store.release();

    assert_eq!(engine.ledger.balance(bank)?, 690);
    assert_eq!(engine.ledger.balance(cash)?, 300);
    assert!(engine.ledger.transactions(bank)?.iter().all(|r| !r.is_undone()));

    // Nothing was left half-undone, so a retry goes through.
    engine.ledger.undo_transaction(tx_id)?;
    assert_eq!(engine.ledger.balance(bank)?, 1_000);
    assert_eq!(engine.ledger.balance(cash)?, 0);
    Ok(())
}

#[test]
fn stale_single_account_posting_changes_nothing() -> anyhow::Result<()> {
    let (engine, store) = contended_engine();
    let cash = open(&engine, "Cash drawer", 200);

    store.contend(cash.0);
    let err = engine
        .ledger
        .apply_transaction(LedgerTransaction::debit(cash, 50, "tea"))
        .unwrap_err();
    assert_eq!(err.kind(), "stale_write");
    store.release();

    assert_eq!(engine.ledger.balance(cash)?, 200);
    assert_eq!(engine.ledger.transactions(cash)?.len(), 1);
    Ok(())
}

#[test]
fn transfer_is_kept_when_publication_fails() -> anyhow::Result<()> {
    shopledger_observability::init_with_default("warn");
    let engine = Engine::new(
        EngineConfig::default(),
        Arc::new(InMemoryEventStore::new()),
        ClosedBus,
    );
    let bank = open(&engine, "City Bank", 1_000);
    let cash = open(&engine, "Cash drawer", 0);

    let receipt = engine
        .ledger
        .apply_transaction(LedgerTransaction::transfer(bank, cash, 100, 5, "float"))?;
    assert_eq!(receipt.balance_of(bank), Some(895));
    assert_eq!(receipt.balance_of(cash), Some(100));
    assert_eq!(engine.ledger.balance(bank)? + engine.ledger.balance(cash)?, 995);
    assert!(engine.ledger.transactions(bank)?.iter().all(|r| !r.is_undone()));
    Ok(())
}

#[test]
fn invoice_save_is_not_compensated_when_publication_fails() -> anyhow::Result<()> {
    shopledger_observability::init_with_default("warn");
    let engine = Engine::new(
        EngineConfig::default(),
        Arc::new(InMemoryEventStore::new()),
        ClosedBus,
    );
    let cash = open(&engine, "Cash drawer", 0);
    let rice = engine
        .catalog
        .register_product("Rice 5kg", 10, 70, 90, 100)?
        .id_typed();
    let nadia = engine
        .customers
        .register("Nadia Rahman", "01811000000", None, 30)?
        .id_typed();

    let draft = InvoiceDraft::new("INV-9001", Utc::now())
        .for_customer(nadia, 30)
        .with_item(InvoiceItem::new(Some(rice), "Rice 5kg", 2, 100)?)
        .with_payment(Payment::new(cash, 100));
    let invoice = engine.invoices.save(draft)?;

    assert_eq!(invoice.totals().due, 130);
    assert_eq!(engine.catalog.get_product(rice)?.quantity(), 8);
    assert_eq!(engine.ledger.balance(cash)?, 100);
    assert_eq!(engine.customers.get_due(nadia)?, 130);
    assert!(engine.auditor.find_discrepancies()?.is_empty());
    Ok(())
}
