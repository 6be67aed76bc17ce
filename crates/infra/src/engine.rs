use std::sync::Arc;

use serde_json::Value as JsonValue;

use shopledger_events::{EventBus, EventEnvelope, InMemoryEventBus};

use crate::auditor::LedgerAuditor;
use crate::command_dispatcher::CommandDispatcher;
use crate::config::EngineConfig;
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::services::{
    EventSourcedCatalog, EventSourcedCustomers, InvoiceService, LedgerService, LendingService,
};

pub type MemoryStore = Arc<InMemoryEventStore>;
pub type MemoryBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

/// All services wired over one store and bus.
pub struct Engine<S, B> {
    pub config: EngineConfig,
    pub dispatcher: Arc<CommandDispatcher<S, B>>,
    pub ledger: Arc<LedgerService<S, B>>,
    pub catalog: Arc<EventSourcedCatalog<S, B>>,
    pub customers: Arc<EventSourcedCustomers<S, B>>,
    pub invoices: Arc<InvoiceService<S, B>>,
    pub lending: Arc<LendingService<S, B>>,
    pub auditor: LedgerAuditor<S, B>,
}

impl<S, B> Engine<S, B>
where
    S: EventStore + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    pub fn new(config: EngineConfig, store: S, bus: B) -> Self {
        let dispatcher = Arc::new(CommandDispatcher::new(store, bus));
        let ledger = Arc::new(LedgerService::new(
            Arc::clone(&dispatcher),
            config.calendar,
            config.cache_ttl,
        ));
        let catalog = Arc::new(EventSourcedCatalog::new(Arc::clone(&dispatcher), config.cache_ttl));
        let customers = Arc::new(EventSourcedCustomers::new(Arc::clone(&dispatcher)));
        let invoices = Arc::new(InvoiceService::new(
            Arc::clone(&dispatcher),
            Arc::clone(&ledger),
            catalog.clone(),
            customers.clone(),
            config.default_account,
        ));
        let lending = Arc::new(LendingService::new(
            Arc::clone(&dispatcher),
            catalog.clone(),
            customers.clone(),
            Arc::clone(&invoices),
        ));
        let auditor = LedgerAuditor::new(Arc::clone(&invoices), Arc::clone(&ledger), customers.clone());

        tracing::info!(
            timezone = %config.calendar.timezone(),
            cache_ttl_secs = config.cache_ttl.as_secs(),
            "engine ready"
        );
        Self {
            config,
            dispatcher,
            ledger,
            catalog,
            customers,
            invoices,
            lending,
            auditor,
        }
    }
}

impl Engine<MemoryStore, MemoryBus> {
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        )
    }
}
