//! Command execution pipeline.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the aggregate's stream
//!   ↓
//! 2. Rehydrate (apply historical events)
//!   ↓
//! 3. Handle command (pure decision, produces events)
//!   ↓
//! 4. Append with an exact expected version (optimistic concurrency)
//!   ↓
//! 5. Publish committed events on the bus
//! ```
//!
//! Services that need to validate several aggregates before touching any of
//! them use [`CommandDispatcher::load`] and [`CommandDispatcher::commit`]
//! directly instead of [`CommandDispatcher::dispatch`].

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use shopledger_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use shopledger_events::{EventBus, EventEnvelope};

use crate::error::{EngineError, EngineResult};
use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Reusable command execution engine for event-sourced aggregates.
///
/// Events are persisted before publication: if the append fails nothing is
/// published. Once the append succeeds the operation has happened; a bus
/// failure after that point is logged and does not fail the commit, so callers
/// never compensate for events that are already durable.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate an aggregate. A missing stream yields the fresh
    /// instance from `make_aggregate`.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> EngineResult<A>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Append already-decided events for `aggregate`, expecting its stream to
    /// still be at the aggregate's version, then apply them in place.
    pub fn commit<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        aggregate: &mut A,
        decided: Vec<A::Event>,
    ) -> EngineResult<Vec<StoredEvent>>
    where
        A: Aggregate,
        A::Event: shopledger_events::Event + Serialize,
    {
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let expected = ExpectedVersion::Exact(aggregate.version());
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;
        for ev in &decided {
            aggregate.apply(ev);
        }

        for stored in &committed {
            if let Err(e) = self.bus.publish(stored.to_envelope()) {
                tracing::warn!(
                    aggregate_type,
                    aggregate_id = %aggregate_id,
                    event_type = %stored.event_type,
                    sequence_number = stored.sequence_number,
                    error = ?e,
                    "event committed but not published"
                );
            }
        }

        tracing::debug!(
            aggregate_type,
            aggregate_id = %aggregate_id,
            events = committed.len(),
            version = aggregate.version(),
            "events committed"
        );
        Ok(committed)
    }

    /// Load, decide, commit. Returns the aggregate in its new state.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> EngineResult<A>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: shopledger_events::Event + Serialize + DeserializeOwned,
    {
        let mut aggregate = self.load(aggregate_id, make_aggregate)?;
        let decided = aggregate.handle(command)?;
        self.commit(aggregate_id, aggregate_type, &mut aggregate, decided)?;
        Ok(aggregate)
    }

    /// Every stream of the given aggregate type.
    pub fn stream_ids(&self, aggregate_type: &str) -> EngineResult<Vec<AggregateId>> {
        Ok(self.store.stream_ids(aggregate_type)?)
    }
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> EngineResult<()> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(EngineError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number <= last {
            return Err(EngineError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> EngineResult<()>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = stored
            .decode()
            .map_err(|e| EngineError::Deserialize(format!("{} #{}: {e}", stored.event_type, stored.sequence_number)))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use shopledger_core::AggregateRoot;
    use shopledger_events::{InMemoryEventBus, Subscription};
    use shopledger_parties::{Customer, CustomerCommand, CustomerId, RegisterCustomer, SetDue};

    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn register(id: CustomerId) -> CustomerCommand {
        CustomerCommand::RegisterCustomer(RegisterCustomer {
            customer_id: id,
            name: "Nadia".to_string(),
            phone_number: "01900000000".to_string(),
            address: None,
            opening_due: 100,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_persists_publishes_and_rehydrates() {
        let dispatcher = dispatcher();
        let sub = dispatcher.bus().subscribe();
        let id = CustomerId::generate();

        let customer = dispatcher
            .dispatch(id.0, "parties.customer", &register(id), |_| Customer::empty(id))
            .unwrap();
        assert_eq!(customer.version(), 1);

        let published = sub.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type(), "parties.customer.registered");
        assert_eq!(published[0].sequence_number(), 1);

        let reloaded: Customer = dispatcher.load(id.0, |_| Customer::empty(id)).unwrap();
        assert_eq!(reloaded.due(), 100);
    }

    #[test]
    fn domain_rejection_commits_nothing() {
        let dispatcher = dispatcher();
        let id = CustomerId::generate();
        let cmd = CustomerCommand::SetDue(SetDue {
            customer_id: id,
            due: 5,
            occurred_at: Utc::now(),
        });
        let err = dispatcher
            .dispatch(id.0, "parties.customer", &cmd, |_| Customer::empty(id))
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert!(dispatcher.store().load_stream(id.0).unwrap().is_empty());
    }

    #[test]
    fn commit_against_a_stale_snapshot_is_a_stale_write() {
        let dispatcher = dispatcher();
        let id = CustomerId::generate();
        dispatcher
            .dispatch(id.0, "parties.customer", &register(id), |_| Customer::empty(id))
            .unwrap();

        let mut first: Customer = dispatcher.load(id.0, |_| Customer::empty(id)).unwrap();
        let mut second = first.clone();
        let set = |due| {
            CustomerCommand::SetDue(SetDue {
                customer_id: id,
                due,
                occurred_at: Utc::now(),
            })
        };

        let decided = first.handle(&set(10)).unwrap();
        dispatcher.commit(id.0, "parties.customer", &mut first, decided).unwrap();

        let decided = second.handle(&set(20)).unwrap();
        let err = dispatcher
            .commit(id.0, "parties.customer", &mut second, decided)
            .unwrap_err();
        assert_eq!(err.kind(), "stale_write");
    }

    struct ClosedBus;

    impl EventBus<EventEnvelope<JsonValue>> for ClosedBus {
        type Error = &'static str;

        fn publish(&self, _message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
            Err("bus closed")
        }

        fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
            let (_tx, rx) = std::sync::mpsc::channel();
            Subscription::new(rx)
        }
    }

    #[test]
    fn publish_failure_does_not_fail_a_durable_commit() {
        let dispatcher = CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), ClosedBus);
        let id = CustomerId::generate();

        let customer = dispatcher
            .dispatch(id.0, "parties.customer", &register(id), |_| Customer::empty(id))
            .unwrap();
        assert_eq!(customer.version(), 1);
        assert_eq!(dispatcher.store().load_stream(id.0).unwrap().len(), 1);
    }
}
