use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;

use shopledger_core::{Aggregate, Amount, DomainError};
use shopledger_events::{EventBus, EventEnvelope};
use shopledger_parties::{
    Customer, CustomerCommand, CustomerId, RegisterCustomer, SetDue, UpdateContact,
    normalize_phone,
};

use crate::command_dispatcher::CommandDispatcher;
use crate::error::EngineResult;
use crate::event_store::EventStore;
use crate::locks::KeyedLocks;
use crate::read_model::{InMemoryKeyIndex, KeyIndex};

pub const CUSTOMER_AGGREGATE: &str = "parties.customer";

/// Customer lookups and the cached `due` balance.
pub trait CustomerDirectory: Send + Sync {
    fn get_customer(&self, customer_id: CustomerId) -> EngineResult<Customer>;
    fn find_by_phone(&self, phone: &str) -> EngineResult<Option<Customer>>;
    /// Case-insensitive substring match on the name.
    fn find_by_name(&self, name: &str) -> EngineResult<Vec<Customer>>;
    fn customers(&self) -> EngineResult<Vec<Customer>>;

    fn get_due(&self, customer_id: CustomerId) -> EngineResult<Amount> {
        Ok(self.get_customer(customer_id)?.due())
    }

    fn set_due(&self, customer_id: CustomerId, due: Amount) -> EngineResult<()>;

    /// Add `delta` to the stored due under the customer's lock. Returns the
    /// new due.
    fn adjust_due(&self, customer_id: CustomerId, delta: Amount) -> EngineResult<Amount>;
}

impl<T: CustomerDirectory + ?Sized> CustomerDirectory for Arc<T> {
    fn get_customer(&self, customer_id: CustomerId) -> EngineResult<Customer> {
        (**self).get_customer(customer_id)
    }

    fn find_by_phone(&self, phone: &str) -> EngineResult<Option<Customer>> {
        (**self).find_by_phone(phone)
    }

    fn find_by_name(&self, name: &str) -> EngineResult<Vec<Customer>> {
        (**self).find_by_name(name)
    }

    fn customers(&self) -> EngineResult<Vec<Customer>> {
        (**self).customers()
    }

    fn get_due(&self, customer_id: CustomerId) -> EngineResult<Amount> {
        (**self).get_due(customer_id)
    }

    fn set_due(&self, customer_id: CustomerId, due: Amount) -> EngineResult<()> {
        (**self).set_due(customer_id, due)
    }

    fn adjust_due(&self, customer_id: CustomerId, delta: Amount) -> EngineResult<Amount> {
        (**self).adjust_due(customer_id, delta)
    }
}

pub struct EventSourcedCustomers<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    locks: KeyedLocks<CustomerId>,
    phones: InMemoryKeyIndex<String, CustomerId>,
    // Serializes phone-number claims across customers.
    phone_claims: KeyedLocks<String>,
}

impl<S, B> EventSourcedCustomers<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self {
            dispatcher,
            locks: KeyedLocks::new(),
            phones: InMemoryKeyIndex::new(),
            phone_claims: KeyedLocks::new(),
        }
    }

    fn load(&self, customer_id: CustomerId) -> EngineResult<Customer> {
        self.dispatcher
            .load(customer_id.0, |_| Customer::empty(customer_id))
    }

    fn execute(&self, customer_id: CustomerId, command: CustomerCommand) -> EngineResult<Customer> {
        self.locks.with_locked([customer_id], || {
            self.dispatcher.dispatch(
                customer_id.0,
                CUSTOMER_AGGREGATE,
                &command,
                |_| Customer::empty(customer_id),
            )
        })?
    }

    fn phone_owner(&self, phone: &str) -> EngineResult<Option<CustomerId>> {
        if let Some(id) = self.phones.get(&phone.to_string()) {
            return Ok(Some(id));
        }
        // Index misses fall back to a scan so a fresh process still sees
        // customers registered before it started.
        for customer in self.customers()? {
            if customer.phone_number() == phone {
                self.phones
                    .upsert(phone.to_string(), customer.id_typed());
                return Ok(Some(customer.id_typed()));
            }
        }
        Ok(None)
    }

    /// Register a customer. Phone numbers are unique after normalization.
    pub fn register(
        &self,
        name: impl Into<String>,
        phone_number: &str,
        address: Option<String>,
        opening_due: Amount,
    ) -> EngineResult<Customer> {
        let phone = normalize_phone(phone_number);
        self.phone_claims.with_locked([phone.clone()], || -> EngineResult<Customer> {
            if let Some(owner) = self.phone_owner(&phone)? {
                return Err(DomainError::conflict(format!(
                    "phone number {phone} already belongs to customer {owner}"
                ))
                .into());
            }

            let customer_id = CustomerId::generate();
            let customer = self.execute(
                customer_id,
                CustomerCommand::RegisterCustomer(RegisterCustomer {
                    customer_id,
                    name: name.into(),
                    phone_number: phone.clone(),
                    address,
                    opening_due,
                    occurred_at: Utc::now(),
                }),
            )?;
            self.phones.upsert(phone.clone(), customer_id);
            tracing::info!(customer_id = %customer_id, opening_due, "customer registered");
            Ok(customer)
        })?
    }

    pub fn update_contact(
        &self,
        customer_id: CustomerId,
        name: Option<String>,
        phone_number: Option<&str>,
        address: Option<String>,
    ) -> EngineResult<Customer> {
        let new_phone = phone_number.map(normalize_phone);
        let claims: Vec<String> = new_phone.iter().cloned().collect();

        self.phone_claims.with_locked(claims, || -> EngineResult<Customer> {
            let before = self.get_customer(customer_id)?;
            if let Some(phone) = &new_phone {
                if let Some(owner) = self.phone_owner(phone)? {
                    if owner != customer_id {
                        return Err(DomainError::conflict(format!(
                            "phone number {phone} already belongs to customer {owner}"
                        ))
                        .into());
                    }
                }
            }

            let customer = self.execute(
                customer_id,
                CustomerCommand::UpdateContact(UpdateContact {
                    customer_id,
                    name,
                    phone_number: new_phone.clone(),
                    address,
                    occurred_at: Utc::now(),
                }),
            )?;
            if before.phone_number() != customer.phone_number() {
                self.phones.remove(&before.phone_number().to_string());
                self.phones
                    .upsert(customer.phone_number().to_string(), customer_id);
            }
            Ok(customer)
        })?
    }
}

impl<S, B> CustomerDirectory for EventSourcedCustomers<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn get_customer(&self, customer_id: CustomerId) -> EngineResult<Customer> {
        let customer = self.load(customer_id)?;
        if !customer.is_created() {
            return Err(DomainError::not_found(format!("customer {customer_id}")).into());
        }
        Ok(customer)
    }

    fn find_by_phone(&self, phone: &str) -> EngineResult<Option<Customer>> {
        match self.phone_owner(&normalize_phone(phone))? {
            Some(id) => Ok(Some(self.get_customer(id)?)),
            None => Ok(None),
        }
    }

    fn find_by_name(&self, name: &str) -> EngineResult<Vec<Customer>> {
        let needle = name.trim().to_lowercase();
        Ok(self
            .customers()?
            .into_iter()
            .filter(|c| c.name().to_lowercase().contains(&needle))
            .collect())
    }

    fn customers(&self) -> EngineResult<Vec<Customer>> {
        self.dispatcher
            .stream_ids(CUSTOMER_AGGREGATE)?
            .into_iter()
            .map(|id| self.get_customer(CustomerId::new(id)))
            .collect()
    }

    fn set_due(&self, customer_id: CustomerId, due: Amount) -> EngineResult<()> {
        self.execute(
            customer_id,
            CustomerCommand::SetDue(SetDue {
                customer_id,
                due,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    fn adjust_due(&self, customer_id: CustomerId, delta: Amount) -> EngineResult<Amount> {
        self.locks.with_locked([customer_id], || -> EngineResult<Amount> {
            let mut customer = self.get_customer(customer_id)?;
            let due = customer.due().checked_add(delta).ok_or_else(|| {
                DomainError::validation(format!("due of customer {customer_id} overflows"))
            })?;
            let decided = customer.handle(&CustomerCommand::SetDue(SetDue {
                customer_id,
                due,
                occurred_at: Utc::now(),
            }))?;
            self.dispatcher
                .commit(customer_id.0, CUSTOMER_AGGREGATE, &mut customer, decided)?;
            tracing::debug!(customer_id = %customer_id, delta, due, "customer due adjusted");
            Ok(due)
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopledger_events::InMemoryEventBus;

    use crate::event_store::InMemoryEventStore;

    type Customers = EventSourcedCustomers<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn customers() -> Customers {
        let dispatcher = CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()));
        EventSourcedCustomers::new(Arc::new(dispatcher))
    }

    #[test]
    fn phone_numbers_are_unique_after_normalization() {
        let customers = customers();
        customers.register("Nadia", "+880 1711-000000", None, 0).unwrap();
        let err = customers
            .register("Someone else", "+8801711000000", None, 0)
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let found = customers.find_by_phone("+880 (1711) 000000").unwrap().unwrap();
        assert_eq!(found.name(), "Nadia");
    }

    #[test]
    fn update_contact_moves_the_phone_index() {
        let customers = customers();
        let id = customers.register("Nadia", "01711000000", None, 0).unwrap().id_typed();
        customers
            .update_contact(id, None, Some("01911000000"), Some("Dhanmondi".to_string()))
            .unwrap();

        assert!(customers.find_by_phone("01711000000").unwrap().is_none());
        let moved = customers.find_by_phone("01911000000").unwrap().unwrap();
        assert_eq!(moved.address(), Some("Dhanmondi"));
        // The old number is free again.
        customers.register("Rafiq", "01711000000", None, 0).unwrap();
    }

    #[test]
    fn name_search_is_case_insensitive() {
        let customers = customers();
        customers.register("Nadia Rahman", "0171", None, 0).unwrap();
        customers.register("Rafiq Islam", "0172", None, 0).unwrap();
        let hits = customers.find_by_name("rAHMan").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name(), "Nadia Rahman");
    }

    #[test]
    fn adjust_due_accumulates() {
        let customers = customers();
        let id = customers.register("Nadia", "0171", None, 100).unwrap().id_typed();
        assert_eq!(customers.adjust_due(id, 50).unwrap(), 150);
        assert_eq!(customers.adjust_due(id, -30).unwrap(), 120);
        customers.set_due(id, 0).unwrap();
        assert_eq!(customers.get_due(id).unwrap(), 0);
    }
}
