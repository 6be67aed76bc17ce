use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{Aggregate, AggregateRoot, Amount, DomainError, typed_id};
use shopledger_events::Event;

typed_id!(
    /// Customer identifier.
    CustomerId
);

/// Canonical form used for phone lookups: digits and a leading `+` only.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        if c.is_ascii_digit() || (i == 0 && c == '+') {
            out.push(c);
        }
    }
    out
}

/// Aggregate root: Customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    id: CustomerId,
    name: String,
    phone_number: String,
    address: Option<String>,
    opening_due: Amount,
    due: Amount,
    version: u64,
    created: bool,
}

impl Customer {
    /// Empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CustomerId) -> Self {
        Self {
            id,
            name: String::new(),
            phone_number: String::new(),
            address: None,
            opening_due: 0,
            due: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CustomerId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Balance the customer carried when first registered.
    pub fn opening_due(&self) -> Amount {
        self.opening_due
    }

    /// Cached outstanding balance. Positive means the customer owes the shop.
    pub fn due(&self) -> Amount {
        self.due
    }
}

impl AggregateRoot for Customer {
    type Id = CustomerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterCustomer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCustomer {
    pub customer_id: CustomerId,
    pub name: String,
    pub phone_number: String,
    pub address: Option<String>,
    /// Balance carried over from before the customer was entered here.
    pub opening_due: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateContact. `None` keeps the existing value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateContact {
    pub customer_id: CustomerId,
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetDue (overwrite the cached due).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDue {
    pub customer_id: CustomerId,
    pub due: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerCommand {
    RegisterCustomer(RegisterCustomer),
    UpdateContact(UpdateContact),
    SetDue(SetDue),
}

/// Event: CustomerRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRegistered {
    pub customer_id: CustomerId,
    pub name: String,
    pub phone_number: String,
    pub address: Option<String>,
    pub opening_due: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ContactUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdated {
    pub customer_id: CustomerId,
    pub name: String,
    pub phone_number: String,
    pub address: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DueChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueChanged {
    pub customer_id: CustomerId,
    pub previous_due: Amount,
    pub due: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerEvent {
    CustomerRegistered(CustomerRegistered),
    ContactUpdated(ContactUpdated),
    DueChanged(DueChanged),
}

impl Event for CustomerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CustomerEvent::CustomerRegistered(_) => "parties.customer.registered",
            CustomerEvent::ContactUpdated(_) => "parties.customer.contact_updated",
            CustomerEvent::DueChanged(_) => "parties.customer.due_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CustomerEvent::CustomerRegistered(e) => e.occurred_at,
            CustomerEvent::ContactUpdated(e) => e.occurred_at,
            CustomerEvent::DueChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Customer {
    type Command = CustomerCommand;
    type Event = CustomerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CustomerEvent::CustomerRegistered(e) => {
                self.id = e.customer_id;
                self.name = e.name.clone();
                self.phone_number = e.phone_number.clone();
                self.address = e.address.clone();
                self.opening_due = e.opening_due;
                self.due = e.opening_due;
                self.created = true;
            }
            CustomerEvent::ContactUpdated(e) => {
                self.name = e.name.clone();
                self.phone_number = e.phone_number.clone();
                self.address = e.address.clone();
            }
            CustomerEvent::DueChanged(e) => {
                self.due = e.due;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CustomerCommand::RegisterCustomer(cmd) => self.handle_register(cmd),
            CustomerCommand::UpdateContact(cmd) => self.handle_update(cmd),
            CustomerCommand::SetDue(cmd) => self.handle_set_due(cmd),
        }
    }
}

impl Customer {
    fn ensure_exists(&self, customer_id: CustomerId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("customer {customer_id}")));
        }
        if self.id != customer_id {
            return Err(DomainError::validation("customer_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterCustomer) -> Result<Vec<CustomerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "customer {} already exists",
                cmd.customer_id
            )));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("customer name cannot be empty"));
        }
        let phone_number = normalize_phone(&cmd.phone_number);
        if phone_number.is_empty() {
            return Err(DomainError::validation("customer phone number cannot be empty"));
        }

        Ok(vec![CustomerEvent::CustomerRegistered(CustomerRegistered {
            customer_id: cmd.customer_id,
            name: cmd.name.trim().to_string(),
            phone_number,
            address: cmd.address.clone(),
            opening_due: cmd.opening_due,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateContact) -> Result<Vec<CustomerEvent>, DomainError> {
        self.ensure_exists(cmd.customer_id)?;

        let name = cmd
            .name
            .as_deref()
            .map(str::trim)
            .unwrap_or(&self.name)
            .to_string();
        if name.is_empty() {
            return Err(DomainError::validation("customer name cannot be empty"));
        }
        let phone_number = cmd
            .phone_number
            .as_deref()
            .map(normalize_phone)
            .unwrap_or_else(|| self.phone_number.clone());
        if phone_number.is_empty() {
            return Err(DomainError::validation("customer phone number cannot be empty"));
        }

        Ok(vec![CustomerEvent::ContactUpdated(ContactUpdated {
            customer_id: cmd.customer_id,
            name,
            phone_number,
            address: cmd.address.clone().or_else(|| self.address.clone()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_due(&self, cmd: &SetDue) -> Result<Vec<CustomerEvent>, DomainError> {
        self.ensure_exists(cmd.customer_id)?;

        if cmd.due == self.due {
            return Ok(vec![]);
        }

        Ok(vec![CustomerEvent::DueChanged(DueChanged {
            customer_id: cmd.customer_id,
            previous_due: self.due,
            due: cmd.due,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopledger_events::execute;

    fn registered() -> Customer {
        let id = CustomerId::generate();
        let mut customer = Customer::empty(id);
        execute(
            &mut customer,
            &CustomerCommand::RegisterCustomer(RegisterCustomer {
                customer_id: id,
                name: "  Rahim Traders ".to_string(),
                phone_number: "+880 1711-000000".to_string(),
                address: Some("Dhanmondi".to_string()),
                opening_due: 0,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        customer
    }

    #[test]
    fn registration_normalizes_name_and_phone() {
        let customer = registered();
        assert_eq!(customer.name(), "Rahim Traders");
        assert_eq!(customer.phone_number(), "+8801711000000");
        assert_eq!(customer.due(), 0);
    }

    #[test]
    fn registration_requires_phone() {
        let customer = Customer::empty(CustomerId::generate());
        let err = customer
            .handle(&CustomerCommand::RegisterCustomer(RegisterCustomer {
                customer_id: customer.id_typed(),
                name: "Walk-in".to_string(),
                phone_number: " - ".to_string(),
                address: None,
                opening_due: 0,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn set_due_records_previous_value() {
        let mut customer = registered();
        let cmd = CustomerCommand::SetDue(SetDue {
            customer_id: customer.id_typed(),
            due: 450,
            occurred_at: Utc::now(),
        });
        let events = execute(&mut customer, &cmd).unwrap();
        match &events[0] {
            CustomerEvent::DueChanged(e) => {
                assert_eq!(e.previous_due, 0);
                assert_eq!(e.due, 450);
            }
            other => panic!("expected DueChanged, got {other:?}"),
        }
        assert_eq!(customer.due(), 450);
    }

    #[test]
    fn unchanged_due_emits_nothing() {
        let customer = registered();
        let events = customer
            .handle(&CustomerCommand::SetDue(SetDue {
                customer_id: customer.id_typed(),
                due: 0,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn update_keeps_fields_that_are_not_given() {
        let mut customer = registered();
        let cmd = CustomerCommand::UpdateContact(UpdateContact {
            customer_id: customer.id_typed(),
            name: None,
            phone_number: Some("01811 222333".to_string()),
            address: None,
            occurred_at: Utc::now(),
        });
        execute(&mut customer, &cmd).unwrap();
        assert_eq!(customer.name(), "Rahim Traders");
        assert_eq!(customer.phone_number(), "01811222333");
        assert_eq!(customer.address(), Some("Dhanmondi"));
    }
}
