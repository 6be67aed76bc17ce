use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{Aggregate, AggregateRoot, Amount, DomainError, Quantity, typed_id};
use shopledger_events::Event;
use shopledger_parties::CustomerId;
use shopledger_products::ProductId;

typed_id!(
    /// Challan (lending document) identifier.
    ChallanId
);

/// Who received the goods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerRef {
    Registered(CustomerId),
    WalkIn { name: String, phone: Option<String> },
}

impl CustomerRef {
    pub fn customer_id(&self) -> Option<CustomerId> {
        match self {
            CustomerRef::Registered(id) => Some(*id),
            CustomerRef::WalkIn { .. } => None,
        }
    }
}

/// Input line for a new challan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallanLine {
    pub product: Option<ProductId>,
    pub description: String,
    pub quantity: Quantity,
    pub unit_price: Amount,
}

/// A challan line with its resolution counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallanItem {
    pub line_no: u32,
    pub product: Option<ProductId>,
    pub description: String,
    pub quantity: Quantity,
    pub unit_price: Amount,
    pub returned_quantity: Quantity,
    pub billed_quantity: Quantity,
}

impl ChallanItem {
    /// Quantity still out with the customer.
    pub fn remaining(&self) -> Quantity {
        self.quantity - self.returned_quantity - self.billed_quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallanStatus {
    Sent,
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementKind {
    /// Goods came back to the shop.
    Return,
    /// Goods were sold to the customer on an invoice.
    Bill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSettlement {
    pub line_no: u32,
    pub kind: SettlementKind,
    pub quantity: Quantity,
}

/// Stock to put back for one line when a challan is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRestoration {
    pub line_no: u32,
    pub product: ProductId,
    pub quantity: Quantity,
}

/// Aggregate root: Challan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challan {
    id: ChallanId,
    challan_number: String,
    customer: Option<CustomerRef>,
    items: Vec<ChallanItem>,
    date: Option<DateTime<Utc>>,
    deleted: bool,
    version: u64,
    created: bool,
}

impl Challan {
    /// Empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ChallanId) -> Self {
        Self {
            id,
            challan_number: String::new(),
            customer: None,
            items: Vec::new(),
            date: None,
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ChallanId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn challan_number(&self) -> &str {
        &self.challan_number
    }

    pub fn customer(&self) -> Option<&CustomerRef> {
        self.customer.as_ref()
    }

    pub fn items(&self) -> &[ChallanItem] {
        &self.items
    }

    pub fn item(&self, line_no: u32) -> Option<&ChallanItem> {
        self.items.iter().find(|i| i.line_no == line_no)
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.date
    }

    /// Settled once nothing is left outstanding on any line.
    pub fn status(&self) -> ChallanStatus {
        if self.items.iter().all(|i| i.remaining() == 0) {
            ChallanStatus::Settled
        } else {
            ChallanStatus::Sent
        }
    }
}

impl AggregateRoot for Challan {
    type Id = ChallanId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateChallan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateChallan {
    pub challan_id: ChallanId,
    pub challan_number: String,
    pub customer: CustomerRef,
    pub lines: Vec<ChallanLine>,
    pub date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SettleItems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleItems {
    pub challan_id: ChallanId,
    pub settlements: Vec<ItemSettlement>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevertSettlement (compensates a settlement whose follow-up failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertSettlement {
    pub challan_id: ChallanId,
    pub settlements: Vec<ItemSettlement>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteChallan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteChallan {
    pub challan_id: ChallanId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallanCommand {
    CreateChallan(CreateChallan),
    SettleItems(SettleItems),
    RevertSettlement(RevertSettlement),
    DeleteChallan(DeleteChallan),
}

/// Event: ChallanCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallanCreated {
    pub challan_id: ChallanId,
    pub challan_number: String,
    pub customer: CustomerRef,
    pub items: Vec<ChallanItem>,
    pub date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemsSettled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsSettled {
    pub challan_id: ChallanId,
    pub settlements: Vec<ItemSettlement>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementReverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReverted {
    pub challan_id: ChallanId,
    pub settlements: Vec<ItemSettlement>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ChallanDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallanDeleted {
    pub challan_id: ChallanId,
    pub restored: Vec<StockRestoration>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallanEvent {
    ChallanCreated(ChallanCreated),
    ItemsSettled(ItemsSettled),
    SettlementReverted(SettlementReverted),
    ChallanDeleted(ChallanDeleted),
}

impl Event for ChallanEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ChallanEvent::ChallanCreated(_) => "lending.challan.created",
            ChallanEvent::ItemsSettled(_) => "lending.challan.items_settled",
            ChallanEvent::SettlementReverted(_) => "lending.challan.settlement_reverted",
            ChallanEvent::ChallanDeleted(_) => "lending.challan.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ChallanEvent::ChallanCreated(e) => e.occurred_at,
            ChallanEvent::ItemsSettled(e) => e.occurred_at,
            ChallanEvent::SettlementReverted(e) => e.occurred_at,
            ChallanEvent::ChallanDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Challan {
    type Command = ChallanCommand;
    type Event = ChallanEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ChallanEvent::ChallanCreated(e) => {
                self.id = e.challan_id;
                self.challan_number = e.challan_number.clone();
                self.customer = Some(e.customer.clone());
                self.items = e.items.clone();
                self.date = Some(e.date);
                self.created = true;
            }
            ChallanEvent::ItemsSettled(e) => {
                for s in &e.settlements {
                    self.shift_counter(s, s.quantity);
                }
            }
            ChallanEvent::SettlementReverted(e) => {
                for s in &e.settlements {
                    self.shift_counter(s, -s.quantity);
                }
            }
            ChallanEvent::ChallanDeleted(_) => {
                self.deleted = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ChallanCommand::CreateChallan(cmd) => self.handle_create(cmd),
            ChallanCommand::SettleItems(cmd) => self.handle_settle(cmd),
            ChallanCommand::RevertSettlement(cmd) => self.handle_revert(cmd),
            ChallanCommand::DeleteChallan(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Challan {
    fn shift_counter(&mut self, settlement: &ItemSettlement, by: Quantity) {
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|i| i.line_no == settlement.line_no)
        {
            match settlement.kind {
                SettlementKind::Return => item.returned_quantity += by,
                SettlementKind::Bill => item.billed_quantity += by,
            }
        }
    }

    fn entity(&self) -> String {
        format!("challan {}", self.challan_number)
    }

    fn ensure_live(&self, challan_id: ChallanId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("challan {challan_id}")));
        }
        if self.id != challan_id {
            return Err(DomainError::validation("challan_id mismatch"));
        }
        if self.deleted {
            return Err(DomainError::conflict(format!(
                "{} has been deleted",
                self.entity()
            )));
        }
        Ok(())
    }

    /// Per-line totals requested by a batch, with basic shape checks.
    fn batch_totals(
        &self,
        settlements: &[ItemSettlement],
    ) -> Result<BTreeMap<(u32, SettlementKind), Quantity>, DomainError> {
        if settlements.is_empty() {
            return Err(DomainError::validation(format!(
                "{}: nothing to settle",
                self.entity()
            )));
        }

        let mut totals: BTreeMap<(u32, SettlementKind), Quantity> = BTreeMap::new();
        for s in settlements {
            if s.quantity <= 0 {
                return Err(DomainError::invalid_quantity(
                    format!("{} line {}", self.entity(), s.line_no),
                    format!("settlement quantity {} must be positive", s.quantity),
                ));
            }
            if self.item(s.line_no).is_none() {
                return Err(DomainError::not_found(format!(
                    "{} line {}",
                    self.entity(),
                    s.line_no
                )));
            }
            let slot = totals.entry((s.line_no, s.kind)).or_insert(0);
            *slot = slot.checked_add(s.quantity).ok_or_else(|| {
                DomainError::invalid_quantity(self.entity(), "settlement quantity overflows")
            })?;
        }
        Ok(totals)
    }

    fn handle_create(&self, cmd: &CreateChallan) -> Result<Vec<ChallanEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "challan {} already exists",
                cmd.challan_id
            )));
        }
        if cmd.challan_number.trim().is_empty() {
            return Err(DomainError::validation("challan number cannot be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(format!(
                "challan {} has no items",
                cmd.challan_number
            )));
        }
        if let CustomerRef::WalkIn { name, .. } = &cmd.customer {
            if name.trim().is_empty() {
                return Err(DomainError::validation("walk-in customer needs a name"));
            }
        }

        let mut items = Vec::with_capacity(cmd.lines.len());
        for (idx, line) in cmd.lines.iter().enumerate() {
            let line_no = (idx as u32) + 1;
            if line.quantity <= 0 {
                return Err(DomainError::invalid_quantity(
                    format!("challan {} line {line_no}", cmd.challan_number),
                    format!("quantity {} must be positive", line.quantity),
                ));
            }
            if line.unit_price < 0 {
                return Err(DomainError::validation(format!(
                    "challan {} line {line_no}: unit price cannot be negative",
                    cmd.challan_number
                )));
            }
            if line.product.is_none() && line.description.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "challan {} line {line_no} needs a product or a description",
                    cmd.challan_number
                )));
            }
            items.push(ChallanItem {
                line_no,
                product: line.product,
                description: line.description.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                returned_quantity: 0,
                billed_quantity: 0,
            });
        }

        Ok(vec![ChallanEvent::ChallanCreated(ChallanCreated {
            challan_id: cmd.challan_id,
            challan_number: cmd.challan_number.trim().to_string(),
            customer: cmd.customer.clone(),
            items,
            date: cmd.date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_settle(&self, cmd: &SettleItems) -> Result<Vec<ChallanEvent>, DomainError> {
        self.ensure_live(cmd.challan_id)?;
        let totals = self.batch_totals(&cmd.settlements)?;

        // Both kinds draw from the same remaining quantity.
        let mut per_line: BTreeMap<u32, Quantity> = BTreeMap::new();
        for ((line_no, _), qty) in &totals {
            *per_line.entry(*line_no).or_insert(0) += qty;
        }
        for (line_no, requested) in per_line {
            let remaining = self.item(line_no).map_or(0, ChallanItem::remaining);
            if requested > remaining {
                return Err(DomainError::OverSettlement {
                    document: self.challan_number.clone(),
                    line_no,
                    requested,
                    remaining,
                });
            }
        }

        Ok(vec![ChallanEvent::ItemsSettled(ItemsSettled {
            challan_id: cmd.challan_id,
            settlements: cmd.settlements.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revert(&self, cmd: &RevertSettlement) -> Result<Vec<ChallanEvent>, DomainError> {
        self.ensure_live(cmd.challan_id)?;
        let totals = self.batch_totals(&cmd.settlements)?;

        for ((line_no, kind), qty) in totals {
            let settled = self.item(line_no).map_or(0, |i| match kind {
                SettlementKind::Return => i.returned_quantity,
                SettlementKind::Bill => i.billed_quantity,
            });
            if qty > settled {
                return Err(DomainError::invalid_quantity(
                    format!("{} line {line_no}", self.entity()),
                    format!("cannot revert {qty}, only {settled} settled as {kind:?}"),
                ));
            }
        }

        Ok(vec![ChallanEvent::SettlementReverted(SettlementReverted {
            challan_id: cmd.challan_id,
            settlements: cmd.settlements.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteChallan) -> Result<Vec<ChallanEvent>, DomainError> {
        self.ensure_live(cmd.challan_id)?;

        let restored = self
            .items
            .iter()
            .filter(|i| i.remaining() > 0)
            .filter_map(|i| {
                i.product.map(|product| StockRestoration {
                    line_no: i.line_no,
                    product,
                    quantity: i.remaining(),
                })
            })
            .collect();

        Ok(vec![ChallanEvent::ChallanDeleted(ChallanDeleted {
            challan_id: cmd.challan_id,
            restored,
            occurred_at: cmd.occurred_at,
        })])
    }
}
