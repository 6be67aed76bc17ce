use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{
    Aggregate, AggregateRoot, Amount, DomainError, Quantity, typed_id,
};
use shopledger_events::Event;

use crate::cost::merge_stock_checked;

typed_id!(
    /// Product identifier.
    ProductId
);

/// Why on-hand stock moved. Recorded on every adjustment for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockMovementReason {
    /// Sold (or returned, for negative invoice quantities) on an invoice.
    InvoiceSale,
    /// Left the shop on a lending document.
    LendingIssued,
    /// Came back from a lending document (return, bill hand-off or delete).
    LendingRestored,
    /// Compensation for a multi-step operation that failed partway.
    Rollback,
    Manual,
}

/// Aggregate root: Product (stock + costing view of a catalog item).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    name: String,
    quantity: Quantity,
    buying_price: Amount,
    wholesale_price: Amount,
    price: Amount,
    version: u64,
    created: bool,
}

impl Product {
    /// Empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            name: String::new(),
            quantity: 0,
            buying_price: 0,
            wholesale_price: 0,
            price: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// On-hand stock.
    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    /// Weighted-average cost per unit.
    pub fn buying_price(&self) -> Amount {
        self.buying_price
    }

    pub fn wholesale_price(&self) -> Amount {
        self.wholesale_price
    }

    /// Retail price per unit.
    pub fn price(&self) -> Amount {
        self.price
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProduct {
    pub product_id: ProductId,
    pub name: String,
    pub opening_quantity: Quantity,
    pub buying_price: Amount,
    pub wholesale_price: Amount,
    pub price: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (signed delta).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub product_id: ProductId,
    pub delta: Quantity,
    pub reason: StockMovementReason,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Restock (merge incoming inventory at its own unit cost).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restock {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub unit_cost: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetCost (overwrite the buying price directly).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCost {
    pub product_id: ProductId,
    pub buying_price: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePrices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePrices {
    pub product_id: ProductId,
    pub wholesale_price: Amount,
    pub price: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    RegisterProduct(RegisterProduct),
    AdjustStock(AdjustStock),
    Restock(Restock),
    SetCost(SetCost),
    UpdatePrices(UpdatePrices),
}

/// Event: ProductRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRegistered {
    pub product_id: ProductId,
    pub name: String,
    pub opening_quantity: Quantity,
    pub buying_price: Amount,
    pub wholesale_price: Amount,
    pub price: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub product_id: ProductId,
    pub delta: Quantity,
    pub new_quantity: Quantity,
    pub reason: StockMovementReason,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReceived (carries the merged quantity and cost).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub unit_cost: Amount,
    pub new_quantity: Quantity,
    pub new_buying_price: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CostSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSet {
    pub product_id: ProductId,
    pub buying_price: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PricesUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricesUpdated {
    pub product_id: ProductId,
    pub wholesale_price: Amount,
    pub price: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductRegistered(ProductRegistered),
    StockAdjusted(StockAdjusted),
    StockReceived(StockReceived),
    CostSet(CostSet),
    PricesUpdated(PricesUpdated),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductRegistered(_) => "products.product.registered",
            ProductEvent::StockAdjusted(_) => "products.product.stock_adjusted",
            ProductEvent::StockReceived(_) => "products.product.stock_received",
            ProductEvent::CostSet(_) => "products.product.cost_set",
            ProductEvent::PricesUpdated(_) => "products.product.prices_updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductRegistered(e) => e.occurred_at,
            ProductEvent::StockAdjusted(e) => e.occurred_at,
            ProductEvent::StockReceived(e) => e.occurred_at,
            ProductEvent::CostSet(e) => e.occurred_at,
            ProductEvent::PricesUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductRegistered(e) => {
                self.id = e.product_id;
                self.name = e.name.clone();
                self.quantity = e.opening_quantity;
                self.buying_price = e.buying_price;
                self.wholesale_price = e.wholesale_price;
                self.price = e.price;
                self.created = true;
            }
            ProductEvent::StockAdjusted(e) => {
                self.quantity = e.new_quantity;
            }
            ProductEvent::StockReceived(e) => {
                self.quantity = e.new_quantity;
                self.buying_price = e.new_buying_price;
            }
            ProductEvent::CostSet(e) => {
                self.buying_price = e.buying_price;
            }
            ProductEvent::PricesUpdated(e) => {
                self.wholesale_price = e.wholesale_price;
                self.price = e.price;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::RegisterProduct(cmd) => self.handle_register(cmd),
            ProductCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            ProductCommand::Restock(cmd) => self.handle_restock(cmd),
            ProductCommand::SetCost(cmd) => self.handle_set_cost(cmd),
            ProductCommand::UpdatePrices(cmd) => self.handle_update_prices(cmd),
        }
    }
}

impl Product {
    fn entity(&self) -> String {
        format!("product {}", self.id)
    }

    fn ensure_exists(&self, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("product {product_id}")));
        }
        if self.id != product_id {
            return Err(DomainError::validation("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "product {} already exists",
                cmd.product_id
            )));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if cmd.opening_quantity < 0 {
            return Err(DomainError::invalid_quantity(
                format!("product {}", cmd.product_id),
                "opening quantity cannot be negative",
            ));
        }
        if cmd.buying_price < 0 || cmd.wholesale_price < 0 || cmd.price < 0 {
            return Err(DomainError::validation("prices cannot be negative"));
        }

        Ok(vec![ProductEvent::ProductRegistered(ProductRegistered {
            product_id: cmd.product_id,
            name: cmd.name.trim().to_string(),
            opening_quantity: cmd.opening_quantity,
            buying_price: cmd.buying_price,
            wholesale_price: cmd.wholesale_price,
            price: cmd.price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;

        if cmd.delta == 0 {
            return Err(DomainError::invalid_quantity(self.entity(), "delta cannot be zero"));
        }

        let new_quantity = self
            .quantity
            .checked_add(cmd.delta)
            .ok_or_else(|| DomainError::invalid_quantity(self.entity(), "stock overflow"))?;
        if new_quantity < 0 {
            return Err(DomainError::InsufficientStock {
                product: self.id.to_string(),
                available: self.quantity,
                requested: -cmd.delta,
            });
        }

        Ok(vec![ProductEvent::StockAdjusted(StockAdjusted {
            product_id: cmd.product_id,
            delta: cmd.delta,
            new_quantity,
            reason: cmd.reason,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restock(&self, cmd: &Restock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;

        let (new_quantity, new_buying_price) = merge_stock_checked(
            &self.entity(),
            self.quantity.max(0),
            self.buying_price,
            cmd.quantity,
            cmd.unit_cost,
        )?;

        Ok(vec![ProductEvent::StockReceived(StockReceived {
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            new_quantity,
            new_buying_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_cost(&self, cmd: &SetCost) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;
        if cmd.buying_price < 0 {
            return Err(DomainError::validation("buying price cannot be negative"));
        }
        Ok(vec![ProductEvent::CostSet(CostSet {
            product_id: cmd.product_id,
            buying_price: cmd.buying_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_prices(&self, cmd: &UpdatePrices) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;
        if cmd.wholesale_price < 0 || cmd.price < 0 {
            return Err(DomainError::validation("prices cannot be negative"));
        }
        Ok(vec![ProductEvent::PricesUpdated(PricesUpdated {
            product_id: cmd.product_id,
            wholesale_price: cmd.wholesale_price,
            price: cmd.price,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopledger_events::execute;

    fn registered(quantity: Quantity, buying_price: Amount) -> Product {
        let id = ProductId::generate();
        let mut product = Product::empty(id);
        execute(
            &mut product,
            &ProductCommand::RegisterProduct(RegisterProduct {
                product_id: id,
                name: "Basmati rice 5kg".to_string(),
                opening_quantity: quantity,
                buying_price,
                wholesale_price: buying_price + 20,
                price: buying_price + 50,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        product
    }

    fn adjust(product: &Product, delta: Quantity) -> ProductCommand {
        ProductCommand::AdjustStock(AdjustStock {
            product_id: product.id_typed(),
            delta,
            reason: StockMovementReason::Manual,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn restock_merges_weighted_average_cost() {
        let mut product = registered(10, 100);
        let cmd = ProductCommand::Restock(Restock {
            product_id: product.id_typed(),
            quantity: 10,
            unit_cost: 200,
            occurred_at: Utc::now(),
        });
        execute(&mut product, &cmd).unwrap();

        assert_eq!(product.quantity(), 20);
        assert_eq!(product.buying_price(), 150);
    }

    #[test]
    fn restock_rejects_negative_quantity_without_events() {
        let product = registered(3, 40);
        let err = product
            .handle(&ProductCommand::Restock(Restock {
                product_id: product.id_typed(),
                quantity: -2,
                unit_cost: 10,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_quantity");
        assert_eq!(product.quantity(), 3);
    }

    #[test]
    fn stock_cannot_go_negative() {
        let product = registered(2, 40);
        let err = product.handle(&adjust(&product, -3)).unwrap_err();
        match err {
            DomainError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, 2);
                assert_eq!(requested, 3);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
    }

    #[test]
    fn adjust_records_new_quantity_and_reason() {
        let mut product = registered(5, 40);
        let cmd = adjust(&product, -2);
        let events = execute(&mut product, &cmd).unwrap();
        match &events[0] {
            ProductEvent::StockAdjusted(e) => {
                assert_eq!(e.new_quantity, 3);
                assert_eq!(e.reason, StockMovementReason::Manual);
            }
            other => panic!("expected StockAdjusted, got {other:?}"),
        }
        assert_eq!(product.quantity(), 3);
    }

    #[test]
    fn commands_on_unregistered_product_are_not_found() {
        let product = Product::empty(ProductId::generate());
        let err = product.handle(&adjust(&product, 1)).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let product = registered(5, 40);
        let before = product.clone();
        let _ = product.handle(&adjust(&product, 4)).unwrap();
        assert_eq!(product, before);
    }

    #[test]
    fn version_increments_on_apply() {
        let mut product = registered(5, 40);
        assert_eq!(product.version(), 1);
        let cmd = adjust(&product, 1);
        execute(&mut product, &cmd).unwrap();
        let cmd = ProductCommand::SetCost(SetCost {
            product_id: product.id_typed(),
            buying_price: 45,
            occurred_at: Utc::now(),
        });
        execute(&mut product, &cmd).unwrap();
        assert_eq!(product.version(), 3);
        assert_eq!(product.buying_price(), 45);
    }
}
