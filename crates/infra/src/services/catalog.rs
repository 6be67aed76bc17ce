use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use shopledger_core::{Amount, DomainError, Quantity};
use shopledger_events::{EventBus, EventEnvelope};
use shopledger_products::{
    AdjustStock, Product, ProductCommand, ProductId, RegisterProduct, Restock, SetCost,
    StockMovementReason, UpdatePrices,
};

use crate::cache::TtlCache;
use crate::command_dispatcher::CommandDispatcher;
use crate::error::EngineResult;
use crate::event_store::EventStore;
use crate::locks::KeyedLocks;

pub const PRODUCT_AGGREGATE: &str = "products.product";

/// Stock operations the settlement services depend on.
pub trait ProductCatalog: Send + Sync {
    fn get_product(&self, product_id: ProductId) -> EngineResult<Product>;

    /// Move on-hand stock by `delta`. Returns the new quantity.
    fn adjust_stock(
        &self,
        product_id: ProductId,
        delta: Quantity,
        reason: StockMovementReason,
    ) -> EngineResult<Quantity>;

    fn set_cost(&self, product_id: ProductId, buying_price: Amount) -> EngineResult<()>;
}

impl<T: ProductCatalog + ?Sized> ProductCatalog for Arc<T> {
    fn get_product(&self, product_id: ProductId) -> EngineResult<Product> {
        (**self).get_product(product_id)
    }

    fn adjust_stock(
        &self,
        product_id: ProductId,
        delta: Quantity,
        reason: StockMovementReason,
    ) -> EngineResult<Quantity> {
        (**self).adjust_stock(product_id, delta, reason)
    }

    fn set_cost(&self, product_id: ProductId, buying_price: Amount) -> EngineResult<()> {
        (**self).set_cost(product_id, buying_price)
    }
}

/// Listing row for the product screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: Quantity,
    pub buying_price: Amount,
    pub price: Amount,
}

impl From<&Product> for ProductSummary {
    fn from(p: &Product) -> Self {
        Self {
            product_id: p.id_typed(),
            name: p.name().to_string(),
            quantity: p.quantity(),
            buying_price: p.buying_price(),
            price: p.price(),
        }
    }
}

pub struct EventSourcedCatalog<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    locks: KeyedLocks<ProductId>,
    summaries: TtlCache<(), Vec<ProductSummary>>,
}

impl<S, B> EventSourcedCatalog<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, cache_ttl: Duration) -> Self {
        Self {
            dispatcher,
            locks: KeyedLocks::new(),
            summaries: TtlCache::new(cache_ttl),
        }
    }

    fn execute(&self, product_id: ProductId, command: ProductCommand) -> EngineResult<Product> {
        let product = self.locks.with_locked([product_id], || {
            self.dispatcher.dispatch(
                product_id.0,
                PRODUCT_AGGREGATE,
                &command,
                |_| Product::empty(product_id),
            )
        })??;
        self.summaries.invalidate(&());
        Ok(product)
    }

    pub fn register_product(
        &self,
        name: impl Into<String>,
        opening_quantity: Quantity,
        buying_price: Amount,
        wholesale_price: Amount,
        price: Amount,
    ) -> EngineResult<Product> {
        let product_id = ProductId::generate();
        let product = self.execute(
            product_id,
            ProductCommand::RegisterProduct(RegisterProduct {
                product_id,
                name: name.into(),
                opening_quantity,
                buying_price,
                wholesale_price,
                price,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(product_id = %product_id, name = product.name(), "product registered");
        Ok(product)
    }

    /// Receive stock at `unit_cost`, folding it into the weighted-average
    /// buying price.
    pub fn restock(&self, product_id: ProductId, quantity: Quantity, unit_cost: Amount) -> EngineResult<Product> {
        let product = self.execute(
            product_id,
            ProductCommand::Restock(Restock {
                product_id,
                quantity,
                unit_cost,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(
            product_id = %product_id,
            quantity,
            unit_cost,
            buying_price = product.buying_price(),
            "stock received"
        );
        Ok(product)
    }

    pub fn update_prices(&self, product_id: ProductId, wholesale_price: Amount, price: Amount) -> EngineResult<Product> {
        self.execute(
            product_id,
            ProductCommand::UpdatePrices(UpdatePrices {
                product_id,
                wholesale_price,
                price,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn products(&self) -> EngineResult<Vec<Product>> {
        self.dispatcher
            .stream_ids(PRODUCT_AGGREGATE)?
            .into_iter()
            .map(|id| self.get_product(ProductId::new(id)))
            .collect()
    }

    /// Product listing sorted by name, cached for the configured TTL.
    pub fn product_summaries(&self) -> EngineResult<Vec<ProductSummary>> {
        self.summaries.get_or_try_insert_with((), || {
            let mut rows: Vec<ProductSummary> =
                self.products()?.iter().map(ProductSummary::from).collect();
            rows.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
            Ok(rows)
        })
    }
}

impl<S, B> ProductCatalog for EventSourcedCatalog<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn get_product(&self, product_id: ProductId) -> EngineResult<Product> {
        let product = self
            .dispatcher
            .load(product_id.0, |_| Product::empty(product_id))?;
        if !product.is_created() {
            return Err(DomainError::not_found(format!("product {product_id}")).into());
        }
        Ok(product)
    }

    fn adjust_stock(
        &self,
        product_id: ProductId,
        delta: Quantity,
        reason: StockMovementReason,
    ) -> EngineResult<Quantity> {
        let product = self.execute(
            product_id,
            ProductCommand::AdjustStock(AdjustStock {
                product_id,
                delta,
                reason,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::debug!(product_id = %product_id, delta, ?reason, quantity = product.quantity(), "stock adjusted");
        Ok(product.quantity())
    }

    fn set_cost(&self, product_id: ProductId, buying_price: Amount) -> EngineResult<()> {
        self.execute(
            product_id,
            ProductCommand::SetCost(SetCost {
                product_id,
                buying_price,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }
}
