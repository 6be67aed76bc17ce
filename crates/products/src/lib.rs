//! Product stock and costing (event-sourced).
//!
//! Pure domain logic: the weighted-average cost engine and the `Product`
//! aggregate whose on-hand quantity and buying price it maintains.

pub mod cost;
pub mod product;

pub use cost::{merge_stock, merge_stock_checked};
pub use product::{
    AdjustStock, CostSet, PricesUpdated, Product, ProductCommand, ProductEvent, ProductId,
    ProductRegistered, RegisterProduct, Restock, SetCost, StockAdjusted, StockMovementReason,
    StockReceived, UpdatePrices,
};
