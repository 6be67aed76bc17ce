//! Lending (challan) domain module.
//!
//! A challan records goods handed to a customer before their final
//! disposition is known. Each line is resolved over time by returning goods to
//! stock or billing them onto an invoice.

pub mod challan;

pub use challan::{
    Challan, ChallanCommand, ChallanCreated, ChallanDeleted, ChallanEvent, ChallanId, ChallanItem,
    ChallanLine, ChallanStatus, CreateChallan, CustomerRef, DeleteChallan, ItemSettlement,
    ItemsSettled, RevertSettlement, SettleItems, SettlementKind, SettlementReverted,
    StockRestoration,
};
