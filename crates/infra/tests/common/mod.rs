#![allow(dead_code)]

use chrono::Utc;

use shopledger_accounting::{AccountId, AccountKind};
use shopledger_infra::services::InvoiceDraft;
use shopledger_infra::{Engine, EngineConfig, MemoryBus, MemoryStore};
use shopledger_invoicing::{InvoiceItem, Payment};
use shopledger_parties::CustomerId;
use shopledger_products::ProductId;

pub type TestEngine = Engine<MemoryStore, MemoryBus>;

pub fn engine() -> TestEngine {
    engine_with(EngineConfig::default())
}

pub fn engine_with(config: EngineConfig) -> TestEngine {
    shopledger_observability::init_with_default("warn");
    Engine::in_memory(config)
}

pub fn cash(engine: &TestEngine, opening: i64) -> AccountId {
    engine
        .ledger
        .open_account("Cash drawer", AccountKind::Cash, opening)
        .unwrap()
        .id_typed()
}

pub fn bank(engine: &TestEngine, opening: i64) -> AccountId {
    engine
        .ledger
        .open_account("City Bank", AccountKind::Bank, opening)
        .unwrap()
        .id_typed()
}

/// Product with 10 units on hand, sold at 100.
pub fn rice(engine: &TestEngine) -> ProductId {
    engine
        .catalog
        .register_product("Rice 5kg", 10, 70, 90, 100)
        .unwrap()
        .id_typed()
}

pub fn customer(engine: &TestEngine, phone: &str, opening_due: i64) -> CustomerId {
    engine
        .customers
        .register("Nadia Rahman", phone, Some("Mirpur 10".to_string()), opening_due)
        .unwrap()
        .id_typed()
}

/// 2 x product at 100 plus a 50 delivery line, previous due 30, discount 10,
/// paid 150 with a 5 fee: grand total 270, due 125.
pub fn sample_draft(number: &str, customer: CustomerId, product: ProductId, account: AccountId) -> InvoiceDraft {
    InvoiceDraft::new(number, Utc::now())
        .for_customer(customer, 30)
        .with_item(InvoiceItem::new(Some(product), "Rice 5kg", 2, 100).unwrap())
        .with_item(InvoiceItem::new(None, "Delivery", 1, 50).unwrap())
        .with_discount(10)
        .with_payment(Payment::new(account, 150).with_fee(5))
}
