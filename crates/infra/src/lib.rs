//! Infrastructure layer: event store, command dispatch and the services that
//! coordinate stock, ledger, invoices and lending over it.

pub mod auditor;
pub mod cache;
pub mod command_dispatcher;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_store;
pub mod locks;
pub mod read_model;
pub mod services;

pub use auditor::{DueDiscrepancy, LedgerAuditor};
pub use command_dispatcher::CommandDispatcher;
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, MemoryBus, MemoryStore};
pub use error::{EngineError, EngineResult};
