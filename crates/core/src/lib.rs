//! `shopledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! aggregate traits, the domain error taxonomy, identifiers, money arithmetic
//! and the business calendar used to turn timestamps into calendar dates.

pub mod aggregate;
pub mod calendar;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use calendar::BusinessCalendar;
pub use error::{DomainError, DomainResult};
pub use id::AggregateId;
pub use money::{Amount, Quantity};
