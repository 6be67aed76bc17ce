//! Customers (event-sourced).
//!
//! Holds contact details and the cached `due` balance. The cache is written
//! by the settlement services and checked by the ledger auditor; nothing in
//! this crate derives it.

pub mod customer;

pub use customer::{
    ContactUpdated, Customer, CustomerCommand, CustomerEvent, CustomerId, CustomerRegistered,
    DueChanged, RegisterCustomer, SetDue, UpdateContact, normalize_phone,
};
