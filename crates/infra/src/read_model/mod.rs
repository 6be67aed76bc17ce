//! Disposable read models: natural-key indexes over event-sourced state.

pub mod key_index;

pub use key_index::{InMemoryKeyIndex, KeyIndex};
