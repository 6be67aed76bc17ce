//! Process-wide tracing setup shared by binaries, tests and benches.

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::DEFAULT_DIRECTIVE;

/// Initialize JSON tracing filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    self::tracing::init(DEFAULT_DIRECTIVE);
}

/// Like [`init`] with a different fallback filter when `RUST_LOG` is unset.
pub fn init_with_default(directive: &str) {
    self::tracing::init(directive);
}
