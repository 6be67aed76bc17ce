//! Undo log for operations that span several aggregates.

use crate::error::EngineResult;

type Step<'a> = Box<dyn FnOnce() -> EngineResult<()> + 'a>;

/// Records the inverse of every step a multi-aggregate operation has
/// committed so far. On failure the inverses run newest first.
#[derive(Default)]
pub(crate) struct UndoLog<'a> {
    steps: Vec<(String, Step<'a>)>,
}

impl<'a> UndoLog<'a> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(
        &mut self,
        label: impl Into<String>,
        undo: impl FnOnce() -> EngineResult<()> + 'a,
    ) {
        self.steps.push((label.into(), Box::new(undo)));
    }

    /// Run every recorded inverse. A failing inverse is logged and the rest
    /// still run.
    pub(crate) fn unwind(self) {
        for (label, undo) in self.steps.into_iter().rev() {
            match undo() {
                Ok(()) => tracing::warn!(step = %label, "compensated"),
                Err(err) => tracing::error!(step = %label, error = %err, "compensation failed"),
            }
        }
    }
}
