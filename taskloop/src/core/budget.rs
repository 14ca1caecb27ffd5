//! Loop budget enforcement.

/// Iteration budget applied when a run carries no override.
pub const DEFAULT_MAX_LOOPS: u32 = 25;

/// Maximum number of full iterations for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopBudget {
    max_loops: u32,
}

impl LoopBudget {
    /// Use the per-run override when present, otherwise the system default.
    pub fn new(override_max: Option<u32>) -> Self {
        Self {
            max_loops: override_max.unwrap_or(DEFAULT_MAX_LOOPS),
        }
    }

    pub fn max_loops(&self) -> u32 {
        self.max_loops
    }

    /// True once `loop_count` (already incremented for the iteration about to
    /// start) runs past the budget.
    pub fn is_exhausted(&self, loop_count: u32) -> bool {
        loop_count > self.max_loops
    }
}
