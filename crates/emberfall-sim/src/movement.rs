//! Step-by-step movement along a precomputed path.

use std::sync::Arc;

use emberfall_grid::geom::GridPos;

/// An in-progress walk. The actor stands on `steps[index]`; each step takes
/// `step_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveTrace {
    steps: Arc<[GridPos]>,
    step_ms: u64,
    elapsed_ms: u64,
    index: usize,
}

impl MoveTrace {
    /// `None` for an empty path.
    pub fn new(steps: Arc<[GridPos]>, step_ms: u64) -> Option<Self> {
        if steps.is_empty() {
            return None;
        }
        Some(Self {
            steps,
            step_ms: step_ms.max(1),
            elapsed_ms: 0,
            index: 0,
        })
    }

    pub fn start(&self) -> GridPos {
        self.steps[0]
    }

    pub fn target(&self) -> GridPos {
        self.steps[self.steps.len() - 1]
    }

    pub fn current(&self) -> GridPos {
        self.steps[self.index]
    }

    pub fn step_ms(&self) -> u64 {
        self.step_ms
    }

    pub fn is_done(&self) -> bool {
        self.index + 1 >= self.steps.len()
    }

    /// Move forward by `elapsed_ms`. Returns the new cell when it changed.
    /// Past the last step the actor snaps onto it.
    pub fn advance(&mut self, elapsed_ms: u64) -> Option<GridPos> {
        self.elapsed_ms += elapsed_ms;
        let last = self.steps.len() - 1;
        let index = ((self.elapsed_ms / self.step_ms) as usize).min(last);
        if index == self.index {
            return None;
        }
        self.index = index;
        Some(self.steps[index])
    }

    /// Cells still ahead, starting with the current one.
    pub fn remaining(&self) -> Vec<GridPos> {
        self.steps[self.index..].to_vec()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
