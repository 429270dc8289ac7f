//! Zone-level pool of path solvers.
//!
//! Solvers carry large scratch buffers, so a zone keeps a stack of idle ones
//! and hands them out on demand. Checkout is lock-free (`SegQueue`) and safe
//! from any number of tasks at once. A [`PooledSolver`] guard resets its
//! solver and pushes it back when dropped, so an entry never leaks state from
//! one borrower to the next.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::geom::GridPos;
use crate::path::{AStar, PathResult};
use crate::walk::WalkGrid;
use crate::PathError;

// ---------------------------------------------------------------------------
// SolverPool
// ---------------------------------------------------------------------------

/// Shared pool of [`AStar`] solvers over one walk grid.
#[derive(Debug)]
pub struct SolverPool {
    grid: Arc<WalkGrid>,
    idle: SegQueue<AStar>,
    created: AtomicUsize,
}

impl SolverPool {
    pub fn new(grid: Arc<WalkGrid>) -> Self {
        Self {
            grid,
            idle: SegQueue::new(),
            created: AtomicUsize::new(0),
        }
    }

    pub fn grid(&self) -> &Arc<WalkGrid> {
        &self.grid
    }

    /// Borrow a solver, creating one when the pool is empty.
    pub fn checkout(&self) -> PooledSolver<'_> {
        let solver = self.idle.pop().unwrap_or_else(|| {
            let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(total, "allocating path solver");
            AStar::new(Arc::clone(&self.grid))
        });
        PooledSolver {
            pool: self,
            solver: Some(solver),
        }
    }

    /// One-shot search on a pooled solver.
    pub fn find_path(&self, start: GridPos, end: GridPos) -> Result<PathResult, PathError> {
        self.checkout().find_path(start, end)
    }

    /// Solvers ever allocated by this pool.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Solvers currently sitting idle.
    pub fn idle(&self) -> usize {
        self.idle.len()
    }
}

// ---------------------------------------------------------------------------
// PooledSolver
// ---------------------------------------------------------------------------

/// Checkout guard. Dereferences to the borrowed [`AStar`].
pub struct PooledSolver<'a> {
    pool: &'a SolverPool,
    solver: Option<AStar>,
}

impl Deref for PooledSolver<'_> {
    type Target = AStar;

    fn deref(&self) -> &AStar {
        // The option is only emptied in `drop`.
        self.solver.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledSolver<'_> {
    fn deref_mut(&mut self) -> &mut AStar {
        self.solver.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledSolver<'_> {
    fn drop(&mut self) {
        if let Some(mut solver) = self.solver.take() {
            solver.reset();
            self.pool.idle.push(solver);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
