//! Node arenas
//!
//! Every parse accounts its allocations against a [`NodeArena`] so runaway input
//! fails with a resource error instead of exhausting memory. A parse entry
//! takes a checkpoint and rewinds to it when the parse fails, so nothing built
//! by the failed attempt is counted against later ones.
//!
//! Function bodies are built in a private arena and kept in a reference-counted
//! [`FunctionBody`]. Each running invocation holds a [`FrameGuard`]; a body
//! replaced by a redefinition stays alive until its last frame returns.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;

use crate::ast::types::Node;
use crate::parser::types::ResourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArenaStats {
    pub allocated: usize,
    pub peak: usize,
}

/// Saved allocation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaMark(usize);

#[derive(Debug)]
pub struct NodeArena {
    allocated: usize,
    peak: usize,
    limit: usize,
}

impl NodeArena {
    pub fn new(limit: usize) -> Self {
        Self {
            allocated: 0,
            peak: 0,
            limit,
        }
    }

    /// Account for one node.
    pub fn allocate(&mut self) -> Result<(), ResourceError> {
        if self.allocated >= self.limit {
            return Err(ResourceError::ArenaExhausted { limit: self.limit });
        }
        self.allocated += 1;
        self.peak = self.peak.max(self.allocated);
        Ok(())
    }

    pub fn checkpoint(&self) -> ArenaMark {
        ArenaMark(self.allocated)
    }

    pub fn rewind(&mut self, mark: ArenaMark) {
        self.allocated = mark.0.min(self.allocated);
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            allocated: self.allocated,
            peak: self.peak,
        }
    }

    pub fn reset(&mut self) {
        self.allocated = 0;
        self.peak = 0;
    }
}

/// Retained body of a function definition.
#[derive(Debug, Serialize, Deserialize)]
pub struct FunctionBody {
    pub tree: Node,
    pub stats: ArenaStats,
    #[serde(skip)]
    frames: Cell<usize>,
}

impl PartialEq for FunctionBody {
    fn eq(&self, other: &Self) -> bool {
        self.tree == other.tree && self.stats == other.stats
    }
}

impl FunctionBody {
    pub fn new(tree: Node, stats: ArenaStats) -> Rc<Self> {
        Rc::new(Self {
            tree,
            stats,
            frames: Cell::new(0),
        })
    }

    /// Start an invocation. The body lives at least as long as the guard.
    pub fn enter(self: &Rc<Self>) -> FrameGuard {
        self.frames.set(self.frames.get() + 1);
        FrameGuard { body: Rc::clone(self) }
    }

    /// Number of invocations currently running.
    pub fn active_frames(&self) -> usize {
        self.frames.get()
    }
}

/// One running invocation of a function body.
#[derive(Debug)]
pub struct FrameGuard {
    body: Rc<FunctionBody>,
}

impl FrameGuard {
    pub fn tree(&self) -> &Node {
        &self.body.tree
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let frames = &self.body.frames;
        frames.set(frames.get().saturating_sub(1));
    }
}
