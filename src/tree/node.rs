//! Node storage for the exploration tree.
//!
//! A node's statistics (visit count + value aggregate) are packed into one
//! `AtomicU64` so concurrent readers never observe a torn pair and every
//! backpropagation step is a single compare-and-swap.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::actions::{Action, ActionList};
use crate::tree::NodeId;
use crate::value::ValueUpdater;
use crate::{Command, State};

/// Structural links of a node: created children plus the candidate actions
/// not yet expanded. Both change together under the node's mutex, and only
/// the worker holding the node's expansion reservation may change them.
pub(crate) struct NodeLinks<C: Command> {
    pub(crate) children: Vec<NodeId>,
    pub(crate) untried: ActionList<C>,
}

pub(crate) struct Node<C: Command, S: State> {
    pub(crate) parent: Option<NodeId>,
    pub(crate) depth: u32,
    /// Action that produced this node from its parent. `None` only at root.
    pub(crate) action: Option<Action<C>>,
    /// Simulation snapshot at this node. Assigned once, never mutated.
    pub(crate) state: S,
    pub(crate) links: Mutex<NodeLinks<C>>,
    /// Packed (visit count, value aggregate).
    stats: AtomicU64,
    /// No untried actions remain anywhere below, or the state is failed.
    pub(crate) fully_explored: AtomicBool,
    /// Expansion-exclusion token. At most one worker holds it directly;
    /// saturation may also set it on ancestors whose subtrees are all taken.
    pub(crate) reserved: AtomicBool,
    /// Set by subtree pruning. Retired nodes are skipped everywhere.
    pub(crate) retired: AtomicBool,
}

fn pack(visits: u32, value: f32) -> u64 {
    (u64::from(visits) << 32) | u64::from(value.to_bits())
}

fn unpack(word: u64) -> (u32, f32) {
    ((word >> 32) as u32, f32::from_bits(word as u32))
}

impl<C: Command, S: State> Node<C, S> {
    pub(crate) fn new_root(state: S, untried: ActionList<C>, fully_explored: bool) -> Self {
        Node {
            parent: None,
            depth: 0,
            action: None,
            state,
            links: Mutex::new(NodeLinks {
                children: Vec::new(),
                untried,
            }),
            stats: AtomicU64::new(0),
            fully_explored: AtomicBool::new(fully_explored),
            reserved: AtomicBool::new(false),
            retired: AtomicBool::new(false),
        }
    }

    pub(crate) fn new_child(
        parent: NodeId,
        depth: u32,
        action: Action<C>,
        state: S,
        untried: ActionList<C>,
        fully_explored: bool,
    ) -> Self {
        Node {
            parent: Some(parent),
            depth,
            action: Some(action),
            state,
            links: Mutex::new(NodeLinks {
                children: Vec::new(),
                untried,
            }),
            stats: AtomicU64::new(0),
            fully_explored: AtomicBool::new(fully_explored),
            reserved: AtomicBool::new(false),
            retired: AtomicBool::new(false),
        }
    }

    /// Read the (visit count, value aggregate) pair. Slightly stale values
    /// are fine for selection scoring; torn values are impossible.
    pub(crate) fn stats(&self) -> (u32, f32) {
        unpack(self.stats.load(Ordering::Relaxed))
    }

    /// Fold one rollout score into the aggregate and bump the visit count,
    /// in a single compare-and-swap loop.
    pub(crate) fn apply_score(&self, score: f32, updater: &dyn ValueUpdater) {
        let mut observed = self.stats.load(Ordering::Relaxed);
        loop {
            let (visits, value) = unpack(observed);
            let next = pack(
                visits.saturating_add(1),
                updater.update(value, visits, score),
            );
            match self.stats.compare_exchange_weak(
                observed,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(now) => observed = now,
            }
        }
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn is_reserved(&self) -> bool {
        self.reserved.load(Ordering::Acquire)
    }

    pub(crate) fn is_fully_explored(&self) -> bool {
        self.fully_explored.load(Ordering::Acquire)
    }

    /// A node a worker may still descend into or expand from.
    pub(crate) fn is_viable(&self) -> bool {
        !self.is_retired() && !self.is_fully_explored() && !self.is_reserved()
    }
}
