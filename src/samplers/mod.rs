//! Sampling strategies: how workers pick where to grow the tree.
//!
//! A sampler bundles the three per-cycle decisions: tree policy (where to
//! go), expansion policy (which untried action to try), and rollout policy
//! (how to score the result). Workers each hold their own fork of the stage's
//! sampler prototype, so samplers may keep mutable per-worker state.

use rand::{Rng, RngCore};

use crate::actions::Action;
use crate::error::SearchError;
use crate::samplers::rollout::RolloutResult;
use crate::tree::{NodeId, Tree};
use crate::{Command, Simulation, State};

mod distribution;
mod fixed_depth;
mod greedy;
mod random;
pub mod rollout;
mod ucb;

pub use distribution::DistributionSampler;
pub use fixed_depth::FixedDepthSampler;
pub use greedy::GreedySampler;
pub use random::RandomSampler;
pub use ucb::UcbSampler;

/// Strategy bundle driving one worker's search cycle.
pub trait Sampler<G: Simulation>: Send {
    /// Descend from `root` and reserve a node with untried actions.
    ///
    /// `None` means no viable path was found this attempt: either a
    /// reservation probe lost a race or every branch is taken/explored.
    /// The caller backs off and retries; it must never spin.
    fn tree_policy(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        root: NodeId,
        rng: &mut dyn RngCore,
    ) -> Option<NodeId>;

    /// Pick one of the reserved node's untried actions to instantiate.
    /// Must only be called while holding the node's expansion reservation.
    fn expansion_policy(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        node: NodeId,
        rng: &mut dyn RngCore,
    ) -> Result<Action<G::Command>, SearchError> {
        default_expansion(tree, node, rng)
    }

    /// Score a freshly expanded node by running the worker's private
    /// simulation forward with scratch commands.
    fn rollout(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        node: NodeId,
        sim: &mut G,
        rng: &mut dyn RngCore,
    ) -> RolloutResult;

    /// Copy this sampler and its settings for another worker.
    fn fork(&self) -> Box<dyn Sampler<G>>;
}

/// Draw an untried action on the node's sampling distribution. The action
/// stays listed until `add_child` lands it.
pub(crate) fn default_expansion<C: Command, S: State>(
    tree: &Tree<C, S>,
    node: NodeId,
    rng: &mut dyn RngCore,
) -> Result<Action<C>, SearchError> {
    if !tree.is_reserved(node) {
        return Err(SearchError::InvalidTransition {
            current: "node unreserved",
            attempted: "expansion policy",
        });
    }
    tree.sample_untried(node, rng)
        .ok_or(SearchError::NoUntriedActions(node))
}

/// Children a descent may move into: live, not fully explored, unreserved.
pub(crate) fn viable_children<C: Command, S: State>(
    tree: &Tree<C, S>,
    id: NodeId,
) -> Vec<NodeId> {
    tree.children(id)
        .into_iter()
        .filter(|&c| !tree.is_fully_explored(c) && !tree.is_reserved(c))
        .collect()
}

/// The descent loop shared by most samplers: stop and reserve at the first
/// node with untried actions, otherwise let `choose` pick which viable child
/// to move into.
pub(crate) fn descend<C: Command, S: State>(
    tree: &Tree<C, S>,
    root: NodeId,
    rng: &mut dyn RngCore,
    mut choose: impl FnMut(&Tree<C, S>, NodeId, &[NodeId], &mut dyn RngCore) -> Option<NodeId>,
) -> Option<NodeId> {
    let mut current = root;
    loop {
        if tree.is_retired(current) || tree.is_fully_explored(current) {
            return None;
        }
        if tree.untried_count(current) > 0 {
            return tree.reserve_expansion_rights(current).then_some(current);
        }
        let viable = viable_children(tree, current);
        if viable.is_empty() {
            return None;
        }
        current = choose(tree, current, &viable, rng)?;
    }
}

/// Uniform pick used by a couple of samplers.
pub(crate) fn pick_uniform(viable: &[NodeId], rng: &mut dyn RngCore) -> Option<NodeId> {
    if viable.is_empty() {
        None
    } else {
        let rng = &mut *rng;
        Some(viable[rng.gen_range(0..viable.len())])
    }
}
