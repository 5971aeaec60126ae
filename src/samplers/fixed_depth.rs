//! Uniform descent capped at a fixed horizon below the stage root. Behaves
//! like a breadth-limited sweep: nothing is ever expanded past the horizon,
//! so the tree fills level by level. Pairs with the min-depth stage goal.

use rand::RngCore;

use crate::samplers::rollout::{RolloutPolicy, RolloutResult};
use crate::samplers::{pick_uniform, viable_children, Sampler};
use crate::tree::{NodeId, Tree};
use crate::Simulation;

pub struct FixedDepthSampler<G: Simulation> {
    /// Horizon relative to the stage root handed to `tree_policy`.
    horizon: u32,
    rollout: Box<dyn RolloutPolicy<G>>,
}

impl<G: Simulation> FixedDepthSampler<G> {
    pub fn new(horizon: u32, rollout: Box<dyn RolloutPolicy<G>>) -> Self {
        FixedDepthSampler { horizon, rollout }
    }
}

impl<G: Simulation + 'static> Sampler<G> for FixedDepthSampler<G> {
    fn tree_policy(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        root: NodeId,
        rng: &mut dyn RngCore,
    ) -> Option<NodeId> {
        let limit = tree.depth(root).saturating_add(self.horizon);
        let mut current = root;
        loop {
            if tree.is_retired(current) || tree.is_fully_explored(current) {
                return None;
            }
            let depth = tree.depth(current);
            if depth < limit && tree.untried_count(current) > 0 {
                return tree.reserve_expansion_rights(current).then_some(current);
            }
            // Only move somewhere a new child could still be added.
            if depth + 1 >= limit {
                return None;
            }
            let viable = viable_children(tree, current);
            current = pick_uniform(&viable, rng)?;
        }
    }

    fn rollout(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        node: NodeId,
        sim: &mut G,
        rng: &mut dyn RngCore,
    ) -> RolloutResult {
        self.rollout.rollout(tree, node, sim, rng)
    }

    fn fork(&self) -> Box<dyn Sampler<G>> {
        Box::new(FixedDepthSampler {
            horizon: self.horizon,
            rollout: self.rollout.fork(),
        })
    }
}
