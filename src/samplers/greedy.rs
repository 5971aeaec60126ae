//! Always-greedy descent: follow the best value aggregate, no exploration
//! bonus. Pairs naturally with [`HighestSeenUpdater`] to dig at the single
//! best run found so far.
//!
//! [`HighestSeenUpdater`]: crate::value::HighestSeenUpdater

use rand::RngCore;

use crate::samplers::rollout::{RolloutPolicy, RolloutResult};
use crate::samplers::{descend, pick_uniform, Sampler};
use crate::tree::{NodeId, Tree};
use crate::Simulation;

pub struct GreedySampler<G: Simulation> {
    rollout: Box<dyn RolloutPolicy<G>>,
}

impl<G: Simulation> GreedySampler<G> {
    pub fn new(rollout: Box<dyn RolloutPolicy<G>>) -> Self {
        GreedySampler { rollout }
    }
}

impl<G: Simulation + 'static> Sampler<G> for GreedySampler<G> {
    fn tree_policy(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        root: NodeId,
        rng: &mut dyn RngCore,
    ) -> Option<NodeId> {
        descend(tree, root, rng, |tree, _parent, viable, rng| {
            let unvisited: Vec<NodeId> = viable
                .iter()
                .copied()
                .filter(|&c| tree.visit_count(c) == 0)
                .collect();
            if !unvisited.is_empty() {
                return pick_uniform(&unvisited, rng);
            }
            viable
                .iter()
                .copied()
                .max_by(|&a, &b| {
                    tree.value(a)
                        .partial_cmp(&tree.value(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        })
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
        Box::new(GreedySampler {
            rollout: self.rollout.fork(),
        })
    }
}
