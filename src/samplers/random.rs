//! Uniform-random descent. No statistics involved; useful as a baseline and
//! for seeding a fresh tree with breadth.

use rand::RngCore;

use crate::samplers::rollout::{RolloutPolicy, RolloutResult};
use crate::samplers::{descend, pick_uniform, Sampler};
use crate::tree::{NodeId, Tree};
use crate::Simulation;

pub struct RandomSampler<G: Simulation> {
    rollout: Box<dyn RolloutPolicy<G>>,
}

impl<G: Simulation> RandomSampler<G> {
    pub fn new(rollout: Box<dyn RolloutPolicy<G>>) -> Self {
        RandomSampler { rollout }
    }
}

impl<G: Simulation + 'static> Sampler<G> for RandomSampler<G> {
    fn tree_policy(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        root: NodeId,
        rng: &mut dyn RngCore,
    ) -> Option<NodeId> {
        descend(tree, root, rng, |_tree, _parent, viable, rng| {
            pick_uniform(viable, rng)
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
        Box::new(RandomSampler {
            rollout: self.rollout.fork(),
        })
    }
}
