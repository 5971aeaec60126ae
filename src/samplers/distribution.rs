//! Distribution-weighted descent: children are drawn proportionally to a
//! fixed per-action weight instead of a bandit score.

use std::sync::Arc;

use rand::{Rng, RngCore};

use crate::actions::Action;
use crate::samplers::rollout::{RolloutPolicy, RolloutResult};
use crate::samplers::{descend, pick_uniform, Sampler};
use crate::tree::{NodeId, Tree};
use crate::Simulation;

type WeightFn<C> = Arc<dyn Fn(&Action<C>) -> f32 + Send + Sync>;

pub struct DistributionSampler<G: Simulation> {
    weight: WeightFn<G::Command>,
    rollout: Box<dyn RolloutPolicy<G>>,
}

impl<G: Simulation> DistributionSampler<G> {
    /// `weight` assigns every action its fixed sampling weight; negative
    /// weights are treated as zero.
    pub fn new(weight: WeightFn<G::Command>, rollout: Box<dyn RolloutPolicy<G>>) -> Self {
        DistributionSampler { weight, rollout }
    }
}

impl<G: Simulation + 'static> Sampler<G> for DistributionSampler<G> {
    fn tree_policy(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        root: NodeId,
        rng: &mut dyn RngCore,
    ) -> Option<NodeId> {
        let weight = Arc::clone(&self.weight);
        descend(tree, root, rng, move |tree, _parent, viable, rng| {
            let weights: Vec<f32> = viable
                .iter()
                .map(|&c| match tree.action(c) {
                    Some(action) => weight(&action).max(0.0),
                    None => 0.0,
                })
                .collect();
            let total: f32 = weights.iter().sum();
            if total <= 0.0 {
                return pick_uniform(viable, rng);
            }
            let rng = &mut *rng;
            let mut draw = rng.gen_range(0.0..total);
            for (child, w) in viable.iter().zip(&weights) {
                if draw < *w {
                    return Some(*child);
                }
                draw -= w;
            }
            viable.last().copied()
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
        Box::new(DistributionSampler {
            weight: Arc::clone(&self.weight),
            rollout: self.rollout.fork(),
        })
    }
}
