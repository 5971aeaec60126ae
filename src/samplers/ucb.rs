//! Upper confidence bound sampler (UCB1/UCT, depending on who you ask).

use rand::{Rng, RngCore};

use crate::actions::Action;
use crate::error::SearchError;
use crate::samplers::rollout::{RolloutPolicy, RolloutResult};
use crate::samplers::{default_expansion, descend, Sampler};
use crate::tree::{NodeId, Tree};
use crate::Simulation;

/// Descends by UCB1 score: `value + c·sqrt(2·ln(parent visits) / visits)`.
///
/// Zero-visit children have an effectively infinite score and are always
/// preferred, with ties among them broken uniformly at random so sibling
/// order never biases exploration. Each fork draws its own exploration
/// constant `c = exploration_constant + exploration_random_factor·U(0,1)`,
/// which spreads a pool of workers over a range of explore/exploit
/// trade-offs.
pub struct UcbSampler<G: Simulation> {
    pub exploration_constant: f32,
    pub exploration_random_factor: f32,
    c: f32,
    rollout: Box<dyn RolloutPolicy<G>>,
}

impl<G: Simulation> UcbSampler<G> {
    pub fn new(rollout: Box<dyn RolloutPolicy<G>>) -> Self {
        Self::with_exploration(rollout, 1.0, 0.0)
    }

    pub fn with_exploration(
        rollout: Box<dyn RolloutPolicy<G>>,
        exploration_constant: f32,
        exploration_random_factor: f32,
    ) -> Self {
        let c = exploration_constant + exploration_random_factor * rand::thread_rng().gen::<f32>();
        UcbSampler {
            exploration_constant,
            exploration_random_factor,
            c,
            rollout,
        }
    }

    /// The exploration constant this particular fork drew.
    pub fn c(&self) -> f32 {
        self.c
    }
}

impl<G: Simulation + 'static> Sampler<G> for UcbSampler<G> {
    fn tree_policy(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        root: NodeId,
        rng: &mut dyn RngCore,
    ) -> Option<NodeId> {
        let c = f64::from(self.c);
        descend(tree, root, rng, |tree, parent, viable, rng| {
            let (parent_visits, _) = tree.stats(parent);
            let mut unvisited: Vec<NodeId> = Vec::new();
            let mut best: Option<(NodeId, f64)> = None;
            for &child in viable {
                let (visits, value) = tree.stats(child);
                if visits == 0 {
                    unvisited.push(child);
                    continue;
                }
                let exploration =
                    (2.0 * f64::from(parent_visits.max(1)).ln() / f64::from(visits)).sqrt();
                let score = f64::from(value) + c * exploration;
                if best.map_or(true, |(_, b)| score > b) {
                    best = Some((child, score));
                }
            }
            if !unvisited.is_empty() {
                let rng = &mut *rng;
                Some(unvisited[rng.gen_range(0..unvisited.len())])
            } else {
                best.map(|(id, _)| id)
            }
        })
    }

    fn expansion_policy(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        node: NodeId,
        rng: &mut dyn RngCore,
    ) -> Result<Action<G::Command>, SearchError> {
        default_expansion(tree, node, rng)
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
        Box::new(Self::with_exploration(
            self.rollout.fork(),
            self.exploration_constant,
            self.exploration_random_factor,
        ))
    }
}
