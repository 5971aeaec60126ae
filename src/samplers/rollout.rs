//! Rollout policies: scratch continuations that score a new node without
//! growing the tree.
//!
//! All stepping happens on the worker's private simulation, which the worker
//! guarantees is sitting at the node's state when the rollout starts.

use std::sync::Arc;

use rand::RngCore;

use crate::actions::ActionGenerator;
use crate::evaluators::EvaluationFunction;
use crate::tree::{NodeId, Tree};
use crate::{Simulation, State};

/// What a rollout produced: the score to backpropagate and how many physics
/// timesteps it burned (so the stage's counters stay honest).
#[derive(Debug, Clone, Copy)]
pub struct RolloutResult {
    pub score: f32,
    pub timesteps: u64,
}

/// Scores a freshly expanded node.
pub trait RolloutPolicy<G: Simulation>: Send {
    fn rollout(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        node: NodeId,
        sim: &mut G,
        rng: &mut dyn RngCore,
    ) -> RolloutResult;

    fn fork(&self) -> Box<dyn RolloutPolicy<G>>;
}

/// Step the simulation forward with actions drawn from `generator` until
/// failure, an empty candidate set, or the timestep budget runs out.
/// Returns the final state and the number of timesteps taken.
fn play_out<G: Simulation>(
    tree: &Tree<G::Command, G::State>,
    node: NodeId,
    sim: &mut G,
    generator: &dyn ActionGenerator<G::Command>,
    budget: u64,
    rng: &mut dyn RngCore,
) -> (G::State, u64) {
    let mut state = tree.state(node);
    let mut history = tree.sequence(node);
    let mut depth = tree.depth(node);
    let mut steps = 0u64;
    while steps < budget && !state.is_failed() {
        let candidates = generator.generate(depth, &history);
        let action = match candidates.sample(rng) {
            Some(action) => action,
            None => break,
        };
        for _ in 0..action.duration() {
            state = sim.step(action.command());
            steps += 1;
            if state.is_failed() || steps >= budget {
                break;
            }
        }
        history.push(action);
        depth += 1;
    }
    (state, steps)
}

/// No stepping at all: the score is the node's own evaluation. The cheapest
/// policy, and the right one when the evaluation function already encodes
/// everything worth knowing.
pub struct JustEvaluate<G: Simulation> {
    evaluator: Arc<dyn EvaluationFunction<G::State>>,
}

impl<G: Simulation> JustEvaluate<G> {
    pub fn new(evaluator: Arc<dyn EvaluationFunction<G::State>>) -> Self {
        JustEvaluate { evaluator }
    }
}

impl<G: Simulation + 'static> RolloutPolicy<G> for JustEvaluate<G> {
    fn rollout(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        node: NodeId,
        _sim: &mut G,
        _rng: &mut dyn RngCore,
    ) -> RolloutResult {
        RolloutResult {
            score: tree.with_state(node, |s| self.evaluator.evaluate(s)),
            timesteps: 0,
        }
    }

    fn fork(&self) -> Box<dyn RolloutPolicy<G>> {
        Box::new(JustEvaluate {
            evaluator: Arc::clone(&self.evaluator),
        })
    }
}

/// Keep stepping until the runner falls, then evaluate where it ended up.
/// A generous safety cap bounds simulations that refuse to fail.
pub struct EntireRun<G: Simulation> {
    evaluator: Arc<dyn EvaluationFunction<G::State>>,
    generator: Arc<dyn ActionGenerator<G::Command>>,
    max_timesteps: u64,
}

impl<G: Simulation> EntireRun<G> {
    pub const DEFAULT_MAX_TIMESTEPS: u64 = 100_000;

    pub fn new(
        evaluator: Arc<dyn EvaluationFunction<G::State>>,
        generator: Arc<dyn ActionGenerator<G::Command>>,
    ) -> Self {
        EntireRun {
            evaluator,
            generator,
            max_timesteps: Self::DEFAULT_MAX_TIMESTEPS,
        }
    }

    pub fn with_cap(mut self, max_timesteps: u64) -> Self {
        self.max_timesteps = max_timesteps;
        self
    }
}

impl<G: Simulation + 'static> RolloutPolicy<G> for EntireRun<G> {
    fn rollout(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        node: NodeId,
        sim: &mut G,
        rng: &mut dyn RngCore,
    ) -> RolloutResult {
        let (end, timesteps) = play_out(
            tree,
            node,
            sim,
            self.generator.as_ref(),
            self.max_timesteps,
            rng,
        );
        RolloutResult {
            score: self.evaluator.evaluate(&end),
            timesteps,
        }
    }

    fn fork(&self) -> Box<dyn RolloutPolicy<G>> {
        Box::new(EntireRun {
            evaluator: Arc::clone(&self.evaluator),
            generator: Arc::clone(&self.generator),
            max_timesteps: self.max_timesteps,
        })
    }
}

/// Step a fixed window of timesteps, then evaluate.
pub struct Window<G: Simulation> {
    evaluator: Arc<dyn EvaluationFunction<G::State>>,
    generator: Arc<dyn ActionGenerator<G::Command>>,
    horizon: u64,
}

impl<G: Simulation> Window<G> {
    pub fn new(
        evaluator: Arc<dyn EvaluationFunction<G::State>>,
        generator: Arc<dyn ActionGenerator<G::Command>>,
        horizon: u64,
    ) -> Self {
        Window {
            evaluator,
            generator,
            horizon,
        }
    }
}

impl<G: Simulation + 'static> RolloutPolicy<G> for Window<G> {
    fn rollout(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        node: NodeId,
        sim: &mut G,
        rng: &mut dyn RngCore,
    ) -> RolloutResult {
        let (end, timesteps) =
            play_out(tree, node, sim, self.generator.as_ref(), self.horizon, rng);
        RolloutResult {
            score: self.evaluator.evaluate(&end),
            timesteps,
        }
    }

    fn fork(&self) -> Box<dyn RolloutPolicy<G>> {
        Box::new(Window {
            evaluator: Arc::clone(&self.evaluator),
            generator: Arc::clone(&self.generator),
            horizon: self.horizon,
        })
    }
}

/// A window whose budget shrinks as the start node sits deeper in the tree.
/// Deep nodes already carry a long committed prefix; spending less scratch
/// simulation on them shifts effort toward the frontier.
pub struct DecayingHorizon<G: Simulation> {
    evaluator: Arc<dyn EvaluationFunction<G::State>>,
    generator: Arc<dyn ActionGenerator<G::Command>>,
    base_horizon: u64,
    decay_per_depth: u64,
    min_horizon: u64,
}

impl<G: Simulation> DecayingHorizon<G> {
    pub fn new(
        evaluator: Arc<dyn EvaluationFunction<G::State>>,
        generator: Arc<dyn ActionGenerator<G::Command>>,
        base_horizon: u64,
        decay_per_depth: u64,
        min_horizon: u64,
    ) -> Self {
        DecayingHorizon {
            evaluator,
            generator,
            base_horizon,
            decay_per_depth,
            min_horizon,
        }
    }

    fn budget_at(&self, depth: u32) -> u64 {
        self.base_horizon
            .saturating_sub(self.decay_per_depth * u64::from(depth))
            .max(self.min_horizon)
    }
}

impl<G: Simulation + 'static> RolloutPolicy<G> for DecayingHorizon<G> {
    fn rollout(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        node: NodeId,
        sim: &mut G,
        rng: &mut dyn RngCore,
    ) -> RolloutResult {
        let budget = self.budget_at(tree.depth(node));
        let (end, timesteps) = play_out(tree, node, sim, self.generator.as_ref(), budget, rng);
        RolloutResult {
            score: self.evaluator.evaluate(&end),
            timesteps,
        }
    }

    fn fork(&self) -> Box<dyn RolloutPolicy<G>> {
        Box::new(DecayingHorizon {
            evaluator: Arc::clone(&self.evaluator),
            generator: Arc::clone(&self.generator),
            base_horizon: self.base_horizon,
            decay_per_depth: self.decay_per_depth,
            min_horizon: self.min_horizon,
        })
    }
}

/// Blends the rollout's terminal evaluation with an opaque learned scorer.
/// The scorer is whatever the caller supplies, typically a trained value
/// net, and stays a black box to the engine.
pub struct ValueFunctionWeighted<G: Simulation> {
    evaluator: Arc<dyn EvaluationFunction<G::State>>,
    generator: Arc<dyn ActionGenerator<G::Command>>,
    scorer: Arc<dyn Fn(&G::State) -> f32 + Send + Sync>,
    horizon: u64,
    /// 0.0 trusts the evaluation function alone, 1.0 the scorer alone.
    blend: f32,
}

impl<G: Simulation> ValueFunctionWeighted<G> {
    pub fn new(
        evaluator: Arc<dyn EvaluationFunction<G::State>>,
        generator: Arc<dyn ActionGenerator<G::Command>>,
        scorer: Arc<dyn Fn(&G::State) -> f32 + Send + Sync>,
        horizon: u64,
        blend: f32,
    ) -> Self {
        ValueFunctionWeighted {
            evaluator,
            generator,
            scorer,
            horizon,
            blend: blend.clamp(0.0, 1.0),
        }
    }
}

impl<G: Simulation + 'static> RolloutPolicy<G> for ValueFunctionWeighted<G> {
    fn rollout(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        node: NodeId,
        sim: &mut G,
        rng: &mut dyn RngCore,
    ) -> RolloutResult {
        let (end, timesteps) =
            play_out(tree, node, sim, self.generator.as_ref(), self.horizon, rng);
        let evaluated = self.evaluator.evaluate(&end);
        let learned = (self.scorer)(&end);
        RolloutResult {
            score: (1.0 - self.blend) * evaluated + self.blend * learned,
            timesteps,
        }
    }

    fn fork(&self) -> Box<dyn RolloutPolicy<G>> {
        Box::new(ValueFunctionWeighted {
            evaluator: Arc::clone(&self.evaluator),
            generator: Arc::clone(&self.generator),
            scorer: Arc::clone(&self.scorer),
            horizon: self.horizon,
            blend: self.blend,
        })
    }
}
