//! Actions: commands held over a duration, ordered action sets with sampling
//! distributions, and the per-timestep queue workers drain while replaying.

use std::collections::VecDeque;

use rand::{Rng, RngCore};

use crate::Command;

mod generators;

pub use generators::{
    ActionGenerator, FixedListGenerator, FixedSequenceGenerator, NoRepeatGenerator, NullGenerator,
};

/// One tree edge: a command held for a fixed number of physics timesteps.
///
/// Equality and hashing cover both the command and the duration, so `Surge`
/// held for 10 steps and `Surge` held for 15 are distinct actions.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Action<C: Command> {
    command: C,
    duration: u32,
}

impl<C: Command> Action<C> {
    /// # Panics
    /// Panics if `duration` is zero; an action must span at least one
    /// timestep.
    pub fn new(command: C, duration: u32) -> Self {
        assert!(duration > 0, "an action must last at least one timestep");
        Action { command, duration }
    }

    pub fn command(&self) -> &C {
        &self.command
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }
}

/// How an [`ActionList`] is sampled from.
#[derive(Clone, Debug)]
pub enum Distribution {
    /// Every entry is equally likely.
    Uniform,
    /// Each entry carries a fixed sampling weight, parallel to the entries.
    Weighted(Vec<f32>),
}

/// An ordered, duplicate-free set of candidate actions with an attached
/// sampling distribution.
#[derive(Clone, Debug)]
pub struct ActionList<C: Command> {
    entries: Vec<Action<C>>,
    distribution: Distribution,
}

impl<C: Command> ActionList<C> {
    pub fn empty() -> Self {
        ActionList {
            entries: Vec::new(),
            distribution: Distribution::Uniform,
        }
    }

    /// Build a uniformly-sampled list. Duplicate actions are dropped,
    /// keeping the first occurrence.
    pub fn uniform(actions: Vec<Action<C>>) -> Self {
        let mut entries: Vec<Action<C>> = Vec::with_capacity(actions.len());
        for action in actions {
            if !entries.contains(&action) {
                entries.push(action);
            }
        }
        ActionList {
            entries,
            distribution: Distribution::Uniform,
        }
    }

    /// Build a weight-sampled list. Duplicates are dropped together with
    /// their weights.
    ///
    /// # Panics
    /// Panics if `weights` is not parallel to `actions` or contains a
    /// negative weight.
    pub fn weighted(actions: Vec<Action<C>>, weights: Vec<f32>) -> Self {
        assert_eq!(
            actions.len(),
            weights.len(),
            "one weight per action is required"
        );
        let mut entries: Vec<Action<C>> = Vec::with_capacity(actions.len());
        let mut kept_weights: Vec<f32> = Vec::with_capacity(actions.len());
        for (action, weight) in actions.into_iter().zip(weights) {
            assert!(weight >= 0.0, "sampling weights must be non-negative");
            if !entries.contains(&action) {
                entries.push(action);
                kept_weights.push(weight);
            }
        }
        ActionList {
            entries,
            distribution: Distribution::Weighted(kept_weights),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, action: &Action<C>) -> bool {
        self.entries.contains(action)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action<C>> {
        self.entries.iter()
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// Remove an action (and its weight) if present. Returns whether it was.
    pub fn remove(&mut self, action: &Action<C>) -> bool {
        match self.entries.iter().position(|a| a == action) {
            Some(idx) => {
                self.entries.remove(idx);
                if let Distribution::Weighted(weights) = &mut self.distribution {
                    weights.remove(idx);
                }
                true
            }
            None => false,
        }
    }

    /// Draw one action according to the list's distribution without
    /// removing it. Weighted lists whose weights sum to zero fall back to
    /// uniform sampling.
    pub fn sample(&self, rng: &mut dyn RngCore) -> Option<Action<C>> {
        if self.entries.is_empty() {
            return None;
        }
        let rng = &mut *rng;
        let idx = match &self.distribution {
            Distribution::Uniform => rng.gen_range(0..self.entries.len()),
            Distribution::Weighted(weights) => {
                let total: f32 = weights.iter().sum();
                if total <= 0.0 {
                    rng.gen_range(0..self.entries.len())
                } else {
                    let mut draw = rng.gen_range(0.0..total);
                    let mut chosen = self.entries.len() - 1;
                    for (i, w) in weights.iter().enumerate() {
                        if draw < *w {
                            chosen = i;
                            break;
                        }
                        draw -= w;
                    }
                    chosen
                }
            }
        };
        Some(self.entries[idx].clone())
    }
}

/// FIFO of queued actions drained one physics timestep at a time.
///
/// Workers push the action sequence they need to traverse and then poll a
/// command per timestep; the queue tracks how far through the current
/// action's duration it is.
#[derive(Debug)]
pub struct ActionQueue<C: Command> {
    pending: VecDeque<Action<C>>,
    current: Option<Action<C>>,
    remaining: u32,
}

impl<C: Command> Default for ActionQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Command> ActionQueue<C> {
    pub fn new() -> Self {
        ActionQueue {
            pending: VecDeque::new(),
            current: None,
            remaining: 0,
        }
    }

    pub fn add_action(&mut self, action: Action<C>) {
        self.pending.push_back(action);
    }

    pub fn add_sequence<I: IntoIterator<Item = Action<C>>>(&mut self, actions: I) {
        self.pending.extend(actions);
    }

    /// The action whose command was most recently polled, if any.
    pub fn current_action(&self) -> Option<&Action<C>> {
        self.current.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0 && self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
        self.remaining = 0;
    }

    /// Pop the command for the next timestep, advancing to the next queued
    /// action when the current one's duration is spent.
    pub fn poll_command(&mut self) -> Option<C> {
        if self.remaining == 0 {
            self.current = self.pending.pop_front();
            self.remaining = self.current.as_ref().map_or(0, Action::duration);
        }
        match &self.current {
            Some(action) if self.remaining > 0 => {
                self.remaining -= 1;
                Some(action.command().clone())
            }
            _ => None,
        }
    }
}
