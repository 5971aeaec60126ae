//! Shared fixtures: a fully deterministic mock simulation that records every
//! command it executes, plus small action-list builders.
#![allow(dead_code)] // Each integration-test crate uses a different subset.

use mcts::evaluators::Progress;
use mcts::{Action, ActionList, Simulation, State};

/// State of the scripted simulation: the exact command trace so far.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct TraceState {
    pub trace: Vec<u8>,
    pub failed: bool,
}

impl State for TraceState {
    fn is_failed(&self) -> bool {
        self.failed
    }
}

impl Progress for TraceState {
    fn horizontal_distance(&self) -> f32 {
        self.trace.iter().map(|&c| f32::from(c)).sum()
    }
}

/// Deterministic mock simulation. Replay-compatible by construction: the
/// state IS the command history.
pub struct ScriptedSim {
    state: TraceState,
    /// Fail once the trace reaches this many timesteps.
    pub fail_after: Option<usize>,
    /// Fail the moment this command is stepped.
    pub fail_on: Option<u8>,
}

impl ScriptedSim {
    pub fn new() -> Self {
        ScriptedSim {
            state: TraceState {
                trace: Vec::new(),
                failed: false,
            },
            fail_after: None,
            fail_on: None,
        }
    }

    pub fn failing_after(steps: usize) -> Self {
        let mut sim = Self::new();
        sim.fail_after = Some(steps);
        sim
    }

    pub fn failing_on(command: u8) -> Self {
        let mut sim = Self::new();
        sim.fail_on = Some(command);
        sim
    }
}

impl Simulation for ScriptedSim {
    type Command = u8;
    type State = TraceState;

    fn reset(&mut self) -> TraceState {
        self.state = TraceState {
            trace: Vec::new(),
            failed: false,
        };
        self.state.clone()
    }

    fn step(&mut self, command: &u8) -> TraceState {
        if !self.state.failed {
            self.state.trace.push(*command);
            let hit_limit = self
                .fail_after
                .map_or(false, |n| self.state.trace.len() >= n);
            if hit_limit || self.fail_on == Some(*command) {
                self.state.failed = true;
            }
        }
        self.state.clone()
    }
}

pub fn act(command: u8, duration: u32) -> Action<u8> {
    Action::new(command, duration)
}

pub fn uniform_list(entries: &[(u8, u32)]) -> ActionList<u8> {
    ActionList::uniform(entries.iter().map(|&(c, d)| act(c, d)).collect())
}
