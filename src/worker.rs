//! The per-thread search worker.
//!
//! A worker owns one private simulation and loops through the search cycle:
//! select a promising node (reserving it), replay the command history to get
//! the simulation there, expand one child, score it with a rollout, fold the
//! score back up the tree, release the reservation. The stop signal is only
//! observed between cycles, so a stopping worker never leaves an orphaned
//! reservation or a half-mutated node behind.

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::actions::{Action, ActionQueue};
use crate::error::SearchError;
use crate::samplers::Sampler;
use crate::savers::Saver;
use crate::stage::SearchContext;
use crate::tree::NodeId;
use crate::{Simulation, State};

/// Where a worker currently is in its cycle. Mostly useful for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Initializing,
    Selecting,
    Expanding,
    RollingOut,
    Backpropagating,
}

enum Cycle {
    Completed,
    /// Something recoverable went wrong (stale branch, lost reservation
    /// race past the retry limit); the worker just starts a new cycle.
    Aborted,
    StopRequested,
    /// The whole tree below the stage root is fully explored.
    TreeExhausted,
}

enum Selection {
    Target(NodeId),
    Exhausted,
    Stalled,
}

/// Bounded selection retries before the worker gives the cycle up and
/// re-checks the stop signal.
const SELECT_RETRY_LIMIT: u32 = 32;
const BACKOFF_CAP: Duration = Duration::from_millis(64);
/// Consecutive contained panics before a worker parks itself as unusable.
const MAX_CONSECUTIVE_PANICS: u32 = 8;

/// A single-threaded search actor. One instance per pool thread, each with
/// its own simulation, sampler fork, saver fork, and RNG.
pub struct TreeWorker<G: Simulation> {
    id: usize,
    game: G,
    sampler: Box<dyn Sampler<G>>,
    saver: Box<dyn Saver<G>>,
    ctx: SearchContext<G::Command, G::State>,
    rng: Xoshiro256PlusPlus,
    queue: ActionQueue<G::Command>,
    /// Actions fully executed on the private simulation since its last
    /// reset. When a new target's sequence extends this history, the worker
    /// resumes from where the simulation already is instead of replaying
    /// from scratch.
    history: Vec<Action<G::Command>>,
    /// False once the simulation has diverged from `history` (rollout
    /// stepping, failure, abandoned cycle); forces a reset next replay.
    history_valid: bool,
    /// The node whose expansion reservation this worker currently holds.
    reserved: Option<NodeId>,
    steps_this_cycle: u64,
    consecutive_panics: u32,
    status: WorkerStatus,
}

impl<G: Simulation> TreeWorker<G> {
    pub fn new(
        id: usize,
        game: G,
        sampler: Box<dyn Sampler<G>>,
        saver: Box<dyn Saver<G>>,
        ctx: SearchContext<G::Command, G::State>,
        seed: u64,
    ) -> Self {
        TreeWorker {
            id,
            game,
            sampler,
            saver,
            ctx,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            queue: ActionQueue::new(),
            history: Vec::new(),
            history_valid: false,
            reserved: None,
            steps_this_cycle: 0,
            consecutive_panics: 0,
            status: WorkerStatus::Idle,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    /// Run cycles until the stage requests a stop, the tree is exhausted,
    /// or the worker becomes unusable. Each cycle runs under a panic guard:
    /// a panicking cycle is logged, its game abandoned, and the worker
    /// re-initialized, so one bad cycle never takes the pool down.
    pub fn run(&mut self) {
        log::debug!("worker {} starting", self.id);
        loop {
            if self.ctx.signals.stop_requested() {
                break;
            }
            let cycle = panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle()));
            match cycle {
                Ok(Ok(Cycle::Completed)) => {
                    self.consecutive_panics = 0;
                }
                Ok(Ok(Cycle::Aborted)) => {}
                Ok(Ok(Cycle::StopRequested)) => break,
                Ok(Ok(Cycle::TreeExhausted)) => {
                    log::debug!("worker {}: tree fully explored", self.id);
                    break;
                }
                Ok(Err(error)) => {
                    log::error!("worker {}: abandoning game: {}", self.id, error);
                    self.abandon_game();
                }
                Err(_) => {
                    self.ctx.stats.note_worker_panic();
                    self.consecutive_panics += 1;
                    log::error!("worker {}: panic contained, re-initializing", self.id);
                    self.abandon_game();
                    if self.consecutive_panics >= MAX_CONSECUTIVE_PANICS {
                        log::error!("worker {}: too many consecutive panics, parking", self.id);
                        break;
                    }
                }
            }
        }
        self.status = WorkerStatus::Idle;
        self.ctx.signals.worker_finished();
        log::debug!("worker {} stopped", self.id);
    }

    fn run_cycle(&mut self) -> Result<Cycle, SearchError> {
        self.status = WorkerStatus::Selecting;
        let target = match self.select() {
            Selection::Target(id) => id,
            Selection::Exhausted => return Ok(Cycle::TreeExhausted),
            Selection::Stalled => {
                return Ok(if self.ctx.signals.stop_requested() {
                    Cycle::StopRequested
                } else {
                    Cycle::Aborted
                });
            }
        };
        self.reserved = Some(target);

        if !self.replay_to(target) {
            // Stale branch: the node failed mid-replay or was pruned away.
            self.ctx.stats.note_replay_abort();
            self.abandon_game();
            return Ok(Cycle::Aborted);
        }

        self.status = WorkerStatus::Expanding;
        let action = self
            .sampler
            .expansion_policy(&self.ctx.tree, target, &mut self.rng)?;
        let end_state = match self.run_action(&action) {
            Some(state) => state,
            None => {
                return Err(SearchError::InvalidTransition {
                    current: "expanding",
                    attempted: "zero-length action execution",
                })
            }
        };
        let failed = end_state.is_failed();
        let child = self
            .ctx
            .tree
            .add_child(target, action.clone(), end_state.clone())?;
        if failed {
            self.history_valid = false;
        } else {
            self.history.push(action);
        }

        self.status = WorkerStatus::RollingOut;
        let score = if failed {
            // The runner fell on the expansion itself; no extra stepping,
            // the score is the evaluation of the failure state.
            self.ctx.evaluator.evaluate(&end_state)
        } else {
            let result = self
                .sampler
                .rollout(&self.ctx.tree, child, &mut self.game, &mut self.rng);
            self.steps_this_cycle += result.timesteps;
            if result.timesteps > 0 {
                self.history_valid = false;
            }
            result.score
        };

        self.status = WorkerStatus::Backpropagating;
        self.ctx
            .tree
            .backpropagate(child, score, self.ctx.updater.as_ref());
        self.ctx.tree.release_expansion_rights(target);
        self.reserved = None;
        self.ctx.tree.propagate_fully_explored(child);
        self.saver.report_game_ending(&self.ctx.tree, child);
        self.ctx.stats.note_game_played();
        self.flush_steps();
        self.ctx.signals.notify();
        self.status = WorkerStatus::Idle;
        Ok(Cycle::Completed)
    }

    /// Tree policy with bounded retry and exponential back-off. A `None`
    /// from the sampler usually means a reservation probe lost its race;
    /// sleeping briefly instead of spinning lets the winner finish.
    fn select(&mut self) -> Selection {
        let mut backoff = Duration::from_millis(1);
        for _ in 0..SELECT_RETRY_LIMIT {
            if self.ctx.signals.stop_requested() {
                return Selection::Stalled;
            }
            if self.ctx.tree.is_fully_explored(self.ctx.root) {
                return Selection::Exhausted;
            }
            match self
                .sampler
                .tree_policy(&self.ctx.tree, self.ctx.root, &mut self.rng)
            {
                Some(target) => return Selection::Target(target),
                None => {
                    self.ctx.stats.note_reservation_conflict();
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }
        Selection::Stalled
    }

    /// Bring the private simulation to `target`'s state, resuming from the
    /// already-executed history when the target's sequence extends it.
    /// Returns false if the branch turned out stale (retired, or failure
    /// observed on ground that was supposedly safe).
    fn replay_to(&mut self, target: NodeId) -> bool {
        if self.ctx.tree.is_retired(target) {
            return false;
        }
        let sequence = self.ctx.tree.sequence(target);
        let resume_from = if self.history_valid
            && sequence.len() >= self.history.len()
            && sequence[..self.history.len()] == self.history[..]
        {
            self.history.len()
        } else {
            self.initialize_game();
            0
        };
        for action in &sequence[resume_from..] {
            let state = match self.run_action(action) {
                Some(state) => state,
                None => return false,
            };
            if state.is_failed() {
                self.history_valid = false;
                return false;
            }
            self.history.push(action.clone());
        }
        true
    }

    fn initialize_game(&mut self) {
        self.status = WorkerStatus::Initializing;
        self.queue.clear();
        self.history.clear();
        self.history_valid = true;
        let initial = self.game.reset();
        self.saver.report_game_initialization(&initial);
        self.status = WorkerStatus::Selecting;
    }

    /// Queue one action and drain it a timestep at a time, reporting each
    /// step to the saver. Stops early on failure. Returns the last state
    /// reached, or `None` if nothing was executed.
    fn run_action(&mut self, action: &Action<G::Command>) -> Option<G::State> {
        self.queue.add_action(action.clone());
        let mut last = None;
        while let Some(command) = self.queue.poll_command() {
            let state = self.game.step(&command);
            self.steps_this_cycle += 1;
            if let Some(current) = self.queue.current_action() {
                self.saver.report_timestep(current, &self.game);
            }
            let failed = state.is_failed();
            last = Some(state);
            if failed {
                self.queue.clear();
                break;
            }
        }
        last
    }

    /// Drop whatever the current cycle was doing: give back the
    /// reservation, poison the history cache, flush step counters.
    fn abandon_game(&mut self) {
        if let Some(node) = self.reserved.take() {
            self.ctx.tree.release_expansion_rights(node);
        }
        self.queue.clear();
        self.history.clear();
        self.history_valid = false;
        self.flush_steps();
        self.status = WorkerStatus::Idle;
    }

    fn flush_steps(&mut self) {
        if self.steps_this_cycle > 0 {
            self.ctx.stats.add_timesteps(self.steps_this_cycle);
            self.steps_this_cycle = 0;
        }
    }
}
