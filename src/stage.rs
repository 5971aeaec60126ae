//! Stage orchestration: run a pool of workers against one shared root until
//! a termination goal holds.
//!
//! The stage's supervising loop blocks on a condvar that workers signal at
//! every cycle boundary, re-checking the goal each time it wakes. Shutdown
//! is cooperative: the stop flag is observed by workers only between cycles,
//! never mid-mutation, so the tree is always left consistent.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rayon::ThreadPoolBuilder;

use crate::error::SearchError;
use crate::evaluators::EvaluationFunction;
use crate::samplers::Sampler;
use crate::savers::{NullSaver, Saver};
use crate::tree::{NodeId, Tree};
use crate::value::ValueUpdater;
use crate::worker::TreeWorker;
use crate::{Command, Simulation, State};

/// Shared search counters. Owned by the stage and handed to every worker,
/// never global state.
#[derive(Debug, Default)]
pub struct SearchStats {
    games_played: AtomicU64,
    timesteps_simulated: AtomicU64,
    reservation_conflicts: AtomicU64,
    replay_aborts: AtomicU64,
    worker_panics: AtomicU64,
}

impl SearchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn games_played(&self) -> u64 {
        self.games_played.load(Ordering::Relaxed)
    }

    pub fn timesteps_simulated(&self) -> u64 {
        self.timesteps_simulated.load(Ordering::Relaxed)
    }

    /// How often selection came back empty-handed because of reservation
    /// races. A retry metric, not an error count.
    pub fn reservation_conflicts(&self) -> u64 {
        self.reservation_conflicts.load(Ordering::Relaxed)
    }

    pub fn replay_aborts(&self) -> u64 {
        self.replay_aborts.load(Ordering::Relaxed)
    }

    pub fn worker_panics(&self) -> u64 {
        self.worker_panics.load(Ordering::Relaxed)
    }

    pub(crate) fn note_game_played(&self) {
        self.games_played.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_timesteps(&self, steps: u64) {
        self.timesteps_simulated.fetch_add(steps, Ordering::Relaxed);
    }

    pub(crate) fn note_reservation_conflict(&self) {
        self.reservation_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_replay_abort(&self) {
        self.replay_aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_worker_panic(&self) {
        self.worker_panics.fetch_add(1, Ordering::Relaxed);
    }
}

/// Stop flag plus the condvar workers ring at each cycle boundary.
pub struct StageSignals {
    stop: AtomicBool,
    finished_workers: AtomicUsize,
    cycle_lock: Mutex<()>,
    cycles: Condvar,
}

impl Default for StageSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl StageSignals {
    pub fn new() -> Self {
        StageSignals {
            stop: AtomicBool::new(false),
            finished_workers: AtomicUsize::new(0),
            cycle_lock: Mutex::new(()),
            cycles: Condvar::new(),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.notify();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn finished_workers(&self) -> usize {
        self.finished_workers.load(Ordering::Acquire)
    }

    pub(crate) fn notify(&self) {
        let _guard = self.cycle_lock.lock();
        self.cycles.notify_all();
    }

    pub(crate) fn worker_finished(&self) {
        self.finished_workers.fetch_add(1, Ordering::AcqRel);
        self.notify();
    }

    fn wait_for_cycle(&self, timeout: Duration) {
        let mut guard = self.cycle_lock.lock();
        // Timed wait: a missed notification costs one timeout, never a hang.
        let _ = self.cycles.wait_for(&mut guard, timeout);
    }
}

/// Everything a worker shares with its stage, passed in explicitly.
pub struct SearchContext<C: Command, S: State> {
    pub tree: Arc<Tree<C, S>>,
    pub root: NodeId,
    pub stats: Arc<SearchStats>,
    pub signals: Arc<StageSignals>,
    pub evaluator: Arc<dyn EvaluationFunction<S>>,
    pub updater: Arc<dyn ValueUpdater>,
}

impl<C: Command, S: State> Clone for SearchContext<C, S> {
    fn clone(&self) -> Self {
        SearchContext {
            tree: Arc::clone(&self.tree),
            root: self.root,
            stats: Arc::clone(&self.stats),
            signals: Arc::clone(&self.signals),
            evaluator: Arc::clone(&self.evaluator),
            updater: Arc::clone(&self.updater),
        }
    }
}

/// When a stage is done, and which nodes constitute its result.
///
/// `begin` runs once before any worker starts; `is_met` is re-evaluated at
/// every cycle boundary; `results` is read after the pool has stopped.
pub trait StageGoal<C: Command, S: State>: Send + Sync {
    fn begin(&mut self, _tree: &Tree<C, S>, _root: NodeId, _stats: &SearchStats) {}

    fn is_met(&self, tree: &Tree<C, S>, root: NodeId, stats: &SearchStats) -> bool;

    fn results(&self, tree: &Tree<C, S>, root: NodeId, stats: &SearchStats) -> Vec<NodeId>;
}

fn ancestor_at_depth<C: Command, S: State>(
    tree: &Tree<C, S>,
    node: NodeId,
    depth: u32,
) -> NodeId {
    let mut current = node;
    while tree.depth(current) > depth {
        match tree.parent(current) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current
}

/// Terminate after a fixed number of games (cycles) played by the pool.
pub struct FixedGames {
    target: u64,
    games_at_start: u64,
}

impl FixedGames {
    pub fn new(target: u64) -> Self {
        FixedGames {
            target,
            games_at_start: 0,
        }
    }
}

impl<C: Command, S: State> StageGoal<C, S> for FixedGames {
    fn begin(&mut self, _tree: &Tree<C, S>, _root: NodeId, stats: &SearchStats) {
        self.games_at_start = stats.games_played();
    }

    fn is_met(&self, _tree: &Tree<C, S>, _root: NodeId, stats: &SearchStats) -> bool {
        stats.games_played().saturating_sub(self.games_at_start) >= self.target
    }

    fn results(&self, tree: &Tree<C, S>, root: NodeId, _stats: &SearchStats) -> Vec<NodeId> {
        tree.leaves_below(root)
    }
}

/// Terminate when any branch reaches `depth` below the stage root, with a
/// games ceiling as the escape hatch. Past the ceiling the stage returns
/// its deepest leaves so far instead of blocking forever.
pub struct MaxDepth {
    depth: u32,
    max_games: u64,
    effective_depth: u32,
    games_at_start: u64,
}

impl MaxDepth {
    pub fn new(depth: u32, max_games: u64) -> Self {
        MaxDepth {
            depth,
            max_games,
            effective_depth: depth,
            games_at_start: 0,
        }
    }
}

impl<C: Command, S: State> StageGoal<C, S> for MaxDepth {
    fn begin(&mut self, tree: &Tree<C, S>, root: NodeId, stats: &SearchStats) {
        self.effective_depth = tree.depth(root) + self.depth;
        self.games_at_start = stats.games_played();
    }

    fn is_met(&self, tree: &Tree<C, S>, root: NodeId, stats: &SearchStats) -> bool {
        tree.is_fully_explored(root)
            || tree.max_branch_depth_below(root) >= self.effective_depth
            || stats.games_played().saturating_sub(self.games_at_start) > self.max_games
    }

    fn results(&self, tree: &Tree<C, S>, root: NodeId, _stats: &SearchStats) -> Vec<NodeId> {
        let leaves = tree.leaves_below(root);
        for &leaf in &leaves {
            if tree.depth(leaf) >= self.effective_depth {
                return vec![ancestor_at_depth(tree, leaf, self.effective_depth)];
            }
        }
        // Goal depth never reached: best-so-far, the deepest leaves found.
        let deepest = leaves.iter().map(|&l| tree.depth(l)).max().unwrap_or(0);
        leaves
            .into_iter()
            .filter(|&l| tree.depth(l) == deepest)
            .collect()
    }
}

/// Terminate when every branch has reached `depth` below the stage root or
/// failed trying: a breadth-first-flavored sweep.
pub struct MinDepth {
    depth: u32,
    effective_depth: u32,
}

impl MinDepth {
    pub fn new(depth: u32) -> Self {
        MinDepth {
            depth,
            effective_depth: depth,
        }
    }
}

impl<C: Command, S: State> StageGoal<C, S> for MinDepth {
    fn begin(&mut self, tree: &Tree<C, S>, root: NodeId, _stats: &SearchStats) {
        self.effective_depth = tree.depth(root) + self.depth;
    }

    fn is_met(&self, tree: &Tree<C, S>, root: NodeId, _stats: &SearchStats) -> bool {
        if tree.is_fully_explored(root) {
            return true;
        }
        // Unfinished breadth at any node shallower than the horizon means
        // some branch still has room to widen.
        tree.nodes_below(root).into_iter().all(|node| {
            tree.depth(node) >= self.effective_depth
                || tree.is_fully_explored(node)
                || tree.untried_count(node) == 0
        })
    }

    fn results(&self, tree: &Tree<C, S>, root: NodeId, _stats: &SearchStats) -> Vec<NodeId> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for leaf in tree.leaves_below(root) {
            if tree.depth(leaf) >= self.effective_depth {
                let trimmed = ancestor_at_depth(tree, leaf, self.effective_depth);
                if seen.insert(trimmed) {
                    out.push(trimmed);
                }
            }
        }
        out
    }
}

/// Never terminates on its own; pair it with the stage's cancel handle.
pub struct SearchForever;

impl<C: Command, S: State> StageGoal<C, S> for SearchForever {
    fn is_met(&self, _tree: &Tree<C, S>, _root: NodeId, _stats: &SearchStats) -> bool {
        false
    }

    fn results(&self, tree: &Tree<C, S>, root: NodeId, _stats: &SearchStats) -> Vec<NodeId> {
        tree.leaves_below(root)
    }
}

/// Stage tuning knobs.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Worker count; `None` means one per logical CPU.
    pub workers: Option<usize>,
    /// Base RNG seed; worker `i` derives its own stream from `seed + i`.
    pub seed: u64,
}

impl Default for StageConfig {
    fn default() -> Self {
        StageConfig {
            workers: None,
            seed: 0,
        }
    }
}

/// What a finished stage hands back.
#[derive(Debug)]
pub struct StageOutcome {
    /// Nodes satisfying the stage goal, or the best-so-far set when the
    /// goal could not be met within its ceiling.
    pub results: Vec<NodeId>,
    pub goal_met: bool,
    pub games_played: u64,
    pub timesteps_simulated: u64,
}

/// One bounded search phase: a worker pool, a shared root, a goal.
pub struct TreeStage<G: Simulation> {
    tree: Arc<Tree<G::Command, G::State>>,
    sampler: Box<dyn Sampler<G>>,
    saver: Box<dyn Saver<G>>,
    goal: Box<dyn StageGoal<G::Command, G::State>>,
    evaluator: Arc<dyn EvaluationFunction<G::State>>,
    updater: Arc<dyn ValueUpdater>,
    config: StageConfig,
    cancel: Arc<AtomicBool>,
    stats: Arc<SearchStats>,
}

impl<G: Simulation> TreeStage<G> {
    pub fn new(
        tree: Arc<Tree<G::Command, G::State>>,
        sampler: Box<dyn Sampler<G>>,
        goal: Box<dyn StageGoal<G::Command, G::State>>,
        evaluator: Arc<dyn EvaluationFunction<G::State>>,
        updater: Arc<dyn ValueUpdater>,
    ) -> Self {
        TreeStage {
            tree,
            sampler,
            saver: Box::new(NullSaver),
            goal,
            evaluator,
            updater,
            config: StageConfig::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SearchStats::new()),
        }
    }

    pub fn with_saver(mut self, saver: Box<dyn Saver<G>>) -> Self {
        self.saver = saver;
        self
    }

    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tree(&self) -> &Arc<Tree<G::Command, G::State>> {
        &self.tree
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Flag another thread can set to cut the stage short. Checked at every
    /// cycle boundary alongside the goal.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Start the pool against the root, block until the goal (or a
    /// cancellation) holds, stop the workers cooperatively, and collect the
    /// result set.
    pub fn run<F>(&mut self, mut sim_factory: F) -> Result<StageOutcome, SearchError>
    where
        F: FnMut(usize) -> G,
    {
        let worker_count = self.config.workers.unwrap_or_else(num_cpus::get).max(1);
        // One extra slot so the supervising loop never displaces a worker.
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count + 1)
            .build()
            .map_err(|e| SearchError::Pool(e.to_string()))?;

        let signals = Arc::new(StageSignals::new());
        let root = self.tree.root();
        self.goal.begin(&self.tree, root, &self.stats);

        let ctx = SearchContext {
            tree: Arc::clone(&self.tree),
            root,
            stats: Arc::clone(&self.stats),
            signals: Arc::clone(&signals),
            evaluator: Arc::clone(&self.evaluator),
            updater: Arc::clone(&self.updater),
        };
        let mut workers: Vec<TreeWorker<G>> = (0..worker_count)
            .map(|i| {
                TreeWorker::new(
                    i,
                    sim_factory(i),
                    self.sampler.fork(),
                    self.saver.fork(),
                    ctx.clone(),
                    self.config.seed.wrapping_add(i as u64),
                )
            })
            .collect();

        log::info!("stage starting with {} workers", worker_count);
        let goal: &dyn StageGoal<G::Command, G::State> = self.goal.as_ref();
        let tree: &Tree<G::Command, G::State> = &self.tree;
        let stats: &SearchStats = &self.stats;
        let cancel: &AtomicBool = &self.cancel;
        pool.scope(|scope| {
            for mut worker in workers.drain(..) {
                scope.spawn(move |_| worker.run());
            }
            loop {
                let done = goal.is_met(tree, root, stats)
                    || cancel.load(Ordering::Acquire)
                    || tree.is_fully_explored(root)
                    || signals.finished_workers() >= worker_count;
                if done {
                    break;
                }
                signals.wait_for_cycle(Duration::from_millis(100));
            }
            signals.request_stop();
        });

        let goal_met = self.goal.is_met(&self.tree, root, &self.stats);
        let results = self.goal.results(&self.tree, root, &self.stats);
        self.saver.report_stage_ending(&self.tree, root, &results);
        log::info!(
            "stage finished: goal_met={}, {} games, {} timesteps, {} result node(s)",
            goal_met,
            self.stats.games_played(),
            self.stats.timesteps_simulated(),
            results.len()
        );
        Ok(StageOutcome {
            results,
            goal_met,
            games_played: self.stats.games_played(),
            timesteps_simulated: self.stats.timesteps_simulated(),
        })
    }
}
