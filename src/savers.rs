//! Reporting hooks. The engine fires these at well-defined points and never
//! looks at the result; what a saver does with them (files, plots, metrics)
//! is entirely its own business.

use crate::actions::Action;
use crate::tree::{NodeId, Tree};
use crate::Simulation;

/// Fire-and-forget observer of one worker's search activity.
///
/// Each worker gets its own fork, so implementations may buffer freely
/// without synchronization; `report_stage_ending` is called once, by the
/// stage, on the stage's own saver.
pub trait Saver<G: Simulation>: Send {
    /// A worker reset its simulation and started a fresh game.
    fn report_game_initialization(&mut self, _state: &G::State) {}

    /// A worker executed one physics timestep under `action`.
    fn report_timestep(&mut self, _action: &Action<G::Command>, _sim: &G) {}

    /// A worker finished a search cycle; `node` is the expanded child.
    fn report_game_ending(&mut self, _tree: &Tree<G::Command, G::State>, _node: NodeId) {}

    /// The stage met (or gave up on) its goal with these result nodes.
    fn report_stage_ending(
        &mut self,
        _tree: &Tree<G::Command, G::State>,
        _root: NodeId,
        _targets: &[NodeId],
    ) {
    }

    /// Copy this saver for another worker.
    fn fork(&self) -> Box<dyn Saver<G>>;
}

/// Discards everything. The default.
pub struct NullSaver;

impl<G: Simulation> Saver<G> for NullSaver {
    fn fork(&self) -> Box<dyn Saver<G>> {
        Box::new(NullSaver)
    }
}

/// Routes reports to the `log` facade: games at debug level, timesteps at
/// trace, stage endings at info.
pub struct LogSaver {
    games: u64,
}

impl LogSaver {
    pub fn new() -> Self {
        LogSaver { games: 0 }
    }
}

impl Default for LogSaver {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Simulation> Saver<G> for LogSaver {
    fn report_game_initialization(&mut self, _state: &G::State) {
        self.games += 1;
        log::debug!("game {} initialized", self.games);
    }

    fn report_timestep(&mut self, action: &Action<G::Command>, _sim: &G) {
        log::trace!("timestep under {:?}", action);
    }

    fn report_game_ending(&mut self, tree: &Tree<G::Command, G::State>, node: NodeId) {
        log::debug!(
            "game ended at depth {} (visits {})",
            tree.depth(node),
            tree.visit_count(node)
        );
    }

    fn report_stage_ending(
        &mut self,
        tree: &Tree<G::Command, G::State>,
        root: NodeId,
        targets: &[NodeId],
    ) {
        log::info!(
            "stage over: {} nodes below root, {} result node(s)",
            tree.count_descendants(root) + 1,
            targets.len()
        );
    }

    fn fork(&self) -> Box<dyn Saver<G>> {
        Box::new(LogSaver { games: 0 })
    }
}
