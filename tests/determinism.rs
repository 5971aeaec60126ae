//! Replay round-trip: any node's stored snapshot is reproduced exactly by
//! replaying its action sequence through a fresh simulation.

use std::sync::Arc;

use mcts::actions::FixedListGenerator;
use mcts::evaluators::DistanceEvaluator;
use mcts::samplers::rollout::Window;
use mcts::samplers::UcbSampler;
use mcts::sims::hopper::{Gait, Hopper, HopperState};
use mcts::stage::{FixedGames, StageConfig, TreeStage};
use mcts::value::AverageUpdater;
use mcts::{Action, ActionList, Simulation, State, Tree};

#[test]
fn every_node_state_survives_a_replay_round_trip() {
    let mut bootstrap = Hopper::new();
    let root_state = bootstrap.reset();
    let menu = ActionList::uniform(vec![
        Action::new(Gait::Surge, 2),
        Action::new(Gait::Coast, 3),
        Action::new(Gait::Recover, 2),
    ]);
    let generator = Arc::new(FixedListGenerator::new(menu));
    let tree: Arc<Tree<Gait, HopperState>> = Arc::new(Tree::new(root_state, generator.clone()));

    let sampler = UcbSampler::with_exploration(
        Box::new(Window::new(Arc::new(DistanceEvaluator), generator, 10)),
        1.0,
        0.5,
    );
    let mut stage: TreeStage<Hopper> = TreeStage::new(
        Arc::clone(&tree),
        Box::new(sampler),
        Box::new(FixedGames::new(40)),
        Arc::new(DistanceEvaluator),
        Arc::new(AverageUpdater),
    )
    .with_config(StageConfig {
        workers: Some(4),
        seed: 7,
    });
    stage.run(|_| Hopper::new()).unwrap();

    let nodes = tree.nodes_below(tree.root());
    assert!(nodes.len() > 20, "the stage should have grown a real tree");

    for node in nodes {
        let sequence = tree.sequence(node);
        assert_eq!(sequence.len() as u32, tree.depth(node));

        let mut sim = Hopper::new();
        let mut state = sim.reset();
        for action in &sequence {
            for _ in 0..action.duration() {
                state = sim.step(action.command());
                // Workers stop stepping the moment a failure appears;
                // replay must not run the remainder of the action.
                if state.is_failed() {
                    break;
                }
            }
            if state.is_failed() {
                break;
            }
        }
        assert_eq!(
            state,
            tree.state(node),
            "replaying {:?} diverged",
            sequence
        );
    }
}
