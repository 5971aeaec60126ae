//! UCB1 selection behavior: zero-visit preference, random tie-breaking, and
//! insensitivity to sibling order.

mod common;

use std::sync::Arc;

use common::{act, uniform_list, ScriptedSim, TraceState};
use mcts::actions::FixedListGenerator;
use mcts::evaluators::ConstantEvaluator;
use mcts::samplers::rollout::JustEvaluate;
use mcts::samplers::{Sampler, UcbSampler};
use mcts::value::AverageUpdater;
use mcts::{NodeId, Tree};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

fn state(trace: &[u8]) -> TraceState {
    TraceState {
        trace: trace.to_vec(),
        failed: false,
    }
}

fn sampler() -> UcbSampler<ScriptedSim> {
    UcbSampler::with_exploration(
        Box::new(JustEvaluate::new(Arc::new(ConstantEvaluator(0.0)))),
        0.5,
        0.0,
    )
}

/// Root offering exactly `actions`, fully expanded in the given order, with
/// per-child (visits, value) applied through backpropagation on the child
/// alone (scores roll up to the root too, which is fine for UCB).
fn expanded_root(
    actions: &[(u8, u32, f32)], // (command, visits, value)
) -> (Tree<u8, TraceState>, Vec<NodeId>) {
    let menu = uniform_list(
        &actions
            .iter()
            .map(|&(c, _, _)| (c, 1))
            .collect::<Vec<_>>(),
    );
    let tree: Tree<u8, TraceState> =
        Tree::new(state(&[]), Arc::new(FixedListGenerator::new(menu)));
    let root = tree.root();
    let mut children = Vec::new();
    for &(command, visits, value) in actions {
        let child = tree.add_child(root, act(command, 1), state(&[command])).unwrap();
        for _ in 0..visits {
            tree.backpropagate(child, value, &AverageUpdater);
        }
        children.push(child);
    }
    (tree, children)
}

#[test]
fn zero_visit_child_is_always_preferred() {
    // Child 3 has never been visited; the others have.
    for order in [[1u8, 2, 3], [3, 1, 2], [2, 3, 1]] {
        let spec: Vec<(u8, u32, f32)> = order
            .iter()
            .map(|&c| if c == 3 { (c, 0, 0.0) } else { (c, 4, 10.0) })
            .collect();
        let (tree, _children) = expanded_root(&spec);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let mut ucb = sampler();
        let picked = ucb
            .tree_policy(&tree, tree.root(), &mut rng)
            .expect("a node must be reserved");
        assert_eq!(
            tree.action(picked),
            Some(act(3, 1)),
            "the unvisited child must win regardless of sibling order"
        );
    }
}

#[test]
fn ties_between_zero_visit_children_break_randomly() {
    let (tree, children) =
        expanded_root(&[(1, 0, 0.0), (2, 0, 0.0), (3, 6, 5.0)]);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(23);
    let mut ucb = sampler();
    let mut seen = std::collections::HashSet::new();
    for _ in 0..64 {
        let picked = ucb
            .tree_policy(&tree, tree.root(), &mut rng)
            .expect("a node must be reserved");
        seen.insert(picked);
        tree.release_expansion_rights(picked);
    }
    assert!(seen.contains(&children[0]));
    assert!(seen.contains(&children[1]));
    assert!(
        !seen.contains(&children[2]),
        "a visited child must never beat zero-visit siblings"
    );
}

#[test]
fn visited_selection_follows_the_ucb_score_independent_of_order() {
    // Equal visit counts, so the value term decides.
    for order in [[(1u8, 8u32, 1.0f32), (2, 8, 9.0), (3, 8, 4.0)],
                  [(2, 8, 9.0), (3, 8, 4.0), (1, 8, 1.0)]] {
        let (tree, _children) = expanded_root(&order);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let mut ucb = sampler();
        let picked = ucb
            .tree_policy(&tree, tree.root(), &mut rng)
            .expect("a node must be reserved");
        assert_eq!(tree.action(picked), Some(act(2, 1)));
    }
}

#[test]
fn selection_skips_reserved_and_fully_explored_children() {
    let (tree, children) = expanded_root(&[(1, 2, 8.0), (2, 2, 3.0), (3, 2, 1.0)]);
    // The best child is reserved by "another worker"; the runner-up's
    // branch is exhausted.
    assert!(tree.reserve_expansion_rights(children[0]));
    tree.prune_below(children[1]);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(17);
    let mut ucb = sampler();
    let picked = ucb
        .tree_policy(&tree, tree.root(), &mut rng)
        .expect("the remaining child must be selectable");
    assert_eq!(tree.action(picked), Some(act(3, 1)));
}

#[test]
fn selection_descends_into_the_chosen_branch() {
    // One child only; it has untried actions, so selection must stop there.
    let menu = uniform_list(&[(1, 1)]);
    let tree: Tree<u8, TraceState> =
        Tree::new(state(&[]), Arc::new(FixedListGenerator::new(menu)));
    let child = tree
        .add_child(tree.root(), act(1, 1), state(&[1]))
        .unwrap();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
    let mut ucb = sampler();
    let picked = ucb.tree_policy(&tree, tree.root(), &mut rng).unwrap();
    assert_eq!(picked, child);
    assert!(tree.is_reserved(child));
    // While the branch is held, a second worker finds nothing.
    let mut other = sampler();
    assert!(other.tree_policy(&tree, tree.root(), &mut rng).is_none());
}
