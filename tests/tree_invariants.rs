//! Structural invariants of the exploration tree: duplicate rejection,
//! fully-explored propagation, sequences, and traversal counts on a fixed
//! 27-node fixture.

mod common;

use std::sync::Arc;

use common::{act, uniform_list, TraceState};
use mcts::actions::FixedListGenerator;
use mcts::{NodeId, SearchError, Tree};

fn state(trace: &[u8]) -> TraceState {
    TraceState {
        trace: trace.to_vec(),
        failed: false,
    }
}

fn failed_state(trace: &[u8]) -> TraceState {
    TraceState {
        trace: trace.to_vec(),
        failed: true,
    }
}

/// Fresh tree whose every node offers the commands 1..=5 (duration 1).
fn open_tree() -> Tree<u8, TraceState> {
    let menu = uniform_list(&[(1, 1), (2, 1), (3, 1), (4, 1), (5, 1)]);
    Tree::new(state(&[]), Arc::new(FixedListGenerator::new(menu)))
}

#[test]
fn root_expands_three_distinct_actions_and_rejects_a_repeat() {
    // Action space {A(10 steps), B(15), C(12)}.
    let menu = uniform_list(&[(1, 10), (2, 15), (3, 12)]);
    let tree: Tree<u8, TraceState> =
        Tree::new(state(&[]), Arc::new(FixedListGenerator::new(menu)));
    let root = tree.root();

    tree.add_child(root, act(1, 10), state(&[1])).unwrap();
    tree.add_child(root, act(2, 15), state(&[2])).unwrap();
    tree.add_child(root, act(3, 12), state(&[3])).unwrap();

    // A fourth expansion re-trying A on the root must be rejected.
    let err = tree.add_child(root, act(1, 10), state(&[1])).unwrap_err();
    assert!(matches!(err, SearchError::DuplicateAction { .. }));

    assert_eq!(tree.untried_count(root), 0);
    assert_eq!(tree.children(root).len(), 3);
}

#[test]
fn no_two_siblings_share_an_action_anywhere() {
    let tree = open_tree();
    let root = tree.root();
    let a = tree.add_child(root, act(1, 1), state(&[1])).unwrap();
    let b = tree.add_child(root, act(2, 1), state(&[2])).unwrap();
    for parent in [a, b] {
        tree.add_child(parent, act(1, 1), state(&[0, 1])).unwrap();
        tree.add_child(parent, act(2, 1), state(&[0, 2])).unwrap();
    }
    for node in tree.nodes_below(root) {
        let children = tree.children(node);
        let actions: Vec<_> = children.iter().map(|&c| tree.action(c)).collect();
        let mut dedup = actions.clone();
        dedup.sort_by_key(|a| format!("{:?}", a));
        dedup.dedup();
        assert_eq!(actions.len(), dedup.len());
    }
}

#[test]
fn fully_explored_leaves_propagate_to_every_ancestor() {
    // A three-level line: root -> a -> b, with b's alternatives all failed.
    let menu = uniform_list(&[(1, 1), (2, 1)]);
    let tree: Tree<u8, TraceState> =
        Tree::new(state(&[]), Arc::new(FixedListGenerator::new(menu)));
    let root = tree.root();
    let a = tree.add_child(root, act(1, 1), state(&[1])).unwrap();
    let a2 = tree.add_child(root, act(2, 1), failed_state(&[2])).unwrap();
    let b = tree.add_child(a, act(1, 1), failed_state(&[1, 1])).unwrap();
    let b2 = tree.add_child(a, act(2, 1), failed_state(&[1, 2])).unwrap();

    assert!(tree.is_fully_explored(a2));
    assert!(tree.is_fully_explored(b));
    assert!(tree.is_fully_explored(b2));
    assert!(!tree.is_fully_explored(a));
    assert!(!tree.is_fully_explored(root));

    // Recomputing from a leaf reaches the root once nothing is left.
    tree.propagate_fully_explored(b);
    assert!(tree.is_fully_explored(a));
    assert!(tree.is_fully_explored(root));
}

#[test]
fn sequence_is_the_root_to_node_action_list() {
    let tree = open_tree();
    let root = tree.root();
    let a = tree.add_child(root, act(3, 1), state(&[3])).unwrap();
    let b = tree.add_child(a, act(1, 1), state(&[3, 1])).unwrap();
    let c = tree.add_child(b, act(5, 1), state(&[3, 1, 5])).unwrap();
    assert_eq!(tree.sequence(root), vec![]);
    assert_eq!(tree.sequence(c), vec![act(3, 1), act(1, 1), act(5, 1)]);
    assert_eq!(tree.depth(c), 3);
}

/// Build the 27-node reference fixture: a root with 3 first-level children
/// and branches reaching depth 6. Returns every node id.
fn build_fixture(tree: &Tree<u8, TraceState>) -> Vec<NodeId> {
    let root = tree.root();
    let mut all = vec![root];
    let mut chain = |from: NodeId, commands: &[u8], all: &mut Vec<NodeId>| -> NodeId {
        let mut current = from;
        for &c in commands {
            current = tree
                .add_child(current, act(c, 1), state(&[c]))
                .expect("fixture actions are unique per sibling");
            all.push(current);
        }
        current
    };

    // First subtree: a depth-6 spine with two stubs. 6 + 2 = 8 nodes.
    chain(root, &[1, 1, 1, 1, 1, 1], &mut all);
    let first = tree.children(root)[0];
    chain(first, &[2], &mut all);
    chain(first, &[3], &mut all);

    // Second subtree: depth-4 spine, forked twice at its tip. 4 + 3 + 2 = 9.
    let tip = chain(root, &[2, 1, 1, 1], &mut all);
    chain(tip, &[1, 2], &mut all);
    chain(tip, &[2], &mut all);
    let second = tree.children(root)[1];
    chain(second, &[2, 2], &mut all);

    // Third subtree: three branches off one node. 1 + 2 + 3 + 3 = 9 nodes.
    let third = chain(root, &[3], &mut all);
    chain(third, &[1, 1], &mut all);
    chain(third, &[2, 1, 1], &mut all);
    chain(third, &[3, 1, 1], &mut all);

    all
}

#[test]
fn descendant_counts_match_traversals_on_the_27_node_fixture() {
    let tree = open_tree();
    let nodes = build_fixture(&tree);
    assert_eq!(nodes.len(), 27, "fixture must have exactly 27 nodes");
    assert_eq!(tree.len(), 27);
    assert_eq!(tree.children(tree.root()).len(), 3);
    assert_eq!(tree.max_branch_depth_below(tree.root()), 6);

    for &node in &nodes {
        assert_eq!(
            tree.count_descendants(node),
            tree.nodes_below(node).len() - 1
        );
    }

    // Leaves partition: every node is a leaf or has a descendant leaf.
    let leaves = tree.leaves_below(tree.root());
    assert!(!leaves.is_empty());
    for &leaf in &leaves {
        assert!(tree.children(leaf).is_empty());
    }
    let total: usize = tree.nodes_below(tree.root()).len();
    assert_eq!(total, 27);
}

#[test]
fn pruning_a_branch_retires_it_and_closes_it_to_selection() {
    let tree = open_tree();
    let nodes = build_fixture(&tree);
    let root = tree.root();
    let first = tree.children(root)[0];
    let before = tree.nodes_below(root).len();
    let pruned_subtree = tree.count_descendants(first);

    tree.prune_below(first);

    assert!(tree.is_fully_explored(first));
    assert_eq!(tree.count_descendants(first), 0);
    assert_eq!(
        tree.nodes_below(root).len(),
        before - pruned_subtree
    );
    // Arena slots are not reclaimed, only detached.
    assert_eq!(tree.len(), nodes.len());
}
