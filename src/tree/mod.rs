//! The shared exploration tree.
//!
//! Nodes live in an append-only arena and are addressed by stable [`NodeId`]
//! handles, which sidesteps parent/child ownership cycles and keeps per-node
//! counters accessible without locking the whole tree. Node creation briefly
//! takes the arena's write lock; selection, statistics, and traversal share
//! the read lock and go through per-node atomics and mutexes.
//!
//! Locking order is arena lock before any node's links mutex, and never two
//! links mutexes at once.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::RngCore;

use crate::actions::{Action, ActionGenerator, ActionList};
use crate::error::SearchError;
use crate::value::ValueUpdater;
use crate::{Command, State};

mod node;

pub(crate) use node::Node;

/// Stable handle to a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The exploration tree shared by all workers of a stage.
///
/// Handles issued by one tree must not be used with another; indices are
/// arena positions and out-of-range access panics.
pub struct Tree<C: Command, S: State> {
    arena: RwLock<Vec<Node<C, S>>>,
    generator: Arc<dyn ActionGenerator<C>>,
}

impl<C: Command, S: State> Tree<C, S> {
    /// Create a tree with a root already holding its initial state. The
    /// generator assigns candidate actions to the root and to every node
    /// later created by expansion.
    pub fn new(root_state: S, generator: Arc<dyn ActionGenerator<C>>) -> Self {
        let untried = if root_state.is_failed() {
            ActionList::empty()
        } else {
            generator.generate(0, &[])
        };
        let fully_explored = root_state.is_failed() || untried.is_empty();
        let root = Node::new_root(root_state, untried, fully_explored);
        Tree {
            arena: RwLock::new(vec![root]),
            generator,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Total nodes ever created, retired ones included.
    pub fn len(&self) -> usize {
        self.arena.read().len()
    }

    pub fn is_empty(&self) -> bool {
        false // The root always exists.
    }

    // ---- per-node accessors ----

    pub fn depth(&self, id: NodeId) -> u32 {
        self.arena.read()[id.index()].depth
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena.read()[id.index()].parent
    }

    pub fn action(&self, id: NodeId) -> Option<Action<C>> {
        self.arena.read()[id.index()].action.clone()
    }

    pub fn state(&self, id: NodeId) -> S {
        self.arena.read()[id.index()].state.clone()
    }

    /// Run a closure against the node's state without cloning it.
    pub fn with_state<R>(&self, id: NodeId, f: impl FnOnce(&S) -> R) -> R {
        f(&self.arena.read()[id.index()].state)
    }

    /// (visit count, value aggregate), read atomically as a pair.
    pub fn stats(&self, id: NodeId) -> (u32, f32) {
        self.arena.read()[id.index()].stats()
    }

    pub fn visit_count(&self, id: NodeId) -> u32 {
        self.stats(id).0
    }

    pub fn value(&self, id: NodeId) -> f32 {
        self.stats(id).1
    }

    pub fn is_fully_explored(&self, id: NodeId) -> bool {
        self.arena.read()[id.index()].is_fully_explored()
    }

    pub fn is_reserved(&self, id: NodeId) -> bool {
        self.arena.read()[id.index()].is_reserved()
    }

    pub fn is_retired(&self, id: NodeId) -> bool {
        self.arena.read()[id.index()].is_retired()
    }

    /// Live (non-retired) children, in creation order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let arena = self.arena.read();
        let links = arena[id.index()].links.lock();
        links
            .children
            .iter()
            .copied()
            .filter(|c| !arena[c.index()].is_retired())
            .collect()
    }

    /// The live child reached by `action`, if one exists.
    pub fn child_with_action(&self, id: NodeId, action: &Action<C>) -> Option<NodeId> {
        let arena = self.arena.read();
        let links = arena[id.index()].links.lock();
        links.children.iter().copied().find(|c| {
            let child = &arena[c.index()];
            !child.is_retired() && child.action.as_ref() == Some(action)
        })
    }

    pub fn untried_count(&self, id: NodeId) -> usize {
        self.arena.read()[id.index()].links.lock().untried.len()
    }

    /// Snapshot of the node's remaining untried actions.
    pub fn untried_actions(&self, id: NodeId) -> ActionList<C> {
        self.arena.read()[id.index()].links.lock().untried.clone()
    }

    /// Draw one untried action on the node's sampling distribution, leaving
    /// it in place; `add_child` removes it once the expansion lands.
    pub fn sample_untried(&self, id: NodeId, rng: &mut dyn RngCore) -> Option<Action<C>> {
        self.arena.read()[id.index()].links.lock().untried.sample(rng)
    }

    // ---- structural mutation ----

    /// Create a child of `parent` reached by `action`, holding `state`.
    ///
    /// Callers must hold `parent`'s expansion reservation. Fails with
    /// [`SearchError::DuplicateAction`] if a live sibling already carries an
    /// equal action, and with [`SearchError::DeadNode`] if `parent` was
    /// retired underneath the caller. A failed `state` yields a child that
    /// is fully explored from birth; propagation upward is left to the
    /// caller's backpropagation step.
    pub fn add_child(
        &self,
        parent: NodeId,
        action: Action<C>,
        state: S,
    ) -> Result<NodeId, SearchError> {
        let mut arena = self.arena.write();
        let child_id = NodeId(arena.len() as u32);
        let depth;
        let mut history;
        {
            let parent_node = &arena[parent.index()];
            if parent_node.is_retired() {
                return Err(SearchError::DeadNode(parent));
            }
            let links = parent_node.links.lock();
            for &sibling_id in &links.children {
                let sibling = &arena[sibling_id.index()];
                if !sibling.is_retired() && sibling.action.as_ref() == Some(&action) {
                    return Err(SearchError::DuplicateAction {
                        action: format!("{:?}", action),
                        depth: parent_node.depth + 1,
                    });
                }
            }
            depth = parent_node.depth + 1;
            drop(links);
            history = Self::sequence_in(&arena[..], parent);
        }
        history.push(action.clone());

        let untried = if state.is_failed() {
            ActionList::empty()
        } else {
            self.generator.generate(depth, &history)
        };
        let fully_explored = state.is_failed() || untried.is_empty();
        arena.push(Node::new_child(
            parent,
            depth,
            action.clone(),
            state,
            untried,
            fully_explored,
        ));

        let parent_node = &arena[parent.index()];
        let mut links = parent_node.links.lock();
        links.untried.remove(&action);
        links.children.push(child_id);
        Ok(child_id)
    }

    /// Retire everything strictly below `id`, clear its candidate actions,
    /// and propagate the resulting fully-explored status upward. Arena slots
    /// are reclaimed only when the tree is dropped.
    ///
    /// Callers are responsible for making sure no worker holds a reservation
    /// inside the doomed subtree; workers that still replay into it observe
    /// retired nodes and abandon the cycle.
    pub fn prune_below(&self, id: NodeId) {
        {
            let arena = self.arena.read();
            let mut stack: Vec<NodeId> = {
                let mut links = arena[id.index()].links.lock();
                links.untried = ActionList::empty();
                links.children.drain(..).collect()
            };
            while let Some(cur) = stack.pop() {
                let node = &arena[cur.index()];
                if node.retired.swap(true, Ordering::AcqRel) {
                    continue;
                }
                node.reserved.store(false, Ordering::Release);
                node.fully_explored.store(true, Ordering::Release);
                let mut links = node.links.lock();
                links.untried = ActionList::empty();
                stack.extend(links.children.drain(..));
            }
        }
        self.propagate_fully_explored(id);
    }

    // ---- expansion reservation ----

    /// Try to take the node's expansion token. Non-blocking: returns `false`
    /// immediately if another worker holds it, the node is fully explored,
    /// or the node is retired. On success, ancestors whose subtrees are now
    /// entirely taken are marked reserved too, so selection skips them.
    pub fn reserve_expansion_rights(&self, id: NodeId) -> bool {
        let arena = self.arena.read();
        let node = &arena[id.index()];
        if node.is_retired() || node.is_fully_explored() {
            return false;
        }
        if node
            .reserved
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        if let Some(parent) = node.parent {
            Self::saturate_up(&arena[..], parent);
        }
        true
    }

    /// Give the token back and re-open any ancestors that were reserved only
    /// because every path below them was taken.
    pub fn release_expansion_rights(&self, id: NodeId) {
        let arena = self.arena.read();
        let node = &arena[id.index()];
        node.reserved.store(false, Ordering::Release);
        if let Some(parent) = node.parent {
            Self::desaturate_up(&arena[..], parent);
        }
    }

    fn saturate_up(arena: &[Node<C, S>], mut id: NodeId) {
        loop {
            let node = &arena[id.index()];
            let saturated = {
                let links = node.links.lock();
                links.untried.is_empty()
                    && links
                        .children
                        .iter()
                        .all(|&c| !arena[c.index()].is_viable())
            };
            if !saturated {
                return;
            }
            if node
                .reserved
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                return;
            }
            match node.parent {
                Some(parent) => id = parent,
                None => return,
            }
        }
    }

    fn desaturate_up(arena: &[Node<C, S>], mut id: NodeId) {
        loop {
            let node = &arena[id.index()];
            if !node.is_reserved() {
                return;
            }
            let release = {
                let links = node.links.lock();
                // A node with untried actions holds a direct worker
                // reservation, which is not ours to clear.
                if !links.untried.is_empty() {
                    return;
                }
                links.children.iter().any(|&c| arena[c.index()].is_viable())
            };
            if !release {
                return;
            }
            node.reserved.store(false, Ordering::Release);
            match node.parent {
                Some(parent) => id = parent,
                None => return,
            }
        }
    }

    // ---- statistics ----

    /// Fold `score` into `id` and every ancestor up to the root. Updates
    /// from concurrent workers interleave freely; each per-node update is a
    /// single atomic accumulate.
    pub fn backpropagate(&self, id: NodeId, score: f32, updater: &dyn ValueUpdater) {
        let arena = self.arena.read();
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            let node = &arena[cur.index()];
            node.apply_score(score, updater);
            cursor = node.parent;
        }
    }

    /// Recompute the fully-explored flag from the node's current children
    /// and untried actions; while the recomputation says "explored",
    /// continue with the parent. Each pass re-derives the flag from live
    /// state instead of trusting an earlier observation, so racing
    /// propagations are idempotent; the flag is monotonic and only ever
    /// turns on.
    pub fn propagate_fully_explored(&self, id: NodeId) {
        let arena = self.arena.read();
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            let node = &arena[cur.index()];
            let explored = node.state.is_failed() || {
                let links = node.links.lock();
                links.untried.is_empty()
                    && links.children.iter().all(|&c| {
                        let child = &arena[c.index()];
                        child.is_retired() || child.is_fully_explored()
                    })
            };
            if !explored {
                break;
            }
            node.fully_explored.store(true, Ordering::Release);
            cursor = node.parent;
        }
    }

    // ---- traversal ----

    /// Root-to-node action list, O(depth). Empty for the root itself.
    pub fn sequence(&self, id: NodeId) -> Vec<Action<C>> {
        let arena = self.arena.read();
        Self::sequence_in(&arena[..], id)
    }

    fn sequence_in(arena: &[Node<C, S>], id: NodeId) -> Vec<Action<C>> {
        let mut actions = Vec::with_capacity(arena[id.index()].depth as usize);
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            let node = &arena[cur.index()];
            if let Some(action) = &node.action {
                actions.push(action.clone());
            }
            cursor = node.parent;
        }
        actions.reverse();
        actions
    }

    /// All live nodes below and including `id`.
    ///
    /// Safe to run while other workers backpropagate statistics, but not
    /// while the same subtree is being structurally mutated.
    pub fn nodes_below(&self, id: NodeId) -> Vec<NodeId> {
        let arena = self.arena.read();
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let node = &arena[cur.index()];
            if node.is_retired() {
                continue;
            }
            out.push(cur);
            let links = node.links.lock();
            stack.extend(links.children.iter().copied());
        }
        out
    }

    /// Live nodes below and including `id` that have no live children.
    pub fn leaves_below(&self, id: NodeId) -> Vec<NodeId> {
        let arena = self.arena.read();
        let mut leaves = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let node = &arena[cur.index()];
            if node.is_retired() {
                continue;
            }
            let children: Vec<NodeId> = {
                let links = node.links.lock();
                links
                    .children
                    .iter()
                    .copied()
                    .filter(|c| !arena[c.index()].is_retired())
                    .collect()
            };
            if children.is_empty() {
                leaves.push(cur);
            } else {
                stack.extend(children);
            }
        }
        leaves
    }

    /// Number of live descendants of `id`, the node itself excluded.
    pub fn count_descendants(&self, id: NodeId) -> usize {
        let arena = self.arena.read();
        Self::count_below(&arena[..], id)
    }

    fn count_below(arena: &[Node<C, S>], id: NodeId) -> usize {
        let children: Vec<NodeId> = {
            let links = arena[id.index()].links.lock();
            links
                .children
                .iter()
                .copied()
                .filter(|c| !arena[c.index()].is_retired())
                .collect()
        };
        children
            .iter()
            .map(|&c| 1 + Self::count_below(arena, c))
            .sum()
    }

    /// Deepest depth reachable in the live subtree under `id`.
    pub fn max_branch_depth_below(&self, id: NodeId) -> u32 {
        let arena = self.arena.read();
        let mut max_depth = arena[id.index()].depth;
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let node = &arena[cur.index()];
            if node.is_retired() {
                continue;
            }
            max_depth = max_depth.max(node.depth);
            let links = node.links.lock();
            stack.extend(links.children.iter().copied());
        }
        max_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionList, FixedListGenerator};
    use crate::value::AverageUpdater;

    #[derive(Clone, PartialEq, Eq, Debug)]
    struct Flag {
        failed: bool,
    }

    impl State for Flag {
        fn is_failed(&self) -> bool {
            self.failed
        }
    }

    fn ok() -> Flag {
        Flag { failed: false }
    }

    fn act(cmd: u8) -> Action<u8> {
        Action::new(cmd, 1)
    }

    fn three_action_tree() -> Tree<u8, Flag> {
        let list = ActionList::uniform(vec![act(1), act(2), act(3)]);
        Tree::new(ok(), Arc::new(FixedListGenerator::new(list)))
    }

    #[test]
    fn add_child_consumes_untried_action() {
        let tree = three_action_tree();
        assert_eq!(tree.untried_count(tree.root()), 3);
        let child = tree.add_child(tree.root(), act(2), ok()).unwrap();
        assert_eq!(tree.untried_count(tree.root()), 2);
        assert_eq!(tree.depth(child), 1);
        assert_eq!(tree.parent(child), Some(tree.root()));
        assert_eq!(tree.action(child), Some(act(2)));
        // The child gets its own fresh candidate set.
        assert_eq!(tree.untried_count(child), 3);
    }

    #[test]
    fn add_child_rejects_duplicate_action() {
        let tree = three_action_tree();
        tree.add_child(tree.root(), act(1), ok()).unwrap();
        let err = tree.add_child(tree.root(), act(1), ok()).unwrap_err();
        assert!(matches!(err, SearchError::DuplicateAction { .. }));
        assert_eq!(tree.children(tree.root()).len(), 1);
    }

    #[test]
    fn failed_child_is_fully_explored_from_birth() {
        let tree = three_action_tree();
        let child = tree
            .add_child(tree.root(), act(1), Flag { failed: true })
            .unwrap();
        assert!(tree.is_fully_explored(child));
        assert_eq!(tree.untried_count(child), 0);
        assert!(!tree.is_fully_explored(tree.root()));
    }

    #[test]
    fn reservation_is_exclusive_and_releasable() {
        let tree = three_action_tree();
        assert!(tree.reserve_expansion_rights(tree.root()));
        assert!(!tree.reserve_expansion_rights(tree.root()));
        tree.release_expansion_rights(tree.root());
        assert!(tree.reserve_expansion_rights(tree.root()));
    }

    #[test]
    fn reserving_last_viable_child_saturates_parent() {
        let list = ActionList::uniform(vec![act(1)]);
        let tree: Tree<u8, Flag> = Tree::new(ok(), Arc::new(FixedListGenerator::new(list)));
        let child = tree.add_child(tree.root(), act(1), ok()).unwrap();
        // Root has no untried actions left and exactly one viable child.
        assert!(tree.reserve_expansion_rights(child));
        assert!(tree.is_reserved(tree.root()));
        tree.release_expansion_rights(child);
        assert!(!tree.is_reserved(tree.root()));
    }

    #[test]
    fn fully_explored_propagates_to_ancestors() {
        let tree = three_action_tree();
        let a = tree.add_child(tree.root(), act(1), ok()).unwrap();
        let b = tree.add_child(tree.root(), act(2), ok()).unwrap();
        let c = tree.add_child(tree.root(), act(3), ok()).unwrap();
        for &child in &[a, b, c] {
            for cmd in 1..=3 {
                tree.add_child(child, act(cmd), Flag { failed: true })
                    .unwrap();
            }
        }
        // Every grandchild is failed; recompute from one of them.
        for &child in &[a, b, c] {
            tree.propagate_fully_explored(child);
        }
        assert!(tree.is_fully_explored(a));
        assert!(tree.is_fully_explored(tree.root()));
    }

    #[test]
    fn sequence_lists_actions_root_to_node() {
        let tree = three_action_tree();
        let a = tree.add_child(tree.root(), act(1), ok()).unwrap();
        let b = tree.add_child(a, act(3), ok()).unwrap();
        assert!(tree.sequence(tree.root()).is_empty());
        assert_eq!(tree.sequence(b), vec![act(1), act(3)]);
    }

    #[test]
    fn backpropagate_updates_whole_ancestor_chain() {
        let tree = three_action_tree();
        let a = tree.add_child(tree.root(), act(1), ok()).unwrap();
        let b = tree.add_child(a, act(2), ok()).unwrap();
        tree.backpropagate(b, 6.0, &AverageUpdater);
        tree.backpropagate(b, 12.0, &AverageUpdater);
        for id in [b, a, tree.root()] {
            let (visits, value) = tree.stats(id);
            assert_eq!(visits, 2);
            assert!((value - 9.0).abs() < 1e-6);
        }
    }

    #[test]
    fn prune_below_retires_subtree_and_marks_explored() {
        let tree = three_action_tree();
        let a = tree.add_child(tree.root(), act(1), ok()).unwrap();
        let b = tree.add_child(a, act(1), ok()).unwrap();
        tree.add_child(b, act(1), ok()).unwrap();
        tree.prune_below(a);
        assert!(tree.is_fully_explored(a));
        assert!(!tree.is_retired(a));
        assert!(tree.children(a).is_empty());
        assert_eq!(tree.count_descendants(a), 0);
        // The root still has untried actions, so it stays open.
        assert!(!tree.is_fully_explored(tree.root()));
    }

    #[test]
    fn traversals_skip_retired_branches() {
        let tree = three_action_tree();
        let a = tree.add_child(tree.root(), act(1), ok()).unwrap();
        let b = tree.add_child(tree.root(), act(2), ok()).unwrap();
        tree.add_child(a, act(1), ok()).unwrap();
        tree.prune_below(b);
        let below = tree.nodes_below(tree.root());
        assert_eq!(below.len(), 4); // root, a, a's child, b (b itself stays live)
        assert_eq!(tree.count_descendants(tree.root()), 3);
        assert_eq!(tree.max_branch_depth_below(tree.root()), 2);
    }
}
