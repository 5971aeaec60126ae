//! Action generators assign the candidate actions a freshly created node may
//! expand into, keyed on the node's depth and command history.

use std::collections::HashMap;

use crate::{Action, ActionList, Command};

/// Produces the set of legal candidate actions for a node.
///
/// Implementations must be deterministic for a given `(depth, history)` pair:
/// replay-based resumption regenerates candidate sets and relies on getting
/// the same answer every time.
pub trait ActionGenerator<C: Command>: Send + Sync {
    fn generate(&self, depth: u32, history: &[Action<C>]) -> ActionList<C>;
}

/// Cycles through a small number of canonical action lists by tree depth,
/// with optional per-depth exception lists that override the cycle.
///
/// The classic gait pattern (coast, drive-one-leg, coast, drive-the-other)
/// is a four-list cycle; exceptions usually cover the first few depths while
/// the runner is getting moving.
pub struct FixedSequenceGenerator<C: Command> {
    cycle: Vec<ActionList<C>>,
    exceptions: HashMap<u32, ActionList<C>>,
}

impl<C: Command> FixedSequenceGenerator<C> {
    /// # Panics
    /// Panics if `cycle` is empty.
    pub fn new(cycle: Vec<ActionList<C>>) -> Self {
        Self::with_exceptions(cycle, HashMap::new())
    }

    /// # Panics
    /// Panics if `cycle` is empty.
    pub fn with_exceptions(
        cycle: Vec<ActionList<C>>,
        exceptions: HashMap<u32, ActionList<C>>,
    ) -> Self {
        assert!(
            !cycle.is_empty(),
            "a fixed-sequence generator needs at least one action list"
        );
        FixedSequenceGenerator { cycle, exceptions }
    }
}

impl<C: Command> ActionGenerator<C> for FixedSequenceGenerator<C> {
    fn generate(&self, depth: u32, _history: &[Action<C>]) -> ActionList<C> {
        if let Some(list) = self.exceptions.get(&depth) {
            return list.clone();
        }
        self.cycle[depth as usize % self.cycle.len()].clone()
    }
}

/// A base action list minus whatever already appears in the node's history.
/// Keeps branches from re-trying the same action at successive depths.
pub struct NoRepeatGenerator<C: Command> {
    base: ActionList<C>,
}

impl<C: Command> NoRepeatGenerator<C> {
    pub fn new(base: ActionList<C>) -> Self {
        NoRepeatGenerator { base }
    }
}

impl<C: Command> ActionGenerator<C> for NoRepeatGenerator<C> {
    fn generate(&self, _depth: u32, history: &[Action<C>]) -> ActionList<C> {
        let mut list = self.base.clone();
        for action in history {
            list.remove(action);
        }
        list
    }
}

/// The same fixed, finite action list at every depth.
pub struct FixedListGenerator<C: Command> {
    list: ActionList<C>,
}

impl<C: Command> FixedListGenerator<C> {
    pub fn new(list: ActionList<C>) -> Self {
        FixedListGenerator { list }
    }
}

impl<C: Command> ActionGenerator<C> for FixedListGenerator<C> {
    fn generate(&self, _depth: u32, _history: &[Action<C>]) -> ActionList<C> {
        self.list.clone()
    }
}

/// Never generates anything. Nodes created under this generator are leaves
/// by construction; useful for scratch nodes and tests.
pub struct NullGenerator;

impl<C: Command> ActionGenerator<C> for NullGenerator {
    fn generate(&self, _depth: u32, _history: &[Action<C>]) -> ActionList<C> {
        ActionList::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(cmds: &[u8]) -> ActionList<u8> {
        ActionList::uniform(cmds.iter().map(|&c| Action::new(c, 1)).collect())
    }

    #[test]
    fn fixed_sequence_cycles_by_depth() {
        let gen = FixedSequenceGenerator::new(vec![list(&[1]), list(&[2]), list(&[3])]);
        assert!(gen.generate(0, &[]).contains(&Action::new(1, 1)));
        assert!(gen.generate(4, &[]).contains(&Action::new(2, 1)));
        assert!(gen.generate(5, &[]).contains(&Action::new(3, 1)));
    }

    #[test]
    fn fixed_sequence_exceptions_override_cycle() {
        let mut exceptions = HashMap::new();
        exceptions.insert(1, list(&[9]));
        let gen = FixedSequenceGenerator::with_exceptions(vec![list(&[1]), list(&[2])], exceptions);
        let at_one = gen.generate(1, &[]);
        assert_eq!(at_one.len(), 1);
        assert!(at_one.contains(&Action::new(9, 1)));
    }

    #[test]
    fn no_repeat_excludes_history() {
        let gen = NoRepeatGenerator::new(list(&[1, 2, 3]));
        let history = vec![Action::new(2, 1)];
        let out = gen.generate(3, &history);
        assert_eq!(out.len(), 2);
        assert!(!out.contains(&Action::new(2, 1)));
    }

    #[test]
    fn null_generator_is_empty() {
        let gen = NullGenerator;
        let out = <NullGenerator as ActionGenerator<u8>>::generate(&gen, 0, &[]);
        assert!(out.is_empty());
    }
}
