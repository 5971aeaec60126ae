//! Error taxonomy for the search engine.
//!
//! Reservation conflicts and simulation failures are deliberately absent:
//! the former is an expected retry signal (`reserve_expansion_rights`
//! returns `false` and a counter tracks it), the latter is a normal terminal
//! outcome that turns a node into a fully-explored leaf.

use thiserror::Error;

use crate::tree::NodeId;

/// Errors surfaced by tree operations, workers, and stages.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Two children of one node would carry the same action. This is a data
    /// or logic error and is never ignored.
    #[error("duplicate child action {action} at depth {depth}")]
    DuplicateAction { action: String, depth: u32 },

    /// A worker attempted a search phase out of order. Indicates a logic
    /// bug; the worker abandons its current game but the pool keeps going.
    #[error("invalid transition: attempted {attempted} while {current}")]
    InvalidTransition {
        current: &'static str,
        attempted: &'static str,
    },

    /// An operation addressed a node that has been retired by pruning or is
    /// out of arena range. Recoverable: selection retries elsewhere.
    #[error("node {0:?} is retired or out of range")]
    DeadNode(NodeId),

    /// The expansion policy was asked for an action on a node with no
    /// untried actions left.
    #[error("no untried actions to expand at node {0:?}")]
    NoUntriedActions(NodeId),

    /// The stage's worker thread pool could not be constructed.
    #[error("failed to build worker pool: {0}")]
    Pool(String),
}
