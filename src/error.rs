//! Error types shared by the planner and the training loop.

use crate::mcts::NodeId;

/// Errors raised by tree bookkeeping, collaborators and the pretraining loop.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("Action {action} out of range for node with {n_actions} actions")]
    ActionOutOfRange { action: usize, n_actions: usize },

    #[error("{0} is the root and has no parent statistics")]
    RootHasNoParent(NodeId),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("{0} is already expanded")]
    AlreadyExpanded(NodeId),

    #[error("{0} has not been expanded")]
    NotExpanded(NodeId),

    #[error("{0} has no actions to select from")]
    NoActions(NodeId),

    #[error("{0} has no virtual loss in flight")]
    NoVirtualLoss(NodeId),

    #[error("Invalid prior: {0}")]
    InvalidPrior(String),

    #[error("Missing key: {0}")]
    MissingKey(String),

    #[error("Offline buffer is empty")]
    EmptyBuffer,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
