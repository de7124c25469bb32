//! MCTS selection policies.
//!
//! Selection is trait-based so a planner can swap the scoring rule without
//! touching the tree bookkeeping.

use std::cmp::Ordering;

use super::config::MCTSConfig;
use super::node::{MCTSNode, NodeId};
use crate::error::{PlannerError, Result};

/// Policy for selecting which child action to explore.
pub trait SelectionPolicy: Send + Sync {
    /// Select an action index at an expanded node.
    fn select(&self, node: &MCTSNode, id: NodeId, config: &MCTSConfig) -> Result<usize>;
}

/// PUCT selection policy (Predictor + UCB for Trees).
///
/// Formula: Q(a) + c_puct * P(a) * sqrt(N) / (1 + N(a)),
/// with Q(a) = W(a) / (1 + N(a)) and N the sum of all N(a).
/// Ties (e.g. at an unvisited node, where every U(a) is zero) go to the
/// higher prior, then to the lower action index.
#[derive(Clone, Debug, Default)]
pub struct PUCT;

impl SelectionPolicy for PUCT {
    fn select(&self, node: &MCTSNode, id: NodeId, config: &MCTSConfig) -> Result<usize> {
        if !node.is_expanded() {
            return Err(PlannerError::NotExpanded(id));
        }
        if node.n_actions() == 0 {
            return Err(PlannerError::NoActions(id));
        }

        let scores = node.child_scores(config.c_puct);
        let priors = node.child_prior();

        let mut best = 0;
        for a in 1..scores.len() {
            let ordering = scores[a]
                .partial_cmp(&scores[best])
                .unwrap_or(Ordering::Equal)
                .then_with(|| priors[a].partial_cmp(&priors[best]).unwrap_or(Ordering::Equal));
            if ordering == Ordering::Greater {
                best = a;
            }
        }
        Ok(best)
    }
}
