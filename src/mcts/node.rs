//! MCTS node structure.
//!
//! Uses arena-based allocation with index references (NodeId) for efficiency
//! and serializability. Each node owns per-action statistics for its
//! children; a child's own visit count and total value live in one slot of
//! its parent's arrays (see `MCTSTree::visit_count`).

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::core::TensorDict;
use crate::error::{PlannerError, Result};

/// Index into the MCTSTree node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Sentinel value representing no node.
    pub const NONE: NodeId = NodeId(u32::MAX);

    /// Create a new node ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Check if this is the NONE sentinel.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    /// Get the raw index value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NodeId(NONE)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

/// Per-action arrays. SmallVec avoids a heap allocation for small action spaces.
pub type ActionArray<T> = SmallVec<[T; 8]>;

/// A node in the MCTS tree, holding one environment state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MCTSNode {
    /// Environment state snapshot.
    pub state: TensorDict,

    /// Parent node (NONE for root).
    pub parent: NodeId,

    /// Action that led from the parent to this node.
    pub prev_action: usize,

    /// Depth in tree (root = 0).
    pub depth: u16,

    /// Expanded children keyed by action.
    pub children: FxHashMap<usize, NodeId>,

    /// Value of the state if it is terminal.
    pub terminal_value: Option<f64>,

    n_actions: usize,
    is_expanded: bool,
    n_vlosses: u32,
    child_visit_count: ActionArray<u32>,
    child_total_value: ActionArray<f64>,
    original_prior: ActionArray<f32>,
    child_prior: ActionArray<f32>,
}

impl MCTSNode {
    /// Create a new node with zeroed statistics.
    pub fn new(
        state: TensorDict,
        n_actions: usize,
        parent: NodeId,
        prev_action: usize,
        depth: u16,
    ) -> Self {
        Self {
            state,
            parent,
            prev_action,
            depth,
            children: FxHashMap::default(),
            terminal_value: None,
            n_actions,
            is_expanded: false,
            n_vlosses: 0,
            child_visit_count: SmallVec::from_elem(0, n_actions),
            child_total_value: SmallVec::from_elem(0.0, n_actions),
            original_prior: SmallVec::from_elem(0.0, n_actions),
            child_prior: SmallVec::from_elem(0.0, n_actions),
        }
    }

    /// Create a root node.
    pub fn root(state: TensorDict, n_actions: usize) -> Self {
        Self::new(state, n_actions, NodeId::NONE, 0, 0)
    }

    #[inline]
    #[must_use]
    pub fn n_actions(&self) -> usize {
        self.n_actions
    }

    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    #[inline]
    #[must_use]
    pub fn is_expanded(&self) -> bool {
        self.is_expanded
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal_value.is_some()
    }

    /// Number of virtual losses currently applied to this node.
    #[inline]
    #[must_use]
    pub fn n_vlosses(&self) -> u32 {
        self.n_vlosses
    }

    #[must_use]
    pub fn child_visit_count(&self) -> &[u32] {
        &self.child_visit_count
    }

    #[must_use]
    pub fn child_total_value(&self) -> &[f64] {
        &self.child_total_value
    }

    /// Priors as returned by the evaluator, before any noise.
    #[must_use]
    pub fn original_prior(&self) -> &[f32] {
        &self.original_prior
    }

    /// Priors used for selection (possibly noise-perturbed).
    #[must_use]
    pub fn child_prior(&self) -> &[f32] {
        &self.child_prior
    }

    /// Child node for an action, if it has been created.
    #[must_use]
    pub fn child(&self, action: usize) -> Option<NodeId> {
        self.children.get(&action).copied()
    }

    /// Total visits across all actions (the parent visit count N used by PUCT).
    #[must_use]
    pub fn child_n_total(&self) -> u64 {
        self.child_visit_count.iter().map(|&n| n as u64).sum()
    }

    /// Mean value per action: `W(a) / (1 + N(a))`.
    #[must_use]
    pub fn child_q(&self) -> Vec<f64> {
        self.child_total_value
            .iter()
            .zip(&self.child_visit_count)
            .map(|(&w, &n)| w / (1.0 + n as f64))
            .collect()
    }

    /// Exploration bonus per action: `c_puct * P(a) * sqrt(N) / (1 + N(a))`.
    #[must_use]
    pub fn child_u(&self, c_puct: f64) -> Vec<f64> {
        let sqrt_total = (self.child_n_total() as f64).sqrt();
        self.child_prior
            .iter()
            .zip(&self.child_visit_count)
            .map(|(&p, &n)| c_puct * p as f64 * sqrt_total / (1.0 + n as f64))
            .collect()
    }

    /// PUCT score per action: `Q(a) + U(a)`.
    #[must_use]
    pub fn child_scores(&self, c_puct: f64) -> Vec<f64> {
        self.child_q()
            .into_iter()
            .zip(self.child_u(c_puct))
            .map(|(q, u)| q + u)
            .collect()
    }

    /// Check an action index against this node's action count.
    pub fn check_action(&self, action: usize) -> Result<()> {
        if action < self.n_actions {
            Ok(())
        } else {
            Err(PlannerError::ActionOutOfRange {
                action,
                n_actions: self.n_actions,
            })
        }
    }

    /// Record one visit with a backed-up value on an action slot.
    pub fn record_visit(&mut self, action: usize, value: f64) -> Result<()> {
        self.check_action(action)?;
        self.child_visit_count[action] += 1;
        self.child_total_value[action] += value;
        Ok(())
    }

    /// Zero all per-action statistics and priors, keeping the action count.
    ///
    /// Fails with `ShapeMismatch` if `n_actions` differs from the node's.
    pub fn reset_statistics(&mut self, n_actions: usize) -> Result<()> {
        if n_actions != self.n_actions {
            return Err(PlannerError::ShapeMismatch {
                expected: vec![self.n_actions],
                actual: vec![n_actions],
            });
        }
        self.child_visit_count.iter_mut().for_each(|n| *n = 0);
        self.child_total_value.iter_mut().for_each(|w| *w = 0.0);
        self.original_prior.iter_mut().for_each(|p| *p = 0.0);
        self.child_prior.iter_mut().for_each(|p| *p = 0.0);
        self.is_expanded = false;
        Ok(())
    }

    // Slot access used by MCTSTree when a child reads through its parent.

    pub(crate) fn slot_visit_count(&self, action: usize) -> Result<u32> {
        self.check_action(action)?;
        Ok(self.child_visit_count[action])
    }

    pub(crate) fn set_slot_visit_count(&mut self, action: usize, value: u32) -> Result<()> {
        self.check_action(action)?;
        self.child_visit_count[action] = value;
        Ok(())
    }

    pub(crate) fn slot_total_value(&self, action: usize) -> Result<f64> {
        self.check_action(action)?;
        Ok(self.child_total_value[action])
    }

    pub(crate) fn set_slot_total_value(&mut self, action: usize, value: f64) -> Result<()> {
        self.check_action(action)?;
        self.child_total_value[action] = value;
        Ok(())
    }

    /// Whether every per-action array holds exactly `n_actions` entries.
    pub(crate) fn arrays_match_actions(&self) -> bool {
        let n = self.n_actions;
        self.child_visit_count.len() == n
            && self.child_total_value.len() == n
            && self.original_prior.len() == n
            && self.child_prior.len() == n
    }

    pub(crate) fn set_priors(&mut self, priors: &[f32]) {
        self.original_prior = SmallVec::from_slice(priors);
        self.child_prior = SmallVec::from_slice(priors);
        self.is_expanded = true;
    }

    pub(crate) fn child_prior_mut(&mut self) -> &mut [f32] {
        &mut self.child_prior
    }

    pub(crate) fn add_vloss(&mut self) {
        self.n_vlosses += 1;
    }

    pub(crate) fn remove_vloss(&mut self) -> bool {
        if self.n_vlosses == 0 {
            return false;
        }
        self.n_vlosses -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Tensor;

    fn state() -> TensorDict {
        TensorDict::new().with("observation", Tensor::zeros(vec![2]))
    }

    #[test]
    fn test_node_id() {
        let id = NodeId::new(5);
        assert_eq!(id.raw(), 5);
        assert!(!id.is_none());
        assert_eq!(format!("{}", id), "NodeId(5)");

        assert!(NodeId::NONE.is_none());
        assert_eq!(format!("{}", NodeId::NONE), "NodeId(NONE)");
    }

    #[test]
    fn test_node_new_is_zeroed() {
        let node = MCTSNode::root(state(), 3);

        assert!(node.is_root());
        assert!(!node.is_expanded());
        assert_eq!(node.n_vlosses(), 0);
        assert_eq!(node.n_actions(), 3);
        assert_eq!(node.child_visit_count(), &[0, 0, 0]);
        assert_eq!(node.child_total_value(), &[0.0, 0.0, 0.0]);
        assert_eq!(node.original_prior(), &[0.0, 0.0, 0.0]);
        assert_eq!(node.child_prior(), &[0.0, 0.0, 0.0]);
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_record_visit() {
        let mut node = MCTSNode::root(state(), 3);
        node.record_visit(1, 1.0).unwrap();
        node.record_visit(1, 0.5).unwrap();

        assert_eq!(node.child_visit_count(), &[0, 2, 0]);
        assert_eq!(node.child_total_value(), &[0.0, 1.5, 0.0]);
        assert_eq!(node.child_n_total(), 2);

        let err = node.record_visit(3, 1.0).unwrap_err();
        assert!(matches!(err, PlannerError::ActionOutOfRange { action: 3, n_actions: 3 }));
    }

    #[test]
    fn test_child_q_uses_plus_one() {
        let mut node = MCTSNode::root(state(), 2);
        node.record_visit(0, 3.0).unwrap();
        let q = node.child_q();
        assert_eq!(q, vec![1.5, 0.0]);
    }

    #[test]
    fn test_child_u() {
        let mut node = MCTSNode::root(state(), 2);
        node.set_priors(&[0.25, 0.75]);
        for _ in 0..4 {
            node.record_visit(0, 0.0).unwrap();
        }

        // N = 4, sqrt(N) = 2
        let u = node.child_u(1.0);
        assert!((u[0] - 0.25 * 2.0 / 5.0).abs() < 1e-12);
        assert!((u[1] - 0.75 * 2.0 / 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_reset_statistics() {
        let mut node = MCTSNode::root(state(), 2);
        node.set_priors(&[0.5, 0.5]);
        node.record_visit(0, 1.0).unwrap();

        node.reset_statistics(2).unwrap();
        assert!(!node.is_expanded());
        assert_eq!(node.child_visit_count(), &[0, 0]);
        assert_eq!(node.original_prior(), &[0.0, 0.0]);

        let err = node.reset_statistics(3).unwrap_err();
        assert!(matches!(err, PlannerError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_vloss_counter() {
        let mut node = MCTSNode::root(state(), 1);
        assert!(!node.remove_vloss());
        node.add_vloss();
        node.add_vloss();
        assert_eq!(node.n_vlosses(), 2);
        assert!(node.remove_vloss());
        assert_eq!(node.n_vlosses(), 1);
    }

    #[test]
    fn test_serialization() {
        let mut node = MCTSNode::root(state(), 2);
        node.children.insert(1, NodeId::new(4));
        node.record_visit(1, 2.0).unwrap();

        let json = serde_json::to_string(&node).unwrap();
        let deserialized: MCTSNode = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.child(1), Some(NodeId::new(4)));
        assert_eq!(deserialized.child_visit_count(), &[0, 1]);
        assert_eq!(deserialized.n_actions(), 2);
    }
}
