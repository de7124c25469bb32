//! Arena-based MCTS tree.
//!
//! Uses a flat `Vec<MCTSNode>` with index-based references for efficiency,
//! cache-friendliness, and serializability.
//!
//! ## Statistics aliasing
//!
//! A node never stores its own visit count or total value. Both live in the
//! parent's per-action arrays at index `prev_action`, so reading or writing
//! a child's statistics goes through `MCTSTree`. The root has no such slot:
//! asking for its statistics fails with `RootHasNoParent`, and its visit
//! total is the sum over its own action slots (`MCTSNode::child_n_total`).

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::node::{MCTSNode, NodeId};
use crate::core::{SearchRng, TensorDict};
use crate::env::Evaluation;
use crate::error::{PlannerError, Result};

/// Arena-based MCTS tree.
///
/// Nodes are stored in a flat vector and referenced by `NodeId` indices.
/// This avoids reference counting overhead and enables serialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MCTSTree {
    /// All nodes in the tree.
    nodes: Vec<MCTSNode>,

    /// The root node ID (always 0 after initialization).
    root: NodeId,
}

impl MCTSTree {
    /// Create a new tree with a root node.
    pub fn new(root_state: TensorDict, n_actions: usize) -> Self {
        Self::with_capacity(root_state, n_actions, 1024)
    }

    /// Create a tree with custom initial capacity.
    pub fn with_capacity(root_state: TensorDict, n_actions: usize, capacity: usize) -> Self {
        let mut nodes = Vec::with_capacity(capacity.max(1));
        nodes.push(MCTSNode::root(root_state, n_actions));
        Self {
            nodes,
            root: NodeId::new(0),
        }
    }

    /// Get the root node ID.
    #[inline]
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Get a node by ID.
    #[inline]
    pub fn get(&self, id: NodeId) -> Result<&MCTSNode> {
        self.nodes
            .get(id.0 as usize)
            .ok_or(PlannerError::UnknownNode(id))
    }

    /// Get a mutable node by ID.
    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut MCTSNode> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or(PlannerError::UnknownNode(id))
    }

    /// Get the root node.
    #[must_use]
    pub fn root_node(&self) -> &MCTSNode {
        &self.nodes[self.root.0 as usize]
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all nodes.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &MCTSNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId::new(i as u32), n))
    }

    /// Clear the tree and reset with a new root.
    pub fn reset(&mut self, root_state: TensorDict, n_actions: usize) {
        self.nodes.clear();
        self.nodes.push(MCTSNode::root(root_state, n_actions));
        self.root = NodeId::new(0);
    }

    fn alloc(&mut self, node: MCTSNode) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Parent and slot index for a non-root node.
    fn parent_slot(&self, id: NodeId) -> Result<(NodeId, usize)> {
        let node = self.get(id)?;
        if node.is_root() {
            return Err(PlannerError::RootHasNoParent(id));
        }
        Ok((node.parent, node.prev_action))
    }

    // =========================================================================
    // Aliased statistics
    // =========================================================================

    /// Visit count of `id`, read from its parent's `child_visit_count`.
    pub fn visit_count(&self, id: NodeId) -> Result<u32> {
        let (parent, action) = self.parent_slot(id)?;
        self.get(parent)?.slot_visit_count(action)
    }

    /// Overwrite the visit count of `id` in its parent's slot.
    pub fn set_visit_count(&mut self, id: NodeId, value: u32) -> Result<()> {
        let (parent, action) = self.parent_slot(id)?;
        self.get_mut(parent)?.set_slot_visit_count(action, value)
    }

    /// Total value of `id`, read from its parent's `child_total_value`.
    pub fn total_value(&self, id: NodeId) -> Result<f64> {
        let (parent, action) = self.parent_slot(id)?;
        self.get(parent)?.slot_total_value(action)
    }

    /// Overwrite the total value of `id` in its parent's slot.
    pub fn set_total_value(&mut self, id: NodeId, value: f64) -> Result<()> {
        let (parent, action) = self.parent_slot(id)?;
        self.get_mut(parent)?.set_slot_total_value(action, value)
    }

    /// `total_value / (1 + visit_count)`.
    pub fn action_value(&self, id: NodeId) -> Result<f64> {
        let visits = self.visit_count(id)?;
        let total = self.total_value(id)?;
        Ok(total / (1.0 + visits as f64))
    }

    // =========================================================================
    // Growth
    // =========================================================================

    /// Create the child reached by `action` from `parent`.
    ///
    /// Returns the existing child if the slot is already taken, so each
    /// action slot maps to at most one node.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        action: usize,
        state: TensorDict,
        n_actions: usize,
    ) -> Result<NodeId> {
        let parent_node = self.get(parent)?;
        parent_node.check_action(action)?;
        if let Some(existing) = parent_node.child(action) {
            return Ok(existing);
        }

        let depth = parent_node.depth.saturating_add(1);
        let child = self.alloc(MCTSNode::new(state, n_actions, parent, action, depth));
        self.get_mut(parent)?.children.insert(action, child);
        Ok(child)
    }

    /// Store the evaluator's priors on `id` and mark it expanded.
    ///
    /// A node expands exactly once; a second call fails with `AlreadyExpanded`.
    pub fn expand(&mut self, id: NodeId, evaluation: &Evaluation) -> Result<()> {
        let node = self.get(id)?;
        if node.is_expanded() {
            return Err(PlannerError::AlreadyExpanded(id));
        }
        if evaluation.priors.len() != node.n_actions() {
            return Err(PlannerError::ShapeMismatch {
                expected: vec![node.n_actions()],
                actual: vec![evaluation.priors.len()],
            });
        }
        if let Some((action, p)) = evaluation
            .priors
            .iter()
            .enumerate()
            .find(|(_, p)| !p.is_finite() || **p < 0.0)
        {
            return Err(PlannerError::InvalidPrior(format!(
                "prior {} for action {} at {}",
                p, action, id
            )));
        }

        self.get_mut(id)?.set_priors(&evaluation.priors);
        Ok(())
    }

    /// Mix Dirichlet noise into the selection priors of an expanded node.
    ///
    /// `child_prior = (1 - epsilon) * original_prior + epsilon * Dir(alpha)`.
    /// `original_prior` is left untouched.
    pub fn inject_noise(
        &mut self,
        id: NodeId,
        rng: &mut SearchRng,
        alpha: f64,
        epsilon: f64,
    ) -> Result<()> {
        let node = self.get(id)?;
        if !node.is_expanded() {
            return Err(PlannerError::NotExpanded(id));
        }
        if epsilon == 0.0 || node.n_actions() == 0 {
            return Ok(());
        }

        let noise = rng.dirichlet(alpha, node.n_actions())?;
        let node = self.get_mut(id)?;
        let original: Vec<f32> = node.original_prior().to_vec();
        for ((p, &orig), n) in node.child_prior_mut().iter_mut().zip(&original).zip(&noise) {
            *p = ((1.0 - epsilon) * orig as f64 + epsilon * n) as f32;
        }
        Ok(())
    }

    /// Mark `id` as terminal with a final value.
    pub fn mark_terminal(&mut self, id: NodeId, value: f64) -> Result<()> {
        self.get_mut(id)?.terminal_value = Some(value);
        Ok(())
    }

    // =========================================================================
    // Virtual loss and backup
    // =========================================================================

    /// Penalize an in-flight node: count one virtual loss and subtract
    /// `penalty` from its total value.
    pub fn apply_virtual_loss(&mut self, id: NodeId, penalty: f64) -> Result<()> {
        let total = self.total_value(id)?;
        self.set_total_value(id, total - penalty)?;
        self.get_mut(id)?.add_vloss();
        Ok(())
    }

    /// Undo one `apply_virtual_loss`.
    pub fn revert_virtual_loss(&mut self, id: NodeId, penalty: f64) -> Result<()> {
        self.parent_slot(id)?;
        if !self.get_mut(id)?.remove_vloss() {
            return Err(PlannerError::NoVirtualLoss(id));
        }
        let total = self.total_value(id)?;
        self.set_total_value(id, total + penalty)
    }

    /// Record one visit with `value` on every edge from `leaf` up to the root.
    pub fn backup(&mut self, leaf: NodeId, value: f64) -> Result<()> {
        let mut current = leaf;
        loop {
            let node = self.get(current)?;
            if node.is_root() {
                return Ok(());
            }
            let (parent, action) = (node.parent, node.prev_action);
            self.get_mut(parent)?.record_visit(action, value)?;
            current = parent;
        }
    }

    /// Node ids from the root down to `id`, inclusive.
    pub fn path_to(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut path = vec![id];
        let mut current = self.get(id)?;
        while !current.is_root() {
            path.push(current.parent);
            current = self.get(current.parent)?;
        }
        path.reverse();
        Ok(path)
    }

    // =========================================================================
    // Tree reuse
    // =========================================================================

    /// Make the root's child for `action` the new root, keeping its subtree.
    ///
    /// Returns `Ok(None)` and leaves the tree unchanged if that child was
    /// never created. Statistics held in the old root's arrays are dropped.
    pub fn reroot(&mut self, action: usize) -> Result<Option<NodeId>> {
        let root = self.root_node();
        root.check_action(action)?;
        let Some(new_root) = root.child(action) else {
            return Ok(None);
        };

        let base_depth = self.get(new_root)?.depth;
        let mut remap: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([new_root]);

        while let Some(old) = queue.pop_front() {
            remap.insert(old, NodeId::new(order.len() as u32));
            order.push(old);
            let mut children: Vec<NodeId> = self.get(old)?.children.values().copied().collect();
            children.sort_by_key(|c| c.0);
            queue.extend(children);
        }

        let mut nodes = Vec::with_capacity(order.len());
        for old in order {
            let mut node = self.get(old)?.clone();
            if old == new_root {
                node.parent = NodeId::NONE;
                node.prev_action = 0;
            } else {
                node.parent = remap[&node.parent];
            }
            node.depth -= base_depth;
            for child in node.children.values_mut() {
                *child = remap[&*child];
            }
            nodes.push(node);
        }

        self.nodes = nodes;
        self.root = NodeId::new(0);
        Ok(Some(self.root))
    }

    // =========================================================================
    // Snapshots and diagnostics
    // =========================================================================

    /// Serialize the whole arena with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Restore a tree serialized with `to_bytes`.
    ///
    /// The arena links are checked before the tree is returned, so a
    /// restored tree never holds dangling ids.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let tree: Self = bincode::deserialize(bytes)?;
        tree.validate()?;
        Ok(tree)
    }

    /// Check that parent and child links agree and stay inside the arena.
    fn validate(&self) -> Result<()> {
        if !self.get(self.root)?.is_root() {
            return Err(PlannerError::CorruptSnapshot(format!(
                "root {} has a parent",
                self.root
            )));
        }

        for (id, node) in self.iter() {
            if !node.arrays_match_actions() {
                return Err(PlannerError::CorruptSnapshot(format!(
                    "{} arrays do not hold {} actions",
                    id,
                    node.n_actions()
                )));
            }

            if id != self.root {
                if node.is_root() {
                    return Err(PlannerError::CorruptSnapshot(format!("{} has no parent", id)));
                }
                // Depth grows by one per edge, so parent chains cannot cycle
                let parent = self.get(node.parent)?;
                if parent.child(node.prev_action) != Some(id)
                    || parent.depth.checked_add(1) != Some(node.depth)
                {
                    return Err(PlannerError::CorruptSnapshot(format!(
                        "{} is not linked from {}",
                        id, node.parent
                    )));
                }
            }

            for (&action, &child) in &node.children {
                node.check_action(action)?;
                let child_node = self.get(child)?;
                if child_node.parent != id || child_node.prev_action != action {
                    return Err(PlannerError::CorruptSnapshot(format!(
                        "{} does not point back to {}",
                        child, id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Get statistics about the tree.
    #[must_use]
    pub fn stats(&self) -> TreeStats {
        TreeStats {
            node_count: self.nodes.len(),
            max_depth: self.nodes.iter().map(|n| n.depth).max().unwrap_or(0),
            expanded_count: self.nodes.iter().filter(|n| n.is_expanded()).count(),
            terminal_count: self.nodes.iter().filter(|n| n.is_terminal()).count(),
            total_actions: self.nodes.iter().map(|n| n.n_actions()).sum(),
            in_flight_vlosses: self.nodes.iter().map(|n| n.n_vlosses() as u64).sum(),
        }
    }
}

/// Statistics about the MCTS tree.
#[derive(Clone, Debug, Default)]
pub struct TreeStats {
    /// Total number of nodes.
    pub node_count: usize,

    /// Maximum depth reached.
    pub max_depth: u16,

    /// Nodes that received priors.
    pub expanded_count: usize,

    /// Number of terminal nodes.
    pub terminal_count: usize,

    /// Sum of action counts over all nodes.
    pub total_actions: usize,

    /// Virtual losses not yet reverted.
    pub in_flight_vlosses: u64,
}

impl TreeStats {
    /// Get the branching factor (average actions per node).
    #[must_use]
    pub fn branching_factor(&self) -> f64 {
        if self.node_count == 0 {
            0.0
        } else {
            self.total_actions as f64 / self.node_count as f64
        }
    }

    /// Get the expansion ratio (expanded nodes / all nodes).
    #[must_use]
    pub fn expansion_ratio(&self) -> f64 {
        if self.node_count == 0 {
            0.0
        } else {
            self.expanded_count as f64 / self.node_count as f64
        }
    }
}
