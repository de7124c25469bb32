//! MCTS planner driving the tree through explicit phases.
//!
//! Each simulation is split into three phases so several of them can be in
//! flight at once:
//!
//! 1. `select_leaf`: descend by the selection policy, creating children
//!    lazily and applying a virtual loss to every node on the way down.
//! 2. `expand_leaf`: query the environment for priors and a value.
//! 3. `backup`: revert the virtual losses and record the value along the path.
//!
//! `simulate_batch` selects several leaves before backing any of them up;
//! the virtual losses steer later selections away from paths that are
//! already being evaluated. Everything runs on one thread.

use std::time::Instant;

use crate::core::{SearchRng, TensorDict};
use crate::env::PlanningEnv;
use crate::error::{PlannerError, Result};

use super::config::MCTSConfig;
use super::node::NodeId;
use super::policy::{SelectionPolicy, PUCT};
use super::stats::SearchStats;
use super::tree::MCTSTree;

/// Nodes visited by one selection, from the root to the leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchPath {
    nodes: Vec<NodeId>,
}

impl SearchPath {
    /// The node the selection stopped at.
    #[must_use]
    pub fn leaf(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Number of edges traversed.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.nodes.len() - 1
    }
}

/// Tree search over a stateless planning environment.
///
/// Owns the search tree, configuration and RNG.
pub struct MCTSPlanner<E: PlanningEnv> {
    /// The environment (transition function and prior evaluator).
    env: E,

    /// Search configuration.
    config: MCTSConfig,

    /// The search tree.
    tree: MCTSTree,

    /// RNG for noise and action sampling.
    rng: SearchRng,

    /// Selection policy.
    selection: Box<dyn SelectionPolicy>,

    /// Search statistics.
    stats: SearchStats,
}

impl<E: PlanningEnv> MCTSPlanner<E> {
    /// Create a planner rooted at `root_state`.
    pub fn new(env: E, config: MCTSConfig, root_state: TensorDict) -> Self {
        let n_actions = env.action_count(&root_state);
        let capacity = config.max_nodes.min(1024);
        let rng = SearchRng::new(config.seed);

        Self {
            env,
            tree: MCTSTree::with_capacity(root_state, n_actions, capacity),
            config,
            rng,
            selection: Box::new(PUCT),
            stats: SearchStats::default(),
        }
    }

    /// Set a custom selection policy.
    pub fn with_selection<S: SelectionPolicy + 'static>(mut self, selection: S) -> Self {
        self.selection = Box::new(selection);
        self
    }

    // =========================================================================
    // Phases
    // =========================================================================

    /// Descend from the root to a leaf.
    ///
    /// Stops at the first node that is unexpanded, terminal or has no
    /// actions. Every node entered below the root receives a virtual loss
    /// that `backup` reverts.
    pub fn select_leaf(&mut self) -> Result<SearchPath> {
        let mut current = self.tree.root();
        let mut nodes = vec![current];

        loop {
            let node = self.tree.get(current)?;
            if node.is_terminal() || !node.is_expanded() || node.n_actions() == 0 {
                break;
            }

            let action = self.selection.select(node, current, &self.config)?;
            let child = match node.child(action) {
                Some(child) => child,
                None => {
                    if self.tree.len() >= self.config.max_nodes {
                        break;
                    }
                    let next_state = self.env.step(&node.state, action)?;
                    let n_actions = self.env.action_count(&next_state);
                    self.tree.add_child(current, action, next_state, n_actions)?
                }
            };

            self.tree.apply_virtual_loss(child, self.config.virtual_loss)?;
            self.stats.virtual_losses += 1;
            nodes.push(child);
            current = child;
        }

        let path = SearchPath { nodes };
        self.stats.max_depth = self.stats.max_depth.max(path.depth() as u16);
        Ok(path)
    }

    /// Evaluate the leaf of `path`, expanding it on first visit.
    ///
    /// Returns the value to back up: the terminal value for terminal states,
    /// otherwise the evaluator's value estimate (0.0 when it gives none).
    pub fn expand_leaf(&mut self, path: &SearchPath) -> Result<f64> {
        let leaf = path.leaf();
        let node = self.tree.get(leaf)?;
        let state = node.state.clone();
        let already_expanded = node.is_expanded();

        if let Some(value) = node.terminal_value {
            self.stats.terminal_hits += 1;
            return Ok(value);
        }
        if let Some(value) = self.env.terminal_value(&state) {
            self.tree.mark_terminal(leaf, value)?;
            self.stats.terminal_hits += 1;
            return Ok(value);
        }

        let evaluation = self.env.evaluate(&state)?;
        if !already_expanded {
            self.tree.expand(leaf, &evaluation)?;
            self.stats.nodes_expanded += 1;

            if leaf == self.tree.root() && self.config.root_noise {
                self.tree.inject_noise(
                    leaf,
                    &mut self.rng,
                    self.config.dirichlet_alpha,
                    self.config.noise_epsilon,
                )?;
            }
            tracing::trace!(node = %leaf, depth = path.depth(), "expanded node");
        }

        Ok(evaluation.value.unwrap_or(0.0))
    }

    /// Revert the path's virtual losses and record `value` on every edge.
    pub fn backup(&mut self, path: &SearchPath, value: f64) -> Result<()> {
        for &id in &path.nodes[1..] {
            self.tree.revert_virtual_loss(id, self.config.virtual_loss)?;
        }
        self.tree.backup(path.leaf(), value)?;
        self.stats.simulations += 1;
        Ok(())
    }

    /// One complete simulation.
    pub fn simulate(&mut self) -> Result<()> {
        let path = self.select_leaf()?;
        let value = self.expand_leaf(&path)?;
        self.backup(&path, value)
    }

    /// Select `readouts` leaves, then expand and back up each of them.
    ///
    /// An unexpanded root is expanded by a single simulation first; until
    /// then every readout would stop at the root.
    pub fn simulate_batch(&mut self, readouts: usize) -> Result<()> {
        let mut readouts = readouts;
        if readouts > 0 && !self.tree.root_node().is_expanded() {
            self.simulate()?;
            readouts -= 1;
        }

        let paths = (0..readouts)
            .map(|_| self.select_leaf())
            .collect::<Result<Vec<_>>>()?;

        for path in &paths {
            let value = self.expand_leaf(path)?;
            self.backup(path, value)?;
        }
        Ok(())
    }

    /// Run `simulations` simulations in batches of `config.parallel_readouts`.
    pub fn search(&mut self, simulations: u32) -> Result<()> {
        let start = Instant::now();
        self.stats.reset();

        let batch = u32::try_from(self.config.parallel_readouts.max(1)).unwrap_or(u32::MAX);
        let mut remaining = simulations;
        let mut at_limit = false;
        while remaining > 0 {
            let readouts = remaining.min(batch);
            self.simulate_batch(readouts as usize)?;
            remaining -= readouts;

            // Past the node limit simulations keep backing up through the existing tree
            if !at_limit && self.tree.len() >= self.config.max_nodes {
                at_limit = true;
                tracing::debug!(nodes = self.tree.len(), "node limit reached");
            }
        }

        self.stats.time_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        tracing::debug!(
            simulations = self.stats.simulations,
            nodes = self.tree.len(),
            sims_per_sec = self.stats.simulations_per_second(),
            expansions_per_sim = self.stats.avg_nodes_per_simulation(),
            "search finished"
        );
        Ok(())
    }

    // =========================================================================
    // Acting
    // =========================================================================

    /// Root visit distribution (uniform when nothing has been visited).
    pub fn action_probabilities(&self) -> Vec<f64> {
        let root = self.tree.root_node();
        let total = root.child_n_total();
        let n_actions = root.n_actions();

        if total == 0 {
            let uniform = 1.0 / n_actions.max(1) as f64;
            return vec![uniform; n_actions];
        }

        root.child_visit_count()
            .iter()
            .map(|&n| n as f64 / total as f64)
            .collect()
    }

    /// Pick the action to play at `move_number`.
    ///
    /// Greedy (most visits) once the temperature threshold is reached,
    /// otherwise sampled proportionally to `N(a)^(1 / temperature)`.
    pub fn select_action(&mut self, move_number: usize) -> Result<usize> {
        let root = self.tree.root_node();
        if root.n_actions() == 0 {
            return Err(PlannerError::NoActions(self.tree.root()));
        }

        let visits = root.child_visit_count();
        let most_visited = visits
            .iter()
            .enumerate()
            .max_by(|(i, a), (j, b)| a.cmp(b).then(j.cmp(i)))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let temperature = self.config.effective_temperature(move_number);
        if temperature <= 0.0 {
            return Ok(most_visited);
        }

        let weights: Vec<f64> = visits
            .iter()
            .map(|&n| (n as f64).powf(1.0 / temperature))
            .collect();
        Ok(self.rng.choose_weighted(&weights).unwrap_or(most_visited))
    }

    /// Commit to `action`: keep its subtree as the new tree, or start a fresh
    /// root from the environment if it was never explored.
    pub fn commit(&mut self, action: usize) -> Result<()> {
        match self.tree.reroot(action)? {
            Some(_) => {
                tracing::debug!(action, nodes = self.tree.len(), "reused subtree");
                let root = self.tree.root();
                if self.config.root_noise && self.tree.root_node().is_expanded() {
                    self.tree.inject_noise(
                        root,
                        &mut self.rng,
                        self.config.dirichlet_alpha,
                        self.config.noise_epsilon,
                    )?;
                }
            }
            None => {
                let next_state = self.env.step(&self.tree.root_node().state, action)?;
                let n_actions = self.env.action_count(&next_state);
                self.tree.reset(next_state, n_actions);
                tracing::debug!(action, "started fresh root");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get search statistics.
    #[must_use]
    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Get the search tree.
    #[must_use]
    pub fn tree(&self) -> &MCTSTree {
        &self.tree
    }

    /// Get the environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Get the configuration.
    pub fn config(&self) -> &MCTSConfig {
        &self.config
    }
}
