//! MCTS configuration parameters.

use serde::{Deserialize, Serialize};

/// MCTS configuration parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MCTSConfig {
    /// PUCT exploration constant (default: 1.38).
    /// Higher values favor the prior and unvisited actions over known values.
    pub c_puct: f64,

    /// Dirichlet noise concentration for exploration nodes (default: 0.03).
    pub dirichlet_alpha: f64,

    /// Mixing weight of the noise into the priors (0 = no noise).
    pub noise_epsilon: f64,

    /// Perturb the root priors with Dirichlet noise when it is expanded.
    pub root_noise: bool,

    /// Value subtracted from a node's total value per in-flight virtual loss.
    pub virtual_loss: f64,

    /// Leaves selected together before their results are backed up.
    pub parallel_readouts: usize,

    /// Temperature for action selection (0 = greedy, higher = more exploration).
    pub temperature: f64,

    /// Move number from which the most visited action is always selected.
    /// 0 = always use temperature.
    pub temp_threshold: usize,

    /// Maximum nodes to allocate in the tree.
    /// Prevents memory exhaustion on large searches.
    pub max_nodes: usize,

    /// Random seed for noise and action sampling.
    /// Same seed produces deterministic searches.
    pub seed: u64,
}

impl Default for MCTSConfig {
    fn default() -> Self {
        Self {
            c_puct: 1.38,
            dirichlet_alpha: 0.03,
            noise_epsilon: 0.25,
            root_noise: true,
            virtual_loss: 1.0,
            parallel_readouts: 8,
            temperature: 1.0,
            temp_threshold: 30,
            max_nodes: 100_000,
            seed: 42,
        }
    }
}

impl MCTSConfig {
    /// Create a new config with custom exploration constant.
    pub fn with_c_puct(mut self, c: f64) -> Self {
        self.c_puct = c;
        self
    }

    /// Create a new config with custom Dirichlet noise parameters.
    pub fn with_noise(mut self, alpha: f64, epsilon: f64) -> Self {
        self.dirichlet_alpha = alpha;
        self.noise_epsilon = epsilon;
        self
    }

    /// Enable or disable root noise.
    pub fn with_root_noise(mut self, enabled: bool) -> Self {
        self.root_noise = enabled;
        self
    }

    /// Create a new config with custom virtual loss penalty.
    pub fn with_virtual_loss(mut self, penalty: f64) -> Self {
        self.virtual_loss = penalty;
        self
    }

    /// Create a new config with custom readout batch size.
    pub fn with_parallel_readouts(mut self, readouts: usize) -> Self {
        self.parallel_readouts = readouts;
        self
    }

    /// Create a new config with custom temperature.
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    /// Create a new config with custom temperature threshold.
    pub fn with_temp_threshold(mut self, threshold: usize) -> Self {
        self.temp_threshold = threshold;
        self
    }

    /// Create a new config with custom seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Create a new config with custom node limit.
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Get the temperature for a given move number.
    pub fn effective_temperature(&self, move_number: usize) -> f64 {
        if self.temp_threshold > 0 && move_number >= self.temp_threshold {
            0.0
        } else {
            self.temperature
        }
    }
}
