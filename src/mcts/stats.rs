//! MCTS search statistics for diagnostics and tuning.

use serde::{Deserialize, Serialize};

/// Statistics collected while a planner runs simulations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SearchStats {
    /// Completed simulations (select, expand, backup).
    pub simulations: u32,

    /// Nodes that received priors.
    pub nodes_expanded: u32,

    /// Simulations that ended on a terminal state.
    pub terminal_hits: u32,

    /// Virtual losses applied during selection.
    pub virtual_losses: u32,

    /// Maximum depth reached during search.
    pub max_depth: u16,

    /// Total time spent searching (microseconds).
    pub time_us: u64,
}

impl SearchStats {
    /// Create new empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all statistics to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Calculate simulations per second.
    #[must_use]
    pub fn simulations_per_second(&self) -> f64 {
        if self.time_us == 0 {
            0.0
        } else {
            self.simulations as f64 / (self.time_us as f64 / 1_000_000.0)
        }
    }

    /// Average number of nodes expanded per simulation.
    #[must_use]
    pub fn avg_nodes_per_simulation(&self) -> f64 {
        if self.simulations == 0 {
            0.0
        } else {
            self.nodes_expanded as f64 / self.simulations as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_default() {
        let stats = SearchStats::new();
        assert_eq!(stats.simulations, 0);
        assert_eq!(stats.virtual_losses, 0);
    }

    #[test]
    fn test_stats_simulations_per_second() {
        let mut stats = SearchStats::new();
        stats.simulations = 1000;
        stats.time_us = 1_000_000; // 1 second

        assert_eq!(stats.simulations_per_second(), 1000.0);
    }

    #[test]
    fn test_stats_reset() {
        let mut stats = SearchStats::new();
        stats.simulations = 100;
        stats.nodes_expanded = 50;

        stats.reset();

        assert_eq!(stats.simulations, 0);
        assert_eq!(stats.nodes_expanded, 0);
    }

    #[test]
    fn test_avg_nodes_per_simulation() {
        let mut stats = SearchStats::new();
        assert_eq!(stats.avg_nodes_per_simulation(), 0.0);
        stats.simulations = 4;
        stats.nodes_expanded = 2;
        assert_eq!(stats.avg_nodes_per_simulation(), 0.5);
    }
}
