//! Monte Carlo Tree Search over planning environments.
//!
//! ## Overview
//!
//! - **Arena tree**: nodes live in a flat vector and refer to each other by
//!   `NodeId`, so the whole tree serializes with bincode.
//! - **Aliased statistics**: a child's visit count and total value are the
//!   parent's per-action slots at `prev_action`.
//! - **PUCT selection** with Dirichlet noise on the root priors.
//! - **Virtual loss** so several leaves can be selected before any is backed up.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use odt_planner::mcts::{MCTSConfig, MCTSPlanner};
//!
//! let mut planner = MCTSPlanner::new(env, MCTSConfig::default(), root_state);
//! planner.search(800)?;
//! let action = planner.select_action(move_number)?;
//! let policy_target = planner.action_probabilities();
//! planner.commit(action)?;
//! ```

pub mod config;
pub mod node;
pub mod planner;
pub mod policy;
pub mod stats;
pub mod tree;

// Re-export main types
pub use config::MCTSConfig;
pub use node::{ActionArray, MCTSNode, NodeId};
pub use planner::{MCTSPlanner, SearchPath};
pub use policy::{SelectionPolicy, PUCT};
pub use stats::SearchStats;
pub use tree::{MCTSTree, TreeStats};
