//! # odt-planner
//!
//! Search-tree bookkeeping for MCTS planning and the offline pretraining
//! loop of an Online Decision Transformer.
//!
//! ## Design Principles
//!
//! 1. **Arena trees**: nodes refer to each other by `NodeId`; a child's
//!    statistics are stored once, in its parent's per-action arrays.
//!
//! 2. **Collaborators as traits**: environments, policies, losses,
//!    optimizers and loggers are traits, so the crate carries no ML runtime.
//!
//! 3. **Explicit configuration**: `MCTSConfig` and `OdtConfig` are plain
//!    structs passed into constructors. There is no global state.
//!
//! ## Modules
//!
//! - `core`: tensors, tensor dictionaries, devices, seeded RNG
//! - `env`: planning and evaluation environment traits
//! - `mcts`: search tree, PUCT selection, virtual loss, planner
//! - `training`: offline buffer, losses, optimizers, pretraining loop
//! - `log`: scalar metric loggers

pub mod core;
pub mod env;
pub mod error;
pub mod log;
pub mod mcts;
pub mod training;

// Re-export commonly used types
pub use crate::core::{Device, SearchRng, Tensor, TensorDict};
pub use crate::error::{PlannerError, Result};
pub use crate::mcts::{MCTSConfig, MCTSNode, MCTSPlanner, MCTSTree, NodeId};
pub use crate::training::{OdtConfig, Pretrainer};
