//! Environment collaborators.
//!
//! - `PlanningEnv`: stateless transition and prior query used by the planner
//! - `EvalEnv`: batched stepping environment used for evaluation rollouts
//! - `Policy`: anything that maps observations to actions during a rollout

mod traits;

pub use traits::{
    EvalEnv, Evaluation, ExplorationType, PlanningEnv, Policy, Rollout, RolloutOptions,
    StepOutcome,
};
