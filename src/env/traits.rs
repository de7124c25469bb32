//! Core environment trait definitions.

use serde::{Deserialize, Serialize};

use crate::core::{Device, Tensor, TensorDict};
use crate::error::{PlannerError, Result};

// =============================================================================
// Planning
// =============================================================================

/// Prior distribution over actions (and optional value) for one state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Prior probability per action, indexed by action.
    pub priors: Vec<f32>,

    /// Value estimate for the state, if the evaluator provides one.
    pub value: Option<f64>,
}

impl Evaluation {
    pub fn new(priors: Vec<f32>) -> Self {
        Self { priors, value: None }
    }

    /// Uniform priors over `n_actions` actions.
    pub fn uniform(n_actions: usize) -> Self {
        let prior = if n_actions == 0 { 0.0 } else { 1.0 / n_actions as f32 };
        Self::new(vec![prior; n_actions])
    }

    #[must_use]
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// Stateless environment queried by the planner.
///
/// Implementations must not keep per-episode state: the same `(state, action)`
/// pair always yields the same next state.
pub trait PlanningEnv {
    /// Number of discrete actions available at `state`.
    fn action_count(&self, state: &TensorDict) -> usize;

    /// Transition function: state x action -> next state.
    fn step(&self, state: &TensorDict, action: usize) -> Result<TensorDict>;

    /// Prior over actions (and optionally a value) for expanding `state`.
    fn evaluate(&self, state: &TensorDict) -> Result<Evaluation>;

    /// Final value if `state` is terminal.
    fn terminal_value(&self, _state: &TensorDict) -> Option<f64> {
        None
    }
}

// =============================================================================
// Evaluation Rollouts
// =============================================================================

/// How a policy turns its output distribution into an action.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplorationType {
    /// Deterministic, mode-seeking action.
    #[default]
    Mode,
    /// Sample from the policy distribution.
    Random,
}

/// Acts on observations produced by an `EvalEnv`.
pub trait Policy {
    /// Called once at the start of each rollout.
    fn reset(&mut self) {}

    /// Device the policy expects its inputs on.
    fn device(&self) -> Device {
        Device::Cpu
    }

    /// Produce a batched action for a batched observation.
    fn act(&mut self, observation: &TensorDict, exploration: ExplorationType) -> Result<Tensor>;
}

/// Result of a single batched environment step.
#[derive(Clone, Debug)]
pub struct StepOutcome {
    pub observation: TensorDict,

    /// Reward per batch element.
    pub reward: Vec<f32>,

    /// Done flag per batch element.
    pub done: Vec<bool>,
}

/// Parameters for `EvalEnv::rollout`.
#[derive(Clone, Debug)]
pub struct RolloutOptions {
    /// Step budget.
    pub max_steps: usize,

    /// Stop as soon as any batch element reports done.
    pub break_when_any_done: bool,

    /// Move observations to the policy's device before acting.
    pub auto_cast_to_device: bool,

    pub exploration: ExplorationType,
}

impl RolloutOptions {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps,
            break_when_any_done: true,
            auto_cast_to_device: false,
            exploration: ExplorationType::Mode,
        }
    }

    #[must_use]
    pub fn with_break_when_any_done(mut self, value: bool) -> Self {
        self.break_when_any_done = value;
        self
    }

    #[must_use]
    pub fn with_auto_cast(mut self, value: bool) -> Self {
        self.auto_cast_to_device = value;
        self
    }

    #[must_use]
    pub fn with_exploration(mut self, exploration: ExplorationType) -> Self {
        self.exploration = exploration;
        self
    }
}

/// Trajectory produced by a rollout.
#[derive(Clone, Debug)]
pub struct Rollout {
    /// Rewards with shape `[batch, steps]`.
    pub rewards: Tensor,

    /// Whether each batch element reported done at any step.
    pub done: Vec<bool>,
}

impl Rollout {
    /// Assemble a rollout from per-step reward vectors.
    pub fn from_steps(batch_size: usize, step_rewards: &[Vec<f32>], done: Vec<bool>) -> Result<Self> {
        let steps = step_rewards.len();
        let mut data = vec![0.0; batch_size * steps];
        for (t, rewards) in step_rewards.iter().enumerate() {
            if rewards.len() != batch_size {
                return Err(PlannerError::ShapeMismatch {
                    expected: vec![batch_size],
                    actual: vec![rewards.len()],
                });
            }
            for (b, &reward) in rewards.iter().enumerate() {
                data[b * steps + t] = reward;
            }
        }
        Ok(Self {
            rewards: Tensor::new(data, vec![batch_size, steps])?,
            done,
        })
    }

    /// Number of recorded steps.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.rewards.shape().get(1).copied().unwrap_or(0)
    }

    /// Total reward per batch element.
    #[must_use]
    pub fn total_rewards(&self) -> Vec<f64> {
        self.rewards.sum_per_leading()
    }

    /// Mean over the batch of each element's total reward.
    #[must_use]
    pub fn mean_total_reward(&self) -> f64 {
        let totals = self.total_rewards();
        if totals.is_empty() {
            0.0
        } else {
            totals.iter().sum::<f64>() / totals.len() as f64
        }
    }
}

/// Batched environment used for policy evaluation.
pub trait EvalEnv {
    /// Number of parallel episodes stepped together.
    fn batch_size(&self) -> usize;

    fn reset(&mut self) -> Result<TensorDict>;

    fn step(&mut self, action: &Tensor) -> Result<StepOutcome>;

    /// Run `policy` for up to `options.max_steps` steps.
    fn rollout(&mut self, options: &RolloutOptions, policy: &mut dyn Policy) -> Result<Rollout> {
        let batch_size = self.batch_size();
        let mut observation = self.reset()?;
        policy.reset();

        let mut step_rewards: Vec<Vec<f32>> = Vec::with_capacity(options.max_steps);
        let mut done = vec![false; batch_size];

        for _ in 0..options.max_steps {
            let input = if options.auto_cast_to_device {
                observation.to(policy.device())
            } else if observation.device() != policy.device() {
                return Err(PlannerError::Environment(format!(
                    "observation on {} but policy expects {}",
                    observation.device(),
                    policy.device()
                )));
            } else {
                observation.clone()
            };

            let action = policy.act(&input, options.exploration)?;
            let outcome = self.step(&action)?;

            if outcome.done.len() != batch_size {
                return Err(PlannerError::ShapeMismatch {
                    expected: vec![batch_size],
                    actual: vec![outcome.done.len()],
                });
            }

            let any_done = outcome.done.iter().any(|&d| d);
            for (flag, &d) in done.iter_mut().zip(&outcome.done) {
                *flag |= d;
            }
            step_rewards.push(outcome.reward);
            observation = outcome.observation;

            if options.break_when_any_done && any_done {
                break;
            }
        }

        Rollout::from_steps(batch_size, &step_rewards, done)
    }
}
