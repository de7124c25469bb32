//! Rolling-context inference for sequence policies.
//!
//! A Decision Transformer acts on the last few steps of its own history
//! rather than on the current observation alone. `InferenceWrapper` keeps
//! that history across the steps of a rollout and presents the wrapped
//! `SequencePolicy` as an ordinary `env::Policy`.

use std::collections::VecDeque;

use super::buffer::{ACTION, OBSERVATION, RETURN_TO_GO};
use crate::core::{Device, Tensor, TensorDict};
use crate::env::{ExplorationType, Policy};
use crate::error::{PlannerError, Result};

/// A policy conditioned on a window of past observations, actions and
/// returns-to-go.
pub trait SequencePolicy {
    /// Device the policy expects its inputs on.
    fn device(&self) -> Device {
        Device::Cpu
    }

    /// Width of one action.
    fn action_dim(&self) -> usize;

    /// Switch between training and evaluation behaviour.
    fn set_training(&mut self, _training: bool) {}

    /// Predict the action for the last step of `context`.
    ///
    /// `context` holds `observation [B, T, obs_dim]`, `action [B, T, action_dim]`
    /// (the last step zeroed) and `return_to_go [B, T, 1]`. Returns
    /// `[B, action_dim]`.
    fn predict(&mut self, context: &TensorDict, exploration: ExplorationType) -> Result<Tensor>;
}

/// Adapts a `SequencePolicy` to step-by-step rollouts.
///
/// Return-to-go is read from the observation's `return_to_go` entry when the
/// environment provides one, otherwise the fixed target return is used.
pub struct InferenceWrapper<'a, P: SequencePolicy> {
    policy: &'a mut P,
    inference_context: usize,
    action_dim: usize,
    target_return: f32,
    observations: VecDeque<Tensor>,
    actions: VecDeque<Tensor>,
    returns: VecDeque<Tensor>,
}

impl<'a, P: SequencePolicy> InferenceWrapper<'a, P> {
    pub fn new(policy: &'a mut P, inference_context: usize) -> Self {
        let action_dim = policy.action_dim();
        Self {
            policy,
            inference_context: inference_context.max(1),
            action_dim,
            target_return: 0.0,
            observations: VecDeque::new(),
            actions: VecDeque::new(),
            returns: VecDeque::new(),
        }
    }

    /// Return-to-go used when observations carry none.
    pub fn with_target_return(mut self, target_return: f32) -> Self {
        self.target_return = target_return;
        self
    }

    /// Number of steps currently in the context window.
    pub fn context_len(&self) -> usize {
        self.observations.len()
    }

    pub fn policy(&self) -> &P {
        &*self.policy
    }
}

/// Stack per-step `[B, D]` tensors into one `[B, T, D]` tensor.
fn batch_major(steps: &VecDeque<Tensor>, batch: usize, dim: usize) -> Result<Tensor> {
    let t = steps.len();
    let mut data = Vec::with_capacity(batch * t * dim);
    for b in 0..batch {
        for step in steps {
            data.extend_from_slice(&step.data()[b * dim..(b + 1) * dim]);
        }
    }
    Tensor::new(data, vec![batch, t, dim])
}

fn expect_rows(tensor: &Tensor, batch: usize, dim: usize) -> Result<()> {
    if tensor.len() != batch * dim {
        return Err(PlannerError::ShapeMismatch {
            expected: vec![batch, dim],
            actual: tensor.shape().to_vec(),
        });
    }
    Ok(())
}

impl<P: SequencePolicy> Policy for InferenceWrapper<'_, P> {
    fn reset(&mut self) {
        self.observations.clear();
        self.actions.clear();
        self.returns.clear();
    }

    fn device(&self) -> Device {
        self.policy.device()
    }

    fn act(&mut self, observation: &TensorDict, exploration: ExplorationType) -> Result<Tensor> {
        let obs = observation.get(OBSERVATION)?;
        let (batch, obs_dim) = match obs.shape() {
            [b, d] => (*b, *d),
            [d] => (1, *d),
            other => {
                return Err(PlannerError::ShapeMismatch {
                    expected: vec![0, 0],
                    actual: other.to_vec(),
                })
            }
        };

        let rtg = if observation.contains_key(RETURN_TO_GO) {
            let rtg = observation.get(RETURN_TO_GO)?.clone();
            expect_rows(&rtg, batch, 1)?;
            rtg
        } else {
            Tensor::new(vec![self.target_return; batch], vec![batch, 1])?
        };

        if let Some(previous) = self.observations.back() {
            expect_rows(previous, batch, obs_dim)?;
        }
        self.observations.push_back(obs.clone());
        self.returns.push_back(rtg);
        self.actions.push_back(Tensor::zeros(vec![batch, self.action_dim]));
        while self.observations.len() > self.inference_context {
            self.observations.pop_front();
            self.actions.pop_front();
            self.returns.pop_front();
        }

        let context = TensorDict::new()
            .with(OBSERVATION, batch_major(&self.observations, batch, obs_dim)?)
            .with(ACTION, batch_major(&self.actions, batch, self.action_dim)?)
            .with(RETURN_TO_GO, batch_major(&self.returns, batch, 1)?)
            .to(observation.device());

        let prediction = self.policy.predict(&context, exploration)?;
        expect_rows(&prediction, batch, self.action_dim)?;
        let action = Tensor::new(prediction.data().to_vec(), vec![batch, self.action_dim])?;

        if let Some(last) = self.actions.back_mut() {
            *last = action.clone();
        }
        Ok(action)
    }
}
