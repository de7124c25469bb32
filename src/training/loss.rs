//! Loss values, parameter groups and the loss-module seam.
//!
//! The loss module owns the actor and the entropy temperature. It computes
//! the named loss components for a batch and, on request, fills the
//! gradients of one parameter group.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::inference::SequencePolicy;
use crate::core::TensorDict;
use crate::error::{PlannerError, Result};

/// Negative log-likelihood of the batch actions.
pub const LOG_LIKELIHOOD: &str = "loss_log_likelihood";
/// Entropy regularization term.
pub const ENTROPY: &str = "loss_entropy";
/// Temperature calibration term.
pub const ALPHA: &str = "loss_alpha";

/// Named scalar loss components in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LossValues {
    entries: Vec<(String, f64)>,
}

impl LossValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three required components.
    pub fn from_components(log_likelihood: f64, entropy: f64, alpha: f64) -> Self {
        Self::new()
            .with(LOG_LIKELIHOOD, log_likelihood)
            .with(ENTROPY, entropy)
            .with(ALPHA, alpha)
    }

    /// Add or replace a component.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Result<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, v)| v)
            .ok_or_else(|| PlannerError::MissingKey(name.to_string()))
    }

    /// `loss_log_likelihood + loss_entropy`.
    pub fn transformer_loss(&self) -> Result<f64> {
        Ok(self.get(LOG_LIKELIHOOD)? + self.get(ENTROPY)?)
    }

    /// `loss_alpha`.
    pub fn temperature_loss(&self) -> Result<f64> {
        self.get(ALPHA)
    }

    /// Fail unless all three required components are present.
    pub fn check_required(&self) -> Result<()> {
        for name in [LOG_LIKELIHOOD, ENTROPY, ALPHA] {
            self.get(name)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parameter groups updated by separate optimizers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamGroup {
    /// Actor (transformer) weights, trained on log-likelihood + entropy.
    Transformer,
    /// Entropy temperature, trained on the alpha loss.
    Temperature,
}

impl fmt::Display for ParamGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamGroup::Transformer => write!(f, "transformer"),
            ParamGroup::Temperature => write!(f, "temperature"),
        }
    }
}

/// Flat parameter vector with its gradient.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub values: Vec<f32>,
    pub grads: Vec<f32>,
}

impl Parameters {
    /// Parameters with zeroed gradients.
    pub fn new(values: Vec<f32>) -> Self {
        let grads = vec![0.0; values.len()];
        Self { values, grads }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn zero_grad(&mut self) {
        self.grads.iter_mut().for_each(|g| *g = 0.0);
    }

    /// Add `grads` into the stored gradient.
    pub fn accumulate(&mut self, grads: &[f32]) -> Result<()> {
        if grads.len() != self.grads.len() {
            return Err(PlannerError::ShapeMismatch {
                expected: vec![self.grads.len()],
                actual: vec![grads.len()],
            });
        }
        for (g, &d) in self.grads.iter_mut().zip(grads) {
            *g += d;
        }
        Ok(())
    }

    /// L2 norm of the gradient.
    pub fn grad_norm(&self) -> f64 {
        self.grads
            .iter()
            .map(|&g| (g as f64) * (g as f64))
            .sum::<f64>()
            .sqrt()
    }

    /// Rescale the gradient so its norm is at most `max_norm`.
    ///
    /// Returns the norm before clipping.
    pub fn clip_grad_norm(&mut self, max_norm: f64) -> f64 {
        let norm = self.grad_norm();
        if norm > max_norm {
            let clip_coef = (max_norm / (norm + 1e-6)) as f32;
            self.grads.iter_mut().for_each(|g| *g *= clip_coef);
        }
        norm
    }
}

/// Computes the pretraining losses and their gradients.
pub trait LossModule {
    /// The actor evaluated during pretraining.
    type Actor: SequencePolicy;

    /// Compute all loss components for `batch`.
    ///
    /// Must return at least `loss_log_likelihood`, `loss_entropy` and
    /// `loss_alpha`.
    fn forward(&mut self, batch: &TensorDict) -> Result<LossValues>;

    /// Accumulate into `group` the gradient of its objective from the most
    /// recent `forward`.
    fn backward(&mut self, group: ParamGroup) -> Result<()>;

    fn parameters(&self, group: ParamGroup) -> &Parameters;

    fn parameters_mut(&mut self, group: ParamGroup) -> &mut Parameters;

    fn actor_mut(&mut self) -> &mut Self::Actor;
}
