//! Online Decision Transformer configuration.
//!
//! One struct per section (`env`, `optim`, `logger`, `replay_buffer`).
//! Every field has a default, so a JSON file only needs the values
//! it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::Device;
use crate::error::{PlannerError, Result};

/// Evaluation environment settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Environment name, reported when pretraining starts.
    pub name: String,

    /// Multiplier applied to rewards in the offline data. Evaluation rewards
    /// are divided by it to report them in environment units.
    pub reward_scaling: f64,

    /// Target return the policy is conditioned on during evaluation.
    pub eval_target_return: f64,

    /// Number of past steps the inference wrapper feeds to the policy.
    pub inference_context: usize,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            name: "HalfCheetah-v3".to_string(),
            reward_scaling: 0.001,
            eval_target_return: 6000.0,
            inference_context: 5,
        }
    }
}

/// Optimizer and schedule settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimConfig {
    /// Device batches are moved to before the loss is computed.
    pub device: Device,

    /// Transformer learning rate.
    pub lr: f64,

    pub weight_decay: f64,

    /// Temperature (alpha) learning rate.
    pub alpha_lr: f64,

    /// Number of pretraining iterations.
    pub pretrain_gradient_steps: usize,

    /// Maximum gradient norm for the transformer parameters.
    pub clip_grad: f64,

    /// Linear learning-rate warmup length.
    pub warmup_steps: usize,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            lr: 1.0e-4,
            weight_decay: 5.0e-4,
            alpha_lr: 1.0e-4,
            pretrain_gradient_steps: 10_000,
            clip_grad: 0.25,
            warmup_steps: 10_000,
        }
    }
}

/// Metric logging and evaluation cadence.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub exp_name: String,

    /// Evaluate every this many iterations (iteration 0 included).
    pub pretrain_log_interval: usize,

    /// Step budget of each evaluation rollout.
    pub eval_steps: usize,

    /// Draw a progress bar on stderr.
    pub show_progress: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            exp_name: "OnlineDT".to_string(),
            pretrain_log_interval: 500,
            eval_steps: 1000,
            show_progress: true,
        }
    }
}

/// Offline dataset settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayBufferConfig {
    /// Offline dataset name, reported when pretraining starts.
    pub dataset: String,

    /// Sequences per sampled batch.
    pub batch_size: usize,

    /// Sequence length of each sample (the model's context).
    pub stacked_frames: usize,

    /// Maximum number of stored trajectories.
    pub capacity: usize,

    /// Device sampled batches are produced on.
    pub device: Device,

    /// Seed for window sampling.
    pub seed: u64,
}

impl Default for ReplayBufferConfig {
    fn default() -> Self {
        Self {
            dataset: "halfcheetah-medium-v2".to_string(),
            batch_size: 256,
            stacked_frames: 20,
            capacity: 1_000_000,
            device: Device::Cpu,
            seed: 0,
        }
    }
}

/// Complete pretraining configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OdtConfig {
    pub env: EnvConfig,
    pub optim: OptimConfig,
    pub logger: LoggerConfig,
    pub replay_buffer: ReplayBufferConfig,
}

impl OdtConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set the number of pretraining iterations.
    pub fn with_gradient_steps(mut self, steps: usize) -> Self {
        self.optim.pretrain_gradient_steps = steps;
        self
    }

    /// Set the evaluation cadence.
    pub fn with_log_interval(mut self, interval: usize) -> Self {
        self.logger.pretrain_log_interval = interval;
        self
    }

    pub fn with_eval_steps(mut self, steps: usize) -> Self {
        self.logger.eval_steps = steps;
        self
    }

    pub fn with_reward_scaling(mut self, scaling: f64) -> Self {
        self.env.reward_scaling = scaling;
        self
    }

    pub fn with_clip_grad(mut self, clip: f64) -> Self {
        self.optim.clip_grad = clip;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.optim.device = device;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.logger.show_progress = show;
        self
    }

    /// Check value ranges the pretraining loop depends on.
    pub fn validate(&self) -> Result<()> {
        if self.logger.pretrain_log_interval == 0 {
            return Err(PlannerError::Config(
                "logger.pretrain_log_interval must be positive".to_string(),
            ));
        }
        if !(self.env.reward_scaling.is_finite() && self.env.reward_scaling > 0.0) {
            return Err(PlannerError::Config(format!(
                "env.reward_scaling must be positive, got {}",
                self.env.reward_scaling
            )));
        }
        if !(self.optim.clip_grad > 0.0) {
            return Err(PlannerError::Config(format!(
                "optim.clip_grad must be positive, got {}",
                self.optim.clip_grad
            )));
        }
        if self.optim.lr <= 0.0 || self.optim.alpha_lr <= 0.0 {
            return Err(PlannerError::Config("learning rates must be positive".to_string()));
        }
        if self.optim.warmup_steps == 0 {
            return Err(PlannerError::Config("optim.warmup_steps must be positive".to_string()));
        }
        if self.env.inference_context == 0 || self.replay_buffer.stacked_frames == 0 {
            return Err(PlannerError::Config("context lengths must be positive".to_string()));
        }
        if self.replay_buffer.batch_size == 0 {
            return Err(PlannerError::Config(
                "replay_buffer.batch_size must be positive".to_string(),
            ));
        }
        if self.env.inference_context > self.replay_buffer.stacked_frames {
            tracing::warn!(
                inference_context = self.env.inference_context,
                stacked_frames = self.replay_buffer.stacked_frames,
                "inference context is longer than the training context"
            );
        }
        Ok(())
    }
}
