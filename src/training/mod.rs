//! Online Decision Transformer pretraining.
//!
//! ## Overview
//!
//! - **OdtConfig**: typed configuration, loaded from JSON
//! - **SequenceBuffer**: offline trajectories sampled as fixed-length windows
//! - **LossModule**: seam to the model, its losses and gradients
//! - **Optimizer / LrScheduler**: parameter updates and warmup
//! - **InferenceWrapper**: rolling-context adapter used for evaluation
//! - **Pretrainer**: the training loop itself
//!
//! ## Usage
//!
//! ```rust,ignore
//! use odt_planner::log::ConsoleLogger;
//! use odt_planner::training::{OdtConfig, Pretrainer, SequenceBuffer};
//!
//! let config = OdtConfig::from_path("odt_config.json")?;
//! let mut buffer = SequenceBuffer::new(&config.replay_buffer, config.env.reward_scaling);
//! for trajectory in dataset {
//!     buffer.add_trajectory(trajectory)?;
//! }
//! let normalization = buffer.normalize_observations()?;
//!
//! let mut trainer = Pretrainer::new(config, loss_module, buffer, make_env(&normalization))?
//!     .with_logger(Box::new(ConsoleLogger::new()));
//! let report = trainer.run()?;
//! println!("{}", report.summary());
//! ```

pub mod buffer;
pub mod config;
pub mod inference;
pub mod loss;
pub mod optim;
pub mod pretrain;

// Re-export main types
pub use buffer::{ObsNormalization, OfflineBuffer, SequenceBuffer, Trajectory};
pub use config::{EnvConfig, LoggerConfig, OdtConfig, OptimConfig, ReplayBufferConfig};
pub use inference::{InferenceWrapper, SequencePolicy};
pub use loss::{LossModule, LossValues, ParamGroup, Parameters};
pub use optim::{Adam, LrScheduler, Optimizer, Sgd, WarmupScheduler};
pub use pretrain::{Baseline, PretrainReport, PretrainStep, Pretrainer, EVAL_REWARD};
