//! Offline pretraining loop for the Online Decision Transformer.
//!
//! Each iteration samples a batch, computes the loss components, updates
//! the transformer and the entropy temperature with their own optimizers,
//! advances the learning-rate schedule and, on the logging cadence, runs a
//! deterministic evaluation rollout. The first loss and the first evaluation
//! reward are kept as a baseline for progress reporting.

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use super::buffer::OfflineBuffer;
use super::config::OdtConfig;
use super::inference::{InferenceWrapper, SequencePolicy};
use super::loss::{LossModule, LossValues, ParamGroup};
use super::optim::{Adam, LrScheduler, Optimizer, WarmupScheduler};
use crate::env::{EvalEnv, ExplorationType, RolloutOptions};
use crate::error::{PlannerError, Result};
use crate::log::MetricLogger;

/// Logger key of the evaluation reward.
pub const EVAL_REWARD: &str = "evaluation reward";

/// First loss and first evaluation reward of a run.
///
/// Each value is written once and never changes afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    loss: Option<f64>,
    reward: Option<f64>,
}

impl Baseline {
    /// Record values that are not captured yet.
    pub fn capture(&mut self, loss: f64, reward: f64) {
        self.loss.get_or_insert(loss);
        self.reward.get_or_insert(reward);
    }

    pub fn loss(&self) -> Option<f64> {
        self.loss
    }

    pub fn reward(&self) -> Option<f64> {
        self.reward
    }
}

/// What one pretraining iteration produced.
#[derive(Clone, Debug)]
pub struct PretrainStep {
    pub iteration: usize,
    pub losses: LossValues,

    /// `loss_log_likelihood + loss_entropy`.
    pub transformer_loss: f64,

    /// Transformer gradient norm before clipping.
    pub grad_norm: f64,

    /// Latest evaluation reward (reused between evaluations).
    pub evaluation_reward: f64,

    /// Whether this iteration ran an evaluation rollout.
    pub evaluated: bool,

    /// Transformer learning rate after the scheduler step.
    pub learning_rate: f64,
}

impl PretrainStep {
    /// Progress line comparing current values to the baseline.
    pub fn describe(&self, baseline: &Baseline) -> String {
        format!(
            "[Pre-Training] loss: {:.4} (init: {:.4}), evaluation reward: {:.4} (init={:.4})",
            self.transformer_loss,
            baseline.loss().unwrap_or(f64::NAN),
            self.evaluation_reward,
            baseline.reward().unwrap_or(f64::NAN),
        )
    }
}

/// Summary of a finished run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PretrainReport {
    pub steps: usize,
    pub evaluations: usize,
    pub baseline: Baseline,
    pub final_loss: Option<f64>,
    pub final_reward: Option<f64>,
}

impl PretrainReport {
    /// "improved from X to Y" style summary.
    pub fn summary(&self) -> String {
        let show = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v));
        format!(
            "loss: {} -> {}, evaluation reward: {} -> {}",
            show(self.baseline.loss()),
            show(self.final_loss),
            show(self.baseline.reward()),
            show(self.final_reward),
        )
    }
}

/// Runs the pretraining loop.
pub struct Pretrainer<L: LossModule, B: OfflineBuffer, E: EvalEnv> {
    config: OdtConfig,
    loss_module: L,
    buffer: B,
    eval_env: E,
    transformer_optim: Box<dyn Optimizer>,
    temperature_optim: Box<dyn Optimizer>,
    scheduler: Box<dyn LrScheduler>,
    logger: Option<Box<dyn MetricLogger>>,
    baseline: Baseline,
    eval_reward: Option<f64>,
    last_loss: Option<f64>,
    evaluations: usize,
    iteration: usize,
}

impl<L: LossModule, B: OfflineBuffer, E: EvalEnv> Pretrainer<L, B, E> {
    /// Build a pretrainer with Adam optimizers and linear warmup.
    pub fn new(config: OdtConfig, loss_module: L, buffer: B, eval_env: E) -> Result<Self> {
        config.validate()?;

        let mut transformer_optim: Box<dyn Optimizer> =
            Box::new(Adam::new(config.optim.lr).with_weight_decay(config.optim.weight_decay));
        let temperature_optim: Box<dyn Optimizer> = Box::new(Adam::new(config.optim.alpha_lr));
        let scheduler = WarmupScheduler::new(transformer_optim.as_mut(), config.optim.warmup_steps);

        Ok(Self {
            config,
            loss_module,
            buffer,
            eval_env,
            transformer_optim,
            temperature_optim,
            scheduler: Box::new(scheduler),
            logger: None,
            baseline: Baseline::default(),
            eval_reward: None,
            last_loss: None,
            evaluations: 0,
            iteration: 0,
        })
    }

    /// Replace the optimizers and schedule.
    pub fn with_optimizers(
        mut self,
        transformer_optim: Box<dyn Optimizer>,
        temperature_optim: Box<dyn Optimizer>,
        scheduler: Box<dyn LrScheduler>,
    ) -> Self {
        self.transformer_optim = transformer_optim;
        self.temperature_optim = temperature_optim;
        self.scheduler = scheduler;
        self
    }

    pub fn with_logger(mut self, logger: Box<dyn MetricLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// One pretraining iteration.
    pub fn step(&mut self) -> Result<PretrainStep> {
        let i = self.iteration;

        let batch = self.buffer.sample()?.to(self.config.optim.device);
        let losses = self.loss_module.forward(&batch)?;
        losses.check_required()?;
        let transformer_loss = losses.transformer_loss()?;

        // Transformer: log-likelihood + entropy, clipped
        self.loss_module.parameters_mut(ParamGroup::Transformer).zero_grad();
        self.loss_module.backward(ParamGroup::Transformer)?;
        let params = self.loss_module.parameters_mut(ParamGroup::Transformer);
        let grad_norm = params.clip_grad_norm(self.config.optim.clip_grad);
        self.transformer_optim.step(params)?;

        // Temperature
        self.loss_module.parameters_mut(ParamGroup::Temperature).zero_grad();
        self.loss_module.backward(ParamGroup::Temperature)?;
        self.temperature_optim
            .step(self.loss_module.parameters_mut(ParamGroup::Temperature))?;

        self.scheduler.step(self.transformer_optim.as_mut());

        let evaluated = i % self.config.logger.pretrain_log_interval == 0;
        if evaluated {
            self.eval_reward = Some(self.evaluate()?);
        }
        let evaluation_reward = self.eval_reward.ok_or_else(|| {
            PlannerError::Training(format!("no evaluation reward at iteration {}", i))
        })?;

        self.baseline.capture(transformer_loss, evaluation_reward);
        self.last_loss = Some(transformer_loss);

        if let Some(logger) = &self.logger {
            for (name, value) in losses.iter() {
                logger.log_scalar(name, value, i as u64);
            }
            logger.log_scalar(EVAL_REWARD, evaluation_reward, i as u64);
        }

        self.iteration += 1;
        Ok(PretrainStep {
            iteration: i,
            losses,
            transformer_loss,
            grad_norm,
            evaluation_reward,
            evaluated,
            learning_rate: self.transformer_optim.learning_rate(),
        })
    }

    /// Deterministic rollout of the actor; mean total reward over the batch,
    /// divided by the reward scaling.
    pub fn evaluate(&mut self) -> Result<f64> {
        let options = RolloutOptions::new(self.config.logger.eval_steps)
            .with_break_when_any_done(false)
            .with_auto_cast(true)
            .with_exploration(ExplorationType::Mode);
        let reward_scaling = self.config.env.reward_scaling;
        let target_return = (self.config.env.eval_target_return * reward_scaling) as f32;

        let actor = self.loss_module.actor_mut();
        actor.set_training(false);
        let rollout = {
            let mut policy = InferenceWrapper::new(&mut *actor, self.config.env.inference_context)
                .with_target_return(target_return);
            self.eval_env.rollout(&options, &mut policy)
        };
        actor.set_training(true);
        let rollout = rollout?;

        let reward = rollout.mean_total_reward() / reward_scaling;
        self.evaluations += 1;
        tracing::info!(
            iteration = self.iteration,
            steps = rollout.steps(),
            reward,
            "evaluation"
        );
        Ok(reward)
    }

    /// Run the remaining iterations up to `optim.pretrain_gradient_steps`.
    pub fn run(&mut self) -> Result<PretrainReport> {
        let total = self.config.optim.pretrain_gradient_steps;
        let pb = if self.config.logger.show_progress {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .map_err(|e| PlannerError::Config(e.to_string()))?,
        );
        pb.set_position(self.iteration as u64);

        tracing::info!(
            experiment = %self.config.logger.exp_name,
            env = %self.config.env.name,
            dataset = %self.config.replay_buffer.dataset,
            steps = total,
            "starting pretraining"
        );

        while self.iteration < total {
            let step = self.step()?;
            pb.set_message(step.describe(&self.baseline));
            pb.inc(1);
        }
        pb.finish_with_message("Pretraining complete");

        if let Some(logger) = &self.logger {
            logger.close();
        }

        let report = self.report();
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    /// Summary of the iterations run so far.
    pub fn report(&self) -> PretrainReport {
        PretrainReport {
            steps: self.iteration,
            evaluations: self.evaluations,
            baseline: self.baseline,
            final_loss: self.last_loss,
            final_reward: self.eval_reward,
        }
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    /// Number of completed iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn last_eval_reward(&self) -> Option<f64> {
        self.eval_reward
    }

    pub fn loss_module(&self) -> &L {
        &self.loss_module
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn eval_env(&self) -> &E {
        &self.eval_env
    }

    pub fn config(&self) -> &OdtConfig {
        &self.config
    }
}
