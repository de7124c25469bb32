//! Integration tests for the pretraining loop.

use odt_planner::core::{Device, Tensor, TensorDict};
use odt_planner::env::{EvalEnv, ExplorationType, StepOutcome};
use odt_planner::log::MemoryLogger;
use odt_planner::training::loss::{ALPHA, ENTROPY, LOG_LIKELIHOOD};
use odt_planner::training::{
    LossModule, LossValues, OdtConfig, OfflineBuffer, Optimizer, ParamGroup, Parameters,
    Pretrainer, SequenceBuffer, SequencePolicy, Sgd, Trajectory, WarmupScheduler, EVAL_REWARD,
};
use odt_planner::{PlannerError, Result};

// =============================================================================
// Collaborators
// =============================================================================

struct MockActor {
    device: Device,
    training: bool,
    /// Training flag observed at each prediction.
    modes_seen: Vec<bool>,
    devices_seen: Vec<Device>,
}

impl SequencePolicy for MockActor {
    fn device(&self) -> Device {
        self.device
    }

    fn action_dim(&self) -> usize {
        1
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn predict(&mut self, context: &TensorDict, _exploration: ExplorationType) -> Result<Tensor> {
        self.modes_seen.push(self.training);
        self.devices_seen.push(context.device());
        let batch = context.get("observation")?.shape()[0];
        Ok(Tensor::zeros(vec![batch, 1]))
    }
}

struct MockLoss {
    actor: MockActor,
    transformer: Parameters,
    temperature: Parameters,
    transformer_grad: f32,
    calls: usize,
    missing_alpha: bool,
    batch_devices: Vec<Device>,
    batch_keys: Vec<String>,
    /// Whether the transformer gradient was zero when backward started.
    zeroed_before_backward: Vec<bool>,
}

impl MockLoss {
    fn new() -> Self {
        Self {
            actor: MockActor {
                device: Device::Cuda(0),
                training: true,
                modes_seen: Vec::new(),
                devices_seen: Vec::new(),
            },
            transformer: Parameters::new(vec![1.0; 4]),
            temperature: Parameters::new(vec![0.1]),
            transformer_grad: 10.0,
            calls: 0,
            missing_alpha: false,
            batch_devices: Vec::new(),
            batch_keys: Vec::new(),
            zeroed_before_backward: Vec::new(),
        }
    }
}

impl LossModule for MockLoss {
    type Actor = MockActor;

    fn forward(&mut self, batch: &TensorDict) -> Result<LossValues> {
        self.batch_devices.push(batch.device());
        self.batch_keys = batch.keys().cloned().collect();
        if self.missing_alpha {
            return Ok(LossValues::new().with(LOG_LIKELIHOOD, 1.0).with(ENTROPY, 0.0));
        }

        // Log-likelihood halves, thirds, ... so the baseline is easy to spot
        let log_likelihood = 2.0 / (1 + self.calls) as f64;
        self.calls += 1;
        Ok(LossValues::from_components(log_likelihood, 0.5, 0.1).with("alpha", 0.1))
    }

    fn backward(&mut self, group: ParamGroup) -> Result<()> {
        match group {
            ParamGroup::Transformer => {
                self.zeroed_before_backward
                    .push(self.transformer.grads.iter().all(|&g| g == 0.0));
                let grads = vec![self.transformer_grad; self.transformer.len()];
                self.transformer.accumulate(&grads)
            }
            ParamGroup::Temperature => self.temperature.accumulate(&[1.0]),
        }
    }

    fn parameters(&self, group: ParamGroup) -> &Parameters {
        match group {
            ParamGroup::Transformer => &self.transformer,
            ParamGroup::Temperature => &self.temperature,
        }
    }

    fn parameters_mut(&mut self, group: ParamGroup) -> &mut Parameters {
        match group {
            ParamGroup::Transformer => &mut self.transformer,
            ParamGroup::Temperature => &mut self.temperature,
        }
    }

    fn actor_mut(&mut self) -> &mut MockActor {
        &mut self.actor
    }
}

struct MockBuffer {
    samples: usize,
    fail_after: Option<usize>,
}

impl OfflineBuffer for MockBuffer {
    fn sample(&mut self) -> Result<TensorDict> {
        if self.fail_after.is_some_and(|n| self.samples >= n) {
            return Err(PlannerError::EmptyBuffer);
        }
        self.samples += 1;
        Ok(TensorDict::new().with("observation", Tensor::zeros(vec![4, 2, 3])))
    }
}

/// Two parallel episodes. Every step of the k-th rollout pays k per episode;
/// episode 0 reports done on every step.
struct MockEnv {
    rollouts: usize,
    steps: usize,
    fail: bool,
}

impl EvalEnv for MockEnv {
    fn batch_size(&self) -> usize {
        2
    }

    fn reset(&mut self) -> Result<TensorDict> {
        self.rollouts += 1;
        Ok(TensorDict::new().with("observation", Tensor::zeros(vec![2, 3])))
    }

    fn step(&mut self, action: &Tensor) -> Result<StepOutcome> {
        if self.fail {
            return Err(PlannerError::Environment("simulator crashed".to_string()));
        }
        assert_eq!(action.shape(), &[2, 1]);
        self.steps += 1;
        Ok(StepOutcome {
            observation: TensorDict::new().with("observation", Tensor::zeros(vec![2, 3])),
            reward: vec![self.rollouts as f32; 2],
            done: vec![true, false],
        })
    }
}

fn config(steps: usize, interval: usize) -> OdtConfig {
    OdtConfig::default()
        .with_gradient_steps(steps)
        .with_log_interval(interval)
        .with_eval_steps(3)
        .with_reward_scaling(0.5)
        .with_device(Device::Cuda(0))
        .with_progress(false)
}

fn trainer(
    config: OdtConfig,
    loss: MockLoss,
    fail_after: Option<usize>,
) -> Pretrainer<MockLoss, MockBuffer, MockEnv> {
    let buffer = MockBuffer {
        samples: 0,
        fail_after,
    };
    let env = MockEnv {
        rollouts: 0,
        steps: 0,
        fail: false,
    };
    Pretrainer::new(config, loss, buffer, env).unwrap()
}

/// Plain SGD at a fixed learning rate.
fn sgd_trainer(
    config: OdtConfig,
    loss: MockLoss,
    lr: f64,
) -> Pretrainer<MockLoss, MockBuffer, MockEnv> {
    let mut transformer: Box<dyn Optimizer> = Box::new(Sgd::new(lr));
    let scheduler = WarmupScheduler::new(transformer.as_mut(), 1);
    trainer(config, loss, None).with_optimizers(
        transformer,
        Box::new(Sgd::new(lr)),
        Box::new(scheduler),
    )
}

// =============================================================================
// Loop Behaviour
// =============================================================================

#[test]
fn test_baseline_and_evaluation_cadence() {
    let logger = MemoryLogger::new();
    let mut trainer = trainer(config(5, 2), MockLoss::new(), None).with_logger(Box::new(logger.clone()));

    let report = trainer.run().unwrap();

    assert_eq!(report.steps, 5);
    assert_eq!(report.evaluations, 3);
    assert_eq!(trainer.eval_env().rollouts, 3);
    // No early stop even though episode 0 is always done
    assert_eq!(trainer.eval_env().steps, 9);

    // Rollout k pays 3k per episode; 3k / 0.5 = 6k, reused between evaluations
    assert_eq!(
        logger.series(EVAL_REWARD),
        vec![(0, 6.0), (1, 6.0), (2, 12.0), (3, 12.0), (4, 18.0)]
    );

    // Baseline is iteration 0, untouched by later iterations
    assert_eq!(trainer.baseline().loss(), Some(2.5));
    assert_eq!(trainer.baseline().reward(), Some(6.0));
    assert_eq!(report.final_loss, Some(2.0 / 5.0 + 0.5));
    assert_eq!(report.final_reward, Some(18.0));
}

#[test]
fn test_every_component_is_logged() {
    let logger = MemoryLogger::new();
    let mut trainer = trainer(config(2, 1), MockLoss::new(), None).with_logger(Box::new(logger.clone()));
    trainer.run().unwrap();

    let step0: Vec<String> = logger
        .records()
        .into_iter()
        .filter(|r| r.step == 0)
        .map(|r| r.name)
        .collect();
    assert_eq!(step0, vec![LOG_LIKELIHOOD, ENTROPY, ALPHA, "alpha", EVAL_REWARD]);
    assert_eq!(logger.len(), 10);
    assert_eq!(logger.series(LOG_LIKELIHOOD), vec![(0, 2.0), (1, 1.0)]);
}

#[test]
fn test_runs_without_logger() {
    let mut trainer = trainer(config(3, 1), MockLoss::new(), None);
    let report = trainer.run().unwrap();
    assert_eq!(report.steps, 3);
    assert!(report.summary().starts_with("loss: 2.5000 -> "));
}

#[test]
fn test_step_descriptions() {
    let mut trainer = trainer(config(3, 10), MockLoss::new(), None);
    let first = trainer.step().unwrap();
    let second = trainer.step().unwrap();

    assert!(first.evaluated);
    assert!(!second.evaluated);
    assert_eq!(second.evaluation_reward, first.evaluation_reward);
    assert_eq!(
        second.describe(trainer.baseline()),
        "[Pre-Training] loss: 1.5000 (init: 2.5000), evaluation reward: 6.0000 (init=6.0000)"
    );
}

#[test]
fn test_batches_moved_to_device() {
    let mut trainer = trainer(config(2, 1), MockLoss::new(), None);
    trainer.run().unwrap();
    assert_eq!(trainer.loss_module().batch_devices, vec![Device::Cuda(0); 2]);
}

#[test]
fn test_evaluation_runs_in_eval_mode() {
    let mut trainer = trainer(config(1, 1), MockLoss::new(), None);
    trainer.run().unwrap();

    let actor = &trainer.loss_module().actor;
    assert_eq!(actor.modes_seen, vec![false; 3]);
    assert!(actor.training);
    // Observations were cast to the actor's device
    assert_eq!(actor.devices_seen, vec![Device::Cuda(0); 3]);
}

// =============================================================================
// Updates
// =============================================================================

#[test]
fn test_gradients_clipped_before_step() {
    let mut trainer = sgd_trainer(config(1, 1).with_clip_grad(0.25), MockLoss::new(), 1.0);
    let step = trainer.step().unwrap();

    // Gradient [10; 4] has norm 20 and is scaled down to norm 0.25
    assert!((step.grad_norm - 20.0).abs() < 1e-9);
    for &v in &trainer.loss_module().transformer.values {
        assert!((v - 0.875).abs() < 1e-5, "value {}", v);
    }
}

#[test]
fn test_gradients_zeroed_each_iteration() {
    let mut trainer = sgd_trainer(config(4, 1), MockLoss::new(), 0.01);
    trainer.run().unwrap();
    assert_eq!(trainer.loss_module().zeroed_before_backward, vec![true; 4]);
}

#[test]
fn test_temperature_updated_independently() {
    let mut trainer = sgd_trainer(config(2, 1), MockLoss::new(), 0.01);
    trainer.run().unwrap();

    let loss = trainer.loss_module();
    // Two SGD steps on a unit gradient
    assert!((loss.temperature.values[0] - 0.08).abs() < 1e-6);
    assert_eq!(loss.parameters(ParamGroup::Temperature).len(), 1);
}

#[test]
fn test_scheduler_steps_every_iteration() {
    let mut config = config(3, 100);
    config.optim.lr = 1.0e-3;
    config.optim.warmup_steps = 4;
    let mut trainer = trainer(config, MockLoss::new(), None);

    let rates: Vec<f64> = (0..3).map(|_| trainer.step().unwrap().learning_rate).collect();
    let expected = [5.0e-4, 7.5e-4, 1.0e-3];
    for (rate, want) in rates.iter().zip(expected) {
        assert!((rate - want).abs() < 1e-12, "{} != {}", rate, want);
    }
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_buffer_error_stops_run() {
    let mut trainer = trainer(config(10, 1), MockLoss::new(), Some(2));
    let err = trainer.run().unwrap_err();

    assert!(matches!(err, PlannerError::EmptyBuffer));
    assert_eq!(trainer.iteration(), 2);
}

#[test]
fn test_missing_loss_component() {
    let mut loss = MockLoss::new();
    loss.missing_alpha = true;
    let mut trainer = trainer(config(1, 1), loss, None);

    let err = trainer.step().unwrap_err();
    assert!(matches!(err, PlannerError::MissingKey(ref key) if key == ALPHA));
    assert_eq!(trainer.iteration(), 0);
}

#[test]
fn test_rollout_error_restores_training_mode() {
    let buffer = MockBuffer {
        samples: 0,
        fail_after: None,
    };
    let env = MockEnv {
        rollouts: 0,
        steps: 0,
        fail: true,
    };
    let mut trainer = Pretrainer::new(config(1, 1), MockLoss::new(), buffer, env).unwrap();

    let err = trainer.step().unwrap_err();
    assert!(matches!(err, PlannerError::Environment(_)));
    assert!(trainer.loss_module().actor.training);
    assert_eq!(trainer.baseline().loss(), None);
}

#[test]
fn test_invalid_config_rejected() {
    let buffer = MockBuffer {
        samples: 0,
        fail_after: None,
    };
    let env = MockEnv {
        rollouts: 0,
        steps: 0,
        fail: false,
    };
    let result = Pretrainer::new(config(1, 0), MockLoss::new(), buffer, env);
    assert!(matches!(result, Err(PlannerError::Config(_))));
}

// =============================================================================
// With The Sequence Buffer
// =============================================================================

#[test]
fn test_pretraining_on_sequence_buffer() {
    let mut config = config(3, 1);
    config.replay_buffer.batch_size = 4;
    config.replay_buffer.stacked_frames = 5;

    let mut buffer = SequenceBuffer::new(&config.replay_buffer, config.env.reward_scaling);
    for len in [3, 7, 12] {
        let mut trajectory = Trajectory::new();
        for t in 0..len {
            trajectory.push(vec![t as f32; 3], vec![0.0], 1.0, t + 1 == len);
        }
        buffer.add_trajectory(trajectory).unwrap();
    }
    buffer.normalize_observations().unwrap();

    let env = MockEnv {
        rollouts: 0,
        steps: 0,
        fail: false,
    };
    let mut trainer = Pretrainer::new(config, MockLoss::new(), buffer, env).unwrap();
    let report = trainer.run().unwrap();

    assert_eq!(report.steps, 3);
    let mut keys = trainer.loss_module().batch_keys.clone();
    keys.sort();
    assert_eq!(keys, vec!["action", "mask", "observation", "return_to_go", "timestep"]);
    assert_eq!(trainer.buffer().total_timesteps(), 22);
}
