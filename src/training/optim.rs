//! Optimizers and learning-rate schedules over flat parameter groups.

use super::loss::Parameters;
use crate::error::{PlannerError, Result};

/// Updates one parameter group from its stored gradient.
pub trait Optimizer {
    /// Apply one update.
    fn step(&mut self, params: &mut Parameters) -> Result<()>;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}

fn check_finite(params: &Parameters) -> Result<()> {
    if params.grads.len() != params.values.len() {
        return Err(PlannerError::ShapeMismatch {
            expected: vec![params.values.len()],
            actual: vec![params.grads.len()],
        });
    }
    if params.grads.iter().any(|g| !g.is_finite()) {
        return Err(PlannerError::Training("non-finite gradient".to_string()));
    }
    Ok(())
}

/// Plain stochastic gradient descent with decoupled weight decay.
#[derive(Clone, Debug)]
pub struct Sgd {
    lr: f64,
    weight_decay: f64,
}

impl Sgd {
    pub fn new(lr: f64) -> Self {
        Self { lr, weight_decay: 0.0 }
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut Parameters) -> Result<()> {
        check_finite(params)?;
        let (lr, wd) = (self.lr as f32, self.weight_decay as f32);
        for (v, &g) in params.values.iter_mut().zip(&params.grads) {
            *v -= lr * (g + wd * *v);
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }
}

/// Adam with bias correction.
#[derive(Clone, Debug)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    weight_decay: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: u64,
}

impl Adam {
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> u64 {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut Parameters) -> Result<()> {
        check_finite(params)?;
        if self.m.len() != params.len() {
            self.m = vec![0.0; params.len()];
            self.v = vec![0.0; params.len()];
        }

        self.t += 1;
        let t = i32::try_from(self.t).unwrap_or(i32::MAX);
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);

        for (i, (value, &grad)) in params.values.iter_mut().zip(&params.grads).enumerate() {
            let g = grad as f64 + self.weight_decay * *value as f64;
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;
            *value -= (self.lr * m_hat / (v_hat.sqrt() + self.eps)) as f32;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }
}

/// Adjusts an optimizer's learning rate once per iteration.
pub trait LrScheduler {
    fn step(&mut self, optimizer: &mut dyn Optimizer);

    /// Learning rate set by the most recent call.
    fn last_lr(&self) -> f64;
}

/// Linear warmup: `lr = base_lr * min((step + 1) / warmup_steps, 1)`.
///
/// Creating the scheduler sets the step-0 rate on the optimizer.
#[derive(Clone, Debug)]
pub struct WarmupScheduler {
    base_lr: f64,
    warmup_steps: usize,
    step_count: usize,
    last_lr: f64,
}

impl WarmupScheduler {
    pub fn new(optimizer: &mut dyn Optimizer, warmup_steps: usize) -> Self {
        let base_lr = optimizer.learning_rate();
        let mut scheduler = Self {
            base_lr,
            warmup_steps: warmup_steps.max(1),
            step_count: 0,
            last_lr: base_lr,
        };
        scheduler.apply(optimizer);
        scheduler
    }

    fn factor(&self) -> f64 {
        ((self.step_count + 1) as f64 / self.warmup_steps as f64).min(1.0)
    }

    fn apply(&mut self, optimizer: &mut dyn Optimizer) {
        self.last_lr = self.base_lr * self.factor();
        optimizer.set_learning_rate(self.last_lr);
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }
}

impl LrScheduler for WarmupScheduler {
    fn step(&mut self, optimizer: &mut dyn Optimizer) {
        self.step_count += 1;
        self.apply(optimizer);
    }

    fn last_lr(&self) -> f64 {
        self.last_lr
    }
}
