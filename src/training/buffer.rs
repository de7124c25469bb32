//! Offline sequence buffer for Decision Transformer pretraining.
//!
//! Trajectories are stored whole; `sample` draws fixed-length windows with
//! probability proportional to trajectory length, pads short windows with
//! zeros and marks real steps in `mask`.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::config::ReplayBufferConfig;
use crate::core::{Device, SearchRng, Tensor, TensorDict};
use crate::error::{PlannerError, Result};

/// Batch key: observations `[B, K, obs_dim]`.
pub const OBSERVATION: &str = "observation";
/// Batch key: actions `[B, K, action_dim]`.
pub const ACTION: &str = "action";
/// Batch key: scaled returns-to-go `[B, K, 1]`.
pub const RETURN_TO_GO: &str = "return_to_go";
/// Batch key: step index within the episode `[B, K]`.
pub const TIMESTEP: &str = "timestep";
/// Batch key: 1.0 for real steps, 0.0 for padding `[B, K]`.
pub const MASK: &str = "mask";

const STD_EPS: f32 = 1e-6;

/// Source of training batches.
pub trait OfflineBuffer {
    /// Draw one batch. Fails with `EmptyBuffer` when there is nothing to sample.
    fn sample(&mut self) -> Result<TensorDict>;
}

/// A single trajectory of experience.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Trajectory {
    pub observations: Vec<Vec<f32>>,
    pub actions: Vec<Vec<f32>>,
    pub rewards: Vec<f32>,
    pub returns_to_go: Vec<f32>,
    pub terminals: Vec<bool>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one transition.
    pub fn push(&mut self, observation: Vec<f32>, action: Vec<f32>, reward: f32, terminal: bool) {
        self.observations.push(observation);
        self.actions.push(action);
        self.rewards.push(reward);
        self.terminals.push(terminal);
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn total_reward(&self) -> f64 {
        self.rewards.iter().map(|&r| r as f64).sum()
    }

    /// Compute returns-to-go for the trajectory.
    pub fn compute_returns_to_go(&mut self, gamma: f32) {
        let mut running_return = 0.0;
        self.returns_to_go = vec![0.0; self.len()];
        for i in (0..self.len()).rev() {
            running_return = self.rewards[i] + gamma * running_return;
            self.returns_to_go[i] = running_return;
        }
    }

    fn obs_dim(&self) -> usize {
        self.observations.first().map_or(0, Vec::len)
    }

    fn action_dim(&self) -> usize {
        self.actions.first().map_or(0, Vec::len)
    }

    /// Per-step fields must have equal lengths and rows equal widths.
    fn check_shapes(&self) -> Result<()> {
        let len = self.len();
        for other in [self.actions.len(), self.rewards.len(), self.terminals.len()] {
            if other != len {
                return Err(PlannerError::ShapeMismatch {
                    expected: vec![len],
                    actual: vec![other],
                });
            }
        }
        let (obs_dim, action_dim) = (self.obs_dim(), self.action_dim());
        if let Some(row) = self.observations.iter().find(|o| o.len() != obs_dim) {
            return Err(PlannerError::ShapeMismatch {
                expected: vec![obs_dim],
                actual: vec![row.len()],
            });
        }
        if let Some(row) = self.actions.iter().find(|a| a.len() != action_dim) {
            return Err(PlannerError::ShapeMismatch {
                expected: vec![action_dim],
                actual: vec![row.len()],
            });
        }
        Ok(())
    }
}

/// Per-dimension observation statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObsNormalization {
    pub loc: Vec<f32>,
    pub std: Vec<f32>,
}

impl ObsNormalization {
    /// Mean and standard deviation over every stored observation.
    pub fn from_trajectories<'a>(trajectories: impl IntoIterator<Item = &'a Trajectory>) -> Result<Self> {
        let mut sum: Vec<f64> = Vec::new();
        let mut sum_sq: Vec<f64> = Vec::new();
        let mut count = 0usize;

        for obs in trajectories.into_iter().flat_map(|t| &t.observations) {
            if sum.is_empty() {
                sum = vec![0.0; obs.len()];
                sum_sq = vec![0.0; obs.len()];
            }
            if obs.len() != sum.len() {
                return Err(PlannerError::ShapeMismatch {
                    expected: vec![sum.len()],
                    actual: vec![obs.len()],
                });
            }
            for (i, &x) in obs.iter().enumerate() {
                sum[i] += x as f64;
                sum_sq[i] += (x as f64) * (x as f64);
            }
            count += 1;
        }

        if count == 0 {
            return Err(PlannerError::EmptyBuffer);
        }

        let n = count as f64;
        let loc: Vec<f32> = sum.iter().map(|&s| (s / n) as f32).collect();
        let std = sum
            .iter()
            .zip(&sum_sq)
            .map(|(&s, &sq)| {
                let mean = s / n;
                ((sq / n - mean * mean).max(0.0).sqrt() as f32).max(STD_EPS)
            })
            .collect();
        Ok(Self { loc, std })
    }

    /// `(obs - loc) / std`.
    pub fn apply(&self, observation: &[f32]) -> Vec<f32> {
        observation
            .iter()
            .zip(self.loc.iter().zip(&self.std))
            .map(|(&x, (&loc, &std))| (x - loc) / std)
            .collect()
    }
}

/// Buffer for storing and sampling trajectories.
///
/// Uses a FIFO strategy: when full, the oldest trajectories are removed.
pub struct SequenceBuffer {
    trajectories: VecDeque<Trajectory>,
    capacity: usize,
    context_len: usize,
    batch_size: usize,
    reward_scaling: f32,
    device: Device,
    normalization: Option<ObsNormalization>,
    rng: SearchRng,
}

impl SequenceBuffer {
    pub fn new(config: &ReplayBufferConfig, reward_scaling: f64) -> Self {
        Self {
            trajectories: VecDeque::new(),
            capacity: config.capacity.max(1),
            context_len: config.stacked_frames,
            batch_size: config.batch_size,
            reward_scaling: reward_scaling as f32,
            device: config.device,
            normalization: None,
            rng: SearchRng::new(config.seed),
        }
    }

    /// Add a trajectory, computing its scaled returns-to-go.
    ///
    /// Empty trajectories are ignored. Observation and action widths must
    /// match the trajectories already stored.
    pub fn add_trajectory(&mut self, mut trajectory: Trajectory) -> Result<()> {
        if trajectory.is_empty() {
            return Ok(());
        }
        trajectory.check_shapes()?;
        if let Some(first) = self.trajectories.front() {
            let expected = vec![first.obs_dim(), first.action_dim()];
            let actual = vec![trajectory.obs_dim(), trajectory.action_dim()];
            if expected != actual {
                return Err(PlannerError::ShapeMismatch { expected, actual });
            }
        }

        trajectory.compute_returns_to_go(1.0);
        for rtg in &mut trajectory.returns_to_go {
            *rtg *= self.reward_scaling;
        }

        if self.trajectories.len() >= self.capacity {
            self.trajectories.pop_front();
        }
        self.trajectories.push_back(trajectory);
        Ok(())
    }

    /// Compute observation statistics from the stored data and normalize
    /// every sampled batch with them from now on.
    pub fn normalize_observations(&mut self) -> Result<ObsNormalization> {
        let normalization = ObsNormalization::from_trajectories(&self.trajectories)?;
        self.normalization = Some(normalization.clone());
        Ok(normalization)
    }

    pub fn normalization(&self) -> Option<&ObsNormalization> {
        self.normalization.as_ref()
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    /// Total number of stored steps.
    pub fn total_timesteps(&self) -> usize {
        self.trajectories.iter().map(Trajectory::len).sum()
    }

    pub fn context_len(&self) -> usize {
        self.context_len
    }

    /// Draw one window per batch row, weighted by trajectory length.
    fn sample_window(&mut self, cumulative: &[usize], total: usize) -> (usize, usize) {
        let step = self.rng.gen_range_usize(0..total);
        let traj_idx = cumulative
            .partition_point(|&end| end <= step)
            .min(self.trajectories.len() - 1);
        let start = self.rng.gen_range_usize(0..self.trajectories[traj_idx].len());
        (traj_idx, start)
    }
}

impl OfflineBuffer for SequenceBuffer {
    fn sample(&mut self) -> Result<TensorDict> {
        let total = self.total_timesteps();
        if total == 0 {
            return Err(PlannerError::EmptyBuffer);
        }
        let Some(normalization) = self.normalization.clone() else {
            return Err(PlannerError::Training(
                "offline buffer sampled before normalize_observations".to_string(),
            ));
        };

        let cumulative: Vec<usize> = self
            .trajectories
            .iter()
            .scan(0, |acc, t| {
                *acc += t.len();
                Some(*acc)
            })
            .collect();

        let k = self.context_len;
        let obs_dim = self.trajectories[0].obs_dim();
        let action_dim = self.trajectories[0].action_dim();
        let b = self.batch_size;

        let mut obs = Vec::with_capacity(b * k * obs_dim);
        let mut act = Vec::with_capacity(b * k * action_dim);
        let mut ret = Vec::with_capacity(b * k);
        let mut time = Vec::with_capacity(b * k);
        let mut mask = Vec::with_capacity(b * k);

        for _ in 0..b {
            let (traj_idx, start) = self.sample_window(&cumulative, total);
            let traj = &self.trajectories[traj_idx];
            let end = (start + k).min(traj.len());
            let pad = k - (end - start);

            // Fill real data
            for i in start..end {
                obs.extend(normalization.apply(&traj.observations[i]));
                act.extend_from_slice(&traj.actions[i]);
                ret.push(traj.returns_to_go[i]);
                time.push(i as f32);
                mask.push(1.0);
            }

            // Pad needed?
            obs.extend(std::iter::repeat(0.0).take(pad * obs_dim));
            act.extend(std::iter::repeat(0.0).take(pad * action_dim));
            ret.extend(std::iter::repeat(0.0).take(pad));
            time.extend(std::iter::repeat(0.0).take(pad));
            mask.extend(std::iter::repeat(0.0).take(pad));
        }

        let batch = TensorDict::new()
            .with(OBSERVATION, Tensor::new(obs, vec![b, k, obs_dim])?)
            .with(ACTION, Tensor::new(act, vec![b, k, action_dim])?)
            .with(RETURN_TO_GO, Tensor::new(ret, vec![b, k, 1])?)
            .with(TIMESTEP, Tensor::new(time, vec![b, k])?)
            .with(MASK, Tensor::new(mask, vec![b, k])?);
        Ok(batch.to(self.device))
    }
}
