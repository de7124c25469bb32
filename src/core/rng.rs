//! Deterministic random number generation for search and sampling.
//!
//! ## Key Features
//!
//! - **Deterministic**: Same seed produces identical sequence
//! - **Exploration noise**: Dirichlet samples for root prior perturbation
//! - **Weighted choice**: Visit-count proportional action sampling
//!
//! ```
//! use odt_planner::core::SearchRng;
//!
//! let mut rng1 = SearchRng::new(42);
//! let mut rng2 = SearchRng::new(42);
//! assert_eq!(rng1.gen_range_usize(0..100), rng2.gen_range_usize(0..100));
//! ```

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Dirichlet, Distribution};

use crate::error::{PlannerError, Result};

/// Deterministic RNG used by the planner and the offline buffer.
///
/// Uses ChaCha8 for speed while maintaining good statistical quality.
#[derive(Clone, Debug)]
pub struct SearchRng {
    inner: ChaCha8Rng,
    seed: u64,
}

impl SearchRng {
    /// Create a new RNG with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// The seed this RNG was created with.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generate a random usize in the given range.
    pub fn gen_range_usize(&mut self, range: std::ops::Range<usize>) -> usize {
        self.inner.gen_range(range)
    }

    /// Generate a uniform value in `[0, 1)`.
    pub fn gen_unit(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// Choose a random element with weighted probability.
    ///
    /// Returns the index of the chosen element.
    /// Weights do not need to sum to 1.0.
    ///
    /// Returns `None` if weights are empty or all zero.
    pub fn choose_weighted(&mut self, weights: &[f64]) -> Option<usize> {
        if weights.is_empty() {
            return None;
        }

        let total: f64 = weights.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return None;
        }

        let mut threshold = self.gen_unit() * total;

        for (i, &weight) in weights.iter().enumerate() {
            threshold -= weight;
            if threshold < 0.0 {
                return Some(i);
            }
        }

        // Floating point edge case - return last non-zero weight
        weights.iter().rposition(|&w| w > 0.0)
    }

    /// Sample a symmetric Dirichlet(`alpha`) vector of length `size`.
    ///
    /// When every underlying Gamma variate underflows to zero (possible for
    /// very small `alpha`) the sample collapses onto a single uniformly
    /// chosen coordinate, the distribution's limit as `alpha` goes to zero.
    pub fn dirichlet(&mut self, alpha: f64, size: usize) -> Result<Vec<f64>> {
        if !(alpha > 0.0 && alpha.is_finite()) {
            return Err(PlannerError::Config(format!(
                "Dirichlet alpha must be positive, got {}",
                alpha
            )));
        }
        match size {
            0 => return Ok(Vec::new()),
            1 => return Ok(vec![1.0]),
            _ => {}
        }

        let dirichlet = Dirichlet::new_with_size(alpha, size).map_err(|e| {
            PlannerError::Config(format!("invalid Dirichlet alpha {}: {}", alpha, e))
        })?;
        let sample: Vec<f64> = dirichlet.sample(&mut self.inner);
        if sample.iter().all(|v| v.is_finite()) {
            return Ok(sample);
        }

        let hot = self.gen_range_usize(0..size);
        Ok((0..size).map(|i| if i == hot { 1.0 } else { 0.0 }).collect())
    }
}
