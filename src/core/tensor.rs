//! Minimal tensor containers exchanged with collaborators.
//!
//! `Tensor` is a flat row-major `f32` buffer with a shape. `TensorDict` is a
//! named collection of tensors backed by a persistent map so that snapshots
//! stored in search-tree nodes clone in O(1).

use im::OrdMap;
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};

/// Where a tensor container is expected to live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

/// Dense tensor stored as a flat vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
}

impl Tensor {
    /// Create a tensor, checking that `data` fills `shape` exactly.
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(PlannerError::ShapeMismatch {
                expected: vec![expected],
                actual: vec![data.len()],
            });
        }
        Ok(Self { data, shape })
    }

    /// Create a one-dimensional tensor.
    pub fn from_vec(data: Vec<f32>) -> Self {
        let shape = vec![data.len()];
        Self { data, shape }
    }

    /// Create a zero-filled tensor with the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size = shape.iter().product();
        Self {
            data: vec![0.0; size],
            shape,
        }
    }

    /// Create a zero-dimensional tensor holding one value.
    pub fn scalar(value: f32) -> Self {
        Self {
            data: vec![value],
            shape: Vec::new(),
        }
    }

    /// Stack equally shaped tensors along a new leading axis.
    pub fn stack(tensors: &[Tensor]) -> Result<Self> {
        let Some(first) = tensors.first() else {
            return Ok(Self::zeros(vec![0]));
        };

        let mut data = Vec::with_capacity(first.len() * tensors.len());
        for tensor in tensors {
            if tensor.shape != first.shape {
                return Err(PlannerError::ShapeMismatch {
                    expected: first.shape.clone(),
                    actual: tensor.shape.clone(),
                });
            }
            data.extend_from_slice(&tensor.data);
        }

        let mut shape = Vec::with_capacity(first.shape.len() + 1);
        shape.push(tensors.len());
        shape.extend_from_slice(&first.shape);
        Ok(Self { data, shape })
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Get the total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get element at a flat index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<f32> {
        self.data.get(index).copied()
    }

    /// Set element at a flat index. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, value: f32) {
        if let Some(slot) = self.data.get_mut(index) {
            *slot = value;
        }
    }

    /// Sum of all elements.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }

    /// Sum over every axis except the leading one.
    ///
    /// A `[B, ...]` tensor yields `B` sums. Zero-dimensional tensors yield a
    /// single sum.
    #[must_use]
    pub fn sum_per_leading(&self) -> Vec<f64> {
        let leading = self.shape.first().copied().unwrap_or(1);
        if leading == 0 {
            return Vec::new();
        }
        let chunk = self.data.len() / leading;
        if chunk == 0 {
            return vec![0.0; leading];
        }
        self.data
            .chunks(chunk)
            .map(|row| row.iter().map(|&v| v as f64).sum())
            .collect()
    }
}

/// Named tensors with a device tag.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorDict {
    entries: OrdMap<String, Tensor>,
    device: Device,
}

impl TensorDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, tensor: Tensor) -> Self {
        self.entries.insert(key.into(), tensor);
        self
    }

    /// Insert a tensor, returning the previous value under that key.
    pub fn insert(&mut self, key: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.entries.insert(key.into(), tensor)
    }

    /// Get a tensor, failing with `MissingKey` when absent.
    pub fn get(&self, key: &str) -> Result<&Tensor> {
        self.entries
            .get(key)
            .ok_or_else(|| PlannerError::MissingKey(key.to_string()))
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Tensor> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tensor)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Return a copy tagged for `device`. Cheap: entries are shared.
    #[must_use]
    pub fn to(&self, device: Device) -> Self {
        Self {
            entries: self.entries.clone(),
            device,
        }
    }
}
