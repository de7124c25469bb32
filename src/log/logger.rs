//! Metric logger traits and composites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Trait for logging metrics to various backends.
pub trait MetricLogger: Send + Sync {
    /// Log a scalar value (e.g. reward, loss).
    fn log_scalar(&self, name: &str, value: f64, step: u64);

    /// Log a set of metrics collected in a map.
    fn log_metrics(&self, metrics: &HashMap<String, f64>, step: u64) {
        let mut names: Vec<_> = metrics.keys().collect();
        names.sort();
        for name in names {
            self.log_scalar(name, metrics[name], step);
        }
    }

    /// Close the logger and flush any pending writes.
    fn close(&self) {}
}

/// A logger that does nothing.
pub struct NoOpLogger;

impl MetricLogger for NoOpLogger {
    fn log_scalar(&self, _name: &str, _value: f64, _step: u64) {}
    fn log_metrics(&self, _metrics: &HashMap<String, f64>, _step: u64) {}
}

/// A composite logger that dispatches to multiple backends.
pub struct CompositeLogger {
    loggers: Vec<Box<dyn MetricLogger>>,
}

impl CompositeLogger {
    pub fn new(loggers: Vec<Box<dyn MetricLogger>>) -> Self {
        Self { loggers }
    }

    pub fn add(&mut self, logger: Box<dyn MetricLogger>) {
        self.loggers.push(logger);
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl MetricLogger for CompositeLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        for logger in &self.loggers {
            logger.log_scalar(name, value, step);
        }
    }

    fn log_metrics(&self, metrics: &HashMap<String, f64>, step: u64) {
        for logger in &self.loggers {
            logger.log_metrics(metrics, step);
        }
    }

    fn close(&self) {
        for logger in &self.loggers {
            logger.close();
        }
    }
}

/// One logged scalar.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarRecord {
    pub name: String,
    pub value: f64,
    pub step: u64,
}

/// Logger that keeps every scalar in memory.
///
/// Clones share the same record list, so a clone can be handed to a trainer
/// while the original is kept for inspection.
#[derive(Clone, Default)]
pub struct MemoryLogger {
    records: Arc<Mutex<Vec<ScalarRecord>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records in logging order.
    pub fn records(&self) -> Vec<ScalarRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Values logged under `name`, as `(step, value)` pairs.
    pub fn series(&self, name: &str) -> Vec<(u64, f64)> {
        self.records()
            .into_iter()
            .filter(|r| r.name == name)
            .map(|r| (r.step, r.value))
            .collect()
    }

    /// Most recent value logged under `name`.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.series(name).last().map(|&(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricLogger for MemoryLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        let record = ScalarRecord {
            name: name.to_string(),
            value,
            step,
        };
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}
