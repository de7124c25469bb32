//! Console logging backend.

use std::collections::HashMap;

use super::MetricLogger;

/// Logger that prints metrics via tracing.
pub struct ConsoleLogger;

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self
    }
}

impl MetricLogger for ConsoleLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        tracing::info!("Step {}: {} = {:.4}", step, name, value);
    }

    fn log_metrics(&self, metrics: &HashMap<String, f64>, step: u64) {
        // Group output to avoid spamming lines
        let mut sorted: Vec<_> = metrics.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let fields: Vec<String> = sorted
            .iter()
            .map(|(key, value)| format!("{}={:.4}", key, value))
            .collect();
        tracing::info!("Step {}: {}", step, fields.join(", "));
    }
}
