//! Scalar metric logging.
//!
//! Provides:
//! - `MetricLogger` trait for composable backends
//! - `ConsoleLogger` for lightweight logging through `tracing`
//! - `MemoryLogger` that records every scalar for later inspection
//! - `CompositeLogger` for multi-backend logging

mod console;
mod logger;

pub use console::ConsoleLogger;
pub use logger::{CompositeLogger, MemoryLogger, MetricLogger, NoOpLogger, ScalarRecord};
