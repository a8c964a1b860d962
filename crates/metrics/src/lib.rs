//! Metrics collection and export for postrelay.
//!
//! Crates record through the `metrics` facade re-exported here. When the
//! `prometheus` feature is enabled, [`init_metrics`] installs a Prometheus
//! recorder whose output can be rendered with [`MetricsHandle::render`].
//!
//! ```rust,ignore
//! use postrelay_metrics::{counter, forward};
//!
//! counter!(forward::DELIVERIES_TOTAL, "result" => "ok").increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
