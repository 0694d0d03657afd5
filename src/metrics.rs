//! Call metrics for registries and the router
//!
//! Every dispatched call (a tool call, a provider generation or a whole
//! routed message) is tracked by a [`CallMetrics`] guard that reports
//! through the `metrics` facade. Without an installed recorder the macros
//! are no-ops; with the `prometheus` feature, [`init_metrics_exporter`]
//! installs a Prometheus exporter.
//!
//! # Metrics
//!
//! - `parley_calls_total`: Counter of calls started, by kind and target
//! - `parley_call_duration_seconds`: Histogram of call duration, by kind and status
//! - `parley_call_errors_total`: Counter of failed calls, by kind and error type
//! - `parley_calls_in_flight`: Gauge of calls currently running, by kind
//! - `parley_fallbacks_total`: Counter of candidates skipped after a failure
//!
//! # Examples
//!
//! ```
//! use parley::metrics::{CallKind, CallMetrics};
//!
//! let metrics = CallMetrics::new(CallKind::Tool, "list_files");
//! metrics.record_success();
//! ```

use std::cell::Cell;
use std::time::Instant;

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};

/// Which layer a call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Tool,
    Provider,
    Message,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Tool => "tool",
            CallKind::Provider => "provider",
            CallKind::Message => "message",
        }
    }
}

/// Guard tracking one call from start to completion
///
/// Uses interior mutability so the outcome can be recorded through a shared
/// reference. Dropping an unrecorded guard still releases the in-flight gauge.
#[derive(Debug)]
pub struct CallMetrics {
    kind: CallKind,
    target: String,
    start: Instant,
    recorded: Cell<bool>,
}

impl CallMetrics {
    /// Start tracking a call against `target` (tool name, provider, strategy).
    pub fn new(kind: CallKind, target: &str) -> Self {
        increment_counter!(
            "parley_calls_total",
            "kind" => kind.as_str(),
            "target" => target.to_string()
        );
        increment_gauge!("parley_calls_in_flight", 1.0, "kind" => kind.as_str());

        Self {
            kind,
            target: target.to_string(),
            start: Instant::now(),
            recorded: Cell::new(false),
        }
    }

    /// Record a successful completion.
    pub fn record_success(&self) {
        self.finish("success");
    }

    /// Record a failure labelled with `error_type` (see `ParleyError::kind`).
    pub fn record_error(&self, error_type: &str) {
        if self.recorded.get() {
            return;
        }
        increment_counter!(
            "parley_call_errors_total",
            "kind" => self.kind.as_str(),
            "error_type" => error_type.to_string()
        );
        self.finish("error");
    }

    fn finish(&self, status: &'static str) {
        if self.recorded.get() {
            return;
        }
        self.recorded.set(true);

        histogram!(
            "parley_call_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "kind" => self.kind.as_str(),
            "status" => status
        );
        decrement_gauge!("parley_calls_in_flight", 1.0, "kind" => self.kind.as_str());
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for CallMetrics {
    fn drop(&mut self) {
        if !self.recorded.get() {
            decrement_gauge!("parley_calls_in_flight", 1.0, "kind" => self.kind.as_str());
        }
    }
}

/// Count one candidate abandoned in a fallback chain.
pub fn record_fallback(kind: CallKind, candidate: &str) {
    increment_counter!(
        "parley_fallbacks_total",
        "kind" => kind.as_str(),
        "candidate" => candidate.to_string()
    );
}

/// Installs the Prometheus exporter when the `prometheus` feature is enabled
///
/// Safe to call in any configuration; without the feature it does nothing.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let _ = builder.install().map_err(|e| {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        });
    }
}
