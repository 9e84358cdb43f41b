use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Trait for metrics backends. Implementations can forward to Prometheus,
/// StatsD, or simply log metrics.
pub trait MetricsBackend: Send + Sync {
    fn record_counter(&self, name: &str, value: u64);
    fn record_gauge(&self, name: &str, value: f64);
}

/// Atomic counters for bridge invocations and RTD publishers.
/// Shared between the calling threads and the scheduler thread.
pub struct BridgeMetrics {
    pub invocations: AtomicU64,
    pub results: AtomicU64,
    pub completions: AtomicU64,
    pub cancellations: AtomicU64,
    pub user_errors: AtomicU64,
    pub publishers_started: AtomicU64,
    pub publishers_stopped: AtomicU64,
    pub values_published: AtomicU64,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl std::fmt::Debug for BridgeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeMetrics")
            .field("invocations", &self.invocations)
            .field("results", &self.results)
            .field("completions", &self.completions)
            .field("cancellations", &self.cancellations)
            .field("user_errors", &self.user_errors)
            .field("publishers_started", &self.publishers_started)
            .field("publishers_stopped", &self.publishers_stopped)
            .field("values_published", &self.values_published)
            .finish()
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($fn_name:ident, $field:ident, $metric:literal) => {
        pub fn $fn_name(&self) {
            let val = self.$field.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(backend) = &self.backend {
                backend.record_counter($metric, val);
            }
        }
    };
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            invocations: AtomicU64::new(0),
            results: AtomicU64::new(0),
            completions: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
            user_errors: AtomicU64::new(0),
            publishers_started: AtomicU64::new(0),
            publishers_stopped: AtomicU64::new(0),
            values_published: AtomicU64::new(0),
            backend: None,
        }
    }

    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    counter!(record_invocation, invocations, "xlbridge.bridge.invocations");
    counter!(record_result, results, "xlbridge.bridge.results");
    counter!(record_completion, completions, "xlbridge.bridge.completions");
    counter!(record_cancellation, cancellations, "xlbridge.bridge.cancellations");
    counter!(record_user_error, user_errors, "xlbridge.bridge.user_errors");
    counter!(record_publisher_started, publishers_started, "xlbridge.rtd.publishers_started");
    counter!(record_publisher_stopped, publishers_stopped, "xlbridge.rtd.publishers_stopped");
    counter!(record_value_published, values_published, "xlbridge.rtd.values_published");

    pub fn record_active_tasks(&self, active: usize) {
        if let Some(backend) = &self.backend {
            backend.record_gauge("xlbridge.scheduler.active_tasks", active as f64);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            results: self.results.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            user_errors: self.user_errors.load(Ordering::Relaxed),
            publishers_started: self.publishers_started.load(Ordering::Relaxed),
            publishers_stopped: self.publishers_stopped.load(Ordering::Relaxed),
            values_published: self.values_published.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub invocations: u64,
    pub results: u64,
    pub completions: u64,
    pub cancellations: u64,
    pub user_errors: u64,
    pub publishers_started: u64,
    pub publishers_stopped: u64,
    pub values_published: u64,
}

/// A metrics backend that logs to tracing.
pub struct TracingMetricsBackend;

impl MetricsBackend for TracingMetricsBackend {
    fn record_counter(&self, name: &str, value: u64) {
        tracing::debug!(metric = name, value, "counter");
    }

    fn record_gauge(&self, name: &str, value: f64) {
        tracing::debug!(metric = name, value, "gauge");
    }
}
