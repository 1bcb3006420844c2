//! Observability infrastructure for istio-aux
//!
//! Provides:
//! - Prometheus metrics (admission outcomes, reconciliation outcomes, exec latency)
//! - A structured logger handle injected into each component

use crate::classifier::Readiness;
use crate::error::ExecutionError;
use crate::models::PodRef;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// Histogram buckets for exec latency (in seconds)
const EXEC_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AuxMetricsInner> = OnceLock::new();

struct AuxMetricsInner {
    admission_requests: IntCounterVec,
    reconciliations: IntCounterVec,
    proxy_shutdowns: IntCounter,
    exec_failures: IntCounterVec,
    exec_duration_seconds: Histogram,
    events: IntCounterVec,
}

impl AuxMetricsInner {
    fn new() -> Self {
        Self {
            admission_requests: register_int_counter_vec!(
                "istio_aux_admission_requests_total",
                "Admission requests handled, by outcome",
                &["outcome"]
            )
            .expect("Failed to register admission_requests_total"),

            reconciliations: register_int_counter_vec!(
                "istio_aux_reconciliations_total",
                "Pod reconciliations, by outcome",
                &["outcome"]
            )
            .expect("Failed to register reconciliations_total"),

            proxy_shutdowns: register_int_counter!(
                "istio_aux_proxy_shutdowns_total",
                "Proxy containers signalled to exit"
            )
            .expect("Failed to register proxy_shutdowns_total"),

            exec_failures: register_int_counter_vec!(
                "istio_aux_exec_failures_total",
                "Failed remote commands against the proxy, by kind",
                &["kind"]
            )
            .expect("Failed to register exec_failures_total"),

            exec_duration_seconds: register_histogram!(
                "istio_aux_exec_duration_seconds",
                "Time spent running the quit command inside the proxy",
                EXEC_BUCKETS.to_vec()
            )
            .expect("Failed to register exec_duration_seconds"),

            events: register_int_counter_vec!(
                "istio_aux_events_total",
                "Pod change events observed, by filter decision",
                &["admitted"]
            )
            .expect("Failed to register events_total"),
        }
    }
}

/// Metrics handle for Prometheus exposition
///
/// Clones share the same globally registered metrics.
#[derive(Clone)]
pub struct AuxMetrics {
    _private: (),
}

impl Default for AuxMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AuxMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AuxMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AuxMetricsInner {
        GLOBAL_METRICS.get_or_init(AuxMetricsInner::new)
    }

    pub fn inc_admission(&self, outcome: &str) {
        self.inner()
            .admission_requests
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_reconciliation(&self, outcome: &str) {
        self.inner()
            .reconciliations
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_proxy_shutdowns(&self) {
        self.inner().proxy_shutdowns.inc();
    }

    pub fn inc_exec_failure(&self, kind: &str) {
        self.inner().exec_failures.with_label_values(&[kind]).inc();
    }

    pub fn observe_exec_duration(&self, seconds: f64) {
        self.inner().exec_duration_seconds.observe(seconds);
    }

    pub fn inc_event(&self, admitted: bool) {
        let label = if admitted { "true" } else { "false" };
        self.inner().events.with_label_values(&[label]).inc();
    }

    pub fn proxy_shutdowns(&self) -> u64 {
        self.inner().proxy_shutdowns.get()
    }
}

/// Structured logger handed to each component at construction
///
/// Every event carries the owning component so webhook and controller
/// logs can be told apart in a shared JSON stream.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Logger for a sub-component, e.g. `istio-aux.webhook`
    pub fn child(&self, name: &str) -> Self {
        Self::new(format!("{}.{}", self.component, name))
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "started",
            component = %self.component,
            version = %version,
            "istio-aux started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "shutdown",
            component = %self.component,
            reason = %reason,
            "istio-aux shutting down"
        );
    }

    pub fn log_label_present(&self, pod: &str, key: &str, value: &str) {
        info!(
            event = "label_present",
            component = %self.component,
            pod = %pod,
            label = %key,
            value = %value,
            "Pod already carries the opt-in label"
        );
    }

    pub fn log_annotation_merged(&self, pod: &str, key: &str, added: &[String]) {
        info!(
            event = "annotation_merged",
            component = %self.component,
            pod = %pod,
            annotation = %key,
            added = ?added,
            "Merged defaults into existing annotation"
        );
    }

    pub fn log_merge_error(&self, pod: &str, key: &str, err: &dyn std::error::Error) {
        error!(
            event = "annotation_merge_failed",
            component = %self.component,
            pod = %pod,
            annotation = %key,
            error = %err,
            "Existing annotation is not valid YAML, leaving it untouched"
        );
    }

    pub fn log_aux_injected(&self, pod: &str, container: &str, image: &str) {
        info!(
            event = "aux_container_injected",
            component = %self.component,
            pod = %pod,
            container = %container,
            image = %image,
            "Injected auxiliary container"
        );
    }

    pub fn log_pod_mutated(&self, pod: &str, operations: usize) {
        info!(
            event = "pod_mutated",
            component = %self.component,
            pod = %pod,
            patch_operations = operations,
            "Pod processed"
        );
    }

    pub fn log_mutation_skipped(&self, pod: &str, reason: &str) {
        info!(
            event = "mutation_skipped",
            component = %self.component,
            pod = %pod,
            reason = %reason,
            "Skipping pod mutation"
        );
    }

    pub fn log_admission_error(&self, pod: &str, code: u16, message: &str) {
        warn!(
            event = "admission_error",
            component = %self.component,
            pod = %pod,
            code = code,
            message = %message,
            "Admission request failed"
        );
    }

    pub fn log_readiness(&self, pod: &PodRef, readiness: &Readiness) {
        match readiness {
            Readiness::Ready => info!(
                event = "proxy_shutdown_ready",
                component = %self.component,
                pod = %pod,
                "Payload containers are terminated, proceeding with proxy shutdown"
            ),
            Readiness::NotReady(reason) => debug!(
                event = "proxy_shutdown_not_ready",
                component = %self.component,
                pod = %pod,
                reason = %reason,
                "Skipping proxy shutdown"
            ),
        }
    }

    pub fn log_pod_gone(&self, pod: &PodRef) {
        debug!(
            event = "pod_gone",
            component = %self.component,
            pod = %pod,
            "Pod no longer exists"
        );
    }

    pub fn log_proxy_shutdown(&self, pod: &PodRef, container: &str, elapsed_ms: u128) {
        info!(
            event = "proxy_shutdown",
            component = %self.component,
            pod = %pod,
            container = %container,
            elapsed_ms = elapsed_ms,
            "Signalled proxy to exit"
        );
    }

    pub fn log_exec_failure(&self, pod: &PodRef, container: &str, err: &ExecutionError) {
        warn!(
            event = "exec_failed",
            component = %self.component,
            pod = %pod,
            container = %container,
            kind = err.kind(),
            error = %err,
            "Failed to signal proxy, will retry on the next event"
        );
    }

    pub fn log_reconcile_error(&self, pod: &PodRef, err: &dyn std::error::Error) {
        warn!(
            event = "reconcile_failed",
            component = %self.component,
            pod = %pod,
            error = %err,
            "Reconciliation failed"
        );
    }
}
