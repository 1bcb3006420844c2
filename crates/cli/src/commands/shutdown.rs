//! One-shot reconciliation of a single pod

use anyhow::{Context, Result};
use aux_lib::constants::PROXY_CONTAINER_NAME;
use aux_lib::{
    AuxMetrics, KubePodSource, KubeProxyExec, PodRef, ReconcileOutcome, Reconciler,
    ShutdownExecutor, StructuredLogger,
};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::output::{print_info, print_success, print_warning};

/// Parse the `namespace/name` argument
pub fn parse_target(target: &str) -> Result<PodRef> {
    PodRef::parse(target).with_context(|| format!("Expected NAMESPACE/POD, got '{}'", target))
}

/// Run one reconciliation for `pod`; the classifier still gates the exec
pub async fn shutdown_pod(client: Client, pod: &PodRef, timeout: Duration) -> Result<()> {
    let logger = StructuredLogger::new("iaux");
    let executor = ShutdownExecutor::new(
        Arc::new(KubeProxyExec::new(client.clone())),
        timeout,
        logger.clone(),
        AuxMetrics::new(),
    );
    let reconciler = Reconciler::new(
        Arc::new(KubePodSource::new(client)),
        executor,
        PROXY_CONTAINER_NAME,
        logger,
    );

    print_info(&format!("Reconciling {}", pod));
    let outcome = reconciler
        .reconcile(pod)
        .await
        .with_context(|| format!("Failed to reconcile {}", pod))?;

    match outcome {
        ReconcileOutcome::ProxyShutdown => {
            print_success(&format!("Signalled {} in {} to exit", PROXY_CONTAINER_NAME, pod))
        }
        ReconcileOutcome::Skipped(reason) => {
            print_warning(&format!("Skipped {}: {}", pod, reason))
        }
        ReconcileOutcome::PodGone => print_warning(&format!("Pod {} not found", pod)),
    }

    Ok(())
}
