//! Per-pod reconciliation: fetch, classify, signal

use crate::classifier::{evaluate, NotReadyReason, Readiness};
use crate::error::Result;
use crate::executor::ShutdownExecutor;
use crate::models::{ContainerStatusView, PodRef};
use crate::observability::StructuredLogger;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use std::sync::Arc;

/// Capability to read the current snapshot of a pod
#[async_trait]
pub trait PodSource: Send + Sync {
    /// `Ok(None)` when the pod does not exist
    async fn get_pod(&self, pod: &PodRef) -> Result<Option<Pod>>;
}

/// [`PodSource`] reading straight from the API server
#[derive(Clone)]
pub struct KubePodSource {
    client: Client,
}

impl KubePodSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodSource for KubePodSource {
    async fn get_pod(&self, pod: &PodRef) -> Result<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        Ok(api.get_opt(&pod.name).await?)
    }
}

/// Result of one reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The pod vanished before it could be examined
    PodGone,
    /// The pod is not ready for proxy shutdown
    Skipped(NotReadyReason),
    /// The proxy was signalled to exit
    ProxyShutdown,
}

impl ReconcileOutcome {
    /// Label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::PodGone => "pod_gone",
            ReconcileOutcome::Skipped(_) => "skipped",
            ReconcileOutcome::ProxyShutdown => "proxy_shutdown",
        }
    }
}

/// Drives a single pod toward a stopped proxy once its payload is done
///
/// The pod object itself is never written; the proxy's termination shows
/// up through the control plane's own status reporting.
#[derive(Clone)]
pub struct Reconciler {
    pods: Arc<dyn PodSource>,
    executor: ShutdownExecutor,
    proxy_container: String,
    logger: StructuredLogger,
}

impl Reconciler {
    pub fn new(
        pods: Arc<dyn PodSource>,
        executor: ShutdownExecutor,
        proxy_container: impl Into<String>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            pods,
            executor,
            proxy_container: proxy_container.into(),
            logger,
        }
    }

    pub async fn reconcile(&self, pod_ref: &PodRef) -> Result<ReconcileOutcome> {
        let Some(pod) = self.pods.get_pod(pod_ref).await? else {
            self.logger.log_pod_gone(pod_ref);
            return Ok(ReconcileOutcome::PodGone);
        };

        let readiness = evaluate(&ContainerStatusView::from_pod(&pod), &self.proxy_container);
        self.logger.log_readiness(pod_ref, &readiness);

        match readiness {
            Readiness::NotReady(reason) => Ok(ReconcileOutcome::Skipped(reason)),
            Readiness::Ready => {
                self.executor
                    .trigger(pod_ref, &self.proxy_container)
                    .await?;
                Ok(ReconcileOutcome::ProxyShutdown)
            }
        }
    }
}
