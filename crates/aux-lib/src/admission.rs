//! Mutating admission for pods
//!
//! The webhook never denies a pod on policy grounds: it either returns a
//! patch or lets the pod through unchanged with a reason. Errors are
//! reserved for undecodable requests, encoding failures and, when
//! configured to fail closed, namespace lookups that cannot complete.

use crate::constants::{
    AUX_LABEL_NAME, AUX_LABEL_VALUE, ISTIO_INJECTION_LABEL_NAME, ISTIO_INJECTION_LABEL_VALUE,
};
use crate::error::{Error, Result};
use crate::mutator::{MetadataMutator, SidecarInjector};
use crate::observability::{AuxMetrics, StructuredLogger};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::Api;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Capability to look up namespace metadata
#[async_trait]
pub trait NamespaceSource: Send + Sync {
    /// `Ok(None)` when the namespace does not exist
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;
}

/// [`NamespaceSource`] reading from the API server
#[derive(Clone)]
pub struct KubeNamespaceSource {
    client: Client,
}

impl KubeNamespaceSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NamespaceSource for KubeNamespaceSource {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }
}

/// What to do when the namespace lookup errors or times out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Let the pod through unmutated
    #[default]
    Open,
    /// Fail the admission request
    Closed,
}

/// Namespace eligibility pre-check settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceCheck {
    pub timeout: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for NamespaceCheck {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            failure_policy: FailurePolicy::Open,
        }
    }
}

/// Decision of the mutation pipeline for one request
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionVerdict {
    /// Allowed with this patch
    Patched(json_patch::Patch),
    /// Allowed without changes
    Unchanged { reason: String },
    /// The request could not be processed
    Errored { code: u16, message: String },
}

impl AdmissionVerdict {
    fn bad_request(message: impl Into<String>) -> Self {
        AdmissionVerdict::Errored {
            code: 400,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        AdmissionVerdict::Errored {
            code: 500,
            message: message.into(),
        }
    }

    /// Label used for metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            AdmissionVerdict::Patched(_) => "patched",
            AdmissionVerdict::Unchanged { .. } => "unchanged",
            AdmissionVerdict::Errored { .. } => "errored",
        }
    }

    /// Wrap the verdict into a response for `req`
    pub fn into_response(self, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let res = AdmissionResponse::from(req);
        match self {
            AdmissionVerdict::Patched(patch) => match res.clone().with_patch(patch) {
                Ok(res) => res,
                Err(err) => errored(res, 500, err.to_string()),
            },
            AdmissionVerdict::Unchanged { reason } => {
                let mut res = res;
                res.result.message = reason;
                res
            }
            AdmissionVerdict::Errored { code, message } => errored(res, code, message),
        }
    }
}

fn errored(res: AdmissionResponse, code: u16, message: String) -> AdmissionResponse {
    let mut res = res.deny(message);
    res.result.code = code;
    res
}

/// Policy switches of the mutation pipeline
#[derive(Debug, Clone, Default)]
pub struct MutationPolicy {
    /// Run the namespace pre-check; `None` trusts the webhook's namespace selector
    pub namespace_check: Option<NamespaceCheck>,
    /// Inject the auxiliary container on pod creation
    pub inject_aux_container: bool,
}

/// Admission handler for pod create/update requests
#[derive(Clone)]
pub struct PodMutator {
    metadata: MetadataMutator,
    injector: SidecarInjector,
    namespaces: Option<Arc<dyn NamespaceSource>>,
    policy: MutationPolicy,
    logger: StructuredLogger,
    metrics: AuxMetrics,
}

impl PodMutator {
    pub fn new(
        metadata: MetadataMutator,
        injector: SidecarInjector,
        policy: MutationPolicy,
        logger: StructuredLogger,
        metrics: AuxMetrics,
    ) -> Self {
        Self {
            metadata,
            injector,
            namespaces: None,
            policy,
            logger,
            metrics,
        }
    }

    /// Namespace lookups used when the policy enables the pre-check
    pub fn with_namespaces(mut self, namespaces: Arc<dyn NamespaceSource>) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    /// Run the mutation pipeline for a request
    pub async fn review(&self, req: &AdmissionRequest<DynamicObject>) -> AdmissionVerdict {
        let verdict = self.evaluate(req).await;
        self.metrics.inc_admission(verdict.outcome());

        let pod_name = if req.name.is_empty() {
            "<generated>"
        } else {
            req.name.as_str()
        };
        match &verdict {
            AdmissionVerdict::Patched(patch) => self.logger.log_pod_mutated(pod_name, patch.0.len()),
            AdmissionVerdict::Unchanged { reason } => {
                self.logger.log_mutation_skipped(pod_name, reason)
            }
            AdmissionVerdict::Errored { code, message } => {
                self.logger.log_admission_error(pod_name, *code, message)
            }
        }
        verdict
    }

    async fn evaluate(&self, req: &AdmissionRequest<DynamicObject>) -> AdmissionVerdict {
        let original = match decode_pod(req) {
            Ok(pod) => pod,
            Err(err) => return AdmissionVerdict::bad_request(err.to_string()),
        };

        let namespace = original
            .metadata
            .namespace
            .clone()
            .or_else(|| req.namespace.clone())
            .unwrap_or_default();

        if let Some(check) = self.policy.namespace_check {
            if let Some(verdict) = self.check_namespace(&namespace, check).await {
                return verdict;
            }
        }

        let mut pod = original.clone();
        self.metadata.apply(&mut pod.metadata);

        if self.policy.inject_aux_container && req.operation == Operation::Create {
            let name = pod
                .metadata
                .name
                .clone()
                .or_else(|| pod.metadata.generate_name.clone())
                .unwrap_or_default();
            let spec = pod.spec.get_or_insert_with(Default::default);
            self.injector.inject(&name, spec);
        }

        match diff(&original, &pod) {
            Ok(patch) if patch.0.is_empty() => AdmissionVerdict::Unchanged {
                reason: "no changes required".to_string(),
            },
            Ok(patch) => AdmissionVerdict::Patched(patch),
            Err(err) => AdmissionVerdict::internal(err.to_string()),
        }
    }

    /// `Some` short-circuits the pipeline with the returned verdict
    async fn check_namespace(
        &self,
        namespace: &str,
        check: NamespaceCheck,
    ) -> Option<AdmissionVerdict> {
        // Without a source the lookup fails like an unreachable API server
        let Some(source) = self.namespaces.as_ref() else {
            let failure = format!("namespace {} lookup unavailable: no namespace source", namespace);
            return Some(self.lookup_failed(failure, check.failure_policy));
        };

        let lookup = tokio::time::timeout(check.timeout, source.get_namespace(namespace)).await;
        let failure = match lookup {
            Ok(Ok(Some(ns))) => {
                return match check_namespace_labels(&ns) {
                    Ok(()) => None,
                    Err(cause) => Some(AdmissionVerdict::Unchanged {
                        reason: format!(
                            "target namespace {} doesn't specify required labels, skipping mutation: {}",
                            namespace, cause
                        ),
                    }),
                };
            }
            Ok(Ok(None)) => {
                return Some(AdmissionVerdict::Unchanged {
                    reason: format!(
                        "target namespace {} doesn't exist, skipping mutation",
                        namespace
                    ),
                })
            }
            Ok(Err(err)) => format!("namespace {} lookup failed: {}", namespace, err),
            Err(_) => format!(
                "namespace {} lookup timed out after {}s",
                namespace,
                check.timeout.as_secs()
            ),
        };

        Some(self.lookup_failed(failure, check.failure_policy))
    }

    fn lookup_failed(&self, failure: String, policy: FailurePolicy) -> AdmissionVerdict {
        match policy {
            FailurePolicy::Open => AdmissionVerdict::Unchanged {
                reason: format!("{}, skipping mutation", failure),
            },
            FailurePolicy::Closed => AdmissionVerdict::internal(failure),
        }
    }
}

/// Verify the two labels a namespace needs for pods to be mutated
pub fn check_namespace_labels(namespace: &Namespace) -> std::result::Result<(), String> {
    let name = namespace.metadata.name.as_deref().unwrap_or_default();
    let Some(labels) = namespace.metadata.labels.as_ref() else {
        return Err(format!(
            "required labels are not provided for namespace {}",
            name
        ));
    };

    for (key, expected) in [
        (AUX_LABEL_NAME, AUX_LABEL_VALUE),
        (ISTIO_INJECTION_LABEL_NAME, ISTIO_INJECTION_LABEL_VALUE),
    ] {
        match labels.get(key) {
            None => {
                return Err(format!(
                    "required label {} is not provided for namespace {}",
                    key, name
                ))
            }
            Some(value) if value != expected => {
                return Err(format!(
                    "required label {} is set to {} for namespace {}, expected {}",
                    key, value, name, expected
                ))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn decode_pod(req: &AdmissionRequest<DynamicObject>) -> Result<Pod> {
    let object = req
        .object
        .as_ref()
        .ok_or_else(|| Error::Decode("request carries no object".to_string()))?;
    let value = serde_json::to_value(object).map_err(|e| Error::Decode(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))
}

/// JSON patch turning `original` into `mutated`
///
/// Both sides go through the same typed serialization, so the patch only
/// carries the mutation and never fields the typed model drops.
pub fn diff(original: &Pod, mutated: &Pod) -> Result<json_patch::Patch> {
    let before = serde_json::to_value(original)?;
    let after = serde_json::to_value(mutated)?;
    Ok(json_patch::diff(&before, &after))
}

/// Handle a full admission review
pub async fn handle_review(
    mutator: &PodMutator,
    review: AdmissionReview<DynamicObject>,
) -> AdmissionReview<DynamicObject> {
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(err) => {
            mutator.metrics.inc_admission("invalid");
            mutator
                .logger
                .log_admission_error("<unknown>", 400, &err.to_string());
            return AdmissionResponse::invalid(err.to_string()).into_review();
        }
    };

    mutator.review(&req).await.into_response(&req).into_review()
}
