//! Core data models for pod lifecycle decisions

use k8s_openapi::api::core::v1::{ContainerState as K8sContainerState, ContainerStatus, Pod};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a pod in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl PodRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a pod object; `None` for objects without a namespace
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let namespace = pod.namespace()?;
        Some(Self::new(namespace, pod.name_any()))
    }

    /// Parse the `namespace/name` form
    pub fn parse(value: &str) -> Option<Self> {
        let (namespace, name) = value.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Runtime state of a single container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ContainerState {
    Waiting,
    Running,
    Terminated { exit_code: i32 },
}

impl ContainerState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, ContainerState::Terminated { .. })
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Waiting => write!(f, "waiting"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Terminated { exit_code } => write!(f, "terminated({})", exit_code),
        }
    }
}

/// Observed status of one declared container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatusView {
    pub name: String,
    pub state: ContainerState,
}

impl ContainerStatusView {
    pub fn new(name: impl Into<String>, state: ContainerState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    /// Statuses of the regular containers of a pod snapshot
    pub fn from_pod(pod: &Pod) -> Vec<Self> {
        pod.status
            .as_ref()
            .and_then(|status| status.container_statuses.as_ref())
            .map(|statuses| statuses.iter().map(Self::from).collect())
            .unwrap_or_default()
    }
}

impl From<&ContainerStatus> for ContainerStatusView {
    fn from(status: &ContainerStatus) -> Self {
        let state = match status.state.as_ref() {
            Some(K8sContainerState {
                terminated: Some(terminated),
                ..
            }) => ContainerState::Terminated {
                exit_code: terminated.exit_code,
            },
            Some(K8sContainerState {
                running: Some(_), ..
            }) => ContainerState::Running,
            _ => ContainerState::Waiting,
        };
        Self::new(status.name.clone(), state)
    }
}

/// Kind of an observed pod change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Delete,
    Generic,
}

/// A pod change notification, consumed once by the event filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodEvent {
    pub kind: EventKind,
    pub pod: PodRef,
    pub labels: BTreeMap<String, String>,
}

impl PodEvent {
    pub fn new(kind: EventKind, pod: PodRef, labels: BTreeMap<String, String>) -> Self {
        Self { kind, pod, labels }
    }
}
