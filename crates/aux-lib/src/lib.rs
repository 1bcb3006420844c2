//! Graceful shutdown of the istio-proxy sidecar
//!
//! This crate provides the core functionality for:
//! - Classifying container states into a proxy shutdown decision
//! - Mutating pod metadata and injecting the readiness helper at admission
//! - Filtering and reconciling pod events through a worker pool
//! - Signalling the proxy to exit through the exec subresource
//! - Health checks and observability

pub mod admission;
pub mod classifier;
pub mod constants;
pub mod controller;
pub mod error;
pub mod executor;
pub mod filter;
pub mod health;
pub mod models;
pub mod mutator;
pub mod observability;
pub mod reconciler;

pub use admission::{
    handle_review, AdmissionVerdict, FailurePolicy, KubeNamespaceSource, MutationPolicy,
    NamespaceCheck, NamespaceSource, PodMutator,
};
pub use classifier::{evaluate, NotReadyReason, Readiness};
pub use controller::{Controller, EventSource, WorkerConfig, WorkerPool};
pub use error::{Error, ExecutionError, Result};
pub use executor::{KubeProxyExec, ProxyExec, ShutdownExecutor};
pub use filter::EventFilter;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use mutator::{AuxContainerConfig, MetadataMutator, ProxyConfigFragment, SidecarInjector};
pub use observability::{AuxMetrics, StructuredLogger};
pub use reconciler::{KubePodSource, PodSource, ReconcileOutcome, Reconciler};
