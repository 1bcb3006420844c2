//! Admission-time pod mutations
//!
//! - [`MetadataMutator`]: opt-in label and proxy configuration annotation
//! - [`SidecarInjector`]: auxiliary readiness-polling container

mod metadata;
mod sidecar;

pub use metadata::{AnnotationChange, MetadataChanges, MetadataMutator, ProxyConfigFragment};
pub use sidecar::{AuxContainerConfig, SidecarInjector};
