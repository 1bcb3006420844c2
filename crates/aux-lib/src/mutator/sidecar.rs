//! Auxiliary readiness-polling container

use crate::constants::{
    AUX_CONTAINER_IMAGE, AUX_CONTAINER_NAME, AUX_POLL_INTERVAL_SECS, PROXY_READY_URL,
};
use crate::observability::StructuredLogger;
use k8s_openapi::api::core::v1::{Container, PodSpec};
use std::num::NonZeroU32;

/// Settings for the injected container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxContainerConfig {
    pub name: String,
    pub image: String,
    pub poll_interval_secs: NonZeroU32,
}

impl Default for AuxContainerConfig {
    fn default() -> Self {
        Self {
            name: AUX_CONTAINER_NAME.to_string(),
            image: AUX_CONTAINER_IMAGE.to_string(),
            poll_interval_secs: NonZeroU32::new(AUX_POLL_INTERVAL_SECS).unwrap_or(NonZeroU32::MIN),
        }
    }
}

/// Appends the auxiliary container to a pod spec
///
/// The append is unconditional; callers avoid double injection by only
/// injecting on pod creation.
#[derive(Debug, Clone)]
pub struct SidecarInjector {
    config: AuxContainerConfig,
    logger: StructuredLogger,
}

impl SidecarInjector {
    pub fn new(config: AuxContainerConfig, logger: StructuredLogger) -> Self {
        Self { config, logger }
    }

    pub fn config(&self) -> &AuxContainerConfig {
        &self.config
    }

    pub fn inject(&self, pod_name: &str, spec: &mut PodSpec) {
        spec.containers.push(self.container());
        self.logger
            .log_aux_injected(pod_name, &self.config.name, &self.config.image);
    }

    /// The container definition: a shell loop that sleeps until the
    /// proxy readiness endpoint answers
    pub fn container(&self) -> Container {
        Container {
            name: self.config.name.clone(),
            image: Some(self.config.image.clone()),
            command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
            args: Some(vec![poll_command(self.config.poll_interval_secs)]),
            ..Default::default()
        }
    }
}

fn poll_command(interval: NonZeroU32) -> String {
    format!(
        "while ! curl --output /dev/null --silent --head --fail {}; do sleep {}; done;",
        PROXY_READY_URL, interval
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn injector(interval: u32) -> SidecarInjector {
        SidecarInjector::new(
            AuxContainerConfig {
                poll_interval_secs: NonZeroU32::new(interval).unwrap(),
                ..Default::default()
            },
            StructuredLogger::new("test"),
        )
    }

    #[test]
    fn test_appends_aux_container() {
        let mut spec = PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };

        injector(5).inject("job-1", &mut spec);

        assert_eq!(spec.containers.len(), 2);
        assert_eq!(spec.containers[0].name, "app");

        let aux = &spec.containers[1];
        assert_eq!(aux.name, AUX_CONTAINER_NAME);
        assert_eq!(aux.image.as_deref(), Some(AUX_CONTAINER_IMAGE));
        assert_eq!(
            aux.command.as_deref(),
            Some(&["/bin/sh".to_string(), "-c".to_string()][..])
        );
        assert_eq!(
            aux.args.as_ref().unwrap()[0],
            "while ! curl --output /dev/null --silent --head --fail http://localhost:15021/healthz/ready; do sleep 5; done;"
        );
    }

    #[test]
    fn test_reinjection_duplicates() {
        let mut spec = PodSpec::default();
        let injector = injector(1);

        injector.inject("job-1", &mut spec);
        injector.inject("job-1", &mut spec);

        assert_eq!(spec.containers.len(), 2);
        assert!(spec.containers.iter().all(|c| c.name == AUX_CONTAINER_NAME));
    }
}
