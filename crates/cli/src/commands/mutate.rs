//! Offline rendering of the admission mutation

use anyhow::{Context, Result};
use aux_lib::admission::diff;
use aux_lib::mutator::{AuxContainerConfig, MetadataChanges, MetadataMutator, SidecarInjector};
use aux_lib::StructuredLogger;
use colored::Colorize;
use k8s_openapi::api::core::v1::Pod;
use std::num::NonZeroU32;
use std::path::Path;

/// Options mirroring the webhook's mutation policy
#[derive(Debug, Clone)]
pub struct MutateOptions {
    /// Append the readiness helper container, as on pod creation
    pub inject_aux: bool,
    pub poll_interval_secs: NonZeroU32,
}

/// Result of mutating one manifest
#[derive(Debug)]
pub struct Mutation {
    pub pod: Pod,
    pub changes: MetadataChanges,
    pub patch: json_patch::Patch,
}

/// Parse a pod manifest; YAML or JSON
pub fn parse_manifest(content: &str) -> Result<Pod> {
    serde_yaml::from_str(content).context("Manifest is not a valid Pod")
}

/// Apply the webhook's mutation to `original`
pub fn mutate_pod(original: &Pod, options: &MutateOptions) -> Result<Mutation> {
    let logger = StructuredLogger::new("iaux");
    let mut pod = original.clone();

    let changes = MetadataMutator::new(logger.clone()).apply(&mut pod.metadata);

    if options.inject_aux {
        let injector = SidecarInjector::new(
            AuxContainerConfig {
                poll_interval_secs: options.poll_interval_secs,
                ..Default::default()
            },
            logger,
        );
        let name = pod.metadata.name.clone().unwrap_or_default();
        injector.inject(&name, pod.spec.get_or_insert_with(Default::default));
    }

    let patch = diff(original, &pod).context("Failed to compute patch")?;
    Ok(Mutation {
        pod,
        changes,
        patch,
    })
}

/// Read `file`, mutate it and print the result on stdout
pub fn mutate_manifest(file: &Path, options: &MutateOptions, as_patch: bool) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let original = parse_manifest(&content)?;
    let mutation = mutate_pod(&original, options)?;

    if as_patch {
        println!("{}", serde_json::to_string_pretty(&mutation.patch)?);
    } else {
        print!("{}", serde_yaml::to_string(&mutation.pod)?);
    }

    // Summary goes to stderr so stdout stays pipeable
    let summary = if mutation.patch.0.is_empty() {
        "no changes required".dimmed().to_string()
    } else {
        format!("{} patch operations", mutation.patch.0.len())
            .green()
            .to_string()
    };
    eprintln!(
        "{} {} (label added: {}, annotation: {:?})",
        "ℹ".blue().bold(),
        summary,
        mutation.changes.label_added,
        mutation.changes.annotation
    );

    Ok(())
}
