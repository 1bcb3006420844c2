//! istio-aux operator CLI
//!
//! Inspects shutdown readiness of labelled pods, renders the admission
//! mutation of a manifest offline and triggers one-shot reconciliations.

mod client;
mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{check, mutate, shutdown};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

/// istio-aux CLI
#[derive(Parser)]
#[command(name = "iaux")]
#[command(author, version, about = "CLI for istio-aux, graceful istio-proxy shutdown", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<String>,

    /// Kubeconfig context to use
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show shutdown readiness of labelled pods
    Check {
        /// Namespace to inspect (defaults to the kubeconfig namespace)
        #[arg(long, short, conflicts_with = "all_namespaces")]
        namespace: Option<String>,

        /// Inspect pods in all namespaces
        #[arg(long, short = 'A')]
        all_namespaces: bool,
    },

    /// Render the webhook mutation of a pod manifest
    Mutate {
        /// Pod manifest (YAML or JSON)
        file: PathBuf,

        /// Also inject the readiness helper container
        #[arg(long)]
        inject_aux: bool,

        /// Poll interval of the helper container in seconds
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        poll_interval: u32,

        /// Print the JSON patch instead of the mutated manifest
        #[arg(long)]
        patch: bool,
    },

    /// Reconcile one pod now, signalling its proxy if the payload is done
    Shutdown {
        /// Target pod as NAMESPACE/POD
        pod: String,

        /// Bound on the quit command in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            namespace,
            all_namespaces,
        } => {
            let scope = match (namespace, all_namespaces) {
                (_, true) => check::Scope::AllNamespaces,
                (Some(namespace), false) => check::Scope::Namespace(namespace),
                (None, false) => check::Scope::Default,
            };
            let client =
                client::connect(cli.kubeconfig.as_deref(), cli.context.as_deref()).await?;
            check::check_pods(client, scope, cli.format).await?;
        }
        Commands::Mutate {
            file,
            inject_aux,
            poll_interval,
            patch,
        } => {
            let options = mutate::MutateOptions {
                inject_aux,
                poll_interval_secs: NonZeroU32::new(poll_interval)
                    .context("--poll-interval must be positive")?,
            };
            mutate::mutate_manifest(&file, &options, patch)?;
        }
        Commands::Shutdown { pod, timeout } => {
            let target = shutdown::parse_target(&pod)?;
            let client =
                client::connect(cli.kubeconfig.as_deref(), cli.context.as_deref()).await?;
            shutdown::shutdown_pod(client, &target, Duration::from_secs(timeout)).await?;
        }
    }

    Ok(())
}
