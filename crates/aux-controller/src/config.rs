//! Controller configuration

use anyhow::{bail, Context, Result};
use aux_lib::admission::{FailurePolicy, MutationPolicy, NamespaceCheck};
use aux_lib::constants::{AUX_CONTAINER_IMAGE, AUX_CONTAINER_NAME, AUX_POLL_INTERVAL_SECS};
use aux_lib::controller::WorkerConfig;
use aux_lib::mutator::AuxContainerConfig;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Optional configuration file, any format the `config` crate understands
pub const CONFIG_FILE: &str = "/etc/istio-aux/config";

/// Prefix of the environment variables overriding the file
pub const ENV_PREFIX: &str = "ISTIO_AUX";

/// Controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Port of the admission webhook endpoint
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,

    /// Number of reconciliation workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Queue capacity per worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Bound on the proxy quit command, in seconds
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Resync period for known pods in seconds, 0 disables it
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    #[serde(default)]
    pub namespace_check: bool,

    #[serde(default = "default_namespace_lookup_timeout")]
    pub namespace_lookup_timeout_secs: u64,

    #[serde(default)]
    pub namespace_failure_policy: FailurePolicy,

    /// Inject the readiness helper container into created pods
    #[serde(default)]
    pub inject_aux_container: bool,

    #[serde(default = "default_aux_container_image")]
    pub aux_container_image: String,

    #[serde(default = "default_aux_poll_interval")]
    pub aux_poll_interval_secs: u32,

    /// PEM certificate served by the webhook; plain HTTP when unset
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,

    /// PEM private key matching `tls_cert_path`
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
}

fn default_api_port() -> u16 {
    8080
}

fn default_webhook_port() -> u16 {
    9443
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_exec_timeout() -> u64 {
    30
}

fn default_resync_interval() -> u64 {
    300
}

fn default_namespace_lookup_timeout() -> u64 {
    5
}

fn default_aux_container_image() -> String {
    AUX_CONTAINER_IMAGE.to_string()
}

fn default_aux_poll_interval() -> u32 {
    AUX_POLL_INTERVAL_SECS
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            webhook_port: default_webhook_port(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            exec_timeout_secs: default_exec_timeout(),
            resync_interval_secs: default_resync_interval(),
            namespace_check: false,
            namespace_lookup_timeout_secs: default_namespace_lookup_timeout(),
            namespace_failure_policy: FailurePolicy::Open,
            inject_aux_container: false,
            aux_container_image: default_aux_container_image(),
            aux_poll_interval_secs: default_aux_poll_interval(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        Self::from_builder(
            config::Config::builder()
                .add_source(config::File::with_name(CONFIG_FILE).required(false))
                .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true)),
        )
    }

    pub fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config: Self = builder
            .build()
            .context("failed to read configuration sources")?
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        if self.exec_timeout_secs == 0 {
            bail!("exec_timeout_secs must be positive");
        }
        if self.namespace_lookup_timeout_secs == 0 {
            bail!("namespace_lookup_timeout_secs must be positive");
        }
        if self.aux_poll_interval_secs == 0 {
            bail!("aux_poll_interval_secs must be positive");
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            bail!("tls_cert_path and tls_key_path must be set together");
        }
        Ok(())
    }

    /// Certificate and key paths when the webhook serves TLS
    pub fn webhook_tls(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn mutation_policy(&self) -> MutationPolicy {
        MutationPolicy {
            namespace_check: self.namespace_check.then(|| NamespaceCheck {
                timeout: Duration::from_secs(self.namespace_lookup_timeout_secs),
                failure_policy: self.namespace_failure_policy,
            }),
            inject_aux_container: self.inject_aux_container,
        }
    }

    pub fn aux_container(&self) -> Result<AuxContainerConfig> {
        let poll_interval_secs = NonZeroU32::new(self.aux_poll_interval_secs)
            .context("aux_poll_interval_secs must be positive")?;
        Ok(AuxContainerConfig {
            name: AUX_CONTAINER_NAME.to_string(),
            image: self.aux_container_image.clone(),
            poll_interval_secs,
        })
    }
}
