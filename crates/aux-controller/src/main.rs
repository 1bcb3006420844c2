//! istio-aux - graceful shutdown of the istio-proxy sidecar
//!
//! Runs the mutating admission webhook for labelled pods and the controller
//! that signals the proxy once every payload container has terminated.

use anyhow::{anyhow, Context, Result};
use aux_lib::{
    admission::{KubeNamespaceSource, PodMutator},
    constants::PROXY_CONTAINER_NAME,
    controller::{pod_watch, Controller, WorkerPool},
    executor::{KubeProxyExec, ShutdownExecutor},
    filter::EventFilter,
    health::{components, HealthRegistry},
    mutator::{MetadataMutator, SidecarInjector},
    observability::{AuxMetrics, StructuredLogger},
    reconciler::{KubePodSource, Reconciler},
};
use istio_aux::{api, config::ControllerConfig};
use kube::Client;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = ControllerConfig::load()?;
    info!(
        workers = config.workers,
        namespace_check = config.namespace_check,
        inject_aux_container = config.inject_aux_container,
        "istio-aux configured"
    );

    let logger = StructuredLogger::new("istio-aux");
    logger.log_startup(VERSION);

    let health_registry = HealthRegistry::new();
    health_registry.register(components::WEBHOOK).await;
    let metrics = AuxMetrics::new();

    let client = Client::try_default()
        .await
        .context("failed to create kubernetes client")?;

    let webhook_logger = logger.child("webhook");
    let mutator = PodMutator::new(
        MetadataMutator::new(webhook_logger.clone()),
        SidecarInjector::new(config.aux_container()?, webhook_logger.clone()),
        config.mutation_policy(),
        webhook_logger,
        metrics.clone(),
    )
    .with_namespaces(Arc::new(KubeNamespaceSource::new(client.clone())));

    let controller_logger = logger.child("controller");
    let executor = ShutdownExecutor::new(
        Arc::new(KubeProxyExec::new(client.clone())),
        config.exec_timeout(),
        controller_logger.clone(),
        metrics.clone(),
    );
    let reconciler = Reconciler::new(
        Arc::new(KubePodSource::new(client.clone())),
        executor,
        PROXY_CONTAINER_NAME,
        controller_logger.clone(),
    );
    let pool = WorkerPool::start(
        config.worker_config(),
        EventFilter::default(),
        reconciler,
        controller_logger.clone(),
        metrics.clone(),
    );
    let controller = Controller::new(
        pool,
        health_registry.clone(),
        config.resync_interval(),
        controller_logger,
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let mut api_handle = tokio::spawn(api::serve(
        "api",
        config.api_port,
        api::create_router(app_state),
        shutdown_signal(shutdown_tx.subscribe()),
    ));

    let webhook_router = api::create_webhook_router(Arc::new(mutator));
    let webhook_shutdown = shutdown_signal(shutdown_tx.subscribe());
    let webhook_server = match config.webhook_tls() {
        Some((cert, key)) => {
            let tls = api::load_tls_config(cert, key)?;
            tokio::spawn(api::serve_tls(
                "webhook",
                config.webhook_port,
                webhook_router,
                tls,
                webhook_shutdown,
            ))
        }
        None => {
            warn!("no webhook certificate configured, serving admission over plain HTTP");
            tokio::spawn(api::serve(
                "webhook",
                config.webhook_port,
                webhook_router,
                webhook_shutdown,
            ))
        }
    };
    let mut webhook_handle = tokio::spawn(api::monitor(
        components::WEBHOOK,
        health_registry.clone(),
        async move { webhook_server.await? },
    ));
    let controller_handle = tokio::spawn(controller.run(pod_watch(client), shutdown_tx.subscribe()));

    // Mark ready after initialization
    health_registry.set_ready(true).await;

    // A server stopping before the signal takes the whole process down
    let exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
            None
        }
        result = &mut api_handle => Some(("api", result)),
        result = &mut webhook_handle => Some(("webhook", result)),
    };
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    if let Err(err) = controller_handle.await {
        warn!(error = %err, "controller task failed");
    }

    if let Some((name, result)) = exit {
        let err = match result {
            Ok(Ok(())) => anyhow!("{} server stopped unexpectedly", name),
            Ok(Err(err)) => err.context(format!("{} server failed", name)),
            Err(err) => anyhow!("{} server task failed: {}", name, err),
        };
        logger.log_shutdown(&format!("{} server exited", name));
        return Err(err);
    }

    for (name, handle) in [("api", api_handle), ("webhook", webhook_handle)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(server = name, error = %err, "HTTP server failed"),
            Err(err) => warn!(server = name, error = %err, "HTTP server task failed"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(mut rx: broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}
