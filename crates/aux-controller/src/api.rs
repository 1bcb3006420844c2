//! HTTP surfaces: health/metrics and the admission webhook

use aux_lib::{
    admission::{handle_review, PodMutator},
    health::{ComponentStatus, HealthRegistry},
    observability::AuxMetrics,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use anyhow::{bail, Context};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use hyper_util::service::TowerToHyperService;
use kube::core::{admission::AdmissionReview, DynamicObject};
use prometheus::{Encoder, TextEncoder};
use rustls_pemfile::Item;
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Path the MutatingWebhookConfiguration points at
pub const MUTATE_PATH: &str = "/mutate-v1-pod";

/// Shared state of the health/metrics server
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AuxMetrics,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: AuxMetrics) -> Self {
        Self {
            health_registry,
            metrics,
        }
    }
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %err, "failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            err.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the health/metrics router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn mutate(
    State(mutator): State<Arc<PodMutator>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(handle_review(&mutator, review).await)
}

/// Create the admission webhook router
pub fn create_webhook_router(mutator: Arc<PodMutator>) -> Router {
    Router::new()
        .route(MUTATE_PATH, post(mutate))
        .with_state(mutator)
}

/// Serve `app` on `port` until `shutdown` resolves
pub async fn serve(
    name: &'static str,
    port: u16,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!(server = name, addr = %addr, "Starting HTTP server");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {} server to {}", name, addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(server = name, "HTTP server stopped");
    Ok(())
}

/// Serve `app` over TLS on `port` until `shutdown` resolves
///
/// Connections are accepted and handshaked one task each, so a stalled
/// handshake never blocks the accept loop. In-flight connections are left
/// to finish on their own once the listener stops.
pub async fn serve_tls(
    name: &'static str,
    port: u16,
    app: Router,
    tls: Arc<rustls::ServerConfig>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!(server = name, addr = %addr, "Starting HTTPS server");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {} server to {}", name, addr))?;
    let acceptor = TlsAcceptor::from(tls);
    tokio::pin!(shutdown);

    loop {
        let (stream, remote_addr) = tokio::select! {
            accepted = listener.accept() => accepted
                .with_context(|| format!("{} server failed to accept a connection", name))?,
            _ = &mut shutdown => break,
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(server = name, remote_addr = %remote_addr, error = %err, "TLS handshake failed");
                    return;
                }
            };
            if let Err(err) = ConnectionBuilder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(server = name, remote_addr = %remote_addr, error = %err, "connection closed with error");
            }
        });
    }

    info!(server = name, "HTTPS server stopped");
    Ok(())
}

/// Run a server future and report its failure on the `component` health entry
///
/// A server that errors out also withdraws readiness.
pub async fn monitor(
    component: &'static str,
    health: HealthRegistry,
    server: impl Future<Output = anyhow::Result<()>>,
) -> anyhow::Result<()> {
    let result = server.await;
    if let Err(err) = &result {
        error!(component = component, error = %err, "server exited");
        health
            .set_unhealthy(component, format!("server exited: {:#}", err))
            .await;
        health.set_ready(false).await;
    }
    result
}

/// Build the rustls server configuration from PEM files
pub fn load_tls_config(
    cert_path: &Path,
    key_path: &Path,
) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    let mut cert_reader = BufReader::new(
        File::open(cert_path)
            .with_context(|| format!("failed to open certificate {}", cert_path.display()))?,
    );
    let certs: Vec<rustls::Certificate> = rustls_pemfile::certs(&mut cert_reader)
        .with_context(|| format!("failed to read certificate {}", cert_path.display()))?
        .into_iter()
        .map(rustls::Certificate)
        .collect();
    if certs.is_empty() {
        bail!("no certificate found in {}", cert_path.display());
    }

    let mut key_reader = BufReader::new(
        File::open(key_path)
            .with_context(|| format!("failed to open private key {}", key_path.display()))?,
    );
    let key = loop {
        match rustls_pemfile::read_one(&mut key_reader)
            .with_context(|| format!("failed to read private key {}", key_path.display()))?
        {
            Some(Item::RSAKey(key)) | Some(Item::PKCS8Key(key)) | Some(Item::ECKey(key)) => {
                break rustls::PrivateKey(key)
            }
            Some(_) => continue,
            None => bail!("no private key found in {}", key_path.display()),
        }
    };

    let mut config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("certificate and private key do not form a valid pair")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}
