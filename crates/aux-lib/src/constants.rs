//! Fixed names, endpoints and defaults shared by the webhook and the controller

/// Opt-in label gating both the admission mutation and the event filter
pub const AUX_LABEL_NAME: &str = "io.datastrophic/istio-aux";
pub const AUX_LABEL_VALUE: &str = "enabled";

/// Namespace label set by the mesh for sidecar injection
pub const ISTIO_INJECTION_LABEL_NAME: &str = "istio-injection";
pub const ISTIO_INJECTION_LABEL_VALUE: &str = "enabled";

/// Annotation holding the per-pod proxy configuration fragment (YAML)
pub const PROXY_CONFIG_ANNOTATION: &str = "proxy.istio.io/config";

/// Key of the only default entry in the proxy configuration fragment
pub const HOLD_APPLICATION_KEY: &str = "holdApplicationUntilProxyStarts";

pub const PROXY_CONTAINER_NAME: &str = "istio-proxy";

/// Loopback endpoint that makes the proxy exit when POSTed to
pub const PROXY_QUIT_URL: &str = "http://127.0.0.1:15020/quitquitquit";

/// Readiness endpoint polled by the auxiliary container
pub const PROXY_READY_URL: &str = "http://localhost:15021/healthz/ready";

pub const AUX_CONTAINER_NAME: &str = "istio-aux";
pub const AUX_CONTAINER_IMAGE: &str = "curlimages/curl:7.79.1";
pub const AUX_POLL_INTERVAL_SECS: u32 = 1;

/// Label selector matching opted-in pods
pub fn aux_label_selector() -> String {
    format!("{}={}", AUX_LABEL_NAME, AUX_LABEL_VALUE)
}
