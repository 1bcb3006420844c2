//! Shutdown readiness classification
//!
//! Decides from a snapshot of container statuses whether the proxy
//! container should be told to exit. The decision depends only on
//! container names and states: declaration order, container count and
//! payload exit codes do not matter.

use crate::models::ContainerStatusView;
use serde::Serialize;
use std::fmt;

/// Why a pod is not ready for proxy shutdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "containers", rename_all = "snake_case")]
pub enum NotReadyReason {
    /// No status reported for the proxy container
    ProxyAbsent,
    /// The proxy already terminated; signalling it again is pointless
    ProxyStopped,
    /// These payload containers have not terminated yet
    PayloadRunning(Vec<String>),
}

impl fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReadyReason::ProxyAbsent => write!(f, "proxy absent"),
            NotReadyReason::ProxyStopped => write!(f, "proxy already stopped"),
            NotReadyReason::PayloadRunning(names) => {
                write!(f, "payload still running: {}", names.join(", "))
            }
        }
    }
}

/// Shutdown verdict for a pod snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    NotReady(NotReadyReason),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Ready => write!(f, "ready"),
            Readiness::NotReady(reason) => write!(f, "not ready ({})", reason),
        }
    }
}

/// Classify a set of container statuses
pub fn evaluate(statuses: &[ContainerStatusView], proxy_container: &str) -> Readiness {
    let (proxy, payload): (Vec<_>, Vec<_>) = statuses
        .iter()
        .partition(|status| status.name == proxy_container);

    if proxy.is_empty() {
        return Readiness::NotReady(NotReadyReason::ProxyAbsent);
    }

    if proxy.iter().any(|status| status.state.is_terminated()) {
        return Readiness::NotReady(NotReadyReason::ProxyStopped);
    }

    let running: Vec<String> = payload
        .iter()
        .filter(|status| !status.state.is_terminated())
        .map(|status| status.name.clone())
        .collect();

    if !running.is_empty() {
        return Readiness::NotReady(NotReadyReason::PayloadRunning(running));
    }

    Readiness::Ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PROXY_CONTAINER_NAME;
    use crate::models::ContainerState;

    fn status(name: &str, state: ContainerState) -> ContainerStatusView {
        ContainerStatusView::new(name, state)
    }

    fn terminated(code: i32) -> ContainerState {
        ContainerState::Terminated { exit_code: code }
    }

    #[test]
    fn test_proxy_absent_is_never_ready() {
        let payload_states = [
            vec![],
            vec![status("app", terminated(0))],
            vec![status("app", ContainerState::Running)],
            vec![status("app", terminated(1)), status("worker", terminated(0))],
        ];

        for statuses in payload_states {
            assert_eq!(
                evaluate(&statuses, PROXY_CONTAINER_NAME),
                Readiness::NotReady(NotReadyReason::ProxyAbsent)
            );
        }
    }

    #[test]
    fn test_terminated_proxy_is_never_ready() {
        // Both containers exited cleanly: the proxy must not be signalled again
        let statuses = vec![
            status(PROXY_CONTAINER_NAME, terminated(0)),
            status("app", terminated(0)),
        ];
        assert_eq!(
            evaluate(&statuses, PROXY_CONTAINER_NAME),
            Readiness::NotReady(NotReadyReason::ProxyStopped)
        );

        let statuses = vec![
            status("app", ContainerState::Running),
            status(PROXY_CONTAINER_NAME, terminated(137)),
        ];
        assert_eq!(
            evaluate(&statuses, PROXY_CONTAINER_NAME),
            Readiness::NotReady(NotReadyReason::ProxyStopped)
        );
    }

    #[test]
    fn test_failed_payload_triggers_shutdown() {
        let statuses = vec![
            status(PROXY_CONTAINER_NAME, ContainerState::Running),
            status("app", terminated(1)),
        ];
        assert_eq!(evaluate(&statuses, PROXY_CONTAINER_NAME), Readiness::Ready);
    }

    #[test]
    fn test_ready_regardless_of_order_and_count() {
        let statuses = vec![
            status("init-db", terminated(0)),
            status("app", terminated(2)),
            status(PROXY_CONTAINER_NAME, ContainerState::Running),
            status("sidecar-logger", terminated(143)),
        ];
        assert!(evaluate(&statuses, PROXY_CONTAINER_NAME).is_ready());

        let proxy_only = vec![status(PROXY_CONTAINER_NAME, ContainerState::Running)];
        assert!(evaluate(&proxy_only, PROXY_CONTAINER_NAME).is_ready());
    }

    #[test]
    fn test_running_payload_blocks_shutdown() {
        let statuses = vec![
            status("app", terminated(0)),
            status(PROXY_CONTAINER_NAME, ContainerState::Running),
            status("worker", ContainerState::Running),
            status("exporter", ContainerState::Waiting),
        ];
        assert_eq!(
            evaluate(&statuses, PROXY_CONTAINER_NAME),
            Readiness::NotReady(NotReadyReason::PayloadRunning(vec![
                "worker".to_string(),
                "exporter".to_string(),
            ]))
        );
    }

    #[test]
    fn test_custom_proxy_name() {
        let statuses = vec![
            status("linkerd-proxy", ContainerState::Running),
            status("app", terminated(0)),
        ];
        assert!(evaluate(&statuses, "linkerd-proxy").is_ready());
        assert!(!evaluate(&statuses, PROXY_CONTAINER_NAME).is_ready());
    }

    #[test]
    fn test_not_ready_reason_display() {
        let reason = NotReadyReason::PayloadRunning(vec!["a".into(), "b".into()]);
        assert_eq!(reason.to_string(), "payload still running: a, b");
        assert_eq!(
            Readiness::NotReady(NotReadyReason::ProxyAbsent).to_string(),
            "not ready (proxy absent)"
        );
    }
}
