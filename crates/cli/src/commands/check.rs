//! Shutdown readiness of labelled pods

use anyhow::{Context, Result};
use aux_lib::constants::{aux_label_selector, PROXY_CONTAINER_NAME};
use aux_lib::{evaluate, ContainerStatusView, PodRef, Readiness};
use colored::Colorize;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{color_readiness, color_state, print_warning, OutputFormat};

/// Which namespaces to list pods from
#[derive(Debug, Clone)]
pub enum Scope {
    Namespace(String),
    AllNamespaces,
    /// The client's default namespace
    Default,
}

/// Readiness report of a single pod
#[derive(Debug, Clone, Serialize)]
pub struct PodReport {
    pub pod: PodRef,
    pub containers: Vec<ContainerStatusView>,
    pub readiness: Readiness,
}

impl PodReport {
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let pod_ref = PodRef::from_pod(pod)?;
        let containers = ContainerStatusView::from_pod(pod);
        let readiness = evaluate(&containers, PROXY_CONTAINER_NAME);
        Some(Self {
            pod: pod_ref,
            containers,
            readiness,
        })
    }

    fn proxy(&self) -> Option<&ContainerStatusView> {
        self.containers
            .iter()
            .find(|c| c.name == PROXY_CONTAINER_NAME)
    }

    fn payload(&self) -> impl Iterator<Item = &ContainerStatusView> {
        self.containers
            .iter()
            .filter(|c| c.name != PROXY_CONTAINER_NAME)
    }
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "Proxy")]
    proxy: String,
    #[tabled(rename = "Payload")]
    payload: String,
    #[tabled(rename = "Verdict")]
    verdict: String,
}

impl From<&PodReport> for CheckRow {
    fn from(report: &PodReport) -> Self {
        let proxy = report
            .proxy()
            .map(|c| color_state(&c.state))
            .unwrap_or_else(|| "-".dimmed().to_string());
        let payload: Vec<String> = report
            .payload()
            .map(|c| format!("{}={}", c.name, color_state(&c.state)))
            .collect();

        Self {
            namespace: report.pod.namespace.clone(),
            pod: report.pod.name.clone(),
            proxy,
            payload: if payload.is_empty() {
                "-".to_string()
            } else {
                payload.join("\n")
            },
            verdict: color_readiness(&report.readiness),
        }
    }
}

/// Reports for the given pods, sorted by identity
pub fn reports(pods: &[Pod]) -> Vec<PodReport> {
    let mut reports: Vec<PodReport> = pods.iter().filter_map(PodReport::from_pod).collect();
    reports.sort_by(|a, b| a.pod.cmp(&b.pod));
    reports
}

/// List labelled pods and print their shutdown readiness
pub async fn check_pods(client: Client, scope: Scope, format: OutputFormat) -> Result<()> {
    let api: Api<Pod> = match scope {
        Scope::Namespace(namespace) => Api::namespaced(client, &namespace),
        Scope::AllNamespaces => Api::all(client),
        Scope::Default => Api::default_namespaced(client),
    };

    let pods = api
        .list(&ListParams::default().labels(&aux_label_selector()))
        .await
        .context("Failed to list pods")?;
    let reports = reports(&pods.items);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Table => {
            if reports.is_empty() {
                print_warning(&format!(
                    "No pods labelled {} found",
                    aux_label_selector()
                ));
                return Ok(());
            }

            let rows: Vec<CheckRow> = reports.iter().map(CheckRow::from).collect();
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);

            let ready = reports.iter().filter(|r| r.readiness.is_ready()).count();
            println!(
                "\nTotal: {} pods, {} ready for proxy shutdown",
                reports.len(),
                ready
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aux_lib::NotReadyReason;
    use k8s_openapi::api::core::v1::{
        ContainerState as K8sState, ContainerStateRunning, ContainerStateTerminated,
        ContainerStatus, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn running() -> K8sState {
        K8sState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }
    }

    fn terminated(exit_code: i32) -> K8sState {
        K8sState {
            terminated: Some(ContainerStateTerminated {
                exit_code,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(name: &str, statuses: Vec<(&str, K8sState)>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("batch".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                container_statuses: Some(
                    statuses
                        .into_iter()
                        .map(|(name, state)| ContainerStatus {
                            name: name.to_string(),
                            state: Some(state),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_reports_are_sorted_and_classified() {
        let pods = vec![
            pod(
                "job-b",
                vec![(PROXY_CONTAINER_NAME, running()), ("app", running())],
            ),
            pod(
                "job-a",
                vec![(PROXY_CONTAINER_NAME, running()), ("app", terminated(1))],
            ),
        ];

        let reports = reports(&pods);

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].pod, PodRef::new("batch", "job-a"));
        assert_eq!(reports[0].readiness, Readiness::Ready);
        assert_eq!(
            reports[1].readiness,
            Readiness::NotReady(NotReadyReason::PayloadRunning(vec!["app".to_string()]))
        );
    }

    #[test]
    fn test_pod_without_statuses_has_no_proxy() {
        let report = PodReport::from_pod(&pod("pending", vec![])).unwrap();

        assert!(report.proxy().is_none());
        assert_eq!(report.payload().count(), 0);
        assert_eq!(
            report.readiness,
            Readiness::NotReady(NotReadyReason::ProxyAbsent)
        );
    }

    #[test]
    fn test_row_lists_payload_containers() {
        let report = PodReport::from_pod(&pod(
            "job-a",
            vec![
                ("app", terminated(0)),
                (PROXY_CONTAINER_NAME, running()),
                ("sidecar-logs", terminated(0)),
            ],
        ))
        .unwrap();

        let row = CheckRow::from(&report);

        assert_eq!(row.namespace, "batch");
        assert_eq!(row.pod, "job-a");
        assert!(row.payload.contains("app="));
        assert!(row.payload.contains("sidecar-logs="));
        assert!(!row.payload.contains(PROXY_CONTAINER_NAME));
    }
}
