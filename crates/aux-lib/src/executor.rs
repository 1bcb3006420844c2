//! Remote quit signal for the proxy container
//!
//! The proxy is stopped by running a local HTTP POST against its quit
//! endpoint from inside the proxy container, through the pod exec
//! subresource.

use crate::constants::PROXY_QUIT_URL;
use crate::error::ExecutionError;
use crate::models::PodRef;
use crate::observability::{AuxMetrics, StructuredLogger};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Captured output of a finished remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Capability to run a one-shot command inside a container
#[async_trait]
pub trait ProxyExec: Send + Sync {
    /// Run `command` in `container` and wait for it to exit
    async fn exec(
        &self,
        pod: &PodRef,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, ExecutionError>;
}

/// [`ProxyExec`] backed by the pods/exec subresource
#[derive(Clone)]
pub struct KubeProxyExec {
    client: Client,
}

impl KubeProxyExec {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProxyExec for KubeProxyExec {
    async fn exec(
        &self,
        pod: &PodRef,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, ExecutionError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(true)
            .stdout(true)
            .stderr(true);

        let mut attached = api
            .exec(&pod.name, command.to_vec(), &params)
            .await
            .map_err(|e| ExecutionError::SetupFailed(e.to_string()))?;

        // Nothing is sent to the command; closing stdin right away lets it run to completion
        drop(attached.stdin());

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let (stdout, stderr) = tokio::join!(read_stream(stdout), read_stream(stderr));
        let output = ExecOutput {
            stdout: stdout?,
            stderr: stderr?,
        };

        let status = match status {
            Some(status) => status.await,
            None => None,
        };

        attached
            .join()
            .await
            .map_err(|e| ExecutionError::StreamFailed(e.to_string()))?;

        if let Some(status) = status {
            if status.status.as_deref() != Some("Success") {
                let message = status
                    .message
                    .unwrap_or_else(|| "command exited with failure".to_string());
                return Err(ExecutionError::StreamFailed(message));
            }
        }

        Ok(output)
    }
}

async fn read_stream<R>(stream: Option<R>) -> Result<String, ExecutionError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream
            .read_to_end(&mut buf)
            .await
            .map_err(|e| ExecutionError::StreamFailed(e.to_string()))?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Command run inside the proxy container
pub fn quit_command() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("curl -sf -XPOST {}", PROXY_QUIT_URL),
    ]
}

/// Issues the quit command against a pod's proxy container
#[derive(Clone)]
pub struct ShutdownExecutor {
    exec: Arc<dyn ProxyExec>,
    timeout: Duration,
    logger: StructuredLogger,
    metrics: AuxMetrics,
}

impl ShutdownExecutor {
    pub fn new(
        exec: Arc<dyn ProxyExec>,
        timeout: Duration,
        logger: StructuredLogger,
        metrics: AuxMetrics,
    ) -> Self {
        Self {
            exec,
            timeout,
            logger,
            metrics,
        }
    }

    /// Signal the proxy and wait for the command to finish
    ///
    /// Exceeding the timeout is reported as a stream failure.
    pub async fn trigger(&self, pod: &PodRef, proxy_container: &str) -> Result<(), ExecutionError> {
        let command = quit_command();
        let start = Instant::now();

        let result = match tokio::time::timeout(
            self.timeout,
            self.exec.exec(pod, proxy_container, &command),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::StreamFailed(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        };

        let elapsed = start.elapsed();
        self.metrics.observe_exec_duration(elapsed.as_secs_f64());

        match result {
            Ok(output) => {
                debug!(pod = %pod, stdout = %output.stdout, stderr = %output.stderr, "quit command output");
                self.metrics.inc_proxy_shutdowns();
                self.logger
                    .log_proxy_shutdown(pod, proxy_container, elapsed.as_millis());
                Ok(())
            }
            Err(err) => {
                self.metrics.inc_exec_failure(err.kind());
                self.logger.log_exec_failure(pod, proxy_container, &err);
                Err(err)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeExec;
    use super::*;
    use crate::constants::PROXY_CONTAINER_NAME;

    fn executor(exec: Arc<FakeExec>, timeout: Duration) -> ShutdownExecutor {
        ShutdownExecutor::new(
            exec,
            timeout,
            StructuredLogger::new("test"),
            AuxMetrics::new(),
        )
    }

    #[test]
    fn test_quit_command() {
        assert_eq!(
            quit_command(),
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "curl -sf -XPOST http://127.0.0.1:15020/quitquitquit".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_trigger_targets_proxy_container() {
        let exec = Arc::new(FakeExec::ok());
        let pod = PodRef::new("batch", "job-1");

        executor(exec.clone(), Duration::from_secs(5))
            .trigger(&pod, PROXY_CONTAINER_NAME)
            .await
            .unwrap();

        let calls = exec.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, pod);
        assert_eq!(calls[0].1, PROXY_CONTAINER_NAME);
        assert_eq!(calls[0].2, quit_command());
    }

    #[tokio::test]
    async fn test_trigger_propagates_exec_errors() {
        let err = ExecutionError::SetupFailed("pods/exec forbidden".to_string());
        let exec = Arc::new(FakeExec::failing(err.clone()));

        let result = executor(exec, Duration::from_secs(5))
            .trigger(&PodRef::new("batch", "job-1"), PROXY_CONTAINER_NAME)
            .await;

        assert_eq!(result, Err(err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_stream_failure() {
        let exec = Arc::new(FakeExec::slow(Duration::from_secs(120)));

        let result = executor(exec, Duration::from_secs(30))
            .trigger(&PodRef::new("batch", "job-1"), PROXY_CONTAINER_NAME)
            .await;

        assert!(matches!(result, Err(ExecutionError::StreamFailed(_))));
    }
}
