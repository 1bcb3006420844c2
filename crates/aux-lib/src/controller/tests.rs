use super::*;
use crate::constants::{AUX_LABEL_NAME, AUX_LABEL_VALUE, PROXY_CONTAINER_NAME};
use crate::executor::testing::FakeExec;
use crate::executor::ShutdownExecutor;
use crate::filter::EventFilter;
use crate::health::ComponentStatus;
use crate::models::{ContainerState, PodRef};
use crate::observability::AuxMetrics;
use crate::reconciler::testing::{pod, FakePods};
use crate::reconciler::Reconciler;
use futures::channel::mpsc;
use std::collections::BTreeMap;
use std::sync::Arc;

type WatchItem = Result<watcher::Event<Pod>, String>;

fn controller(
    pods: Arc<FakePods>,
    exec: Arc<FakeExec>,
    health: HealthRegistry,
    resync: Option<Duration>,
) -> Controller {
    let logger = StructuredLogger::new("test");
    let executor = ShutdownExecutor::new(
        exec,
        Duration::from_secs(5),
        logger.clone(),
        AuxMetrics::new(),
    );
    let reconciler = Reconciler::new(pods, executor, PROXY_CONTAINER_NAME, logger.clone());
    let pool = WorkerPool::start(
        WorkerConfig::default(),
        EventFilter::default(),
        reconciler,
        logger.clone(),
        AuxMetrics::new(),
    );
    Controller::new(pool, health, resync, logger)
}

fn labelled(mut pod: Pod) -> Pod {
    pod.metadata.labels = Some(BTreeMap::from([(
        AUX_LABEL_NAME.to_string(),
        AUX_LABEL_VALUE.to_string(),
    )]));
    pod
}

fn finished(pod_ref: &PodRef) -> Pod {
    labelled(pod(
        pod_ref,
        &[
            (PROXY_CONTAINER_NAME, ContainerState::Running),
            ("app", ContainerState::Terminated { exit_code: 0 }),
        ],
    ))
}

fn store(pods: &[Pod]) -> Arc<FakePods> {
    let store = Arc::new(FakePods::default());
    for pod in pods {
        store.insert(pod.clone());
    }
    store
}

#[tokio::test]
async fn test_update_event_triggers_shutdown() {
    let pod_ref = PodRef::new("batch", "job-1");
    let snapshot = finished(&pod_ref);
    let exec = Arc::new(FakeExec::ok());
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let events: Vec<WatchItem> = vec![
        Ok(watcher::Event::Applied(snapshot.clone())),
        Ok(watcher::Event::Applied(snapshot.clone())),
    ];

    controller(store(&[snapshot]), exec.clone(), HealthRegistry::new(), None)
        .run(futures::stream::iter(events), shutdown_rx)
        .await;

    // The first notification is a creation and is filtered out
    assert_eq!(exec.call_count(), 1);
}

#[tokio::test]
async fn test_running_payload_is_not_signalled() {
    let pod_ref = PodRef::new("batch", "job-1");
    let snapshot = labelled(pod(
        &pod_ref,
        &[
            (PROXY_CONTAINER_NAME, ContainerState::Running),
            ("app", ContainerState::Running),
        ],
    ));
    let exec = Arc::new(FakeExec::ok());
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let events: Vec<WatchItem> = vec![
        Ok(watcher::Event::Applied(snapshot.clone())),
        Ok(watcher::Event::Applied(snapshot.clone())),
        Ok(watcher::Event::Deleted(snapshot.clone())),
    ];

    controller(store(&[snapshot]), exec.clone(), HealthRegistry::new(), None)
        .run(futures::stream::iter(events), shutdown_rx)
        .await;

    assert_eq!(exec.call_count(), 0);
}

#[tokio::test]
async fn test_watch_errors_degrade_health() {
    let health = HealthRegistry::new();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let events: Vec<WatchItem> = vec![Err("watch connection reset".to_string())];

    controller(
        Arc::new(FakePods::default()),
        Arc::new(FakeExec::ok()),
        health.clone(),
        None,
    )
    .run(futures::stream::iter(events), shutdown_rx)
    .await;

    assert_eq!(
        health.status_of(components::WATCH).await,
        Some(ComponentStatus::Degraded)
    );
    assert_eq!(
        health.status_of(components::CONTROLLER).await,
        Some(ComponentStatus::Unhealthy)
    );
}

#[tokio::test]
async fn test_watch_recovers_after_error() {
    let pod_ref = PodRef::new("batch", "job-1");
    let health = HealthRegistry::new();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let events: Vec<WatchItem> = vec![
        Err("watch connection reset".to_string()),
        Ok(watcher::Event::Restarted(vec![finished(&pod_ref)])),
    ];

    controller(
        Arc::new(FakePods::default()),
        Arc::new(FakeExec::ok()),
        health.clone(),
        None,
    )
    .run(futures::stream::iter(events), shutdown_rx)
    .await;

    assert_eq!(
        health.status_of(components::WATCH).await,
        Some(ComponentStatus::Healthy)
    );
}

#[tokio::test(start_paused = true)]
async fn test_resync_retries_known_pods() {
    let pod_ref = PodRef::new("batch", "job-1");
    let snapshot = finished(&pod_ref);
    let exec = Arc::new(FakeExec::ok());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (watch_tx, watch_rx) = mpsc::unbounded::<WatchItem>();

    let controller = controller(
        store(&[snapshot.clone()]),
        exec.clone(),
        HealthRegistry::new(),
        Some(Duration::from_secs(300)),
    );
    let handle = tokio::spawn(controller.run(watch_rx, shutdown_rx));

    watch_tx
        .unbounded_send(Ok(watcher::Event::Applied(snapshot)))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(301)).await;

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    assert_eq!(exec.call_count(), 1);
}

#[tokio::test]
async fn test_shutdown_stops_controller() {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (_watch_tx, watch_rx) = mpsc::unbounded::<WatchItem>();
    let health = HealthRegistry::new();

    let controller = controller(
        Arc::new(FakePods::default()),
        Arc::new(FakeExec::ok()),
        health.clone(),
        Some(Duration::from_secs(300)),
    );
    let handle = tokio::spawn(controller.run(watch_rx, shutdown_rx));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    assert_eq!(
        health.status_of(components::CONTROLLER).await,
        Some(ComponentStatus::Unhealthy)
    );
}
