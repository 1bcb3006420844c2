//! Pod watch controller
//!
//! Watches labelled pods, turns notifications into events and hands
//! admitted events to the reconciliation workers. A periodic resync
//! re-emits every known pod so failed attempts are retried.

mod pool;
mod watch;

pub use pool::{shard_for, WorkerConfig, WorkerPool};
pub use watch::EventSource;

use crate::constants::aux_label_selector;
use crate::health::{components, HealthRegistry};
use crate::observability::StructuredLogger;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Watch stream over every pod carrying the opt-in label
pub fn pod_watch(
    client: Client,
) -> impl Stream<Item = Result<watcher::Event<Pod>, watcher::Error>> + Send {
    let api: Api<Pod> = Api::all(client);
    watcher(api, watcher::Config::default().labels(&aux_label_selector())).default_backoff()
}

pub struct Controller {
    pool: WorkerPool,
    source: EventSource,
    health: HealthRegistry,
    resync_interval: Option<Duration>,
    logger: StructuredLogger,
}

impl Controller {
    /// `resync_interval` of `None` disables the periodic resync
    pub fn new(
        pool: WorkerPool,
        health: HealthRegistry,
        resync_interval: Option<Duration>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            pool,
            source: EventSource::new(),
            health,
            resync_interval,
            logger,
        }
    }

    /// Drive the workers from `stream` until shutdown or the stream ends
    pub async fn run<S, E>(mut self, stream: S, mut shutdown: broadcast::Receiver<()>)
    where
        S: Stream<Item = Result<watcher::Event<Pod>, E>>,
        E: Display,
    {
        info!(
            workers = self.pool.workers(),
            resync_secs = self.resync_interval.map(|d| d.as_secs()),
            "Starting pod controller"
        );
        self.health.register(components::CONTROLLER).await;
        self.health.register(components::WATCH).await;

        let mut ticker = self.resync_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut watch_degraded = false;
        futures::pin_mut!(stream);

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        if watch_degraded {
                            self.health.set_healthy(components::WATCH).await;
                            watch_degraded = false;
                        }
                        for event in self.source.translate(event) {
                            self.pool.dispatch(event).await;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "pod watch error, retrying");
                        self.health
                            .set_degraded(components::WATCH, err.to_string())
                            .await;
                        watch_degraded = true;
                    }
                    None => {
                        warn!("pod watch stream ended");
                        break;
                    }
                },
                _ = next_tick(&mut ticker) => {
                    let events = self.source.resync();
                    debug!(pods = events.len(), "resyncing known pods");
                    for event in events {
                        self.pool.dispatch(event).await;
                    }
                }
                _ = shutdown.recv() => {
                    self.logger.log_shutdown("shutdown signal received");
                    break;
                }
            }
        }

        self.pool.shutdown().await;
        self.health
            .set_unhealthy(components::CONTROLLER, "controller stopped")
            .await;
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests;
