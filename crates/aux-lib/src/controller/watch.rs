//! Translation of raw watch notifications into pod events

use crate::models::{EventKind, PodEvent, PodRef};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};

/// Turns watcher notifications into [`PodEvent`]s
///
/// The watcher only reports "applied" objects, so the source remembers
/// which pods it has seen to tell creations from updates. It also keeps
/// their last labels to replay them on resync.
#[derive(Debug, Default)]
pub struct EventSource {
    known: HashMap<PodRef, BTreeMap<String, String>>,
}

impl EventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pods currently tracked
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn translate(&mut self, event: watcher::Event<Pod>) -> Vec<PodEvent> {
        match event {
            watcher::Event::Applied(pod) => self.applied(&pod).into_iter().collect(),
            watcher::Event::Deleted(pod) => {
                let Some(pod_ref) = PodRef::from_pod(&pod) else {
                    return Vec::new();
                };
                self.known.remove(&pod_ref);
                vec![PodEvent::new(EventKind::Delete, pod_ref, pod.labels().clone())]
            }
            watcher::Event::Restarted(pods) => {
                let previous = std::mem::take(&mut self.known);
                pods.iter()
                    .filter_map(|pod| {
                        let pod_ref = PodRef::from_pod(pod)?;
                        let kind = if previous.contains_key(&pod_ref) {
                            EventKind::Update
                        } else {
                            EventKind::Create
                        };
                        Some(self.remember(kind, pod_ref, pod))
                    })
                    .collect()
            }
        }
    }

    /// An `Update` for every known pod
    pub fn resync(&self) -> Vec<PodEvent> {
        let mut events: Vec<PodEvent> = self
            .known
            .iter()
            .map(|(pod_ref, labels)| PodEvent::new(EventKind::Update, pod_ref.clone(), labels.clone()))
            .collect();
        events.sort_by(|a, b| a.pod.cmp(&b.pod));
        events
    }

    fn applied(&mut self, pod: &Pod) -> Option<PodEvent> {
        let pod_ref = PodRef::from_pod(pod)?;
        let kind = if self.known.contains_key(&pod_ref) {
            EventKind::Update
        } else {
            EventKind::Create
        };
        Some(self.remember(kind, pod_ref, pod))
    }

    fn remember(&mut self, kind: EventKind, pod_ref: PodRef, pod: &Pod) -> PodEvent {
        let labels = pod.labels().clone();
        self.known.insert(pod_ref.clone(), labels.clone());
        PodEvent::new(kind, pod_ref, labels)
    }
}
