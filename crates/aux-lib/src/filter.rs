//! Event admission for the reconciliation queue

use crate::constants::{AUX_LABEL_NAME, AUX_LABEL_VALUE};
use crate::models::{EventKind, PodEvent};

/// Admits update events for pods that opted in through the label
///
/// Creation carries no terminated containers yet and a deleted pod needs
/// no signal, so only updates are of interest. A missing label excludes
/// the pod.
#[derive(Debug, Clone)]
pub struct EventFilter {
    label_name: String,
    label_value: String,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new(AUX_LABEL_NAME, AUX_LABEL_VALUE)
    }
}

impl EventFilter {
    pub fn new(label_name: impl Into<String>, label_value: impl Into<String>) -> Self {
        Self {
            label_name: label_name.into(),
            label_value: label_value.into(),
        }
    }

    pub fn admit(&self, event: &PodEvent) -> bool {
        event.kind == EventKind::Update
            && event
                .labels
                .get(&self.label_name)
                .is_some_and(|value| *value == self.label_value)
    }
}
