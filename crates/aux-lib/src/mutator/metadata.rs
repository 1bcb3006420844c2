//! Opt-in label and proxy configuration annotation

use crate::constants::{
    AUX_LABEL_NAME, AUX_LABEL_VALUE, HOLD_APPLICATION_KEY, PROXY_CONFIG_ANNOTATION,
};
use crate::error::{Error, Result};
use crate::observability::StructuredLogger;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// A proxy configuration fragment as stored in the pod annotation
///
/// Keys keep their YAML type and insertion order; nested values are carried
/// as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyConfigFragment(Mapping);

impl ProxyConfigFragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fragment every opted-in pod receives: hold the application
    /// until the proxy is up
    pub fn defaults() -> Self {
        Self::new().with(HOLD_APPLICATION_KEY, Value::Bool(true))
    }

    pub fn with(mut self, key: impl Into<Value>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Printable form of the top-level keys
    pub fn keys(&self) -> Vec<String> {
        self.0.keys().map(key_label).collect()
    }

    /// Parse an annotation value; blank and null values are an empty
    /// fragment, anything else must be a mapping
    pub fn parse(raw: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        match serde_yaml::from_str::<Value>(raw)? {
            Value::Null => Ok(Self::new()),
            other => serde_yaml::from_value(other).map(Self),
        }
    }

    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.0)
    }

    /// Serialize `self`, the merge of `raw` and `added`
    ///
    /// The added entries are appended to the operator's text when the result
    /// reads back as `self`, keeping the operator's quoting and comments.
    /// Otherwise the whole fragment is re-serialized.
    pub fn render_over(
        &self,
        raw: &str,
        added: &ProxyConfigFragment,
    ) -> std::result::Result<String, serde_yaml::Error> {
        if !raw.trim().is_empty() {
            let mut text = raw.trim_end().to_string();
            text.push('\n');
            text.push_str(&added.to_yaml()?);
            if Self::parse(&text).is_ok_and(|parsed| parsed == *self) {
                return Ok(text);
            }
        }
        self.to_yaml()
    }

    /// Add every default key absent from `self`; keys already present are
    /// never replaced. Returns the entries that were added.
    pub fn fill_from(&mut self, defaults: &ProxyConfigFragment) -> ProxyConfigFragment {
        let mut added = ProxyConfigFragment::new();
        for (key, value) in &defaults.0 {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
                added.0.insert(key.clone(), value.clone());
            }
        }
        added
    }
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(key) => key.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// What happened to the proxy configuration annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationChange {
    /// No annotation existed; the defaults were written
    Created,
    /// Existing annotation extended with these default keys
    Merged(Vec<String>),
    /// Existing annotation already had every default key
    Unchanged,
    /// Existing annotation could not be parsed and was left as-is
    Skipped,
}

/// Summary of one `MetadataMutator::apply` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataChanges {
    pub label_added: bool,
    pub annotation: AnnotationChange,
}

impl MetadataChanges {
    pub fn is_noop(&self) -> bool {
        !self.label_added
            && matches!(
                self.annotation,
                AnnotationChange::Unchanged | AnnotationChange::Skipped
            )
    }
}

/// Sets the opt-in label and merges the proxy configuration defaults
#[derive(Debug, Clone)]
pub struct MetadataMutator {
    defaults: ProxyConfigFragment,
    logger: StructuredLogger,
}

impl MetadataMutator {
    pub fn new(logger: StructuredLogger) -> Self {
        Self::with_defaults(ProxyConfigFragment::defaults(), logger)
    }

    pub fn with_defaults(defaults: ProxyConfigFragment, logger: StructuredLogger) -> Self {
        Self { defaults, logger }
    }

    pub fn defaults(&self) -> &ProxyConfigFragment {
        &self.defaults
    }

    /// Mutate pod metadata in place
    ///
    /// Operator-authored content always wins: an existing label is kept
    /// whatever its value, and existing annotation keys are never
    /// overwritten. An unparsable annotation is logged and left alone.
    pub fn apply(&self, meta: &mut ObjectMeta) -> MetadataChanges {
        let pod = display_name(meta);
        let label_added = self.set_label(meta, &pod);

        let annotation = match self.merge_annotation(meta) {
            Ok(change) => {
                if let AnnotationChange::Merged(added) = &change {
                    self.logger
                        .log_annotation_merged(&pod, PROXY_CONFIG_ANNOTATION, added);
                }
                change
            }
            Err(err) => {
                self.logger
                    .log_merge_error(&pod, PROXY_CONFIG_ANNOTATION, &err);
                AnnotationChange::Skipped
            }
        };

        MetadataChanges {
            label_added,
            annotation,
        }
    }

    fn set_label(&self, meta: &mut ObjectMeta, pod: &str) -> bool {
        let labels = meta.labels.get_or_insert_with(BTreeMap::new);
        match labels.get(AUX_LABEL_NAME) {
            Some(value) => {
                self.logger.log_label_present(pod, AUX_LABEL_NAME, value);
                false
            }
            None => {
                labels.insert(AUX_LABEL_NAME.to_string(), AUX_LABEL_VALUE.to_string());
                true
            }
        }
    }

    fn merge_annotation(&self, meta: &mut ObjectMeta) -> Result<AnnotationChange> {
        let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);

        let existing = annotations.get(PROXY_CONFIG_ANNOTATION).cloned();
        let mut fragment = match &existing {
            Some(raw) => ProxyConfigFragment::parse(raw).map_err(merge_error)?,
            None => ProxyConfigFragment::new(),
        };

        let added = fragment.fill_from(&self.defaults);
        let serialized = match &existing {
            Some(_) if added.is_empty() => return Ok(AnnotationChange::Unchanged),
            Some(raw) => fragment.render_over(raw, &added),
            None => fragment.to_yaml(),
        }
        .map_err(merge_error)?;
        annotations.insert(PROXY_CONFIG_ANNOTATION.to_string(), serialized);

        Ok(match existing {
            Some(_) => AnnotationChange::Merged(added.keys()),
            None => AnnotationChange::Created,
        })
    }
}

fn merge_error(source: serde_yaml::Error) -> Error {
    Error::ConfigMerge {
        key: PROXY_CONFIG_ANNOTATION.to_string(),
        source,
    }
}

/// Pods created by controllers often have only a generate name at admission
fn display_name(meta: &ObjectMeta) -> String {
    meta.name
        .clone()
        .or_else(|| meta.generate_name.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutator() -> MetadataMutator {
        MetadataMutator::new(StructuredLogger::new("test"))
    }

    fn meta_with_annotation(value: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some("job-abc".to_string()),
            annotations: Some(BTreeMap::from([(
                PROXY_CONFIG_ANNOTATION.to_string(),
                value.to_string(),
            )])),
            ..Default::default()
        }
    }

    fn annotation(meta: &ObjectMeta) -> &str {
        meta.annotations
            .as_ref()
            .and_then(|a| a.get(PROXY_CONFIG_ANNOTATION))
            .map(String::as_str)
            .unwrap()
    }

    #[test]
    fn test_sets_defaults_on_bare_pod() {
        let mut meta = ObjectMeta::default();
        let changes = mutator().apply(&mut meta);

        assert!(changes.label_added);
        assert_eq!(changes.annotation, AnnotationChange::Created);
        assert_eq!(
            meta.labels.as_ref().unwrap().get(AUX_LABEL_NAME).unwrap(),
            AUX_LABEL_VALUE
        );
        assert_eq!(annotation(&meta), "holdApplicationUntilProxyStarts: true\n");
    }

    #[test]
    fn test_blank_annotation_receives_defaults() {
        let mut meta = meta_with_annotation("");
        let changes = mutator().apply(&mut meta);

        assert_eq!(
            changes.annotation,
            AnnotationChange::Merged(vec![HOLD_APPLICATION_KEY.to_string()])
        );
        assert_eq!(annotation(&meta), "holdApplicationUntilProxyStarts: true\n");
    }

    #[test]
    fn test_merges_with_existing_annotation() {
        let mut meta = meta_with_annotation("proxyMetadata:\n  OUTPUT_CERTS: /etc/istio-output-certs\n");
        mutator().apply(&mut meta);

        assert_eq!(
            annotation(&meta),
            "proxyMetadata:\n  OUTPUT_CERTS: /etc/istio-output-certs\nholdApplicationUntilProxyStarts: true\n"
        );
    }

    #[test]
    fn test_existing_value_is_not_overridden() {
        let existing =
            "holdApplicationUntilProxyStarts: false\nproxyMetadata:\n  OUTPUT_CERTS: /x\n";
        let mut meta = meta_with_annotation(existing);
        let changes = mutator().apply(&mut meta);

        assert_eq!(changes.annotation, AnnotationChange::Unchanged);
        assert_eq!(annotation(&meta), existing);

        let merged = ProxyConfigFragment::parse(annotation(&meta)).unwrap();
        assert_eq!(merged.get(HOLD_APPLICATION_KEY), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_existing_label_is_kept() {
        let mut meta = ObjectMeta {
            labels: Some(BTreeMap::from([(
                AUX_LABEL_NAME.to_string(),
                "disabled".to_string(),
            )])),
            ..Default::default()
        };
        let changes = mutator().apply(&mut meta);

        assert!(!changes.label_added);
        assert_eq!(
            meta.labels.as_ref().unwrap().get(AUX_LABEL_NAME).unwrap(),
            "disabled"
        );
    }

    #[test]
    fn test_unparsable_annotation_is_left_alone() {
        let broken = "holdApplicationUntilProxyStarts: [unclosed";
        let mut meta = meta_with_annotation(broken);
        let changes = mutator().apply(&mut meta);

        assert_eq!(changes.annotation, AnnotationChange::Skipped);
        assert!(changes.label_added);
        assert_eq!(annotation(&meta), broken);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let inputs = [
            ObjectMeta::default(),
            meta_with_annotation("proxyMetadata:\n  OUTPUT_CERTS: /x\n"),
            meta_with_annotation("holdApplicationUntilProxyStarts: false\n"),
        ];

        for input in inputs {
            let mut once = input.clone();
            mutator().apply(&mut once);

            let mut twice = once.clone();
            let second = mutator().apply(&mut twice);

            assert_eq!(once, twice);
            assert!(second.is_noop());
        }
    }

    #[test]
    fn test_merge_only_adds_absent_keys() {
        let defaults = ProxyConfigFragment::new()
            .with("a", Value::Bool(true))
            .with("b", Value::String("default".into()));
        let mut existing = ProxyConfigFragment::new()
            .with("b", Value::String("operator".into()))
            .with("c", Value::Number(3.into()));

        let added = existing.fill_from(&defaults);

        assert_eq!(added.keys(), vec!["a".to_string()]);
        assert_eq!(existing.get("b"), Some(&Value::String("operator".into())));
        assert_eq!(existing.get("c"), Some(&Value::Number(3.into())));
        assert_eq!(existing.len(), 3);
    }

    #[test]
    fn test_operator_keys_keep_their_form() {
        let existing = "1: one\n'on': x\n";
        let mut meta = meta_with_annotation(existing);
        let changes = mutator().apply(&mut meta);

        assert_eq!(
            changes.annotation,
            AnnotationChange::Merged(vec![HOLD_APPLICATION_KEY.to_string()])
        );
        assert_eq!(
            annotation(&meta),
            "1: one\n'on': x\nholdApplicationUntilProxyStarts: true\n"
        );

        let merged = ProxyConfigFragment::parse(annotation(&meta)).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("on"), Some(&Value::String("x".into())));
        assert_eq!(merged.get("1"), None);
    }

    #[test]
    fn test_flow_style_annotation_is_reserialized_with_typed_keys() {
        let mut meta = meta_with_annotation("{1: one, proxyMetadata: {A: b}}");
        mutator().apply(&mut meta);

        assert_eq!(
            annotation(&meta),
            "1: one\nproxyMetadata:\n  A: b\nholdApplicationUntilProxyStarts: true\n"
        );
    }

    #[test]
    fn test_null_annotation_receives_defaults() {
        for null in ["~", "null", "# placeholder\n"] {
            let mut meta = meta_with_annotation(null);
            let changes = mutator().apply(&mut meta);

            assert_eq!(
                changes.annotation,
                AnnotationChange::Merged(vec![HOLD_APPLICATION_KEY.to_string()])
            );
            let merged = ProxyConfigFragment::parse(annotation(&meta)).unwrap();
            assert_eq!(merged, ProxyConfigFragment::defaults());
        }
    }

    #[test]
    fn test_non_mapping_annotation_is_left_alone() {
        for scalar in ["just a string", "- a\n- b\n"] {
            let mut meta = meta_with_annotation(scalar);
            let changes = mutator().apply(&mut meta);

            assert_eq!(changes.annotation, AnnotationChange::Skipped);
            assert_eq!(annotation(&meta), scalar);
        }
    }

    #[test]
    fn test_defaults_are_not_shared() {
        let m = mutator();
        let mut first = ObjectMeta::default();
        let mut second = meta_with_annotation("extra: 1\n");

        m.apply(&mut first);
        m.apply(&mut second);

        assert_eq!(m.defaults(), &ProxyConfigFragment::defaults());
        assert_eq!(annotation(&first), "holdApplicationUntilProxyStarts: true\n");
    }
}
