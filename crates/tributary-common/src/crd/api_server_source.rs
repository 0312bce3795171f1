//! ApiServerSource CRD: watch API resources and forward them to a sink
//!
//! The controller turns each ApiServerSource into a receive adapter
//! Deployment that watches the selected resources with the source's service
//! account and delivers events to the resolved sink.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ConditionStatus};
use crate::kube_utils::{parse_api_version, pluralize_kind};

/// Service account used when `serviceAccountName` is omitted
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

// =============================================================================
// CRD
// =============================================================================

/// Spec for an ApiServerSource
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "sources.tributary.dev",
    version = "v1alpha1",
    kind = "ApiServerSource",
    plural = "apiserversources",
    shortname = "apisrc",
    namespaced,
    status = "ApiServerSourceStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Sink","type":"string","jsonPath":".status.sinkUri"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerSourceSpec {
    /// Resources to watch, in order. Duplicates are kept.
    #[schemars(length(min = 1))]
    pub resources: Vec<ResourceSelector>,

    /// Where observed events are delivered
    pub sink: Destination,

    /// Identity the adapter runs as (defaults to `default`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Whether events carry a reference to the object or the full object
    #[serde(default)]
    pub mode: EventMode,

    /// Only watch objects controlled by an owner of this kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerSelector>,
}

/// One class of resources to watch
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    /// API group and version, e.g. `v1` or `apps/v1`
    pub api_version: String,
    /// Resource kind, e.g. `Namespace`
    pub kind: String,
    /// Narrow the watch to objects carrying all of these labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

impl ResourceSelector {
    /// Build a selector without label filtering
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            match_labels: BTreeMap::new(),
        }
    }

    /// API group (empty for the core group)
    pub fn group(&self) -> String {
        parse_api_version(&self.api_version).0
    }

    /// API version without the group
    pub fn version(&self) -> String {
        parse_api_version(&self.api_version).1
    }

    /// Lowercase plural resource name used by RBAC and the REST path
    pub fn resource(&self) -> String {
        pluralize_kind(&self.kind)
    }

    /// Label selector in `k=v,k2=v2` form (sorted by key), if any
    pub fn label_selector(&self) -> Option<String> {
        if self.match_labels.is_empty() {
            return None;
        }
        Some(
            self.match_labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Delivery target: a direct URI, an addressable object, or both
///
/// When both are set, `uri` must be relative and is resolved against the
/// referenced object's address.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Reference to an addressable object
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<KReference>,

    /// Absolute URI, or a path relative to the referenced object's address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Destination {
    /// Destination pointing straight at a URI
    pub fn uri(uri: impl Into<String>) -> Self {
        Self {
            reference: None,
            uri: Some(uri.into()),
        }
    }

    /// Destination pointing at an addressable object
    pub fn reference(reference: KReference) -> Self {
        Self {
            reference: Some(reference),
            uri: None,
        }
    }

    /// Append a relative path to an object reference
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.uri = Some(path.into());
        self
    }
}

/// Reference to an object by apiVersion/kind/name
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KReference {
    /// API version of the referent
    pub api_version: String,
    /// Kind of the referent
    pub kind: String,
    /// Name of the referent
    pub name: String,
    /// Namespace of the referent (defaults to the source's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl KReference {
    /// Build a reference in the source's own namespace
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    /// Namespace of the referent, falling back to the given default
    pub fn resolve_namespace<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_namespace)
    }

    /// Human-readable form used in conditions, e.g. `Broker eventing.knative.dev/v1 ns/name`
    pub fn describe(&self, default_namespace: &str) -> String {
        format!(
            "{} {} {}/{}",
            self.kind,
            self.api_version,
            self.resolve_namespace(default_namespace),
            self.name
        )
    }
}

/// What each emitted event carries
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum EventMode {
    /// A reference to the changed object
    #[default]
    Reference,
    /// The full changed object
    Resource,
}

/// Owner kind filter
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerSelector {
    /// API version of the owner
    pub api_version: String,
    /// Kind of the owner
    pub kind: String,
}

impl ApiServerSourceSpec {
    /// Acting service account, with the default applied
    pub fn service_account(&self) -> &str {
        self.service_account_name
            .as_deref()
            .filter(|sa| !sa.is_empty())
            .unwrap_or(DEFAULT_SERVICE_ACCOUNT)
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of an ApiServerSource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerSourceStatus {
    /// Generation most recently looked at by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// SinkResolved, PermissionsGranted, WorkloadReady and the derived Ready
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Resolved sink address. Serialized as `null` when unset so a merge
    /// patch clears a previously resolved value.
    #[serde(default)]
    pub sink_uri: Option<String>,

    /// Event types this source may produce
    #[serde(default)]
    pub event_types: Vec<String>,
}

impl ApiServerSourceStatus {
    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Status value of a condition, Unknown if it was never set
    pub fn condition_status(&self, type_: &str) -> ConditionStatus {
        self.condition(type_)
            .map(|c| c.status)
            .unwrap_or(ConditionStatus::Unknown)
    }

    /// Whether the derived Ready condition is True
    pub fn is_ready(&self) -> bool {
        self.condition("Ready").is_some_and(Condition::is_true)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn sample_spec() -> ApiServerSourceSpec {
        ApiServerSourceSpec {
            resources: vec![ResourceSelector::new("v1", "Namespace")],
            sink: Destination::uri("http://sink.ns.svc/"),
            service_account_name: None,
            mode: EventMode::default(),
            owner: None,
        }
    }

    #[test]
    fn service_account_defaults() {
        let mut spec = sample_spec();
        assert_eq!(spec.service_account(), "default");

        spec.service_account_name = Some(String::new());
        assert_eq!(spec.service_account(), "default");

        spec.service_account_name = Some("watcher".to_string());
        assert_eq!(spec.service_account(), "watcher");
    }

    #[test]
    fn selector_splits_group_version_and_pluralizes() {
        let core = ResourceSelector::new("v1", "Namespace");
        assert_eq!(core.group(), "");
        assert_eq!(core.version(), "v1");
        assert_eq!(core.resource(), "namespaces");

        let apps = ResourceSelector::new("apps/v1", "Deployment");
        assert_eq!(apps.group(), "apps");
        assert_eq!(apps.resource(), "deployments");
    }

    #[test]
    fn label_selector_is_sorted_and_joined() {
        let mut selector = ResourceSelector::new("v1", "Pod");
        assert_eq!(selector.label_selector(), None);

        selector.match_labels.insert("tier".into(), "web".into());
        selector.match_labels.insert("app".into(), "shop".into());
        assert_eq!(
            selector.label_selector().as_deref(),
            Some("app=shop,tier=web")
        );
    }

    /// Story: the wire format matches what users write in YAML
    #[test]
    fn story_spec_parses_from_user_yaml() {
        let yaml = r#"
resources:
  - apiVersion: v1
    kind: Namespace
  - apiVersion: apps/v1
    kind: Deployment
    matchLabels:
      app: shop
sink:
  ref:
    apiVersion: eventing.knative.dev/v1
    kind: Broker
    name: default
  uri: /events
serviceAccountName: watcher
mode: Resource
"#;
        let spec: ApiServerSourceSpec = serde_yaml::from_str(yaml).expect("spec should parse");
        assert_eq!(spec.resources.len(), 2);
        assert_eq!(spec.resources[1].match_labels["app"], "shop");
        let reference = spec.sink.reference.as_ref().expect("ref is set");
        assert_eq!(reference.kind, "Broker");
        assert_eq!(reference.resolve_namespace("team-a"), "team-a");
        assert_eq!(spec.sink.uri.as_deref(), Some("/events"));
        assert_eq!(spec.mode, EventMode::Resource);
        assert_eq!(spec.service_account(), "watcher");
    }

    #[test]
    fn reference_describe_includes_namespace() {
        let mut reference = KReference::new("messaging.knative.dev/v1", "Channel", "sink");
        assert_eq!(
            reference.describe("team-a"),
            "Channel messaging.knative.dev/v1 team-a/sink"
        );
        reference.namespace = Some("other".to_string());
        assert_eq!(
            reference.describe("team-a"),
            "Channel messaging.knative.dev/v1 other/sink"
        );
    }

    #[test]
    fn unset_sink_uri_serializes_as_null() {
        let status = ApiServerSourceStatus::default();
        let json = serde_json::to_value(&status).expect("status should serialize");
        assert!(json["sinkUri"].is_null());
        assert!(json.get("sinkUri").is_some());
        assert!(json.get("observedGeneration").is_none());
    }

    #[test]
    fn status_condition_lookup() {
        let status = ApiServerSourceStatus {
            conditions: vec![Condition::new("Ready", ConditionStatus::True, "Ready", "")],
            ..Default::default()
        };
        assert!(status.is_ready());
        assert_eq!(status.condition_status("Ready"), ConditionStatus::True);
        assert_eq!(
            status.condition_status("SinkResolved"),
            ConditionStatus::Unknown
        );
    }

    #[test]
    fn crd_has_expected_names() {
        let crd = ApiServerSource::crd();
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("apiserversources.sources.tributary.dev")
        );
        assert_eq!(crd.spec.names.kind, "ApiServerSource");
        assert_eq!(
            crd.spec.names.short_names,
            Some(vec!["apisrc".to_string()])
        );
    }
}
