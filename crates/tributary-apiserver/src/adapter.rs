//! Receive adapter Deployment
//!
//! Builds the desired Deployment that runs the receive adapter for one
//! ApiServerSource. The adapter learns what to watch and where to deliver
//! from its environment.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec, PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};
use serde::Serialize;

use tributary_common::kube_utils::bounded_name;

use crate::crd::{ApiServerSource, EventMode, OwnerSelector};
use crate::Error;

/// Name of the single adapter container
pub const CONTAINER_NAME: &str = "receive-adapter";

/// Label marking objects managed by this controller
pub const SOURCE_LABEL: &str = "sources.tributary.dev/source";
/// Value of [`SOURCE_LABEL`]
pub const CONTROLLER_AGENT_NAME: &str = "apiserver-source-controller";
/// Label carrying the owning source's name
pub const NAME_LABEL: &str = "sources.tributary.dev/name";

/// Environment variable names read by the receive adapter
pub mod env {
    /// Resolved sink URI
    pub const SINK: &str = "K_SINK";
    /// JSON watch configuration
    pub const SOURCE_CONFIG: &str = "K_SOURCE_CONFIG";
    /// Namespace the controller runs in
    pub const SYSTEM_NAMESPACE: &str = "SYSTEM_NAMESPACE";
    /// The adapter's own namespace, via the downward API
    pub const NAMESPACE: &str = "NAMESPACE";
}

/// Extra environment injected into every adapter (logging, tracing, ...)
pub trait EnvProvider: Send + Sync {
    /// Variables appended after the adapter's own
    fn env(&self) -> Vec<EnvVar>;
}

/// Fixed list of name/value pairs
#[derive(Clone, Debug, Default)]
pub struct StaticEnv(pub Vec<(String, String)>);

impl EnvProvider for StaticEnv {
    fn env(&self) -> Vec<EnvVar> {
        self.0
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                value_from: None,
            })
            .collect()
    }
}

/// Labels for the adapter Deployment and its pods
///
/// The name label is clamped like the Deployment name, since label values
/// are limited to 63 characters.
pub fn labels(source_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (SOURCE_LABEL.to_string(), CONTROLLER_AGENT_NAME.to_string()),
        (NAME_LABEL.to_string(), bounded_name(source_name)),
    ])
}

/// Deployment name derived from the source's name and uid
pub fn deployment_name(source_name: &str, uid: &str) -> String {
    bounded_name(&format!("apiserversource-{source_name}-{uid}"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdapterConfig<'a> {
    namespace: &'a str,
    resources: Vec<WatchedResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner: Option<&'a OwnerSelector>,
    mode: EventMode,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchedResource {
    group: String,
    version: String,
    resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    label_selector: Option<String>,
}

fn source_config(source: &ApiServerSource, namespace: &str) -> Result<String, Error> {
    let config = AdapterConfig {
        namespace,
        resources: source
            .spec
            .resources
            .iter()
            .map(|r| WatchedResource {
                group: r.group(),
                version: r.version(),
                resource: r.resource(),
                label_selector: r.label_selector(),
            })
            .collect(),
        owner: source.spec.owner.as_ref(),
        mode: source.spec.mode,
    };
    serde_json::to_string(&config)
        .map_err(|e| Error::serialization_for_kind("ApiServerSource", e.to_string()))
}

/// Inputs for [`build`]
pub struct AdapterArgs<'a> {
    /// Adapter container image
    pub image: &'a str,
    /// Source being reconciled
    pub source: &'a ApiServerSource,
    /// Labels for the Deployment, its selector and its pods
    pub labels: BTreeMap<String, String>,
    /// Resolved sink URI
    pub sink_uri: &'a str,
    /// Namespace the controller runs in
    pub system_namespace: &'a str,
    /// Extra environment appended after the adapter's own
    pub env: &'a dyn EnvProvider,
}

/// Build the desired adapter Deployment
pub fn build(args: &AdapterArgs<'_>) -> Result<Deployment, Error> {
    let source = args.source;
    let namespace = source
        .namespace()
        .ok_or_else(|| Error::internal_with_context("adapter", "source has no namespace"))?;
    let uid = source
        .uid()
        .ok_or_else(|| Error::internal_with_context("adapter", "source has no uid"))?;
    let owner = source
        .controller_owner_ref(&())
        .ok_or_else(|| Error::internal_with_context("adapter", "cannot build owner reference"))?;

    let mut env = vec![
        EnvVar {
            name: env::SINK.to_string(),
            value: Some(args.sink_uri.to_string()),
            value_from: None,
        },
        EnvVar {
            name: env::SOURCE_CONFIG.to_string(),
            value: Some(source_config(source, &namespace)?),
            value_from: None,
        },
        EnvVar {
            name: env::SYSTEM_NAMESPACE.to_string(),
            value: Some(args.system_namespace.to_string()),
            value_from: None,
        },
        EnvVar {
            name: env::NAMESPACE.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    api_version: Some("v1".to_string()),
                    field_path: "metadata.namespace".to_string(),
                }),
                ..Default::default()
            }),
        },
    ];
    env.extend(args.env.env());

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name(&source.name_any(), &uid)),
            namespace: Some(namespace),
            labels: Some(args.labels.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(args.labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(args.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(source.spec.service_account().to_string()),
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(args.image.to_string()),
                        env: Some(env),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}
