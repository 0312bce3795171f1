//! Receive adapter lifecycle
//!
//! Keeps the live adapter Deployment matching the desired one. Only the
//! fields the adapter's behavior depends on are compared, so defaults the
//! API server fills in never cause churn.

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::PodSpec;
use tracing::info;

use tributary_common::kube_utils::{find_condition, has_condition, CONDITION_AVAILABLE};
use tributary_common::metrics::record_workload_action;

use crate::client::SourceKubeClient;
use crate::status::{reasons, Verdict};
use crate::Error;

/// What the reconciler did to the live Deployment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadAction {
    /// No Deployment existed; one was created
    Created,
    /// The live Deployment drifted and was replaced
    Updated,
    /// The live Deployment already matched
    Unchanged,
}

impl WorkloadAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Result of one workload pass
#[derive(Clone, Debug)]
pub struct WorkloadOutcome {
    /// What was done
    pub action: WorkloadAction,
    /// The Deployment as last returned by the API server
    pub deployment: Deployment,
    /// WorkloadReady verdict
    pub readiness: Verdict,
}

fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref()?.template.spec.as_ref()
}

fn env_set(spec: &PodSpec) -> BTreeSet<(String, String, String)> {
    spec.containers
        .first()
        .and_then(|c| c.env.as_ref())
        .map(|env| {
            env.iter()
                .map(|e| {
                    let value_from = e
                        .value_from
                        .as_ref()
                        .and_then(|v| serde_json::to_string(v).ok())
                        .unwrap_or_default();
                    (e.name.clone(), e.value.clone().unwrap_or_default(), value_from)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Whether the live Deployment runs the adapter the desired one describes.
///
/// Compares container count, service account and the first container's
/// environment as a set. Labels, image and everything else are ignored.
pub fn is_equivalent(desired: &Deployment, live: &Deployment) -> bool {
    match (pod_spec(desired), pod_spec(live)) {
        (Some(d), Some(l)) => {
            d.containers.len() == l.containers.len()
                && d.service_account_name.as_deref().unwrap_or("")
                    == l.service_account_name.as_deref().unwrap_or("")
                && env_set(d) == env_set(l)
        }
        (None, None) => true,
        _ => false,
    }
}

/// WorkloadReady verdict from the Deployment's Available condition
pub fn availability(deployment: &Deployment) -> Verdict {
    let conditions = deployment.status.as_ref().and_then(|s| s.conditions.as_deref());
    if has_condition(conditions, CONDITION_AVAILABLE) {
        return Verdict::ok(reasons::DEPLOYMENT_AVAILABLE);
    }
    match find_condition(conditions, CONDITION_AVAILABLE) {
        Some(c) => {
            let reason = c
                .reason
                .clone()
                .unwrap_or_else(|| reasons::DEPLOYMENT_UNAVAILABLE.to_string());
            let message = c.message.clone().unwrap_or_default();
            if c.status == "Unknown" {
                Verdict::unknown(reason, message)
            } else {
                Verdict::failed(reason, message)
            }
        }
        None => Verdict::unknown(
            reasons::DEPLOYMENT_UNAVAILABLE,
            "deployment has not reported availability",
        ),
    }
}

fn is_controlled_by(deployment: &Deployment, owner_uid: &str) -> bool {
    deployment
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.controller == Some(true) && r.uid == owner_uid)
        })
}

/// Create or converge the adapter Deployment.
///
/// A Deployment with the desired name that is not controlled by
/// `owner_uid` is left alone and reported as not owned.
pub async fn reconcile(
    kube: &dyn SourceKubeClient,
    desired: &Deployment,
    owner_uid: &str,
) -> Result<WorkloadOutcome, Error> {
    let namespace = desired.metadata.namespace.as_deref().unwrap_or_default();
    let name = desired.metadata.name.as_deref().unwrap_or_default();

    let Some(live) = kube.get_deployment(namespace, name).await? else {
        let created = kube.create_deployment(namespace, desired).await?;
        info!(deployment = %name, "receive adapter created");
        record_workload_action(WorkloadAction::Created.as_str());
        return Ok(WorkloadOutcome {
            action: WorkloadAction::Created,
            deployment: created,
            readiness: Verdict::failed(
                reasons::DEPLOYMENT_CREATED,
                format!("Deployment {name:?} created, waiting for it to become available"),
            ),
        });
    };

    if !is_controlled_by(&live, owner_uid) {
        return Err(Error::workload_not_owned(namespace, name));
    }

    if is_equivalent(desired, &live) {
        let readiness = availability(&live);
        return Ok(WorkloadOutcome {
            action: WorkloadAction::Unchanged,
            deployment: live,
            readiness,
        });
    }

    let mut replacement = desired.clone();
    replacement
        .metadata
        .resource_version
        .clone_from(&live.metadata.resource_version);
    let updated = kube
        .replace_deployment(namespace, name, &replacement)
        .await?;
    info!(deployment = %name, "receive adapter updated");
    record_workload_action(WorkloadAction::Updated.as_str());
    Ok(WorkloadOutcome {
        action: WorkloadAction::Updated,
        deployment: updated,
        readiness: Verdict::failed(
            reasons::DEPLOYMENT_UPDATED,
            format!("Deployment {name:?} updated, waiting for it to become available"),
        ),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapter::tests::sample_source;
    use crate::adapter::{build, labels, AdapterArgs, StaticEnv};
    use crate::client::MockSourceKubeClient;
    use crate::crd::ConditionStatus;
    use k8s_openapi::api::apps::v1::{DeploymentCondition, DeploymentStatus};
    use k8s_openapi::api::core::v1::{Container, EnvVar};
    use kube::ResourceExt;

    pub(crate) fn desired() -> Deployment {
        let source = sample_source();
        build(&AdapterArgs {
            image: "adapter:latest",
            source: &source,
            labels: labels(&source.name_any()),
            sink_uri: "http://sink.testnamespace.svc/",
            system_namespace: "tributary-system",
            env: &StaticEnv::default(),
        })
        .expect("deployment should build")
    }

    pub(crate) fn with_available(mut deployment: Deployment, status: &str) -> Deployment {
        deployment.status = Some(DeploymentStatus {
            conditions: Some(vec![DeploymentCondition {
                type_: "Available".to_string(),
                status: status.to_string(),
                reason: Some("MinimumReplicasUnavailable".to_string()),
                message: Some("0/1 ready".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        });
        deployment
    }

    fn pod_mut(deployment: &mut Deployment) -> &mut PodSpec {
        deployment
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
            .expect("pod spec present")
    }

    #[test]
    fn equivalence_ignores_labels_and_image() {
        let desired = desired();
        let mut live = desired.clone();
        live.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("extra".into(), "label".into());
        pod_mut(&mut live).containers[0].image = Some("other:tag".to_string());
        assert!(is_equivalent(&desired, &live));
    }

    #[test]
    fn equivalence_ignores_env_order() {
        let desired = desired();
        let mut live = desired.clone();
        pod_mut(&mut live).containers[0]
            .env
            .as_mut()
            .expect("env set")
            .reverse();
        assert!(is_equivalent(&desired, &live));
    }

    #[test]
    fn equivalence_detects_drift() {
        let desired = desired();

        let mut extra_env = desired.clone();
        pod_mut(&mut extra_env).containers[0]
            .env
            .as_mut()
            .expect("env set")
            .push(EnvVar {
                name: "FOO".to_string(),
                value: Some("bar".to_string()),
                value_from: None,
            });
        assert!(!is_equivalent(&desired, &extra_env));

        let mut other_sa = desired.clone();
        pod_mut(&mut other_sa).service_account_name = Some("morgan".to_string());
        assert!(!is_equivalent(&desired, &other_sa));

        let mut two_containers = desired.clone();
        pod_mut(&mut two_containers).containers.push(Container {
            name: "sidecar".to_string(),
            ..Default::default()
        });
        assert!(!is_equivalent(&desired, &two_containers));
    }

    #[test]
    fn availability_maps_condition() {
        assert!(availability(&with_available(desired(), "True")).is_true());

        let down = availability(&with_available(desired(), "False"));
        assert_eq!(down.status, ConditionStatus::False);
        assert_eq!(down.reason, "MinimumReplicasUnavailable");
        assert_eq!(down.message, "0/1 ready");

        let unsure = availability(&with_available(desired(), "Unknown"));
        assert_eq!(unsure.status, ConditionStatus::Unknown);

        let silent = availability(&desired());
        assert_eq!(silent.status, ConditionStatus::Unknown);
        assert_eq!(silent.reason, reasons::DEPLOYMENT_UNAVAILABLE);
    }

    /// Story: a missing adapter is created and reported not yet ready
    #[tokio::test]
    async fn story_missing_deployment_is_created() {
        let mut mock = MockSourceKubeClient::new();
        mock.expect_get_deployment().returning(|_, _| Ok(None));
        mock.expect_create_deployment()
            .times(1)
            .returning(|_, d| Ok(d.clone()));
        mock.expect_replace_deployment().never();

        let outcome = reconcile(&mock, &desired(), "1234")
            .await
            .expect("create should succeed");
        assert_eq!(outcome.action, WorkloadAction::Created);
        assert_eq!(outcome.readiness.status, ConditionStatus::False);
        assert_eq!(outcome.readiness.reason, reasons::DEPLOYMENT_CREATED);
    }

    #[tokio::test]
    async fn matching_deployment_is_left_alone() {
        let live = with_available(desired(), "True");
        let mut mock = MockSourceKubeClient::new();
        mock.expect_get_deployment()
            .returning(move |_, _| Ok(Some(live.clone())));
        mock.expect_create_deployment().never();
        mock.expect_replace_deployment().never();

        let outcome = reconcile(&mock, &desired(), "1234")
            .await
            .expect("no-op should succeed");
        assert_eq!(outcome.action, WorkloadAction::Unchanged);
        assert!(outcome.readiness.is_true());
    }

    /// Story: drift triggers one replace that carries the live resourceVersion
    #[tokio::test]
    async fn story_drifted_deployment_is_replaced() {
        let mut live = desired();
        live.metadata.resource_version = Some("77".to_string());
        pod_mut(&mut live).service_account_name = Some("morgan".to_string());

        let mut mock = MockSourceKubeClient::new();
        mock.expect_get_deployment()
            .returning(move |_, _| Ok(Some(live.clone())));
        mock.expect_replace_deployment()
            .times(1)
            .withf(|_, _, d| d.metadata.resource_version.as_deref() == Some("77"))
            .returning(|_, _, d| Ok(d.clone()));

        let outcome = reconcile(&mock, &desired(), "1234")
            .await
            .expect("replace should succeed");
        assert_eq!(outcome.action, WorkloadAction::Updated);
        assert_eq!(outcome.readiness.reason, reasons::DEPLOYMENT_UPDATED);
        let pod = pod_spec(&outcome.deployment).expect("pod spec present");
        assert_eq!(pod.service_account_name.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn foreign_deployment_is_never_touched() {
        let mut live = desired();
        live.metadata.owner_references = None;
        pod_mut(&mut live).service_account_name = Some("someone-else".to_string());

        let mut mock = MockSourceKubeClient::new();
        mock.expect_get_deployment()
            .returning(move |_, _| Ok(Some(live.clone())));
        mock.expect_create_deployment().never();
        mock.expect_replace_deployment().never();

        let err = reconcile(&mock, &desired(), "1234")
            .await
            .expect_err("not owned");
        assert_eq!(err.reason(), Some("DeploymentNotOwned"));
    }
}
