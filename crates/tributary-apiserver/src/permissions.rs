//! Authorization checks for the source's service account
//!
//! The receive adapter watches resources as the source's service account,
//! so before deploying it the controller asks the API server, through one
//! SubjectAccessReview per selector and verb, whether that identity may
//! get, list and watch everything the source selects.

use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
};
use tracing::debug;

use tributary_common::metrics::record_access_review;

use crate::client::SourceKubeClient;
use crate::crd::ResourceSelector;
use crate::Error;

/// Verbs the receive adapter needs on every watched resource
pub const VERBS: [&str; 3] = ["get", "list", "watch"];

/// Username Kubernetes assigns to a service account
pub fn service_account_user(namespace: &str, service_account: &str) -> String {
    format!("system:serviceaccount:{namespace}:{service_account}")
}

/// Build the review for one (resource, verb) pair
pub fn access_review(
    namespace: &str,
    user: &str,
    group: &str,
    resource: &str,
    verb: &str,
) -> SubjectAccessReview {
    SubjectAccessReview {
        spec: SubjectAccessReviewSpec {
            resource_attributes: Some(ResourceAttributes {
                namespace: Some(namespace.to_string()),
                verb: Some(verb.to_string()),
                group: Some(group.to_string()),
                resource: Some(resource.to_string()),
                ..Default::default()
            }),
            user: Some(user.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Verbs refused on one selected resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Denial {
    /// API group of the resource
    pub group: String,
    /// Plural resource name
    pub resource: String,
    /// Refused verbs, in check order
    pub verbs: Vec<&'static str>,
}

/// Outcome of checking every selector
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessCheck {
    /// Identity the reviews were issued for
    pub user: String,
    /// One entry per selector with at least one refused verb, in selector order
    pub denials: Vec<Denial>,
}

impl AccessCheck {
    /// Whether every review was allowed
    pub fn is_granted(&self) -> bool {
        self.denials.is_empty()
    }

    /// Message for the first denied selector, if any
    pub fn denial_message(&self) -> Option<String> {
        self.denials.first().map(|d| {
            format!(
                "Insufficient permission: user {} cannot {} resource {:?} in API group {:?}",
                self.user,
                d.verbs.join(", "),
                d.resource,
                d.group
            )
        })
    }

    /// Turn the check into the stage result
    pub fn into_result(self) -> Result<(), Error> {
        match self.denial_message() {
            Some(message) => Err(Error::permission_denied(message)),
            None => Ok(()),
        }
    }
}

/// Issue one review per selector and verb and collect the refusals.
///
/// Every review is issued even after the first denial, so the result
/// describes the full picture. A review that cannot be created aborts the
/// check with that error.
pub async fn check_all(
    kube: &dyn SourceKubeClient,
    namespace: &str,
    service_account: &str,
    selectors: &[ResourceSelector],
) -> Result<AccessCheck, Error> {
    let user = service_account_user(namespace, service_account);
    let mut denials = Vec::new();

    for selector in selectors {
        let group = selector.group();
        let resource = selector.resource();
        let mut refused = Vec::new();

        for verb in VERBS {
            let review = access_review(namespace, &user, &group, &resource, verb);
            let response = kube.create_access_review(&review).await?;
            let allowed = response.status.as_ref().is_some_and(|s| s.allowed);
            record_access_review(verb, allowed);
            if !allowed {
                refused.push(verb);
            }
        }

        if !refused.is_empty() {
            debug!(%user, %resource, %group, verbs = ?refused, "access denied");
            denials.push(Denial {
                group,
                resource,
                verbs: refused,
            });
        }
    }

    Ok(AccessCheck { user, denials })
}
