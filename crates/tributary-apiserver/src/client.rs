//! Cluster access for the ApiServerSource reconciler
//!
//! Every network call a reconcile pass makes goes through
//! [`SourceKubeClient`], so tests can count and script them with a mock.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::authorization::v1::SubjectAccessReview;
use kube::api::{Api, DynamicObject, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use tributary_common::kube_utils::{build_api_resource, optional, patch_resource_status};
use tributary_common::FIELD_MANAGER;

use crate::crd::{ApiServerSource, ApiServerSourceStatus, KReference};
use crate::Error;

/// Trait abstracting Kubernetes client operations for ApiServerSource
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SourceKubeClient: Send + Sync {
    /// Fetch the object a sink reference points at, `None` if it does not exist
    async fn get_addressable(
        &self,
        namespace: &str,
        reference: &KReference,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Create a SubjectAccessReview and return it with the server's verdict
    async fn create_access_review(
        &self,
        review: &SubjectAccessReview,
    ) -> Result<SubjectAccessReview, Error>;

    /// Get a Deployment by name and namespace
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error>;

    /// Create a Deployment
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error>;

    /// Replace a Deployment wholesale (PUT), guarded by its resourceVersion
    async fn replace_deployment(
        &self,
        namespace: &str,
        name: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error>;

    /// Write the status subresource, rejected with 409 if `resource_version` is stale
    async fn patch_source_status(
        &self,
        name: &str,
        namespace: &str,
        resource_version: Option<String>,
        status: &ApiServerSourceStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct SourceKubeClientImpl {
    client: Client,
}

impl SourceKubeClientImpl {
    /// Create a new SourceKubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceKubeClient for SourceKubeClientImpl {
    async fn get_addressable(
        &self,
        namespace: &str,
        reference: &KReference,
    ) -> Result<Option<DynamicObject>, Error> {
        let ar = build_api_resource(&reference.api_version, &reference.kind);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        Ok(optional(api.get(&reference.name).await)?)
    }

    async fn create_access_review(
        &self,
        review: &SubjectAccessReview,
    ) -> Result<SubjectAccessReview, Error> {
        // SubjectAccessReviews are cluster-scoped
        let api: Api<SubjectAccessReview> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), review).await?)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(optional(api.get(name).await)?)
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(api.create(&params, deployment).await?)
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        name: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(api.replace(name, &params, deployment).await?)
    }

    async fn patch_source_status(
        &self,
        name: &str,
        namespace: &str,
        resource_version: Option<String>,
        status: &ApiServerSourceStatus,
    ) -> Result<(), Error> {
        patch_resource_status::<ApiServerSource>(
            &self.client,
            name,
            namespace,
            resource_version.as_deref(),
            status,
            FIELD_MANAGER,
        )
        .await?;
        Ok(())
    }
}
