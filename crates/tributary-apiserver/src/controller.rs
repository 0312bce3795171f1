//! ApiServerSource controller implementation
//!
//! One reconcile pass runs the stages in order:
//!
//! 1. Resolve the sink
//! 2. Check the service account's access to every selected resource
//! 3. Create or converge the receive adapter Deployment, only if 1 and 2 succeeded
//! 4. Fold the verdicts into the status and persist it
//!
//! Sink and access checks always both run, so a single pass reports every
//! problem it can see. A verdict failure becomes a condition and a Warning
//! event; a transport failure stops the pass early but the status gathered
//! so far is still written.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use tributary_common::events::{actions, reasons as event_reasons};
use tributary_common::metrics::record_reconcile;
use tributary_common::{
    EventPublisher, KubeEventPublisher, DEFAULT_CLUSTER_DOMAIN, DEFAULT_SYSTEM_NAMESPACE,
};

use crate::adapter::{self, AdapterArgs, EnvProvider};
use crate::client::{SourceKubeClient, SourceKubeClientImpl};
use crate::crd::{ApiServerSource, ApiServerSourceStatus};
use crate::status::{fold, reasons, PassResults, Verdict};
use crate::workload::{self, WorkloadAction};
use crate::{permissions, sink, Error};

/// Requeue interval after a successful pass
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);
/// Requeue interval after a retryable failure
pub const RETRY_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// Controller context
// =============================================================================

/// Settings for the receive adapters this controller deploys
#[derive(Clone, Debug)]
pub struct AdapterSettings {
    /// Receive adapter image
    pub image: String,
    /// Namespace the controller runs in, passed to every adapter
    pub system_namespace: String,
    /// Cluster DNS domain used to address Service sinks
    pub cluster_domain: String,
}

impl AdapterSettings {
    /// Settings with default namespace and cluster domain
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_string(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
        }
    }
}

/// Controller context shared across all reconcile passes
pub struct SourceContext {
    /// Kubernetes client for API operations
    pub kube: Arc<dyn SourceKubeClient>,
    /// Event publisher for emitting Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Extra environment for every adapter
    pub env: Arc<dyn EnvProvider>,
    /// Adapter image and addressing settings
    pub settings: AdapterSettings,
}

impl SourceContext {
    /// Create a new SourceContext with the given dependencies
    pub fn new(
        kube: Arc<dyn SourceKubeClient>,
        events: Arc<dyn EventPublisher>,
        env: Arc<dyn EnvProvider>,
        settings: AdapterSettings,
    ) -> Self {
        Self {
            kube,
            events,
            env,
            settings,
        }
    }

    /// Create a SourceContext backed by a real cluster client
    pub fn from_client(
        client: Client,
        env: Arc<dyn EnvProvider>,
        settings: AdapterSettings,
    ) -> Self {
        let events = Arc::new(KubeEventPublisher::new(
            client.clone(),
            adapter::CONTROLLER_AGENT_NAME,
        ));
        Self {
            kube: Arc::new(SourceKubeClientImpl::new(client)),
            events,
            env,
            settings,
        }
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn SourceKubeClient>) -> Self {
        Self {
            kube,
            events: Arc::new(tributary_common::NoopEventPublisher),
            env: Arc::new(adapter::StaticEnv::default()),
            settings: AdapterSettings::new("adapter:latest"),
        }
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconcile an ApiServerSource
///
/// Returns a periodic resync on success. Failures are returned after the
/// status has been written so the error policy can schedule a retry.
#[instrument(
    skip(source, ctx),
    fields(source = %source.name_any(), namespace = %source.namespace().unwrap_or_default())
)]
pub async fn reconcile(
    source: Arc<ApiServerSource>,
    ctx: Arc<SourceContext>,
) -> Result<Action, Error> {
    let started = Instant::now();
    let result = reconcile_pass(&source, &ctx).await;
    record_reconcile(
        started.elapsed().as_secs_f64(),
        result.as_ref().err().map(Error::metric_reason),
    );
    result.map(|()| Action::requeue(RESYNC_INTERVAL))
}

/// Error policy for the ApiServerSource controller
///
/// Retryable errors requeue after [`RETRY_INTERVAL`]; the rest wait for the
/// object to change.
pub fn error_policy(
    source: Arc<ApiServerSource>,
    error: &Error,
    _ctx: Arc<SourceContext>,
) -> Action {
    error!(
        ?error,
        source = %source.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(RETRY_INTERVAL)
    } else {
        Action::await_change()
    }
}

/// Everything one pass needs to know about the source
struct Pass<'a> {
    source: &'a ApiServerSource,
    ctx: &'a SourceContext,
    name: String,
    namespace: String,
    object_ref: ObjectReference,
    results: PassResults,
}

impl Pass<'_> {
    async fn warn_event(&self, action: &str, error: &Error) {
        self.ctx
            .events
            .publish(
                &self.object_ref,
                EventType::Warning,
                event_reasons::INTERNAL_ERROR,
                action,
                Some(error.to_string()),
            )
            .await;
    }

    /// Record a verdict failure, or hand back a transport failure
    async fn verdict_or_abort(
        &self,
        error: Error,
        action: &str,
    ) -> Result<(Verdict, Error), Error> {
        match error.reason() {
            Some(reason) => {
                warn!(%error, "{} failed", action);
                self.warn_event(action, &error).await;
                Ok((Verdict::failed(reason, error.to_string()), error))
            }
            None => Err(error),
        }
    }

    async fn resolve_sink(&mut self) -> Result<Option<Error>, Error> {
        let result = sink::resolve(
            self.ctx.kube.as_ref(),
            &self.namespace,
            &self.source.spec.sink,
            &self.ctx.settings.cluster_domain,
        )
        .await;
        match result {
            Ok(uri) => {
                debug!(sink_uri = %uri, "sink resolved");
                self.results.sink = Some(Verdict::ok(reasons::SINK_RESOLVED));
                self.results.sink_uri = Some(uri);
                Ok(None)
            }
            Err(e) => {
                let (verdict, error) = self.verdict_or_abort(e, actions::RESOLVE_SINK).await?;
                self.results.sink = Some(verdict);
                Ok(Some(error))
            }
        }
    }

    async fn check_permissions(&mut self) -> Result<Option<Error>, Error> {
        let check = permissions::check_all(
            self.ctx.kube.as_ref(),
            &self.namespace,
            self.source.spec.service_account(),
            &self.source.spec.resources,
        )
        .await?;
        match check.into_result() {
            Ok(()) => {
                self.results.permissions = Some(Verdict::ok(reasons::PERMISSIONS_GRANTED));
                Ok(None)
            }
            Err(e) => {
                let (verdict, error) =
                    self.verdict_or_abort(e, actions::CHECK_PERMISSIONS).await?;
                self.results.permissions = Some(verdict);
                Ok(Some(error))
            }
        }
    }

    async fn reconcile_workload(&mut self, sink_uri: &str) -> Result<(), Error> {
        let result = self.converge_workload(sink_uri).await;
        match result {
            Ok(readiness) => {
                self.results.workload = Some(readiness);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "receive adapter reconcile failed");
                self.warn_event(actions::DEPLOY, &e).await;
                self.results.workload = Some(Verdict::failed(
                    e.reason().unwrap_or(reasons::DEPLOYMENT_FAILED),
                    e.to_string(),
                ));
                Err(e)
            }
        }
    }

    async fn converge_workload(&self, sink_uri: &str) -> Result<Verdict, Error> {
        let uid = self
            .source
            .uid()
            .ok_or_else(|| Error::internal_with_context("reconciler", "source has no uid"))?;
        let desired = adapter::build(&AdapterArgs {
            image: &self.ctx.settings.image,
            source: self.source,
            labels: adapter::labels(&self.name),
            sink_uri,
            system_namespace: &self.ctx.settings.system_namespace,
            env: self.ctx.env.as_ref(),
        })?;

        let outcome = workload::reconcile(self.ctx.kube.as_ref(), &desired, &uid).await?;
        if outcome.action == WorkloadAction::Updated {
            let deployment = outcome.deployment.name_any();
            self.ctx
                .events
                .publish(
                    &self.object_ref,
                    EventType::Normal,
                    event_reasons::DEPLOYMENT_UPDATED,
                    actions::DEPLOY,
                    Some(format!("Deployment {deployment:?} updated")),
                )
                .await;
        }
        Ok(outcome.readiness)
    }

    /// Run the stages, returning the first stage error
    async fn run_stages(&mut self) -> Result<(), Error> {
        let sink_error = self.resolve_sink().await?;
        let permission_error = self.check_permissions().await?;

        if let Some(error) = sink_error.or(permission_error) {
            return Err(error);
        }

        let sink_uri = self.results.sink_uri.clone().unwrap_or_default();
        self.reconcile_workload(&sink_uri).await
    }

    fn next_status(&self) -> ApiServerSourceStatus {
        fold(
            self.source.status.as_ref(),
            &self.source.spec.resources,
            self.source.metadata.generation,
            &self.results,
            Utc::now(),
        )
    }
}

async fn reconcile_pass(source: &ApiServerSource, ctx: &SourceContext) -> Result<(), Error> {
    let name = source.name_any();
    let namespace = source
        .namespace()
        .ok_or_else(|| Error::internal_with_context("reconciler", "source has no namespace"))?;
    info!("reconciling apiserversource");

    let mut pass = Pass {
        source,
        ctx,
        name,
        namespace,
        object_ref: source.object_ref(&()),
        results: PassResults::default(),
    };

    let outcome = pass.run_stages().await;
    let status = pass.next_status();

    match outcome {
        Ok(()) => {
            persist_status(source, ctx, &status).await?;
            let note = format!("ApiServerSource reconciled: \"{}/{}\"", pass.namespace, pass.name);
            ctx.events
                .publish(
                    &pass.object_ref,
                    EventType::Normal,
                    event_reasons::SOURCE_RECONCILED,
                    actions::RECONCILE,
                    Some(note),
                )
                .await;
            info!(ready = status.is_ready(), "apiserversource reconciled");
            Ok(())
        }
        Err(stage_error) => {
            if let Err(e) = persist_status(source, ctx, &status).await {
                warn!(error = %e, "failed to persist status after stage failure");
            }
            Err(stage_error)
        }
    }
}

/// Write the status if it differs from what the source already carries.
///
/// The write is guarded by the resourceVersion the pass started from.
async fn persist_status(
    source: &ApiServerSource,
    ctx: &SourceContext,
    status: &ApiServerSourceStatus,
) -> Result<(), Error> {
    if source.status.as_ref() == Some(status) {
        debug!("status unchanged, skipping update");
        return Ok(());
    }

    ctx.kube
        .patch_source_status(
            &source.name_any(),
            &source.namespace().unwrap_or_default(),
            source.resource_version(),
            status,
        )
        .await
}

// =============================================================================
// Tests
// =============================================================================
