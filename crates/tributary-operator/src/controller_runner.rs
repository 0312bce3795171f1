//! Controller runner - builds the controller futures the binary drives
//!
//! Construction is kept separate from `main` so the adapter environment and
//! settings wiring can be tested without a cluster.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use tributary_apiserver::adapter::{EnvProvider, StaticEnv};
use tributary_apiserver::{error_policy, reconcile, AdapterSettings, SourceContext};
use tributary_common::crd::ApiServerSource;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Environment handed to every receive adapter
pub fn adapter_env(log_filter: Option<&str>, otlp_endpoint: Option<&str>) -> StaticEnv {
    let mut vars = Vec::new();
    if let Some(filter) = log_filter {
        vars.push(("RUST_LOG".to_string(), filter.to_string()));
    }
    if let Some(endpoint) = otlp_endpoint {
        vars.push((
            "OTEL_EXPORTER_OTLP_ENDPOINT".to_string(),
            endpoint.to_string(),
        ));
    }
    StaticEnv(vars)
}

/// Build ApiServerSource controller futures
///
/// The controller also watches the Deployments it owns, so adapter status
/// changes trigger a pass on the owning source.
pub fn build_source_controllers(
    client: Client,
    settings: AdapterSettings,
    env: Arc<dyn EnvProvider>,
) -> Vec<Pin<Box<dyn Future<Output = ()> + Send>>> {
    let ctx = Arc::new(SourceContext::from_client(client.clone(), env, settings));
    let sources: Api<ApiServerSource> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::all(client);

    tracing::info!("- ApiServerSource controller");

    vec![Box::pin(
        Controller::new(sources, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .owns(
                deployments,
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            )
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("ApiServerSource")),
    )]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
