//! Tributary controller - turns ApiServerSources into running receive adapters

mod controller_runner;

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use kube::{Api, Client, CustomResourceExt};

use tributary_apiserver::AdapterSettings;
use tributary_common::crd::ApiServerSource;
use tributary_common::telemetry::{init_telemetry, TelemetryConfig};
use tributary_common::{DEFAULT_CLUSTER_DOMAIN, DEFAULT_SYSTEM_NAMESPACE, FIELD_MANAGER};

use controller_runner::{adapter_env, build_source_controllers};

/// Tributary - Kubernetes API server event sources
#[derive(Parser, Debug)]
#[command(name = "tributary", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller(ControllerArgs),
}

#[derive(Args, Debug, Clone)]
struct ControllerArgs {
    /// Receive adapter image
    #[arg(long, env = "TRIBUTARY_ADAPTER_IMAGE")]
    adapter_image: String,

    /// Namespace the controller runs in
    #[arg(long, env = "SYSTEM_NAMESPACE", default_value = DEFAULT_SYSTEM_NAMESPACE)]
    system_namespace: String,

    /// Cluster DNS domain for Service sinks
    #[arg(long, env = "CLUSTER_DOMAIN", default_value = DEFAULT_CLUSTER_DOMAIN)]
    cluster_domain: String,

    /// RUST_LOG value for receive adapters
    #[arg(long, env = "TRIBUTARY_ADAPTER_LOG_FILTER")]
    adapter_log_filter: Option<String>,

    /// Emit human-readable logs instead of JSON
    #[arg(long)]
    text_logs: bool,
}

impl ControllerArgs {
    fn settings(&self) -> AdapterSettings {
        AdapterSettings {
            image: self.adapter_image.clone(),
            system_namespace: self.system_namespace.clone(),
            cluster_domain: self.cluster_domain.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - FIPS-capable aws-lc-rs
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&ApiServerSource::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let args = match cli.command {
        Some(Commands::Controller(args)) => args,
        None => match Cli::parse_from(["tributary", "controller"]).command {
            Some(Commands::Controller(args)) => args,
            None => anyhow::bail!("controller arguments are required"),
        },
    };
    run_controller(args).await
}

/// Install the ApiServerSource CRD with server-side apply
///
/// The controller installs its own CRD on startup so the schema always
/// matches the running version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing ApiServerSource CRD...");
    crds.patch(
        "apiserversources.sources.tributary.dev",
        &params,
        &Patch::Apply(&ApiServerSource::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install ApiServerSource CRD: {}", e))?;

    Ok(())
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let telemetry = TelemetryConfig {
        service_name: "tributary-controller".to_string(),
        json_logs: !args.text_logs,
        ..Default::default()
    };
    let otlp_endpoint = telemetry.otlp_endpoint.clone();
    init_telemetry(telemetry)?;

    tracing::info!(
        image = %args.adapter_image,
        system_namespace = %args.system_namespace,
        "Starting Tributary controller"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let env = Arc::new(adapter_env(
        args.adapter_log_filter.as_deref(),
        otlp_endpoint.as_deref(),
    ));

    tracing::info!("Starting controllers:");
    let controllers = build_source_controllers(client, args.settings(), env);
    futures::future::join_all(controllers).await;

    tracing::info!("Tributary controller shutting down");
    Ok(())
}
