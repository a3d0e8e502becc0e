//! ambassador-shim - Mapping controller for legacy Ambassador annotations

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use ambassador_shim::config::ControllerConfig;
use ambassador_shim::controller::{error_policy, reconcile, Context};
use ambassador_shim::crd::Mapping;
use ambassador_shim::telemetry::{init_tracing, LogFormat};
use ambassador_shim::DEFAULT_FIELD_MANAGER;

/// Watch timeout passed to the API server, kept under the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// ambassador-shim - keeps one annotated placeholder Service per Mapping
#[derive(Parser, Debug)]
#[command(name = "ambassador-shim", version, about, long_about = None)]
struct Cli {
    /// Print the Mapping CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Install or update the Mapping CRD on startup
    #[arg(long, env = "AMBASSADOR_SHIM_INSTALL_CRD")]
    install_crd: bool,

    /// Only watch Mappings in this namespace (default: all namespaces)
    #[arg(long, env = "AMBASSADOR_SHIM_NAMESPACE")]
    namespace: Option<String>,

    /// Field manager recorded on writes
    #[arg(long, env = "AMBASSADOR_SHIM_FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER)]
    field_manager: String,

    /// Seconds between periodic re-checks of a reconciled Mapping
    #[arg(long, env = "AMBASSADOR_SHIM_RESYNC_INTERVAL_SECS", default_value = "300")]
    resync_interval_secs: u64,

    /// Seconds to wait before retrying a failed reconcile
    #[arg(long, env = "AMBASSADOR_SHIM_ERROR_BACKOFF_SECS", default_value = "5")]
    error_backoff_secs: u64,

    /// Seconds to wait before retrying after a write conflict
    #[arg(long, env = "AMBASSADOR_SHIM_CONFLICT_BACKOFF_SECS", default_value = "1")]
    conflict_backoff_secs: u64,

    /// Log output format: text or json
    #[arg(long, env = "AMBASSADOR_SHIM_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

impl Cli {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            field_manager: self.field_manager.clone(),
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
            conflict_backoff: Duration::from_secs(self.conflict_backoff_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Mapping::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_tracing(cli.log_format)?;

    run_controller(cli).await
}

/// Ensure the Mapping CRD is installed
///
/// Uses server-side apply so the installed schema always matches this binary.
async fn ensure_crd_installed(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();

    tracing::info!("Installing Mapping CRD...");
    crds.patch(
        "mappings.ambassadorshim.admiralty.io",
        &params,
        &Patch::Apply(&Mapping::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Mapping CRD: {}", e))?;

    Ok(())
}

/// Run the Mapping controller until shutdown
async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("ambassador-shim controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let config = cli.controller_config();

    if cli.install_crd {
        ensure_crd_installed(&client, &config.field_manager).await?;
    }

    let (mappings, services): (Api<Mapping>, Api<Service>) = match cli.namespace.as_deref() {
        Some(ns) => {
            tracing::info!(namespace = %ns, "Watching a single namespace");
            (
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
            )
        }
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    let shutdown = CancellationToken::new();
    let ctx = Arc::new(
        Context::builder(client)
            .config(config)
            .shutdown(shutdown.clone())
            .build(),
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, cancelling in-flight reconciles");
            signal_token.cancel();
        }
    });

    let watcher_config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    Controller::new(mappings, watcher_config.clone())
        .owns(services, watcher_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    tracing::debug!(mapping = %object.name, ?action, "Mapping reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Mapping reconciliation error");
                }
            }
        })
        .await;

    shutdown.cancel();
    tracing::info!("ambassador-shim controller shutting down");
    Ok(())
}
