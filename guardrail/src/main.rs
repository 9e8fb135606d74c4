use std::error::Error as StdError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::Client;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use guardrail::admission::{self, PolicyMutator, TlsFiles};
use guardrail::config::InitializerConfig;
use guardrail::event_source::DEFAULT_ANNOTATION;
use guardrail::{Context, KubeSource, KubeStore, Operator, PendingFilter, Policy};

/// Rewrites workloads, ingresses and services according to per-namespace policy
#[derive(Parser, Debug)]
#[command(name = "guardrail", version, about, long_about = None)]
struct Cli {
    /// Annotation that marks objects for initialization
    #[arg(long, env = "GUARDRAIL_ANNOTATION", default_value = DEFAULT_ANNOTATION)]
    annotation: String,

    /// Only initialize objects carrying the annotation
    #[arg(long, env = "GUARDRAIL_REQUIRE_ANNOTATION")]
    require_annotation: bool,

    /// ConfigMap holding the policy document
    #[arg(long, env = "GUARDRAIL_CONFIGMAP", default_value = "nodeselector-initializer")]
    configmap: String,

    /// Namespace of the policy ConfigMap
    #[arg(long, env = "GUARDRAIL_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Read the policy document from a file instead of the ConfigMap
    #[arg(long, env = "GUARDRAIL_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Field manager recorded on submitted patches
    #[arg(
        long,
        env = "GUARDRAIL_INITIALIZER_NAME",
        default_value = "nodeselector.initializer.kubernetes.io"
    )]
    initializer_name: String,

    /// Number of concurrent reconciliation workers
    #[arg(long, env = "GUARDRAIL_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Also serve the mutating admission webhook on this address
    #[arg(long, env = "GUARDRAIL_WEBHOOK_ADDR")]
    webhook_addr: Option<SocketAddr>,

    /// Webhook TLS certificate
    #[arg(long, env = "GUARDRAIL_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Webhook TLS private key
    #[arg(long, env = "GUARDRAIL_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> guardrail::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let client = Client::try_default().await?;

    let config = match &cli.config_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading policy from file");
            InitializerConfig::from_file(path)?
        }
        None => {
            tracing::info!(configmap = %cli.configmap, namespace = %cli.namespace, "loading policy");
            InitializerConfig::from_configmap(client.clone(), &cli.namespace, &cli.configmap).await?
        }
    };
    let policy = Policy::try_from(config)?;

    let store = KubeStore::new(client.clone(), cli.initializer_name.clone());
    let context = Context::new(store, policy);
    let shutdown = shutdown_signal();

    let webhook = cli.webhook_addr.map(|addr| {
        let tls = match (cli.tls_cert.clone(), cli.tls_key.clone()) {
            (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
            _ => None,
        };
        let handler = Arc::new(PolicyMutator::new(
            context.policy.clone(),
            context.mutators.clone(),
        ));
        tokio::spawn(admission::serve(addr, tls, handler, stopped(shutdown.clone())))
    });

    let filter = PendingFilter {
        required_annotation: cli.require_annotation.then(|| cli.annotation.clone()),
    };

    Operator::new(Arc::new(context))
        .source(KubeSource::<Deployment>::new(client.clone(), filter.clone()))
        .source(KubeSource::<Ingress>::new(client.clone(), filter.clone()))
        .source(KubeSource::<Service>::new(client, filter))
        .workers(cli.workers)
        .run(stopped(shutdown))
        .await?;

    if let Some(webhook) = webhook
        && let Err(err) = webhook.await
    {
        tracing::error!(error = &err as &dyn StdError, "webhook task failed");
    }

    tracing::info!("shut down");
    Ok(())
}

/// Flips to `true` on SIGINT or SIGTERM
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("received shutdown signal");
        let _ = tx.send(true);
    });
    rx
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(error = &err as &dyn StdError, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
