#![deny(unused_crate_dependencies)]

use std::{path::Path, sync::Arc};

use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use liqo_identity::{CertificateIdentityReader, ClusterIdentity};
use liqo_node_api::{env::envs, setup_http_server, ApiServerConfig, NodeProvider};
use liqo_remote_clients::{KubeClientFactory, RemoteClientRegistry};
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt::format::FmtSpan, prelude::*};

use crate::{
    cli::Args,
    error::{Result, VirtualKubeletError},
    provider::RemoteClusterProvider,
};

mod cli;
mod error;
mod provider;

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider())
        .expect("Failed to install crypto provider");

    init_tracing();

    tracing::debug!(
        "Initializing liqo-virtual-kubelet, version {}.",
        env!("CARGO_PKG_VERSION")
    );

    let result = run(cli::parse_args()).await;

    match &result {
        Ok(()) => tracing::info!("Virtual kubelet stopped."),
        Err(error) => tracing::error!(%error, "Virtual kubelet failed."),
    }

    result
}

fn init_tracing() {
    if envs::JSON_LOG.is_set() {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .json(),
            )
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .pretty()
                    .with_line_number(true),
            )
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }
}

async fn run(args: Args) -> Result<()> {
    let config = ApiServerConfig::from_env(args.listen_port, args.metrics_addr()?)?;

    let home = ClusterIdentity::new(args.home_cluster_id, args.home_cluster_name)?;
    let foreign = ClusterIdentity::new(args.foreign_cluster_id, args.foreign_cluster_name)?;

    let local = local_client(args.kubeconfig.as_deref()).await?;
    let registry = Arc::new(RemoteClientRegistry::new(
        CertificateIdentityReader::new(local),
        KubeClientFactory::default(),
    ));

    tracing::info!(%home, %foreign, "Starting virtual kubelet.");

    let provider = RemoteClusterProvider::new(registry, foreign, &home);

    let cancellation = CancellationToken::new();
    let handle = setup_http_server(
        cancellation.clone(),
        NodeProvider::basic(provider),
        &config,
    )
    .await?;

    wait_for_shutdown_signal().await?;

    cancellation.cancel();
    handle.closed().await;

    Ok(())
}

/// Client of the local cluster, read from `kubeconfig` or inferred from the environment.
async fn local_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => Config::infer().await?,
    };

    Ok(Client::try_from(config)?)
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm =
        tokio::signal::unix::signal(SignalKind::terminate()).map_err(VirtualKubeletError::Signal)?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down."),

        result = tokio::signal::ctrl_c() => {
            result.map_err(VirtualKubeletError::Signal)?;
            tracing::info!("SIGINT received, shutting down.");
        }
    }

    Ok(())
}
