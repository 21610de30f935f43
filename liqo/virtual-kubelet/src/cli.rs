#![deny(missing_docs)]

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

use crate::error::VirtualKubeletError;

/// Virtual kubelet of a single foreign cluster, exposing the node API for the pods offloaded to it.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Port of the secured pod listener.
    #[arg(long, default_value_t = 10250, env = "LIQO_LISTEN_PORT")]
    pub listen_port: u16,

    /// Address of the plaintext metrics listener.
    ///
    /// An empty value disables the listener.
    #[arg(long, default_value = "0.0.0.0:10255", env = "LIQO_METRICS_ADDRESS")]
    pub metrics_addr: String,

    /// Cluster ID of the local (home) cluster.
    #[arg(long, env = "LIQO_HOME_CLUSTER_ID")]
    pub home_cluster_id: String,

    /// Name of the local (home) cluster.
    #[arg(long, default_value = "", env = "LIQO_HOME_CLUSTER_NAME")]
    pub home_cluster_name: String,

    /// Cluster ID of the foreign cluster backing this virtual node.
    #[arg(long, env = "LIQO_FOREIGN_CLUSTER_ID")]
    pub foreign_cluster_id: String,

    /// Name of the foreign cluster backing this virtual node.
    #[arg(long, default_value = "", env = "LIQO_FOREIGN_CLUSTER_NAME")]
    pub foreign_cluster_name: String,

    /// Kubeconfig of the local cluster. When not given, the in-cluster config (or the default
    /// kubeconfig) is used.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
}

impl Args {
    /// Parses [`Args::metrics_addr`], [`None`] when the metrics listener is disabled.
    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>, VirtualKubeletError> {
        let addr = self.metrics_addr.trim();

        if addr.is_empty() {
            return Ok(None);
        }

        addr.parse()
            .map(Some)
            .map_err(|error| VirtualKubeletError::MetricsAddr {
                addr: addr.to_owned(),
                error,
            })
    }
}

/// Parses the command line arguments.
pub fn parse_args() -> Args {
    Args::parse()
}
