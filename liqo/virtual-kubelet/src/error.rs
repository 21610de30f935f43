use std::net::AddrParseError;

use kube::config::{InferConfigError, KubeconfigError};
use liqo_identity::error::IdentityError;
use liqo_node_api::error::{ConfigError, NodeApiError};
use thiserror::Error;

pub type Result<T, E = VirtualKubeletError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum VirtualKubeletError {
    #[error("invalid metrics address `{addr}`: {error}")]
    MetricsAddr {
        addr: String,
        #[source]
        error: AddrParseError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("failed to read the local kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("failed to infer the local cluster config: {0}")]
    InferConfig(#[from] InferConfigError),

    #[error("Kube failed: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    NodeApi(#[from] NodeApiError),

    #[error("failed to set up signal handlers: {0}")]
    Signal(#[source] std::io::Error),
}
