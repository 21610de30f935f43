use kube::config::KubeconfigError;
use liqo_identity::error::IdentityError;
use thiserror::Error;

/// Errors returned from [`RemoteClientRegistry`](crate::RemoteClientRegistry).
///
/// None of these are cached, the next call for the same cluster tries again.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to resolve the identity of cluster `{cluster_id}`: {source}")]
    IdentityUnavailable {
        cluster_id: String,
        #[source]
        source: IdentityError,
    },

    #[error("failed to build a client for cluster `{cluster_id}`: {source}")]
    ClientConstructionFailed {
        cluster_id: String,
        #[source]
        source: ClientFactoryError,
    },

    #[error("request to cluster `{cluster_id}` failed: {source}")]
    RemoteRequestFailed {
        cluster_id: String,
        #[source]
        source: kube::Error,
    },
}

/// Errors that can occur when a [`RemoteClientFactory`](crate::RemoteClientFactory) turns a
/// [`ConnectionConfig`](liqo_identity::ConnectionConfig) into a client.
#[derive(Debug, Error)]
pub enum ClientFactoryError {
    #[error("failed to render kubeconfig: {0}")]
    Render(#[from] serde_json::Error),

    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("Kube failed: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}
