use thiserror::Error;

pub type Result<T, E = IdentityError> = std::result::Result<T, E>;

/// Errors that can occur when resolving the identity of a remote cluster.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("cluster identity must have a non-empty cluster ID")]
    EmptyClusterId,

    #[error("no tenant namespace found for cluster `{0}`")]
    TenantNamespaceNotFound(String),

    #[error("found {count} tenant namespaces for cluster `{cluster_id}`, expected exactly one")]
    MultipleTenantNamespaces { cluster_id: String, count: usize },

    #[error("no identity for cluster `{cluster_id}` found in namespace `{namespace}`")]
    IdentityNotFound {
        cluster_id: String,
        namespace: String,
    },

    #[error("identity secret `{secret}` is malformed: {reason}")]
    MalformedSecret { secret: String, reason: String },

    #[error("Kube failed: {0}")]
    KubeError(#[from] kube::Error),
}
