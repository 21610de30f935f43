use std::future::Future;

use crate::{cluster::ClusterIdentity, connection::ConnectionConfig, error::IdentityError};

/// Turns a [`ClusterIdentity`] into credentials for the remote cluster's API server.
///
/// Implementations are expected to handle certificate issuance and renewal on their own. Callers
/// treat this as a (possibly slow) pure function: it can be called repeatedly and concurrently,
/// also for different identities.
pub trait IdentityProvider: Send + Sync {
    /// Resolves the [`ConnectionConfig`] for the given `identity`.
    ///
    /// An empty `namespace_scope` asks for a cluster-scoped credential.
    fn resolve(
        &self,
        identity: &ClusterIdentity,
        namespace_scope: &str,
    ) -> impl Future<Output = Result<ConnectionConfig, IdentityError>> + Send;
}
