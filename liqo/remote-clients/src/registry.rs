use std::sync::Arc;

use dashmap::DashMap;
use liqo_identity::{ClusterIdentity, IdentityProvider};
use tokio::sync::OnceCell;
use tracing::Level;

use crate::{error::RegistryError, factory::RemoteClientFactory};

type Slot<C> = Arc<OnceCell<Arc<C>>>;

/// Lazily built, never evicted, map of cluster ID to authenticated client.
///
/// # Concurrency
///
/// The map is only locked to fetch (or insert) the slot of a cluster. Identity resolution and
/// client construction run inside that slot's [`OnceCell`], so:
///
/// 1. concurrent callers for the same cluster share a single construction, and all get the same
///    client;
/// 2. a slow construction for one cluster never blocks callers for other clusters;
/// 3. a failed construction leaves the slot empty, so the next caller tries again.
pub struct RemoteClientRegistry<P, F: RemoteClientFactory> {
    provider: P,
    factory: F,
    clients: DashMap<String, Slot<F::Client>>,
}

impl<P, F> RemoteClientRegistry<P, F>
where
    P: IdentityProvider,
    F: RemoteClientFactory,
{
    pub fn new(provider: P, factory: F) -> Self {
        Self {
            provider,
            factory,
            clients: Default::default(),
        }
    }

    /// Returns the client for the given remote cluster, building it first if needed.
    ///
    /// Credentials are resolved with an empty namespace scope, so the built client is
    /// cluster-scoped.
    #[tracing::instrument(
        level = Level::DEBUG,
        skip(self),
        fields(cluster_id = identity.cluster_id()),
        err(level = Level::WARN)
    )]
    pub async fn get_or_create_client(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<Arc<F::Client>, RegistryError> {
        if let Some(client) = self.cached(identity.cluster_id()) {
            return Ok(client);
        }

        let slot = self
            .clients
            .entry(identity.cluster_id().to_owned())
            .or_default()
            .clone();

        slot.get_or_try_init(|| self.build_client(identity))
            .await
            .map(Arc::clone)
    }

    async fn build_client(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<Arc<F::Client>, RegistryError> {
        let cluster_id = identity.cluster_id();

        let config = self.provider.resolve(identity, "").await.map_err(|source| {
            RegistryError::IdentityUnavailable {
                cluster_id: cluster_id.to_owned(),
                source,
            }
        })?;

        let client = self.factory.build(identity, config).await.map_err(|source| {
            RegistryError::ClientConstructionFailed {
                cluster_id: cluster_id.to_owned(),
                source,
            }
        })?;

        tracing::info!(%identity, "Built client for remote cluster.");

        Ok(Arc::new(client))
    }

    /// Returns the client for the given cluster ID, if one was already built.
    pub fn cached(&self, cluster_id: &str) -> Option<Arc<F::Client>> {
        self.clients
            .get(cluster_id)
            .and_then(|slot| slot.get().cloned())
    }

    /// Number of clients built so far.
    pub fn len(&self) -> usize {
        self.clients
            .iter()
            .filter(|slot| slot.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
