use std::time::Duration;

use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use liqo_identity::{ClusterIdentity, ConnectionConfig};
use tracing::Level;

use crate::error::ClientFactoryError;

/// Builds the client for a single remote cluster out of its [`ConnectionConfig`].
///
/// The config is taken by value and dropped once the client is built.
#[async_trait::async_trait]
pub trait RemoteClientFactory: Send + Sync {
    type Client: Send + Sync + 'static;

    async fn build(
        &self,
        identity: &ClusterIdentity,
        config: ConnectionConfig,
    ) -> Result<Self::Client, ClientFactoryError>;
}

/// Default [`RemoteClientFactory`], produces [`kube::Client`]s.
#[derive(Clone, Debug)]
pub struct KubeClientFactory {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl KubeClientFactory {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    /// Renders `config` as a [`Config`], without building the client yet.
    async fn kube_config(
        &self,
        identity: &ClusterIdentity,
        config: ConnectionConfig,
    ) -> Result<Config, ClientFactoryError> {
        let kubeconfig: Kubeconfig = config.into_kubeconfig(identity.cluster_id())?;

        let mut config =
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);

        Ok(config)
    }
}

impl Default for KubeClientFactory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CONNECT_TIMEOUT, Self::DEFAULT_READ_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl RemoteClientFactory for KubeClientFactory {
    type Client = Client;

    #[tracing::instrument(level = Level::DEBUG, skip(self, config), fields(cluster_id = identity.cluster_id()), err)]
    async fn build(
        &self,
        identity: &ClusterIdentity,
        config: ConnectionConfig,
    ) -> Result<Client, ClientFactoryError> {
        let config = self.kube_config(identity, config).await?;

        Ok(Client::try_from(config)?)
    }
}
