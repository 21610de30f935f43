use k8s_openapi::{
    api::core::v1::{Namespace, Secret},
    ByteString,
};
use kube::{api::ListParams, Api, Client};
use tracing::Level;

use crate::{
    cluster::ClusterIdentity,
    connection::{ConnectionConfig, Credentials},
    error::{IdentityError, Result},
    labels::{secret_keys, CLUSTER_ID_LABEL, REMOTE_IDENTITY_LABEL, TENANT_NAMESPACE_LABEL},
    provider::IdentityProvider,
};

/// Finds the namespace of the local cluster that hosts the resources of a single remote cluster.
#[derive(Clone)]
pub struct TenantNamespaceManager {
    client: Client,
}

impl TenantNamespaceManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Returns the name of the tenant namespace of the remote cluster `cluster_id`.
    ///
    /// Exactly one namespace must carry the tenant labels for the cluster.
    #[tracing::instrument(level = Level::DEBUG, skip(self), ret, err(level = Level::DEBUG))]
    pub async fn get_namespace(&self, cluster_id: &str) -> Result<String> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&format!(
            "{CLUSTER_ID_LABEL}={cluster_id},{TENANT_NAMESPACE_LABEL}=true"
        ));

        let mut namespaces = api.list(&params).await?.items;

        match namespaces.len() {
            0 => Err(IdentityError::TenantNamespaceNotFound(cluster_id.to_string())),
            1 => namespaces
                .pop()
                .and_then(|namespace| namespace.metadata.name)
                .ok_or_else(|| IdentityError::TenantNamespaceNotFound(cluster_id.to_string())),
            count => Err(IdentityError::MultipleTenantNamespaces {
                cluster_id: cluster_id.to_string(),
                count,
            }),
        }
    }
}

/// [`IdentityProvider`] that reads the identities obtained during peering, which are stored as
/// [`Secret`]s in the tenant namespace of each remote cluster.
///
/// When multiple identities are present, the most recently created one is used.
#[derive(Clone)]
pub struct CertificateIdentityReader {
    client: Client,
    namespaces: TenantNamespaceManager,
}

impl CertificateIdentityReader {
    /// `client` must point at the local cluster.
    pub fn new(client: Client) -> Self {
        Self {
            namespaces: TenantNamespaceManager::new(client.clone()),
            client,
        }
    }

    async fn get_secret(&self, cluster_id: &str) -> Result<Secret> {
        let namespace = self.namespaces.get_namespace(cluster_id).await?;

        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let params = ListParams::default().labels(&format!(
            "{CLUSTER_ID_LABEL}={cluster_id},{REMOTE_IDENTITY_LABEL}=true"
        ));

        api.list(&params)
            .await?
            .items
            .into_iter()
            .max_by_key(|secret| {
                secret
                    .metadata
                    .creation_timestamp
                    .as_ref()
                    .map(|time| time.0)
            })
            .ok_or_else(|| IdentityError::IdentityNotFound {
                cluster_id: cluster_id.to_string(),
                namespace,
            })
    }
}

impl IdentityProvider for CertificateIdentityReader {
    #[tracing::instrument(level = Level::DEBUG, skip(self), fields(cluster_id = identity.cluster_id()), err)]
    async fn resolve(
        &self,
        identity: &ClusterIdentity,
        namespace_scope: &str,
    ) -> Result<ConnectionConfig> {
        let secret = self.get_secret(identity.cluster_id()).await?;
        let mut config = connection_config_from_secret(secret)?;

        if !namespace_scope.is_empty() {
            config.namespace = Some(namespace_scope.to_string());
        }

        Ok(config)
    }
}

/// Extracts a [`ConnectionConfig`] from an identity [`Secret`], see [`secret_keys`].
fn connection_config_from_secret(secret: Secret) -> Result<ConnectionConfig> {
    let name = secret.metadata.name.unwrap_or_default();
    let mut data = secret.data.unwrap_or_default();

    let mut take = |key: &str| -> Result<Option<String>> {
        data.remove(key)
            .map(|ByteString(bytes)| {
                String::from_utf8(bytes).map_err(|_| IdentityError::MalformedSecret {
                    secret: name.clone(),
                    reason: format!("`{key}` is not valid UTF-8"),
                })
            })
            .transpose()
    };

    let endpoint = take(secret_keys::API_SERVER_URL)?;
    let certificate_authority = take(secret_keys::API_SERVER_CA)?;
    let certificate = take(secret_keys::CERTIFICATE)?;
    let private_key = take(secret_keys::PRIVATE_KEY)?;
    let token = take(secret_keys::TOKEN)?;
    let namespace = take(secret_keys::NAMESPACE)?;

    let malformed = |reason: &str| IdentityError::MalformedSecret {
        secret: name.clone(),
        reason: reason.to_string(),
    };

    let endpoint = endpoint
        .filter(|endpoint| !endpoint.is_empty())
        .ok_or_else(|| malformed("missing API server URL"))?;

    let credentials = match (certificate, private_key, token) {
        (Some(cert_pem), Some(key_pem), _) => Credentials::Certificate { cert_pem, key_pem },
        (None, None, Some(token)) => Credentials::BearerToken(token),
        (Some(..), None, _) | (None, Some(..), _) => {
            return Err(malformed("certificate and private key must be given together"))
        }
        (None, None, None) => return Err(malformed("no credentials found")),
    };

    Ok(ConnectionConfig {
        endpoint,
        certificate_authority,
        credentials,
        namespace: namespace.filter(|namespace| !namespace.is_empty()),
    })
}
