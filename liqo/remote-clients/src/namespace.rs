use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client,
};
use liqo_identity::{ClusterIdentity, IdentityProvider};
use tracing::Level;

use crate::{error::RegistryError, factory::RemoteClientFactory, registry::RemoteClientRegistry};

/// Makes sure that the namespace `name` exists in the given remote cluster.
///
/// The client is taken from the `registry` on each call, and an already existing namespace counts
/// as success.
#[tracing::instrument(
    level = Level::DEBUG,
    skip(registry),
    fields(cluster_id = identity.cluster_id()),
    err(level = Level::WARN)
)]
pub async fn ensure_remote_namespace<P, F>(
    registry: &RemoteClientRegistry<P, F>,
    identity: &ClusterIdentity,
    name: &str,
) -> Result<(), RegistryError>
where
    P: IdentityProvider,
    F: RemoteClientFactory<Client = Client>,
{
    let client = registry.get_or_create_client(identity).await?;
    let api: Api<Namespace> = Api::all(Client::clone(&client));

    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            ..Default::default()
        },
        ..Default::default()
    };

    match api.create(&PostParams::default(), &namespace).await {
        Ok(..) => {
            tracing::info!(name, "Created namespace in remote cluster.");
            Ok(())
        }
        Err(kube::Error::Api(response)) if response.code == 409 => {
            tracing::debug!(name, "Namespace already exists in remote cluster.");
            Ok(())
        }
        Err(source) => Err(RegistryError::RemoteRequestFailed {
            cluster_id: identity.cluster_id().to_owned(),
            source,
        }),
    }
}
