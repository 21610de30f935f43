//! Well-known labels and secret keys used to find remote identities in the local cluster.

/// Set on tenant namespaces and identity secrets, holds the remote `ClusterID`.
pub const CLUSTER_ID_LABEL: &str = "discovery.liqo.io/cluster-id";

/// Set to `true` on the namespace hosting resources of a single remote cluster.
pub const TENANT_NAMESPACE_LABEL: &str = "discovery.liqo.io/tenant-namespace";

/// Set to `true` on secrets holding an identity for a remote API server.
pub const REMOTE_IDENTITY_LABEL: &str = "liqo.io/remote-identity";

/// Set on pods reflected into a remote cluster, holds the `ClusterID` of the originating cluster.
pub const ORIGIN_CLUSTER_ID_LABEL: &str = "liqo.io/origin-cluster-id";

/// Keys of the identity secret data.
pub mod secret_keys {
    pub const API_SERVER_URL: &str = "apiServerUrl";
    pub const API_SERVER_CA: &str = "apiServerCA";
    pub const CERTIFICATE: &str = "certificate";
    pub const PRIVATE_KEY: &str = "privateKey";
    pub const TOKEN: &str = "token";
    pub const NAMESPACE: &str = "namespace";
}
