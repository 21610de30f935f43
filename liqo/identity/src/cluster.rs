use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Stable identifier and display name of a remote cluster.
///
/// Only [`ClusterIdentity::cluster_id`] identifies the cluster, the name is metadata.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawClusterIdentity")]
pub struct ClusterIdentity {
    #[serde(rename = "clusterID")]
    cluster_id: String,
    #[serde(rename = "clusterName")]
    cluster_name: String,
}

impl ClusterIdentity {
    /// Fails with [`IdentityError::EmptyClusterId`] if `cluster_id` is empty.
    pub fn new<I, N>(cluster_id: I, cluster_name: N) -> Result<Self, IdentityError>
    where
        I: Into<String>,
        N: Into<String>,
    {
        let cluster_id = cluster_id.into();

        if cluster_id.is_empty() {
            return Err(IdentityError::EmptyClusterId);
        }

        Ok(Self {
            cluster_id,
            cluster_name: cluster_name.into(),
        })
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cluster_name.is_empty() {
            f.write_str(&self.cluster_id)
        } else {
            write!(f, "{} ({})", self.cluster_name, self.cluster_id)
        }
    }
}

#[derive(Deserialize)]
struct RawClusterIdentity {
    #[serde(rename = "clusterID")]
    cluster_id: String,
    #[serde(rename = "clusterName", default)]
    cluster_name: String,
}

impl TryFrom<RawClusterIdentity> for ClusterIdentity {
    type Error = IdentityError;

    fn try_from(raw: RawClusterIdentity) -> Result<Self, Self::Error> {
        Self::new(raw.cluster_id, raw.cluster_name)
    }
}
