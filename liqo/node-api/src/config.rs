use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use crate::{
    env::{
        checked_env::{CheckedEnv, EnvRepr},
        envs,
    },
    error::ConfigError,
};

/// Configuration of the node API server, read once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiServerConfig {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// When set, the secured listener requires client certificates issued by these CAs.
    pub client_ca_path: Option<PathBuf>,
    pub listen_addr: SocketAddr,
    /// [`None`] disables the metrics listener.
    pub metrics_addr: Option<SocketAddr>,
}

impl ApiServerConfig {
    /// Reads TLS material locations from [`envs`].
    ///
    /// The secured listener binds all interfaces on `listen_port`.
    pub fn from_env(
        listen_port: u16,
        metrics_addr: Option<SocketAddr>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            cert_path: read(envs::CERT_LOCATION)?,
            key_path: read(envs::KEY_LOCATION)?,
            client_ca_path: read(envs::CLIENT_CA_LOCATION)?,
            listen_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), listen_port),
            metrics_addr,
        })
    }

    /// Certificate chain and key paths, if both are set.
    pub fn tls_material(&self) -> Option<(&Path, &Path)> {
        self.cert_path.as_deref().zip(self.key_path.as_deref())
    }
}

fn read<R>(env: CheckedEnv<R>) -> Result<Option<R::Value>, ConfigError>
where
    R: EnvRepr,
    R::FromReprError: std::fmt::Display,
{
    let name = env.name;

    env.try_from_env().map_err(|error| ConfigError::InvalidEnv {
        name,
        reason: error.to_string(),
    })
}
