use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use kube::config::Kubeconfig;
use serde_json::{json, Map, Value};

/// Credentials presented to a remote API server.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// PEM-encoded client certificate and private key.
    Certificate { cert_pem: String, key_pem: String },
    BearerToken(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Certificate { .. } => f.write_str("Certificate(<redacted>)"),
            Self::BearerToken(..) => f.write_str("BearerToken(<redacted>)"),
        }
    }
}

/// Everything needed to build a client for one remote API server.
///
/// Meant to be consumed exactly once, see [`ConnectionConfig::into_kubeconfig`], so that the
/// credentials do not outlive the client construction.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// URL of the remote API server.
    pub endpoint: String,
    /// PEM-encoded CA bundle used to verify the remote API server. When [`None`], the client
    /// falls back to its default trust roots.
    pub certificate_authority: Option<String>,
    pub credentials: Credentials,
    /// Default namespace of the built client, [`None`] for a cluster-scoped credential.
    pub namespace: Option<String>,
}

impl ConnectionConfig {
    /// Renders this config as a [`Kubeconfig`] with a single cluster, user and context, all named
    /// `context_name`. The context is also the current one.
    pub fn into_kubeconfig(self, context_name: &str) -> Result<Kubeconfig, serde_json::Error> {
        let mut cluster = Map::new();
        cluster.insert("server".into(), self.endpoint.into());
        if let Some(ca) = self.certificate_authority {
            cluster.insert(
                "certificate-authority-data".into(),
                STANDARD.encode(ca).into(),
            );
        }

        let user = match self.credentials {
            Credentials::Certificate { cert_pem, key_pem } => json!({
                "client-certificate-data": STANDARD.encode(cert_pem),
                "client-key-data": STANDARD.encode(key_pem),
            }),
            Credentials::BearerToken(token) => json!({ "token": token }),
        };

        let mut context = Map::new();
        context.insert("cluster".into(), context_name.into());
        context.insert("user".into(), context_name.into());
        if let Some(namespace) = self.namespace {
            context.insert("namespace".into(), namespace.into());
        }

        let kubeconfig = json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{ "name": context_name, "cluster": Value::Object(cluster) }],
            "users": [{ "name": context_name, "user": user }],
            "contexts": [{ "name": context_name, "context": Value::Object(context) }],
            "current-context": context_name,
        });

        serde_json::from_value(kubeconfig)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field(
                "certificate_authority",
                &self.certificate_authority.as_ref().map(|_| "<pem>"),
            )
            .field("credentials", &self.credentials)
            .field("namespace", &self.namespace)
            .finish()
    }
}
