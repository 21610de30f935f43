//! Identities of remote clusters and the credentials used to talk to their API servers.
//!
//! The [`IdentityProvider`] trait is the only way the rest of the workspace obtains a
//! [`ConnectionConfig`] for a remote cluster. [`CertificateIdentityReader`] is the production
//! implementation, reading identities issued during peering from the local cluster.

mod cluster;
mod connection;
pub mod error;
pub mod labels;
mod provider;
mod reader;

pub use cluster::ClusterIdentity;
pub use connection::{ConnectionConfig, Credentials};
pub use provider::IdentityProvider;
pub use reader::{CertificateIdentityReader, TenantNamespaceManager};
