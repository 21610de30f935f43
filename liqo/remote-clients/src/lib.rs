//! Per-process registry of authenticated clients for remote clusters.
//!
//! Create a single [`RemoteClientRegistry`] at startup and share it (e.g. in an [`Arc`]) with
//! every component that talks to remote clusters. Clients are built lazily, on the first request
//! for a cluster, and are kept for the lifetime of the process.
//!
//! [`Arc`]: std::sync::Arc

pub mod error;
mod factory;
mod namespace;
mod registry;

pub use factory::{KubeClientFactory, RemoteClientFactory};
pub use namespace::ensure_remote_namespace;
pub use registry::RemoteClientRegistry;
