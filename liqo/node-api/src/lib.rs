//! Node API server of the virtual kubelet.
//!
//! The server exposes two independent listeners:
//!
//! 1. the secured pod listener (TLS, optionally mutual), serving container logs, exec and pod
//!    listing, backed by a [`PodProvider`];
//! 2. the plaintext metrics listener, serving the stats summary if the provider has the
//!    [`PodStatsProvider`] capability.
//!
//! Start both with [`setup_http_server`].

pub mod config;
pub mod env;
pub mod error;
mod provider;
mod routes;
mod server;
pub mod stats;

pub use config::ApiServerConfig;
pub use provider::{
    AttachIo, BoxAsyncRead, BoxAsyncWrite, ContainerRef, LogOptions, LogStream, NodeProvider,
    PodProvider, PodStatsProvider, TerminalSize,
};
pub use server::{setup_http_server, ServerHandle};
