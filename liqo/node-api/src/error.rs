use std::{fmt, io, net::SocketAddr};

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use liqo_tls_util::error::{FromPemError, TlsPolicyError};
use thiserror::Error;

/// The two listeners of the node API server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    /// Secured listener serving logs, exec and pod listing.
    Pods,
    /// Plaintext listener serving the stats summary.
    Metrics,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pods => f.write_str("pods"),
            Self::Metrics => f.write_str("pod metrics"),
        }
    }
}

/// Errors that can occur when setting up the node API server.
///
/// When returned from [`setup_http_server`](crate::setup_http_server), all listeners started
/// before the failure have already been closed.
#[derive(Debug, Error)]
pub enum NodeApiError {
    #[error("failed to load TLS material: {0}")]
    TlsMaterial(#[from] FromPemError),

    #[error("failed to build TLS config: {0}")]
    TlsPolicy(#[from] TlsPolicyError),

    #[error("failed to set up {listener} listener on {addr}: {error}")]
    Bind {
        listener: ListenerKind,
        addr: SocketAddr,
        #[source]
        error: io::Error,
    },
}

/// A serve loop that failed while its listener was still supposed to be open.
///
/// Only logged, the listener is not restarted.
#[derive(Debug, Error)]
#[error("{listener} listener failed: {error}")]
pub struct ServeFault {
    pub listener: ListenerKind,
    #[source]
    pub error: io::Error,
}

/// Invalid configuration of the node API server.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value of `{name}`: {reason}")]
    InvalidEnv { name: &'static str, reason: String },
}

/// Errors returned from [`PodProvider`](crate::PodProvider) and
/// [`PodStatsProvider`](crate::PodStatsProvider) callbacks, translated into HTTP responses.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotImplemented(String),

    /// The command run with [`PodProvider::run_in_container`](crate::PodProvider) exited with a
    /// non-zero code.
    #[error("command terminated with non-zero exit code {0}")]
    NonZeroExitCode(i32),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ProviderError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(..) => StatusCode::NOT_FOUND,
            Self::InvalidInput(..) => StatusCode::BAD_REQUEST,
            Self::NotImplemented(..) => StatusCode::NOT_IMPLEMENTED,
            Self::NonZeroExitCode(..) | Self::Other(..) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProviderError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Provider callback failed.");
        }

        (status, self.to_string()).into_response()
    }
}
