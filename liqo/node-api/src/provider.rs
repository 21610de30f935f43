use std::{fmt, io, pin::Pin, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::Pod;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

use crate::{error::ProviderError, stats::StatsSummary};

/// Stream of raw log bytes returned from [`PodProvider::get_container_logs`].
pub type LogStream = BoxStream<'static, io::Result<Bytes>>;

pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send>>;

pub type BoxAsyncWrite = Pin<Box<dyn AsyncWrite + Send>>;

/// Identifies a container in the local (virtual) node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerRef {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

/// Options of a container logs request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Number of lines from the end of the logs to return.
    pub tail_lines: Option<i64>,
    /// Maximum number of bytes to return.
    pub limit_bytes: Option<i64>,
    pub timestamps: bool,
    pub follow: bool,
    /// Return the logs of the previous, terminated, container instance.
    pub previous: bool,
    pub since_seconds: Option<i64>,
    pub since_time: Option<DateTime<Utc>>,
}

/// Terminal size sent by exec clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerminalSize {
    pub width: u16,
    pub height: u16,
}

/// Streams of an exec session.
///
/// Only the streams requested by the client are present. The session ends when
/// [`PodProvider::run_in_container`] returns, and the output streams are flushed when dropped.
pub struct AttachIo {
    pub stdin: Option<BoxAsyncRead>,
    pub stdout: Option<BoxAsyncWrite>,
    pub stderr: Option<BoxAsyncWrite>,
    pub tty: bool,
    /// Present only when [`AttachIo::tty`] is set.
    pub resize: Option<mpsc::Receiver<TerminalSize>>,
}

impl fmt::Debug for AttachIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachIo")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("tty", &self.tty)
            .finish()
    }
}

/// Callbacks backing the routes of the secured pod listener.
#[async_trait::async_trait]
pub trait PodProvider: Send + Sync {
    async fn get_container_logs(
        &self,
        container: &ContainerRef,
        options: LogOptions,
    ) -> Result<LogStream, ProviderError>;

    /// Runs `command` in the container, wiring it to the given `io`.
    async fn run_in_container(
        &self,
        container: &ContainerRef,
        command: Vec<String>,
        io: AttachIo,
    ) -> Result<(), ProviderError>;

    /// Returns all pods scheduled on this node.
    async fn get_pods(&self) -> Result<Vec<Pod>, ProviderError>;
}

/// Optional capability of a provider, backs the metrics listener.
#[async_trait::async_trait]
pub trait PodStatsProvider: Send + Sync {
    async fn get_stats_summary(&self) -> Result<StatsSummary, ProviderError>;
}

/// The provider of the node API server, with its capabilities made explicit.
#[derive(Clone)]
pub struct NodeProvider {
    pods: Arc<dyn PodProvider>,
    stats: Option<Arc<dyn PodStatsProvider>>,
}

impl NodeProvider {
    /// A provider without the stats capability, the stats summary answers with
    /// [`StatusCode::NOT_IMPLEMENTED`](http::StatusCode::NOT_IMPLEMENTED).
    pub fn basic<P>(provider: P) -> Self
    where
        P: PodProvider + 'static,
    {
        Self {
            pods: Arc::new(provider),
            stats: None,
        }
    }

    pub fn with_stats<P>(provider: P) -> Self
    where
        P: PodProvider + PodStatsProvider + 'static,
    {
        let provider = Arc::new(provider);

        Self {
            pods: provider.clone(),
            stats: Some(provider),
        }
    }

    pub fn pods(&self) -> Arc<dyn PodProvider> {
        self.pods.clone()
    }

    /// Returns the stats capability, if the provider has it.
    pub fn stats(&self) -> Option<Arc<dyn PodStatsProvider>> {
        self.stats.clone()
    }
}

impl fmt::Debug for NodeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeProvider")
            .field("stats", &self.stats.is_some())
            .finish_non_exhaustive()
    }
}
