use std::{io, net::SocketAddr, path::Path, pin::Pin, sync::Arc, time::Duration};

use axum::Router;
use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request};
use hyper_util::rt::TokioIo;
use liqo_tls_util::{load_serving_cert, read_root_store, server_config, ServingCert};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    task::{JoinHandle, JoinSet},
};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::Level;

use crate::{
    config::ApiServerConfig,
    error::{ListenerKind, NodeApiError, ServeFault},
    provider::NodeProvider,
    routes::{metrics_routes, pod_routes},
};

/// How long in-flight requests get to complete once the server is shutting down.
///
/// Followed log streams never complete on their own, they are cut when this elapses.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause before accepting again after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Closes a single running listener.
#[derive(Debug)]
struct ListenerCloser {
    kind: ListenerKind,
    local_addr: SocketAddr,
    token: CancellationToken,
    serve_task: JoinHandle<()>,
}

impl ListenerCloser {
    /// Requests the serve loop to stop, returns immediately.
    fn request_close(&self) {
        self.token.cancel();
    }

    /// Stops the serve loop and waits until it exits, releasing the socket.
    async fn close(self) {
        self.token.cancel();

        if let Err(error) = self.serve_task.await {
            tracing::error!(%error, listener = %self.kind, "Serve task panicked.");
        }
    }
}

/// Handle to the running listeners of the node API server.
///
/// Dropping the handle does not stop the listeners, use [`ServerHandle::shutdown`] or cancel the
/// token given to [`setup_http_server`].
#[derive(Debug)]
pub struct ServerHandle {
    closers: Vec<ListenerCloser>,
}

impl ServerHandle {
    /// Requests all listeners to close, in reverse order of their startup.
    ///
    /// Can be called any number of times. Use [`ServerHandle::closed`] to wait until the sockets
    /// are released.
    pub fn shutdown(&self) {
        self.closers
            .iter()
            .rev()
            .for_each(ListenerCloser::request_close);
    }

    /// Closes all listeners and waits until every serve loop exits.
    pub async fn closed(self) {
        for closer in self.closers.into_iter().rev() {
            closer.close().await;
        }
    }

    /// Address of the given listener, if it is running.
    pub fn local_addr(&self, kind: ListenerKind) -> Option<SocketAddr> {
        self.closers
            .iter()
            .find(|closer| closer.kind == kind)
            .map(|closer| closer.local_addr)
    }

    /// Addresses of all running listeners.
    pub fn local_addrs(&self) -> impl Iterator<Item = (ListenerKind, SocketAddr)> + '_ {
        self.closers
            .iter()
            .map(|closer| (closer.kind, closer.local_addr))
    }
}

/// Starts the listeners of the node API server.
///
/// 1. The secured pod listener starts only if both the certificate and the key are configured.
/// 2. The metrics listener starts only if its address is configured.
///
/// If any listener fails to start, the ones already running are closed (in reverse order) before
/// returning the error.
///
/// Listeners stop when `cancellation` is cancelled, along with their exec sessions. Requests
/// still in flight get [`GRACEFUL_SHUTDOWN_TIMEOUT`] to complete.
///
/// Failed accepts are retried after [`ACCEPT_BACKOFF`], unless the listener itself is unusable.
/// Such serve loops are logged and not restarted.
#[tracing::instrument(level = Level::INFO, skip(cancellation, provider), err)]
pub async fn setup_http_server(
    cancellation: CancellationToken,
    provider: NodeProvider,
    config: &ApiServerConfig,
) -> Result<ServerHandle, NodeApiError> {
    let mut closers = Vec::new();

    match start_listeners(&cancellation, &provider, config, &mut closers).await {
        Ok(()) => Ok(ServerHandle { closers }),
        Err(error) => {
            for closer in closers.into_iter().rev() {
                closer.close().await;
            }

            Err(error)
        }
    }
}

async fn start_listeners(
    cancellation: &CancellationToken,
    provider: &NodeProvider,
    config: &ApiServerConfig,
    closers: &mut Vec<ListenerCloser>,
) -> Result<(), NodeApiError> {
    match config.tls_material() {
        None => tracing::info!("TLS certificate or key not provided, pod server not set up."),
        Some((cert_path, key_path)) => {
            let acceptor =
                tls_acceptor(cert_path, key_path, config.client_ca_path.as_deref()).await?;
            let listener = bind(ListenerKind::Pods, config.listen_addr).await?;
            let token = cancellation.child_token();

            closers.push(spawn_listener(
                ListenerKind::Pods,
                listener,
                Some(acceptor),
                pod_routes(provider.pods(), token.clone()),
                token,
            ));
        }
    }

    match config.metrics_addr {
        None => tracing::info!("Pod metrics server not set up due to empty metrics address."),
        Some(addr) => {
            let listener = bind(ListenerKind::Metrics, addr).await?;

            closers.push(spawn_listener(
                ListenerKind::Metrics,
                listener,
                None,
                metrics_routes(provider.stats()),
                cancellation.child_token(),
            ));
        }
    }

    Ok(())
}

async fn tls_acceptor(
    cert_path: &Path,
    key_path: &Path,
    client_ca_path: Option<&Path>,
) -> Result<TlsAcceptor, NodeApiError> {
    let ServingCert { cert_chain, key } =
        load_serving_cert(cert_path.to_path_buf(), key_path.to_path_buf()).await?;
    let client_roots = match client_ca_path {
        Some(path) => Some(read_root_store(path.to_path_buf()).await?),
        None => None,
    };

    let config = server_config(cert_chain, key, client_roots)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Binds the listener, returning it with its actual address.
async fn bind(
    kind: ListenerKind,
    addr: SocketAddr,
) -> Result<(TcpListener, SocketAddr), NodeApiError> {
    let bind_error = |error| NodeApiError::Bind {
        listener: kind,
        addr,
        error,
    };

    let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
    let local_addr = listener.local_addr().map_err(bind_error)?;

    Ok((listener, local_addr))
}

fn spawn_listener(
    kind: ListenerKind,
    (listener, local_addr): (TcpListener, SocketAddr),
    tls: Option<TlsAcceptor>,
    router: Router,
    token: CancellationToken,
) -> ListenerCloser {
    tracing::info!(listener = %kind, %local_addr, tls = tls.is_some(), "Listener started.");

    let serve_task = tokio::spawn(serve(kind, listener, tls, router, token.clone()));

    ListenerCloser {
        kind,
        local_addr,
        token,
        serve_task,
    }
}

/// Accepts connections until `token` is cancelled, then waits for all connections to shut down,
/// each for at most [`GRACEFUL_SHUTDOWN_TIMEOUT`].
async fn serve(
    kind: ListenerKind,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    router: Router,
    token: CancellationToken,
) {
    let mut connections = JoinSet::new();

    let result = loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break Ok(()),

            Some(..) = connections.join_next(), if !connections.is_empty() => continue,

            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                connections.spawn(serve_connection(
                    stream,
                    peer,
                    tls.clone(),
                    router.clone(),
                    token.clone(),
                ));
            }
            Err(error) => match AcceptError::classify(&error) {
                AcceptError::Connection => {
                    tracing::debug!(%error, listener = %kind, "Failed to accept a connection.");
                }
                AcceptError::Transient => {
                    tracing::warn!(
                        %error,
                        listener = %kind,
                        "Failed to accept, retrying in {ACCEPT_BACKOFF:?}."
                    );

                    tokio::select! {
                        _ = token.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
                AcceptError::Fatal => break Err(error),
            },
        }
    };

    drop(listener);

    match result {
        Ok(()) => tracing::info!(listener = %kind, "Listener closed."),
        Err(error) if token.is_cancelled() => {
            tracing::debug!(%error, listener = %kind, "Listener failed after cancellation.")
        }
        Err(error) => {
            let fault = ServeFault {
                listener: kind,
                error,
            };
            tracing::error!(error = %fault, "Serve loop failed, the listener stays closed.");
        }
    }

    connections.join_all().await;
}

/// What a failed accept means for the listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AcceptError {
    /// Concerns a single connection, accept again right away.
    Connection,
    /// Usually resource exhaustion, accept again after [`ACCEPT_BACKOFF`].
    Transient,
    /// The listening socket itself is unusable.
    Fatal,
}

impl AcceptError {
    fn classify(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset => Self::Connection,
            io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported => Self::Fatal,
            _ => Self::Transient,
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    router: Router,
    token: CancellationToken,
) {
    let Some(acceptor) = tls else {
        serve_http(stream, peer, router, token).await;
        return;
    };

    let accepted = tokio::select! {
        _ = token.cancelled() => return,
        accepted = acceptor.accept(stream) => accepted,
    };

    match accepted {
        Ok(stream) => serve_http(stream, peer, router, token).await,
        Err(error) => tracing::debug!(%error, %peer, "TLS handshake failed."),
    }
}

async fn serve_http<IO>(io: IO, peer: SocketAddr, router: Router, token: CancellationToken)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request: Request<Incoming>| router.clone().call(request));

    let mut conn = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades();

    let result = tokio::select! {
        result = &mut conn => result,

        _ = token.cancelled() => {
            Pin::new(&mut conn).graceful_shutdown();

            match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, conn).await {
                Ok(result) => result,
                Err(..) => {
                    tracing::debug!(%peer, "Graceful shutdown timed out, dropping the connection.");
                    return;
                }
            }
        }
    };

    if let Err(error) = result {
        tracing::debug!(%error, %peer, "HTTP connection failed.");
    }
}
