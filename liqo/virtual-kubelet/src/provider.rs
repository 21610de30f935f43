use std::sync::Arc;

use futures::SinkExt;
use k8s_openapi::{api::core::v1::Pod, apimachinery::pkg::apis::meta::v1::Status};
use kube::{
    api::{AttachParams, ListParams, LogParams},
    Api, Client,
};
use liqo_identity::{labels::ORIGIN_CLUSTER_ID_LABEL, ClusterIdentity, IdentityProvider};
use liqo_node_api::{
    error::ProviderError, AttachIo, ContainerRef, LogOptions, LogStream, PodProvider,
    TerminalSize,
};
use liqo_remote_clients::{RemoteClientFactory, RemoteClientRegistry};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_util::{compat::FuturesAsyncReadCompatExt, io::ReaderStream};
use tracing::Level;

/// [`PodProvider`] of a virtual node backed by a single foreign cluster.
///
/// Every request is forwarded to the foreign cluster, with the client taken from the shared
/// [`RemoteClientRegistry`]. Pods of the local namespace `ns` live in the remote namespace
/// `ns-<home cluster ID>`.
pub struct RemoteClusterProvider<P, F: RemoteClientFactory> {
    registry: Arc<RemoteClientRegistry<P, F>>,
    foreign: ClusterIdentity,
    home_cluster_id: String,
}

impl<P, F> RemoteClusterProvider<P, F>
where
    P: IdentityProvider,
    F: RemoteClientFactory<Client = Client>,
{
    pub fn new(
        registry: Arc<RemoteClientRegistry<P, F>>,
        foreign: ClusterIdentity,
        home: &ClusterIdentity,
    ) -> Self {
        Self {
            registry,
            foreign,
            home_cluster_id: home.cluster_id().to_owned(),
        }
    }

    async fn client(&self) -> Result<Client, ProviderError> {
        self.registry
            .get_or_create_client(&self.foreign)
            .await
            .map(|client| Client::clone(&client))
            .map_err(|error| ProviderError::Other(error.into()))
    }

    fn remote_namespace(&self, local: &str) -> String {
        format!("{local}-{}", self.home_cluster_id)
    }

    /// Inverse of [`Self::remote_namespace`], [`None`] for namespaces not owned by the home cluster.
    fn local_namespace<'a>(&self, remote: &'a str) -> Option<&'a str> {
        remote
            .strip_suffix(self.home_cluster_id.as_str())
            .and_then(|prefix| prefix.strip_suffix('-'))
            .filter(|local| !local.is_empty())
    }

    async fn pods(&self, container: &ContainerRef) -> Result<Api<Pod>, ProviderError> {
        let client = self.client().await?;

        Ok(Api::namespaced(
            client,
            &self.remote_namespace(&container.namespace),
        ))
    }
}

#[async_trait::async_trait]
impl<P, F> PodProvider for RemoteClusterProvider<P, F>
where
    P: IdentityProvider + 'static,
    F: RemoteClientFactory<Client = Client> + 'static,
{
    #[tracing::instrument(level = Level::DEBUG, skip(self), fields(container = %container), err(level = Level::DEBUG))]
    async fn get_container_logs(
        &self,
        container: &ContainerRef,
        options: LogOptions,
    ) -> Result<LogStream, ProviderError> {
        let params = LogParams {
            container: Some(container.container.clone()),
            follow: options.follow,
            limit_bytes: options.limit_bytes,
            previous: options.previous,
            since_seconds: options.since_seconds,
            since_time: options.since_time,
            tail_lines: options.tail_lines,
            timestamps: options.timestamps,
            ..Default::default()
        };

        let logs = self
            .pods(container)
            .await?
            .log_stream(&container.pod, &params)
            .await
            .map_err(provider_error)?;

        Ok(Box::pin(ReaderStream::new(logs.compat())))
    }

    #[tracing::instrument(level = Level::DEBUG, skip(self, io), fields(container = %container), err(level = Level::DEBUG))]
    async fn run_in_container(
        &self,
        container: &ContainerRef,
        command: Vec<String>,
        io: AttachIo,
    ) -> Result<(), ProviderError> {
        let AttachIo {
            stdin,
            stdout,
            stderr,
            tty,
            resize,
        } = io;

        let params = AttachParams {
            container: Some(container.container.clone()),
            stdin: stdin.is_some(),
            stdout: stdout.is_some(),
            stderr: stderr.is_some() && !tty,
            tty,
            ..Default::default()
        };

        let mut attached = self
            .pods(container)
            .await?
            .exec(&container.pod, command, &params)
            .await
            .map_err(provider_error)?;

        let status = attached.take_status();
        let remote_stdin = attached.stdin();
        let remote_stdout = attached.stdout();
        let remote_stderr = attached.stderr();
        let remote_resize = attached.terminal_size();

        let input = async move {
            tokio::join!(
                forward(stdin, remote_stdin),
                forward_resize(resize, remote_resize),
            )
        };
        let outputs = async move {
            tokio::join!(
                forward(remote_stdout, stdout),
                forward(remote_stderr, stderr),
            )
        };
        tokio::pin!(outputs);

        // Remote output is drained even after the local stdin is closed.
        let (stdout, stderr) = tokio::select! {
            outputs = &mut outputs => outputs,
            _ = input => outputs.await,
        };

        let status = match status {
            Some(status) => status.await,
            None => None,
        };

        if let Err(error) = attached.join().await {
            tracing::debug!(%error, "Remote exec session did not end cleanly.");
        }

        stdout
            .and(stderr)
            .map_err(|error| ProviderError::Other(error.into()))?;

        status.map(exit_result).unwrap_or(Ok(()))
    }

    #[tracing::instrument(level = Level::DEBUG, skip(self), err(level = Level::DEBUG))]
    async fn get_pods(&self) -> Result<Vec<Pod>, ProviderError> {
        let api: Api<Pod> = Api::all(self.client().await?);
        let params = ListParams::default().labels(&format!(
            "{ORIGIN_CLUSTER_ID_LABEL}={}",
            self.home_cluster_id
        ));

        let pods = api.list(&params).await.map_err(provider_error)?.items;

        Ok(pods
            .into_iter()
            .filter_map(|mut pod| {
                let local = self
                    .local_namespace(pod.metadata.namespace.as_deref()?)?
                    .to_owned();
                pod.metadata.namespace = Some(local);
                Some(pod)
            })
            .collect())
    }
}

/// Copies `from` into `to` until `from` is closed, then shuts `to` down.
async fn forward<R, W>(from: Option<R>, to: Option<W>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (Some(mut from), Some(mut to)) = (from, to) else {
        return Ok(());
    };

    tokio::io::copy(&mut from, &mut to).await?;
    to.shutdown().await
}

async fn forward_resize(
    sizes: Option<mpsc::Receiver<TerminalSize>>,
    remote: Option<futures::channel::mpsc::Sender<kube::api::TerminalSize>>,
) {
    let (Some(mut sizes), Some(mut remote)) = (sizes, remote) else {
        return;
    };

    while let Some(TerminalSize { width, height }) = sizes.recv().await {
        if remote
            .send(kube::api::TerminalSize { width, height })
            .await
            .is_err()
        {
            break;
        }
    }
}

/// Translates the final [`Status`] of a remote exec session.
fn exit_result(status: Status) -> Result<(), ProviderError> {
    if status.status.as_deref() == Some("Success") {
        return Ok(());
    }

    let exit_code = status
        .details
        .as_ref()
        .and_then(|details| details.causes.as_ref())
        .into_iter()
        .flatten()
        .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
        .and_then(|cause| cause.message.as_deref()?.parse().ok());

    match exit_code {
        Some(code) => Err(ProviderError::NonZeroExitCode(code)),
        None => Err(ProviderError::Other(
            status
                .message
                .unwrap_or_else(|| "remote command failed".to_owned())
                .into(),
        )),
    }
}

fn provider_error(error: kube::Error) -> ProviderError {
    match error {
        kube::Error::Api(response) if response.code == 404 => {
            ProviderError::NotFound(response.message)
        }
        kube::Error::Api(response) if response.code == 400 => {
            ProviderError::InvalidInput(response.message)
        }
        error => ProviderError::Other(error.into()),
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use http::{Method, Request, Response, StatusCode};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{StatusCause, StatusDetails};
    use kube::client::Body;
    use liqo_identity::{error::IdentityError, ConnectionConfig, Credentials};
    use liqo_remote_clients::error::ClientFactoryError;
    use rstest::rstest;
    use serde_json::{json, Value};

    use super::*;

    const HOME_CLUSTER_ID: &str = "1-6a0e9f-b52-4ed0";

    struct StaticProvider;

    impl IdentityProvider for StaticProvider {
        async fn resolve(
            &self,
            _: &ClusterIdentity,
            _: &str,
        ) -> Result<ConnectionConfig, IdentityError> {
            Ok(ConnectionConfig {
                endpoint: "https://remote.example.com:6443".into(),
                certificate_authority: None,
                credentials: Credentials::BearerToken("token".into()),
                namespace: None,
            })
        }
    }

    struct MockFactory(Client);

    #[async_trait::async_trait]
    impl RemoteClientFactory for MockFactory {
        type Client = Client;

        async fn build(
            &self,
            _: &ClusterIdentity,
            _: ConnectionConfig,
        ) -> Result<Client, ClientFactoryError> {
            Ok(self.0.clone())
        }
    }

    /// Provider whose foreign cluster answers the single expected request with `response`.
    fn provider_answering(
        expected_path: &'static str,
        response: Response<Body>,
        check: fn(&Request<Body>),
    ) -> RemoteClusterProvider<StaticProvider, MockFactory> {
        let (service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();

        tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), Method::GET);
            assert_eq!(request.uri().path(), expected_path);
            check(&request);
            send.send_response(response);
        });

        let registry = RemoteClientRegistry::new(
            StaticProvider,
            MockFactory(Client::new(service, "default")),
        );

        RemoteClusterProvider::new(
            Arc::new(registry),
            ClusterIdentity::new("2-899890-dsd-323s", "remote-cluster-2").unwrap(),
            &ClusterIdentity::new(HOME_CLUSTER_ID, "home-cluster").unwrap(),
        )
    }

    fn json_response(status: StatusCode, body: Value) -> Response<Body> {
        Response::builder()
            .status(status)
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn pod(name: &str, namespace: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "namespace": namespace },
        })
    }

    fn nginx() -> ContainerRef {
        ContainerRef {
            namespace: "default".into(),
            pod: "nginx".into(),
            container: "nginx".into(),
        }
    }

    #[tokio::test]
    async fn pods_are_listed_in_local_namespaces() {
        let provider = provider_answering(
            "/api/v1/pods",
            json_response(
                StatusCode::OK,
                json!({
                    "apiVersion": "v1",
                    "kind": "PodList",
                    "metadata": {},
                    "items": [
                        pod("nginx", "default-1-6a0e9f-b52-4ed0"),
                        pod("stranger", "kube-system"),
                    ],
                }),
            ),
            |request| {
                let query = request.uri().query().unwrap_or_default();
                assert!(query
                    .contains("labelSelector=liqo.io%2Forigin-cluster-id%3D1-6a0e9f-b52-4ed0"));
            },
        );

        let pods = provider.get_pods().await.unwrap();

        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].metadata.name.as_deref(), Some("nginx"));
        assert_eq!(pods[0].metadata.namespace.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn logs_are_streamed_from_remote_namespace() {
        let provider = provider_answering(
            "/api/v1/namespaces/default-1-6a0e9f-b52-4ed0/pods/nginx/log",
            Response::builder()
                .body(Body::from(b"line 1\nline 2\n".to_vec()))
                .unwrap(),
            |request| {
                let query = request.uri().query().unwrap_or_default();
                assert!(query.contains("container=nginx"));
                assert!(query.contains("tailLines=2"));
            },
        );

        let options = LogOptions {
            tail_lines: Some(2),
            ..Default::default()
        };

        let chunks: Vec<bytes::Bytes> = provider
            .get_container_logs(&nginx(), options)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(chunks.concat(), b"line 1\nline 2\n");
    }

    #[rstest]
    #[case::not_found(StatusCode::NOT_FOUND, StatusCode::NOT_FOUND)]
    #[case::bad_request(StatusCode::BAD_REQUEST, StatusCode::BAD_REQUEST)]
    #[case::forbidden(StatusCode::FORBIDDEN, StatusCode::INTERNAL_SERVER_ERROR)]
    #[tokio::test]
    async fn remote_errors_are_translated(#[case] remote: StatusCode, #[case] local: StatusCode) {
        let provider = provider_answering(
            "/api/v1/namespaces/default-1-6a0e9f-b52-4ed0/pods/nginx/log",
            json_response(
                remote,
                json!({
                    "apiVersion": "v1",
                    "kind": "Status",
                    "metadata": {},
                    "status": "Failure",
                    "message": "pods \"nginx\" not available",
                    "reason": remote.canonical_reason().unwrap_or_default(),
                    "code": remote.as_u16(),
                }),
            ),
            |_| {},
        );

        let error = match provider
            .get_container_logs(&nginx(), Default::default())
            .await
        {
            Ok(..) => panic!("logs of a failing remote should not be returned"),
            Err(error) => error,
        };

        assert_eq!(error.status_code(), local);
    }

    #[tokio::test]
    async fn namespaces_are_mapped_both_ways() {
        let registry = RemoteClientRegistry::new(
            StaticProvider,
            MockFactory(Client::new(
                tower_test::mock::pair::<Request<Body>, Response<Body>>().0,
                "default",
            )),
        );
        let provider = RemoteClusterProvider::new(
            Arc::new(registry),
            ClusterIdentity::new("2-899890-dsd-323s", "").unwrap(),
            &ClusterIdentity::new(HOME_CLUSTER_ID, "").unwrap(),
        );

        let remote = provider.remote_namespace("liqo-demo");
        assert_eq!(remote, "liqo-demo-1-6a0e9f-b52-4ed0");
        assert_eq!(provider.local_namespace(&remote), Some("liqo-demo"));

        assert_eq!(provider.local_namespace("liqo-demo"), None);
        assert_eq!(provider.local_namespace("-1-6a0e9f-b52-4ed0"), None);
        assert_eq!(provider.local_namespace("x1-6a0e9f-b52-4ed0"), None);
    }

    fn status(status: &str, causes: Option<Vec<(&str, &str)>>) -> Status {
        Status {
            status: Some(status.into()),
            message: Some("command terminated".into()),
            details: causes.map(|causes| StatusDetails {
                causes: Some(
                    causes
                        .into_iter()
                        .map(|(reason, message)| StatusCause {
                            reason: Some(reason.into()),
                            message: Some(message.into()),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn exec_status_is_translated() {
        assert!(exit_result(status("Success", None)).is_ok());

        assert!(matches!(
            exit_result(status("Failure", Some(vec![("ExitCode", "3")]))),
            Err(ProviderError::NonZeroExitCode(3))
        ));

        assert!(matches!(
            exit_result(status("Failure", None)),
            Err(ProviderError::Other(error)) if error.to_string() == "command terminated"
        ));
    }
}
