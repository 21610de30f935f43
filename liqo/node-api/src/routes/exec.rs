//! `kubectl exec` over WebSocket, using the Kubernetes channel protocol.
//!
//! Every binary frame starts with the ID of its channel, see [`channel`].

use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    Extension,
};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Status, StatusCause, StatusDetails};
use serde::Deserialize;
use tokio::{
    io::{AsyncRead, AsyncWriteExt, DuplexStream},
    sync::mpsc::{self, error::TrySendError, OwnedPermit},
    task::{JoinError, JoinSet},
};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::Level;

use super::parse_flag;
use crate::{
    error::ProviderError,
    provider::{AttachIo, BoxAsyncRead, BoxAsyncWrite, ContainerRef, PodProvider, TerminalSize},
};

/// Subprotocols we can speak, in order of preference.
const PROTOCOLS: [&str; 2] = ["v4.channel.k8s.io", "channel.k8s.io"];

/// Capacity of the in-memory pipes between the WebSocket and the provider.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Stdin frames queued for the writer task.
const STDIN_QUEUE: usize = 8;

pub(crate) mod channel {
    pub const STDIN: u8 = 0;
    pub const STDOUT: u8 = 1;
    pub const STDERR: u8 = 2;
    /// Final [`Status`](super::Status) of the command.
    pub const ERROR: u8 = 3;
    pub const RESIZE: u8 = 4;
}

/// Parsed query of an exec request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ExecOptions {
    pub command: Vec<String>,
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub tty: bool,
}

impl ExecOptions {
    /// Accepts both the `input/output/error` and `stdin/stdout/stderr` spellings of the streams.
    pub(crate) fn from_query(query: &[(String, String)]) -> Result<Self, ProviderError> {
        let mut options = Self {
            command: Vec::new(),
            stdin: false,
            stdout: false,
            stderr: false,
            tty: false,
        };

        for (name, value) in query {
            match name.as_str() {
                "command" => options.command.push(value.clone()),
                "input" | "stdin" => options.stdin |= parse_flag(name, value)?,
                "output" | "stdout" => options.stdout |= parse_flag(name, value)?,
                "error" | "stderr" => options.stderr |= parse_flag(name, value)?,
                "tty" => options.tty |= parse_flag(name, value)?,
                _ => {}
            }
        }

        if options.command.is_empty() {
            return Err(ProviderError::InvalidInput("missing `command`".into()));
        }

        if !(options.stdin || options.stdout || options.stderr) {
            return Err(ProviderError::InvalidInput(
                "at least one of stdin, stdout and stderr is required".into(),
            ));
        }

        Ok(options)
    }
}

#[tracing::instrument(level = Level::DEBUG, skip(provider, cancellation, upgrade))]
pub(super) async fn exec(
    State(provider): State<Arc<dyn PodProvider>>,
    Extension(cancellation): Extension<CancellationToken>,
    Path((namespace, pod, container)): Path<(String, String, String)>,
    Query(query): Query<Vec<(String, String)>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let options = match ExecOptions::from_query(&query) {
        Ok(options) => options,
        Err(error) => return error.into_response(),
    };

    let Ok(upgrade) = upgrade else {
        return ProviderError::InvalidInput("exec requires a WebSocket upgrade".into())
            .into_response();
    };

    let container = ContainerRef {
        namespace,
        pod,
        container,
    };

    upgrade
        .protocols(PROTOCOLS)
        .on_upgrade(move |socket| async move {
            let (sender, receiver) = socket.split();
            run_session(provider, container, options, sender, receiver, cancellation).await
        })
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResizeFrame {
    width: u16,
    height: u16,
}

fn frame(channel: u8, data: &[u8]) -> Message {
    let mut frame = Vec::with_capacity(data.len() + 1);
    frame.push(channel);
    frame.extend_from_slice(data);
    Message::Binary(frame.into())
}

/// Builds the frame with the final status of the command.
fn status_frame(result: Result<Result<(), ProviderError>, JoinError>) -> Message {
    let status = match result {
        Ok(Ok(())) => Status {
            status: Some("Success".into()),
            ..Default::default()
        },
        Ok(Err(ProviderError::NonZeroExitCode(code))) => Status {
            status: Some("Failure".into()),
            reason: Some("NonZeroExitCode".into()),
            message: Some(format!("command terminated with non-zero exit code {code}")),
            details: Some(StatusDetails {
                causes: Some(vec![StatusCause {
                    reason: Some("ExitCode".into()),
                    message: Some(code.to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        },
        Ok(Err(error)) => Status {
            status: Some("Failure".into()),
            code: Some(error.status_code().as_u16().into()),
            message: Some(error.to_string()),
            ..Default::default()
        },
        Err(error) => Status {
            status: Some("Failure".into()),
            code: Some(500),
            message: Some(format!("command task failed: {error}")),
            ..Default::default()
        },
    };

    let encoded = serde_json::to_vec(&status).unwrap_or_default();
    frame(channel::ERROR, &encoded)
}

/// Forwards everything read from `reader` to `tx`, tagged with the given channel.
async fn forward_output<R>(reader: R, channel: u8, tx: mpsc::Sender<(u8, Bytes)>)
where
    R: AsyncRead + Unpin,
{
    let mut chunks = ReaderStream::new(reader);

    while let Some(chunk) = chunks.next().await {
        let Ok(chunk) = chunk else {
            break;
        };

        if tx.send((channel, chunk)).await.is_err() {
            break;
        }
    }
}

/// Writes everything received from `rx` to the stdin pipe of the command.
async fn forward_input(mut writer: DuplexStream, mut rx: mpsc::Receiver<Bytes>) {
    while let Some(data) = rx.recv().await {
        if writer.write_all(&data).await.is_err() {
            break;
        }
    }
}

/// Waits until stdin can take another frame.
///
/// Pending forever when there is no stdin.
async fn stdin_permit(tx: Option<mpsc::Sender<Bytes>>) -> Option<OwnedPermit<Bytes>> {
    match tx {
        Some(tx) => tx.reserve_owned().await.ok(),
        None => std::future::pending().await,
    }
}

fn pipe(requested: bool) -> (Option<DuplexStream>, Option<DuplexStream>) {
    if requested {
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        (Some(ours), Some(theirs))
    } else {
        (None, None)
    }
}

/// Bridges the WebSocket halves with [`PodProvider::run_in_container`], until the command
/// completes, the client goes away or `cancellation` is cancelled.
///
/// Stdin is written by a separate task. While it cannot keep up, client frames are not read, but
/// output keeps flowing to the client.
#[tracing::instrument(level = Level::DEBUG, skip(provider, sender, receiver, cancellation))]
pub(crate) async fn run_session<S, R>(
    provider: Arc<dyn PodProvider>,
    container: ContainerRef,
    options: ExecOptions,
    mut sender: S,
    mut receiver: R,
    cancellation: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let (stdin, stdin_theirs) = pipe(options.stdin);
    let (stdout, stdout_theirs) = pipe(options.stdout);
    let (stderr, stderr_theirs) = pipe(options.stderr);
    let (resize_tx, resize_rx) = if options.tty {
        let (tx, rx) = mpsc::channel(4);
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let io = AttachIo {
        stdin: stdin_theirs.map(|pipe| -> BoxAsyncRead { Box::pin(pipe) }),
        stdout: stdout_theirs.map(|pipe| -> BoxAsyncWrite { Box::pin(pipe) }),
        stderr: stderr_theirs.map(|pipe| -> BoxAsyncWrite { Box::pin(pipe) }),
        tty: options.tty,
        resize: resize_rx,
    };

    // Aborted on drop.
    let mut input = JoinSet::new();
    let mut stdin_tx = stdin.map(|pipe| {
        let (tx, rx) = mpsc::channel(STDIN_QUEUE);
        input.spawn(forward_input(pipe, rx));
        tx
    });
    let mut pending_stdin: Option<Bytes> = None;

    let (output_tx, mut output_rx) = mpsc::channel(32);
    let mut forwarders = JoinSet::new();
    for (pipe, channel) in [(stdout, channel::STDOUT), (stderr, channel::STDERR)] {
        if let Some(pipe) = pipe {
            forwarders.spawn(forward_output(pipe, channel, output_tx.clone()));
        }
    }
    drop(output_tx);

    let command = options.command;
    let mut command_task = tokio::spawn({
        let container = container.clone();
        async move { provider.run_in_container(&container, command, io).await }
    });

    let mut result = None;
    let mut output_done = false;

    while result.is_none() || !output_done {
        let reading = result.is_none() && pending_stdin.is_none();

        tokio::select! {
            _ = cancellation.cancelled() => {
                tracing::debug!("Exec session cancelled.");
                command_task.abort();
                let _ = sender.send(Message::Close(None)).await;
                return;
            }

            finished = &mut command_task, if result.is_none() => {
                result = Some(finished);
                stdin_tx = None;
                pending_stdin = None;
            }

            output = output_rx.recv(), if !output_done => match output {
                Some((channel, data)) => {
                    if sender.send(frame(channel, &data)).await.is_err() {
                        tracing::debug!("Exec client went away.");
                        command_task.abort();
                        return;
                    }
                }
                None => output_done = true,
            },

            permit = stdin_permit(stdin_tx.clone()), if pending_stdin.is_some() => match permit {
                Some(permit) => {
                    if let Some(data) = pending_stdin.take() {
                        permit.send(data);
                    }
                }
                None => {
                    stdin_tx = None;
                    pending_stdin = None;
                }
            },

            message = receiver.next(), if reading => match message {
                Some(Ok(Message::Binary(data))) => match data.split_first() {
                    Some((&channel::STDIN, _)) => {
                        if let Some(tx) = stdin_tx.as_ref() {
                            match tx.try_send(data.slice(1..)) {
                                Ok(()) => {}
                                Err(TrySendError::Full(data)) => pending_stdin = Some(data),
                                Err(TrySendError::Closed(..)) => stdin_tx = None,
                            }
                        }
                    }
                    Some((&channel::RESIZE, payload)) => {
                        let size = serde_json::from_slice::<ResizeFrame>(payload);
                        match (resize_tx.as_ref(), size) {
                            (Some(tx), Ok(ResizeFrame { width, height })) => {
                                let _ = tx.try_send(TerminalSize { width, height });
                            }
                            (_, Err(error)) => tracing::debug!(%error, "Invalid resize frame."),
                            (None, Ok(..)) => {}
                        }
                    }
                    Some((channel, ..)) => {
                        tracing::debug!(channel, "Ignoring frame on unexpected channel.")
                    }
                    None => {}
                },
                Some(Ok(Message::Close(..))) | Some(Err(..)) | None => {
                    tracing::debug!("Exec client went away.");
                    command_task.abort();
                    return;
                }
                Some(Ok(..)) => {}
            },
        }
    }

    forwarders.join_all().await;

    if let Some(result) = result {
        let _ = sender.send(status_frame(result)).await;
    }
    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
    use http::{Request, StatusCode};
    use rstest::rstest;
    use tower::ServiceExt;

    use super::*;
    use crate::routes::{pod_routes, test::FakePods};

    fn query(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn parses_repeated_command() {
        let options = ExecOptions::from_query(&query(&[
            ("command", "sh"),
            ("command", "-c"),
            ("command", "echo hi"),
            ("stdout", "1"),
            ("error", "true"),
        ]))
        .unwrap();

        assert_eq!(options.command, ["sh", "-c", "echo hi"]);
        assert!(options.stdout && options.stderr);
        assert!(!options.stdin && !options.tty);
    }

    #[rstest]
    #[case::no_command(&[("stdout", "1")])]
    #[case::no_streams(&[("command", "ls")])]
    #[case::bad_flag(&[("command", "ls"), ("stdout", "yes")])]
    fn invalid_query_is_rejected(#[case] pairs: &[(&str, &str)]) {
        assert!(matches!(
            ExecOptions::from_query(&query(pairs)),
            Err(ProviderError::InvalidInput(..))
        ));
    }

    #[rstest]
    #[case::missing_command("/exec/default/nginx/nginx?stdout=1")]
    #[case::not_an_upgrade("/exec/default/nginx/nginx?command=ls&stdout=1")]
    #[tokio::test]
    async fn invalid_exec_request_is_bad_request(#[case] uri: &str) {
        let response = pod_routes(Arc::new(FakePods::default()), CancellationToken::new())
            .oneshot(Request::get(uri).body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    /// Runs a session against [`FakePods`], returning the client ends.
    fn session(
        container: &str,
        options: ExecOptions,
        cancellation: CancellationToken,
    ) -> (
        UnboundedSender<Result<Message, axum::Error>>,
        UnboundedReceiver<Message>,
        tokio::task::JoinHandle<()>,
    ) {
        let (client_tx, server_rx) = unbounded();
        let (server_tx, client_rx) = unbounded();

        let container = ContainerRef {
            namespace: "default".into(),
            pod: container.into(),
            container: container.into(),
        };

        let task = tokio::spawn(run_session(
            Arc::new(FakePods::default()),
            container,
            options,
            server_tx,
            server_rx,
            cancellation,
        ));

        (client_tx, client_rx, task)
    }

    fn options(command: &str) -> ExecOptions {
        ExecOptions {
            command: vec![command.into()],
            stdin: true,
            stdout: true,
            stderr: true,
            tty: false,
        }
    }

    /// Collects output frames until the server closes the socket.
    async fn collect(mut client_rx: UnboundedReceiver<Message>) -> (Vec<u8>, Vec<u8>, Status) {
        let (mut stdout, mut stderr, mut status) = (Vec::new(), Vec::new(), None);

        while let Some(message) = client_rx.next().await {
            match message {
                Message::Binary(data) => match data.split_first().unwrap() {
                    (&channel::STDOUT, payload) => stdout.extend_from_slice(payload),
                    (&channel::STDERR, payload) => stderr.extend_from_slice(payload),
                    (&channel::ERROR, payload) => {
                        status = Some(serde_json::from_slice(payload).unwrap())
                    }
                    (channel, _) => panic!("unexpected channel {channel}"),
                },
                Message::Close(..) => break,
                other => panic!("unexpected message {other:?}"),
            }
        }

        (stdout, stderr, status.expect("no status frame"))
    }

    #[tokio::test]
    async fn session_forwards_streams_and_reports_success() {
        let (client_tx, client_rx, task) =
            session("nginx", options("echo"), CancellationToken::new());

        client_tx
            .unbounded_send(Ok(frame(channel::STDIN, b"hello\n")))
            .unwrap();

        let (stdout, stderr, status) = collect(client_rx).await;
        task.await.unwrap();

        assert_eq!(stdout, b"out:hello\n");
        assert_eq!(stderr, b"err");
        assert_eq!(status.status.as_deref(), Some("Success"));
    }

    #[tokio::test]
    async fn session_reports_provider_failure() {
        let (_client_tx, client_rx, task) =
            session("redis", options("echo"), CancellationToken::new());

        let (stdout, _, status) = collect(client_rx).await;
        task.await.unwrap();

        assert!(stdout.is_empty());
        assert_eq!(status.status.as_deref(), Some("Failure"));
        assert_eq!(status.code, Some(404));
    }

    #[test]
    fn exit_code_is_reported_as_status_cause() {
        let Message::Binary(data) = status_frame(Ok(Err(ProviderError::NonZeroExitCode(2))))
        else {
            panic!("status frame is not binary");
        };

        assert_eq!(data[0], channel::ERROR);
        let status: Status = serde_json::from_slice(&data[1..]).unwrap();
        assert_eq!(status.reason.as_deref(), Some("NonZeroExitCode"));

        let causes = status.details.unwrap().causes.unwrap();
        assert_eq!(causes[0].reason.as_deref(), Some("ExitCode"));
        assert_eq!(causes[0].message.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn session_ends_when_client_goes_away() {
        let (client_tx, _client_rx, task) =
            session("nginx", options("echo"), CancellationToken::new());

        drop(client_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn large_input_is_echoed_while_output_is_drained() {
        const FRAMES: usize = 64;
        const FRAME_SIZE: usize = 16 * 1024;

        let (client_tx, mut client_rx, task) =
            session("nginx", options("cat"), CancellationToken::new());

        let chunk = vec![b'x'; FRAME_SIZE];
        for _ in 0..FRAMES {
            client_tx
                .unbounded_send(Ok(frame(channel::STDIN, &chunk)))
                .unwrap();
        }

        let echoed = tokio::time::timeout(Duration::from_secs(10), async {
            let mut echoed = 0;
            while echoed < FRAMES * FRAME_SIZE {
                match client_rx.next().await {
                    Some(Message::Binary(data)) => {
                        assert_eq!(data[0], channel::STDOUT);
                        assert!(data[1..].iter().all(|byte| *byte == b'x'));
                        echoed += data.len() - 1;
                    }
                    other => panic!("unexpected message {other:?}"),
                }
            }
            echoed
        })
        .await
        .expect("stdin was not echoed in time");

        assert_eq!(echoed, FRAMES * FRAME_SIZE);

        drop(client_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn session_ends_on_cancellation() {
        let cancellation = CancellationToken::new();
        // `echo` waits for a stdin line that never comes.
        let (_client_tx, mut client_rx, task) =
            session("nginx", options("echo"), cancellation.clone());

        cancellation.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session did not end after cancellation")
            .unwrap();

        assert!(matches!(client_rx.next().await, Some(Message::Close(None))));
        assert!(client_rx.next().await.is_none());
    }
}
