//! HTTP routes of the node API server.
//!
//! Paths follow the kubelet API, so that the Kubernetes API server can proxy `kubectl logs`,
//! `kubectl exec` and friends to the virtual node.

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ProviderError,
    provider::{PodProvider, PodStatsProvider},
};

mod exec;
mod metrics;
mod pods;

/// Routes of the secured pod listener.
///
/// Exec sessions outlive their HTTP connection, `cancellation` ends them.
pub(crate) fn pod_routes(
    provider: Arc<dyn PodProvider>,
    cancellation: CancellationToken,
) -> Router {
    Router::new()
        .route(
            "/containerLogs/{namespace}/{pod}/{container}",
            get(pods::container_logs),
        )
        .route(
            "/exec/{namespace}/{pod}/{container}",
            get(exec::exec).post(exec::exec),
        )
        .route("/pods", get(pods::running_pods))
        .route("/runningpods/", get(pods::running_pods))
        .with_state(provider)
        .layer(Extension(cancellation))
}

/// Routes of the plaintext metrics listener.
pub(crate) fn metrics_routes(stats: Option<Arc<dyn PodStatsProvider>>) -> Router {
    Router::new()
        .route("/stats/summary", get(metrics::stats_summary))
        .with_state(stats)
}

/// Parses a boolean query parameter the way the kubelet does.
fn parse_flag(name: &str, value: &str) -> Result<bool, ProviderError> {
    match value {
        "1" | "true" | "True" | "TRUE" => Ok(true),
        "" | "0" | "false" | "False" | "FALSE" => Ok(false),
        other => Err(ProviderError::InvalidInput(format!(
            "invalid value `{other}` of `{name}`, expected a boolean"
        ))),
    }
}

#[cfg(test)]
pub(crate) mod test {
    //! In-memory provider shared by the route tests.

    use std::sync::Mutex;

    use bytes::Bytes;
    use futures::stream;
    use k8s_openapi::{api::core::v1::Pod, apimachinery::pkg::apis::meta::v1::ObjectMeta};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use crate::{
        error::ProviderError,
        provider::{AttachIo, ContainerRef, LogOptions, LogStream, PodProvider},
    };

    pub(crate) fn pod(namespace: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Knows a single container, `default/nginx/nginx`.
    ///
    /// Exec supports two commands:
    ///
    /// 1. `echo` echoes the first stdin line to stdout with an `out:` prefix, and writes `err` to
    ///    stderr;
    /// 2. `cat` copies stdin to stdout until either of them is closed.
    #[derive(Default)]
    pub(crate) struct FakePods {
        pub(crate) log_requests: Mutex<Vec<(ContainerRef, LogOptions)>>,
    }

    fn check(container: &ContainerRef) -> Result<(), ProviderError> {
        if container.namespace == "default" && container.pod == "nginx" {
            Ok(())
        } else {
            Err(ProviderError::NotFound(format!("container {container} not found")))
        }
    }

    #[async_trait::async_trait]
    impl PodProvider for FakePods {
        async fn get_container_logs(
            &self,
            container: &ContainerRef,
            options: LogOptions,
        ) -> Result<LogStream, ProviderError> {
            check(container)?;
            self.log_requests
                .lock()
                .unwrap()
                .push((container.clone(), options));

            let lines = ["first line\n", "second line\n"]
                .map(|line| Ok(Bytes::from_static(line.as_bytes())));
            Ok(Box::pin(stream::iter(lines)))
        }

        async fn run_in_container(
            &self,
            container: &ContainerRef,
            command: Vec<String>,
            io: AttachIo,
        ) -> Result<(), ProviderError> {
            check(container)?;
            match command.first().map(String::as_str) {
                Some("echo") => {}
                Some("cat") => {
                    if let (Some(mut stdin), Some(mut stdout)) = (io.stdin, io.stdout) {
                        let _ = tokio::io::copy(&mut stdin, &mut stdout).await;
                    }
                    return Ok(());
                }
                _ => {
                    return Err(ProviderError::InvalidInput(format!(
                        "unknown command {command:?}"
                    )))
                }
            }

            let mut line = String::new();
            if let Some(stdin) = io.stdin {
                BufReader::new(stdin).read_line(&mut line).await.unwrap();
            }

            if let Some(mut stdout) = io.stdout {
                stdout
                    .write_all(format!("out:{line}").as_bytes())
                    .await
                    .unwrap();
            }

            if let Some(mut stderr) = io.stderr {
                stderr.write_all(b"err").await.unwrap();
            }

            Ok(())
        }

        async fn get_pods(&self) -> Result<Vec<Pod>, ProviderError> {
            Ok(vec![pod("default", "nginx")])
        }
    }
}
