use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use http::header;
use k8s_openapi::{api::core::v1::Pod, List};
use tracing::Level;

use super::parse_flag;
use crate::{
    error::ProviderError,
    provider::{ContainerRef, LogOptions, PodProvider},
};

impl LogOptions {
    /// Parses the query of a container logs request, validating it like the kubelet does.
    pub(crate) fn from_query(query: &HashMap<String, String>) -> Result<Self, ProviderError> {
        let int = |name: &str, min: i64| -> Result<Option<i64>, ProviderError> {
            let Some(value) = query.get(name) else {
                return Ok(None);
            };

            match value.parse::<i64>() {
                Ok(parsed) if parsed >= min => Ok(Some(parsed)),
                _ => Err(ProviderError::InvalidInput(format!(
                    "`{name}` must be an integer not lower than {min}, got `{value}`"
                ))),
            }
        };

        let flag = |name: &str| -> Result<bool, ProviderError> {
            query
                .get(name)
                .map(|value| parse_flag(name, value))
                .transpose()
                .map(Option::unwrap_or_default)
        };

        let since_time = query
            .get("sinceTime")
            .map(|value| {
                DateTime::parse_from_rfc3339(value)
                    .map(|time| time.with_timezone(&Utc))
                    .map_err(|error| {
                        ProviderError::InvalidInput(format!("invalid `sinceTime`: {error}"))
                    })
            })
            .transpose()?;

        let options = Self {
            tail_lines: int("tailLines", 0)?,
            limit_bytes: int("limitBytes", 1)?,
            timestamps: flag("timestamps")?,
            follow: flag("follow")?,
            previous: flag("previous")?,
            since_seconds: int("sinceSeconds", 1)?,
            since_time,
        };

        if options.since_seconds.is_some() && options.since_time.is_some() {
            return Err(ProviderError::InvalidInput(
                "at most one of `sinceTime` and `sinceSeconds` can be set".into(),
            ));
        }

        Ok(options)
    }
}

#[tracing::instrument(level = Level::DEBUG, skip(provider), err(level = Level::DEBUG))]
pub(super) async fn container_logs(
    State(provider): State<Arc<dyn PodProvider>>,
    Path((namespace, pod, container)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ProviderError> {
    let options = LogOptions::from_query(&query)?;
    let container = ContainerRef {
        namespace,
        pod,
        container,
    };

    let logs = provider.get_container_logs(&container, options).await?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain")],
        Body::from_stream(logs),
    )
        .into_response())
}

#[tracing::instrument(level = Level::DEBUG, skip_all, err(level = Level::DEBUG))]
pub(super) async fn running_pods(
    State(provider): State<Arc<dyn PodProvider>>,
) -> Result<Json<List<Pod>>, ProviderError> {
    let items = provider.get_pods().await?;

    Ok(Json(List {
        items,
        metadata: Default::default(),
    }))
}
