use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::Level;

use crate::{error::ProviderError, provider::PodStatsProvider, stats::StatsSummary};

#[tracing::instrument(level = Level::DEBUG, skip_all, err(level = Level::DEBUG))]
pub(super) async fn stats_summary(
    State(stats): State<Option<Arc<dyn PodStatsProvider>>>,
) -> Result<Json<StatsSummary>, ProviderError> {
    let stats = stats.ok_or_else(|| {
        ProviderError::NotImplemented("the provider does not support pod metrics".into())
    })?;

    stats.get_stats_summary().await.map(Json)
}
