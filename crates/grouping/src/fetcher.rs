//! Fetches the two resources a finished task produces.

use std::sync::Arc;

use cte_core::grouping::{GroupingFilters, GroupingResults};
use cte_core::types::TaskId;
use serde::Serialize;

use crate::api::GroupingApiError;
use crate::backend::GroupingBackend;

/// Results and filters of one task, both fetched for the same task id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchBundle {
    pub task_id: TaskId,
    pub results: GroupingResults,
    pub filters: GroupingFilters,
}

/// Either dependent fetch failed; no bundle is produced.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to load results: {0}")]
    Results(#[source] GroupingApiError),

    #[error("Failed to load filters: {0}")]
    Filters(#[source] GroupingApiError),
}

pub struct ResultFetcher {
    backend: Arc<dyn GroupingBackend>,
}

impl ResultFetcher {
    pub fn new(backend: Arc<dyn GroupingBackend>) -> Self {
        Self { backend }
    }

    /// Fetch results and filters for `task_id` concurrently.
    ///
    /// Succeeds only if both succeed. On the first failure the other
    /// request is abandoned and nothing is kept.
    pub async fn fetch_bundle(&self, task_id: &TaskId) -> Result<FetchBundle, FetchError> {
        let (results, filters) = tokio::try_join!(
            async {
                self.backend
                    .results(task_id)
                    .await
                    .map_err(FetchError::Results)
            },
            async {
                self.backend
                    .filters(task_id)
                    .await
                    .map_err(FetchError::Filters)
            },
        )?;

        tracing::info!(
            task_id = %task_id,
            cards = results.cards.len(),
            filters = filters.filters.len(),
            "Fetched grouping results",
        );

        Ok(FetchBundle {
            task_id: task_id.clone(),
            results,
            filters,
        })
    }
}
