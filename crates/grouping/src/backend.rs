//! The REST operations the orchestrator depends on.
//!
//! [`crate::api::GroupingApi`] implements this over HTTP; tests plug in
//! in-memory fakes.

use async_trait::async_trait;
use cte_core::grouping::{GroupingFilters, GroupingRequest, GroupingResults, RateRequest};
use cte_core::types::TaskId;

use crate::api::GroupingApiError;

#[async_trait]
pub trait GroupingBackend: Send + Sync + 'static {
    /// `POST /grouping/request` -> new task id.
    async fn submit(&self, request: &GroupingRequest) -> Result<TaskId, GroupingApiError>;

    /// `POST /grouping/{taskId}/regenerate` -> new task id.
    async fn regenerate(
        &self,
        task_id: &TaskId,
        request: &GroupingRequest,
    ) -> Result<TaskId, GroupingApiError>;

    /// `GET /grouping/{taskId}/results`.
    async fn results(&self, task_id: &TaskId) -> Result<GroupingResults, GroupingApiError>;

    /// `GET /grouping/{taskId}/filters`.
    async fn filters(&self, task_id: &TaskId) -> Result<GroupingFilters, GroupingApiError>;

    /// `POST /grouping/{taskId}/approve`.
    async fn approve(&self, task_id: &TaskId) -> Result<(), GroupingApiError>;

    /// `POST /grouping/{taskId}/rate`.
    async fn rate(&self, task_id: &TaskId, request: &RateRequest) -> Result<(), GroupingApiError>;
}
