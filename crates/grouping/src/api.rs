//! REST API client for the grouping backend.
//!
//! Wraps the six `/grouping` endpoints (submission, results, filters,
//! regeneration, approval, rating) using [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use cte_core::grouping::{
    GroupingFilters, GroupingRequest, GroupingResults, RateRequest, TaskResponse,
};
use cte_core::types::TaskId;

use crate::backend::GroupingBackend;

/// HTTP client for the grouping backend.
#[derive(Debug, Clone)]
pub struct GroupingApi {
    client: reqwest::Client,
    api_url: String,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum GroupingApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Grouping API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl GroupingApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base URL including the `/api` prefix, e.g.
    ///   `http://host:8080/api`.
    /// * `timeout` - Per-request timeout.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, GroupingApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/grouping{}", self.api_url, path)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`GroupingApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, GroupingApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GroupingApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GroupingApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), GroupingApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl GroupingBackend for GroupingApi {
    async fn submit(&self, request: &GroupingRequest) -> Result<TaskId, GroupingApiError> {
        let response = self
            .client
            .post(self.url("/request"))
            .json(request)
            .send()
            .await?;

        let task: TaskResponse = Self::parse_response(response).await?;
        tracing::info!(task_id = %task.task_id, "Grouping task submitted");
        Ok(task.task_id)
    }

    async fn regenerate(
        &self,
        task_id: &TaskId,
        request: &GroupingRequest,
    ) -> Result<TaskId, GroupingApiError> {
        let response = self
            .client
            .post(self.url(&format!("/{task_id}/regenerate")))
            .json(request)
            .send()
            .await?;

        let task: TaskResponse = Self::parse_response(response).await?;
        tracing::info!(
            previous_task_id = %task_id,
            task_id = %task.task_id,
            "Grouping regeneration submitted",
        );
        Ok(task.task_id)
    }

    async fn results(&self, task_id: &TaskId) -> Result<GroupingResults, GroupingApiError> {
        let response = self
            .client
            .get(self.url(&format!("/{task_id}/results")))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn filters(&self, task_id: &TaskId) -> Result<GroupingFilters, GroupingApiError> {
        let response = self
            .client
            .get(self.url(&format!("/{task_id}/filters")))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn approve(&self, task_id: &TaskId) -> Result<(), GroupingApiError> {
        let response = self
            .client
            .post(self.url(&format!("/{task_id}/approve")))
            .send()
            .await?;

        Self::check_status(response).await
    }

    async fn rate(&self, task_id: &TaskId, request: &RateRequest) -> Result<(), GroupingApiError> {
        let response = self
            .client
            .post(self.url(&format!("/{task_id}/rate")))
            .json(request)
            .send()
            .await?;

        Self::check_status(response).await
    }
}
