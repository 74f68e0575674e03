//! Shared fixtures for the grouping integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cte_core::grouping::{GroupingFilters, GroupingRequest, GroupingResults, RateRequest};
use cte_core::types::TaskId;
use cte_grouping::api::GroupingApiError;
use cte_grouping::backend::GroupingBackend;
use cte_grouping::orchestrator::{OrchestratorConfig, TaskOrchestrator};
use cte_grouping::transport::memory::MemoryBroker;
use serde_json::json;
use tokio::time::Instant;

/// One backend call, as observed by [`FakeBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Submit(String),
    Regenerate { previous: String, query: String },
    Results(String),
    Filters(String),
    Approve(String),
    Rate(String, u8),
}

#[derive(Default)]
struct Script {
    task_ids: VecDeque<TaskId>,
    fail_submit: bool,
    fail_filters: HashSet<String>,
    submit_delay: Duration,
    fetch_delay: Duration,
    calls: Vec<(Call, Instant)>,
}

/// Scripted [`GroupingBackend`] that hands out task ids in order and
/// records every call with the (paused) clock time it was made.
#[derive(Clone, Default)]
pub struct FakeBackend {
    script: Arc<Mutex<Script>>,
}

impl FakeBackend {
    pub fn with_tasks(ids: &[&str]) -> Self {
        let backend = Self::default();
        backend.script().task_ids = ids.iter().map(|id| TaskId::new(*id)).collect();
        backend
    }

    pub fn fail_submit(self) -> Self {
        self.script().fail_submit = true;
        self
    }

    pub fn fail_filters_for(self, task_id: &str) -> Self {
        self.script().fail_filters.insert(task_id.to_string());
        self
    }

    pub fn submit_delay(self, delay: Duration) -> Self {
        self.script().submit_delay = delay;
        self
    }

    pub fn fetch_delay(self, delay: Duration) -> Self {
        self.script().fetch_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.iter().map(|(c, _)| c.clone()).collect()
    }

    /// Times at which `results` was called for `task_id`.
    pub fn results_calls(&self, task_id: &str) -> Vec<Instant> {
        self.script()
            .calls
            .iter()
            .filter(|(c, _)| *c == Call::Results(task_id.to_string()))
            .map(|(_, at)| *at)
            .collect()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    fn record(&self, call: Call) {
        self.script().calls.push((call, Instant::now()));
    }

    async fn next_task(&self) -> Result<TaskId, GroupingApiError> {
        let delay = self.script().submit_delay;
        tokio::time::sleep(delay).await;
        let mut script = self.script();
        if script.fail_submit {
            return Err(GroupingApiError::ApiError {
                status: 503,
                body: "grouping service unavailable".into(),
            });
        }
        Ok(script.task_ids.pop_front().expect("no scripted task id left"))
    }
}

#[async_trait]
impl GroupingBackend for FakeBackend {
    async fn submit(&self, request: &GroupingRequest) -> Result<TaskId, GroupingApiError> {
        self.record(Call::Submit(request.query.clone()));
        self.next_task().await
    }

    async fn regenerate(
        &self,
        task_id: &TaskId,
        request: &GroupingRequest,
    ) -> Result<TaskId, GroupingApiError> {
        self.record(Call::Regenerate {
            previous: task_id.to_string(),
            query: request.query.clone(),
        });
        self.next_task().await
    }

    async fn results(&self, task_id: &TaskId) -> Result<GroupingResults, GroupingApiError> {
        self.record(Call::Results(task_id.to_string()));
        let delay = self.script().fetch_delay;
        tokio::time::sleep(delay).await;
        Ok(results_for(task_id.as_str()))
    }

    async fn filters(&self, task_id: &TaskId) -> Result<GroupingFilters, GroupingApiError> {
        self.record(Call::Filters(task_id.to_string()));
        let (delay, fail) = {
            let script = self.script();
            (script.fetch_delay, script.fail_filters.contains(task_id.as_str()))
        };
        tokio::time::sleep(delay).await;
        if fail {
            return Err(GroupingApiError::ApiError {
                status: 500,
                body: "filters unavailable".into(),
            });
        }
        Ok(filters_for(task_id.as_str()))
    }

    async fn approve(&self, task_id: &TaskId) -> Result<(), GroupingApiError> {
        self.record(Call::Approve(task_id.to_string()));
        Ok(())
    }

    async fn rate(&self, task_id: &TaskId, request: &RateRequest) -> Result<(), GroupingApiError> {
        self.record(Call::Rate(task_id.to_string(), request.rating));
        Ok(())
    }
}

pub fn results_for(task_id: &str) -> GroupingResults {
    serde_json::from_value(json!({
        "cards": [
            { "id": format!("{task_id}-card-1"), "name": "Trail runner", "brand": "Acme" },
            { "id": format!("{task_id}-card-2"), "name": "Road runner" }
        ]
    }))
    .unwrap()
}

pub fn filters_for(task_id: &str) -> GroupingFilters {
    serde_json::from_value(json!([
        { "id": format!("{task_id}-size"), "name": "Size", "values": ["41", "42"] }
    ]))
    .unwrap()
}

pub fn topic(task_id: &str) -> String {
    format!("/topic/tasks/{task_id}/status")
}

pub fn status(task_id: &str, status: &str) -> String {
    format!(r#"{{"taskId":"{task_id}","status":"{status}"}}"#)
}

pub fn orchestrator(backend: &FakeBackend, broker: &MemoryBroker) -> Arc<TaskOrchestrator> {
    Arc::new(TaskOrchestrator::new(
        Arc::new(backend.clone()),
        Arc::new(broker.clone()),
        OrchestratorConfig::default(),
    ))
}

/// Let spawned tasks run until they park, without moving the clock.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
