//! End-to-end task orchestration.
//!
//! ```text
//! Idle -> Submitting -> Awaiting -> Fetching -> Done
//!              |                         |
//!              +-------------------------+-> Failed -> Idle
//! ```
//!
//! A run submits a query, then races the push channel's terminal event
//! against the fallback timer through one [`CompletionGuard`]. Whichever
//! wins triggers exactly one fetch of the results/filters bundle.
//!
//! The orchestrator owns at most one [`StatusChannel`] and one
//! [`FallbackTimer`] at a time. Once a new run has its task id, the
//! previous channel is disconnected before the new one connects. A run
//! that is no longer current (a newer run started, or `teardown` was
//! called) ends with [`OrchestratorError::Superseded`] instead of
//! delivering its results.

use std::sync::Arc;
use std::time::Duration;

use cte_core::error::CoreError;
use cte_core::grouping::{GroupingRequest, RateRequest};
use cte_core::status::{StatusEvent, TaskStatus};
use cte_core::types::TaskId;
use cte_core::validation::ensure_valid;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::api::GroupingApiError;
use crate::backend::GroupingBackend;
use crate::channel::{ChannelConfig, ChannelError, StatusChannel};
use crate::events::{CompletionSource, OrchestratorEvent, RunState};
use crate::fetcher::{FetchBundle, FetchError, ResultFetcher};
use crate::guard::CompletionGuard;
use crate::timer::{FallbackTimer, DEFAULT_FALLBACK_DELAY};
use crate::transport::StatusTransport;

/// Broadcast channel capacity for orchestrator events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Backstop delay before fetching when the push channel is silent.
    pub fallback_delay: Duration,
    pub channel: ChannelConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fallback_delay: DEFAULT_FALLBACK_DELAY,
            channel: ChannelConfig::default(),
        }
    }
}

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Input rejected before any network call.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The task could not be created.
    #[error("Failed to submit grouping task: {0}")]
    Submission(#[source] GroupingApiError),

    /// Results or filters could not be loaded.
    #[error("Failed to fetch grouping results for task {task_id}: {source}")]
    Fetch {
        task_id: TaskId,
        #[source]
        source: FetchError,
    },

    /// A newer run or a teardown replaced this run; its outcome was
    /// discarded.
    #[error("Run for task {task_id} was superseded")]
    Superseded { task_id: TaskId },

    /// An operation on the current task was requested but there is none.
    #[error("No active grouping task")]
    NoActiveTask,

    /// Approve or rate call failed.
    #[error("Grouping action failed: {0}")]
    Action(#[source] GroupingApiError),
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => OrchestratorError::Validation(msg),
        }
    }
}

/// Resources of the current run. Guarded by one async mutex so that
/// teardown of the previous run and setup of the next never interleave.
#[derive(Default)]
struct RunSlot {
    /// Bumped by every new run and by teardown. Covers the window before
    /// a run has a task id to compare.
    generation: u64,
    task_id: Option<TaskId>,
    state: RunState,
    channel: Option<StatusChannel>,
    timer: Option<FallbackTimer>,
}

impl RunSlot {
    /// Disconnect the channel and cancel the timer, whichever exist.
    async fn release(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        if let Some(mut channel) = self.channel.take() {
            channel.disconnect().await;
        }
    }

    /// Whether the run started as `generation` for `task_id` is still
    /// the one the caller cares about.
    fn is_current(&self, generation: u64, task_id: &TaskId) -> bool {
        self.generation == generation && self.task_id.as_ref() == Some(task_id)
    }
}

enum Submission {
    Request(GroupingRequest),
    Regenerate {
        previous: TaskId,
        request: GroupingRequest,
    },
}

/// Drives grouping runs from submission to fetched results.
///
/// Dropping it closes the live subscription and cancels the fallback
/// timer of the active run.
pub struct TaskOrchestrator {
    backend: Arc<dyn GroupingBackend>,
    transport: Arc<dyn StatusTransport>,
    fetcher: ResultFetcher,
    config: OrchestratorConfig,
    slot: Mutex<RunSlot>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl TaskOrchestrator {
    pub fn new(
        backend: Arc<dyn GroupingBackend>,
        transport: Arc<dyn StatusTransport>,
        config: OrchestratorConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            fetcher: ResultFetcher::new(Arc::clone(&backend)),
            backend,
            transport,
            config,
            slot: Mutex::new(RunSlot::default()),
            event_tx,
        }
    }

    /// Subscribe to state transitions, status updates and completion.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    pub async fn state(&self) -> RunState {
        self.slot.lock().await.state
    }

    /// Task id of the current (or last finished) run.
    pub async fn current_task(&self) -> Option<TaskId> {
        self.slot.lock().await.task_id.clone()
    }

    /// Check a query without touching the network.
    pub fn validate_query(query: &str) -> Result<GroupingRequest, OrchestratorError> {
        let request = GroupingRequest::new(query.trim());
        ensure_valid(&request)?;
        Ok(request)
    }

    /// Submit a new grouping query and wait for its results.
    pub async fn request(&self, query: &str) -> Result<FetchBundle, OrchestratorError> {
        let request = Self::validate_query(query)?;
        self.run(Submission::Request(request)).await
    }

    /// Regenerate the current task with a new query.
    pub async fn regenerate(&self, query: &str) -> Result<FetchBundle, OrchestratorError> {
        let request = Self::validate_query(query)?;
        let previous = self
            .current_task()
            .await
            .ok_or(OrchestratorError::NoActiveTask)?;
        self.run(Submission::Regenerate { previous, request }).await
    }

    /// Regenerate an explicitly named task with a new query.
    pub async fn regenerate_from(
        &self,
        previous: TaskId,
        query: &str,
    ) -> Result<FetchBundle, OrchestratorError> {
        let request = Self::validate_query(query)?;
        self.run(Submission::Regenerate { previous, request }).await
    }

    /// Approve the current task's grouping.
    pub async fn approve(&self) -> Result<(), OrchestratorError> {
        let task_id = self
            .current_task()
            .await
            .ok_or(OrchestratorError::NoActiveTask)?;
        self.backend
            .approve(&task_id)
            .await
            .map_err(OrchestratorError::Action)?;
        tracing::info!(task_id = %task_id, "Grouping approved");
        Ok(())
    }

    /// Rate the current task's grouping (1..=5).
    pub async fn rate(&self, rating: u8) -> Result<(), OrchestratorError> {
        let request = RateRequest { rating };
        ensure_valid(&request)?;
        let task_id = self
            .current_task()
            .await
            .ok_or(OrchestratorError::NoActiveTask)?;
        self.backend
            .rate(&task_id, &request)
            .await
            .map_err(OrchestratorError::Action)?;
        tracing::info!(task_id = %task_id, rating, "Grouping rated");
        Ok(())
    }

    /// Abandon whatever run is in progress.
    ///
    /// Disconnects the channel, cancels the timer and forgets the current
    /// task, so any fetch still in flight is discarded when it lands.
    pub async fn teardown(&self) {
        let mut slot = self.slot.lock().await;
        slot.generation += 1;
        let task_id = slot.task_id.take();
        slot.release().await;
        self.set_state(&mut slot, task_id.clone(), RunState::Idle);
        if let Some(task_id) = task_id {
            tracing::info!(task_id = %task_id, "Orchestrator torn down");
        }
    }

    // ---- private helpers ----

    async fn run(&self, submission: Submission) -> Result<FetchBundle, OrchestratorError> {
        let generation = {
            let mut slot = self.slot.lock().await;
            slot.generation += 1;
            self.set_state(&mut slot, None, RunState::Submitting);
            slot.generation
        };

        let submitted = match &submission {
            Submission::Request(request) => self.backend.submit(request).await,
            Submission::Regenerate { previous, request } => {
                self.backend.regenerate(previous, request).await
            }
        };
        let task_id = match submitted {
            Ok(task_id) => task_id,
            Err(e) => {
                tracing::error!(error = %e, "Grouping submission failed");
                let err = OrchestratorError::Submission(e);
                self.fail_submission(generation, &err).await;
                return Err(err);
            }
        };

        let (source, status) = match self.await_completion(generation, &task_id).await {
            Some(done) => done,
            None => return Err(OrchestratorError::Superseded { task_id }),
        };
        if status == Some(TaskStatus::Errored) {
            tracing::warn!(task_id = %task_id, "Backend reported task error, fetching anyway");
        }

        let fetched = self.fetcher.fetch_bundle(&task_id).await;

        let mut slot = self.slot.lock().await;
        if !slot.is_current(generation, &task_id) {
            tracing::info!(task_id = %task_id, "Discarding results of superseded run");
            return Err(OrchestratorError::Superseded { task_id });
        }

        match fetched {
            Ok(bundle) if bundle.task_id == task_id => {
                self.set_state(&mut slot, Some(task_id.clone()), RunState::Done);
                self.emit(OrchestratorEvent::Finished {
                    task_id: task_id.clone(),
                    source,
                });
                Ok(bundle)
            }
            Ok(bundle) => {
                tracing::warn!(
                    task_id = %task_id,
                    bundle_task_id = %bundle.task_id,
                    "Discarding bundle fetched for a different task",
                );
                Err(OrchestratorError::Superseded { task_id })
            }
            Err(source) => {
                tracing::error!(task_id = %task_id, error = %source, "Fetching grouping results failed");
                let err = OrchestratorError::Fetch {
                    task_id: task_id.clone(),
                    source,
                };
                self.set_state(&mut slot, Some(task_id.clone()), RunState::Failed);
                self.emit(OrchestratorEvent::Failed {
                    task_id: Some(task_id.clone()),
                    message: err.to_string(),
                });
                self.set_state(&mut slot, Some(task_id), RunState::Idle);
                Err(err)
            }
        }
    }

    /// Install the channel and timer for `task_id` and wait for the first
    /// of them to fire.
    ///
    /// Returns `None` if the run was superseded, before or while waiting.
    /// Otherwise the channel is disconnected, the timer cancelled and the
    /// state is `Fetching`.
    async fn await_completion(
        &self,
        generation: u64,
        task_id: &TaskId,
    ) -> Option<(CompletionSource, Option<TaskStatus>)> {
        let guard = Arc::new(CompletionGuard::new());
        let (done_tx, mut done_rx) = mpsc::channel(1);

        {
            let mut slot = self.slot.lock().await;
            if slot.generation != generation {
                tracing::info!(task_id = %task_id, "Run superseded during submission");
                return None;
            }
            // Leftovers from an earlier run must be gone before the new
            // subscription exists.
            slot.release().await;
            slot.task_id = Some(task_id.clone());

            let mut channel = StatusChannel::new(Arc::clone(&self.transport), self.config.channel.clone());
            let on_event = {
                let guard = Arc::clone(&guard);
                let done_tx = done_tx.clone();
                let event_tx = self.event_tx.clone();
                move |event: StatusEvent| {
                    let _ = event_tx.send(OrchestratorEvent::Status(event.clone()));
                    if event.is_terminal() {
                        guard.fire_once(|| {
                            let _ = done_tx.try_send((CompletionSource::Push, Some(event.status)));
                        });
                    }
                }
            };
            let on_error = {
                let task_id = task_id.clone();
                move |e: ChannelError| {
                    tracing::warn!(task_id = %task_id, error = %e, "Status channel error, relying on fallback timer");
                }
            };
            channel.connect(task_id.clone(), on_event, on_error).await;

            let timer = FallbackTimer::start(self.config.fallback_delay, {
                let guard = Arc::clone(&guard);
                let task_id = task_id.clone();
                move || {
                    guard.fire_once(|| {
                        tracing::info!(task_id = %task_id, "No terminal status yet, proceeding on fallback timer");
                        let _ = done_tx.try_send((CompletionSource::Fallback, None));
                    });
                }
            });

            slot.channel = Some(channel);
            slot.timer = Some(timer);
            self.set_state(&mut slot, Some(task_id.clone()), RunState::Awaiting);
        }

        // All senders now live in the channel handler and the timer
        // action; both are dropped if this run is superseded.
        let Some((source, status)) = done_rx.recv().await else {
            tracing::info!(task_id = %task_id, "Run superseded while awaiting completion");
            return None;
        };

        let mut slot = self.slot.lock().await;
        if !slot.is_current(generation, task_id) {
            tracing::info!(task_id = %task_id, "Run superseded before fetching");
            return None;
        }
        slot.release().await;
        tracing::info!(task_id = %task_id, ?source, "Task complete, fetching results");
        self.set_state(&mut slot, Some(task_id.clone()), RunState::Fetching);
        Some((source, status))
    }

    /// Record a failed submission. A previous run still awaiting is
    /// abandoned as well, since the caller has moved on from it.
    async fn fail_submission(&self, generation: u64, err: &OrchestratorError) {
        let mut slot = self.slot.lock().await;
        if slot.generation != generation {
            return;
        }
        slot.task_id = None;
        slot.release().await;
        self.set_state(&mut slot, None, RunState::Failed);
        self.emit(OrchestratorEvent::Failed {
            task_id: None,
            message: err.to_string(),
        });
        self.set_state(&mut slot, None, RunState::Idle);
    }

    fn set_state(&self, slot: &mut RunSlot, task_id: Option<TaskId>, state: RunState) {
        slot.state = state;
        tracing::debug!(task_id = ?task_id.as_ref().map(TaskId::as_str), ?state, "Run state changed");
        self.emit(OrchestratorEvent::StateChanged { task_id, state });
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No receivers is fine.
        let _ = self.event_tx.send(event);
    }
}
