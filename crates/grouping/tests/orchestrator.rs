//! End-to-end runs against a scripted backend and the in-memory broker.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use cte_grouping::events::{CompletionSource, OrchestratorEvent, RunState};
use cte_grouping::fetcher::FetchError;
use cte_grouping::orchestrator::OrchestratorError;
use cte_grouping::transport::memory::{BrokerLog, MemoryBroker};
use tokio::time::Instant;

use common::{orchestrator, settle, status, topic, Call, FakeBackend};

#[tokio::test(start_paused = true)]
async fn push_completion_fetches_immediately() {
    let backend = FakeBackend::with_tasks(&["t1"]);
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);
    let start = Instant::now();

    let run = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("running shoes").await }
    });
    settle().await;
    assert_eq!(orch.state().await, RunState::Awaiting);
    assert_eq!(broker.live_sessions(&topic("t1")), 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    broker.publish(&topic("t1"), status("t1", "COMPLETED"));

    let bundle = run.await.unwrap().unwrap();
    assert_eq!(bundle.task_id.as_str(), "t1");
    assert_eq!(bundle.results, common::results_for("t1"));
    assert_eq!(bundle.filters, common::filters_for("t1"));

    let fetched = backend.results_calls("t1");
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0] - start, Duration::from_millis(1200));

    // The fallback must not trigger a second fetch later on.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.results_calls("t1").len(), 1);
    assert_eq!(orch.state().await, RunState::Done);
    assert_eq!(broker.total_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn silent_channel_falls_back_after_delay() {
    let backend = FakeBackend::with_tasks(&["t2"]);
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);
    let mut events = orch.subscribe();
    let start = Instant::now();

    let bundle = orch.request("boots").await.unwrap();
    assert_eq!(bundle.task_id.as_str(), "t2");

    let fetched = backend.results_calls("t2");
    assert_eq!(fetched, vec![start + Duration::from_millis(5000)]);

    let mut finished = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let OrchestratorEvent::Finished { task_id, source } = event {
            finished.push((task_id.to_string(), source));
        }
    }
    assert_eq!(finished, vec![("t2".to_string(), CompletionSource::Fallback)]);
}

#[tokio::test(start_paused = true)]
async fn simultaneous_push_and_fallback_fetch_once() {
    let backend = FakeBackend::with_tasks(&["t1"]);
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);

    let run = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("shoes").await }
    });
    settle().await;

    tokio::time::sleep(Duration::from_millis(5000)).await;
    broker.publish(&topic("t1"), status("t1", "COMPLETED"));

    run.await.unwrap().unwrap();
    settle().await;
    let fetches: Vec<_> = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Results(_) | Call::Filters(_)))
        .collect();
    assert_eq!(fetches.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn progress_updates_are_forwarded() {
    let backend = FakeBackend::with_tasks(&["t1"]);
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);
    let mut events = orch.subscribe();

    let run = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("shoes").await }
    });
    settle().await;

    broker.publish(
        &topic("t1"),
        r#"{"taskId":"t1","status":"RUNNING","progress":40,"message":"clustering"}"#,
    );
    broker.publish(&topic("t1"), status("t1", "COMPLETED"));
    run.await.unwrap().unwrap();

    let mut states = Vec::new();
    let mut progress = Vec::new();
    let mut source = None;
    while let Ok(event) = events.try_recv() {
        match event {
            OrchestratorEvent::StateChanged { state, .. } => states.push(state),
            OrchestratorEvent::Status(e) => progress.push(e.progress),
            OrchestratorEvent::Finished { source: s, .. } => source = Some(s),
            OrchestratorEvent::Failed { message, .. } => panic!("unexpected failure: {message}"),
        }
    }
    assert_eq!(
        states,
        vec![RunState::Submitting, RunState::Awaiting, RunState::Fetching, RunState::Done]
    );
    assert_eq!(progress, vec![Some(40.0), None]);
    assert_eq!(source, Some(CompletionSource::Push));
}

#[tokio::test(start_paused = true)]
async fn errored_task_still_fetches() {
    let backend = FakeBackend::with_tasks(&["t1"]);
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);

    let run = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("shoes").await }
    });
    settle().await;
    broker.publish(&topic("t1"), status("t1", "ERROR"));

    assert!(run.await.unwrap().is_ok());
    assert_eq!(backend.results_calls("t1").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_query_is_rejected_without_network() {
    let backend = FakeBackend::with_tasks(&["t1"]);
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);

    let err = orch.request("   ").await.unwrap_err();
    assert_matches!(err, OrchestratorError::Validation(_));
    assert!(backend.calls().is_empty());
    assert!(broker.log().is_empty());
    assert_eq!(orch.state().await, RunState::Idle);
}

#[tokio::test(start_paused = true)]
async fn failed_filters_fail_the_run() {
    let backend = FakeBackend::with_tasks(&["t3"]).fail_filters_for("t3");
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);
    let mut events = orch.subscribe();

    let run = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("shoes").await }
    });
    settle().await;
    broker.publish(&topic("t3"), status("t3", "COMPLETED"));

    let err = run.await.unwrap().unwrap_err();
    assert_matches!(
        err,
        OrchestratorError::Fetch { ref task_id, source: FetchError::Filters(_) } if task_id.as_str() == "t3"
    );
    assert_eq!(orch.state().await, RunState::Idle);
    assert_eq!(broker.total_sessions(), 0);

    let mut failed = 0;
    let mut finished = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            OrchestratorEvent::Failed { .. } => failed += 1,
            OrchestratorEvent::Finished { .. } => finished += 1,
            _ => {}
        }
    }
    assert_eq!((failed, finished), (1, 0));
}

#[tokio::test(start_paused = true)]
async fn failed_submission_creates_no_subscription() {
    let backend = FakeBackend::with_tasks(&[]).fail_submit();
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);

    let err = orch.request("shoes").await.unwrap_err();
    assert_matches!(err, OrchestratorError::Submission(_));
    assert_eq!(orch.state().await, RunState::Idle);
    assert!(broker.log().is_empty());

    // Nothing is left behind to fire later.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn new_run_disconnects_previous_subscription_first() {
    let backend = FakeBackend::with_tasks(&["t1", "t2"]);
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);

    let first = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("shoes").await }
    });
    settle().await;

    let second = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("boots").await }
    });
    settle().await;

    assert_eq!(
        broker.log(),
        vec![
            BrokerLog::Opened(topic("t1")),
            BrokerLog::Closed(topic("t1")),
            BrokerLog::Opened(topic("t2")),
        ]
    );
    assert_matches!(
        first.await.unwrap(),
        Err(OrchestratorError::Superseded { ref task_id }) if task_id.as_str() == "t1"
    );

    // A late event for the old task reaches nobody.
    assert_eq!(broker.publish(&topic("t1"), status("t1", "COMPLETED")), 0);

    broker.publish(&topic("t2"), status("t2", "COMPLETED"));
    let bundle = second.await.unwrap().unwrap();
    assert_eq!(bundle.task_id.as_str(), "t2");
    assert!(backend.results_calls("t1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_fetch_is_discarded() {
    let backend = FakeBackend::with_tasks(&["t1", "t2"]).fetch_delay(Duration::from_secs(2));
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);
    let mut events = orch.subscribe();

    let first = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("shoes").await }
    });
    settle().await;
    broker.publish(&topic("t1"), status("t1", "COMPLETED"));

    // t1's fetch is now in flight; a new run takes over before it lands.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(orch.state().await, RunState::Fetching);
    let second = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("boots").await }
    });

    assert_matches!(
        first.await.unwrap(),
        Err(OrchestratorError::Superseded { ref task_id }) if task_id.as_str() == "t1"
    );
    assert_eq!(orch.current_task().await.unwrap().as_str(), "t2");

    broker.publish(&topic("t2"), status("t2", "COMPLETED"));
    let bundle = second.await.unwrap().unwrap();
    assert_eq!(bundle.task_id.as_str(), "t2");

    while let Ok(event) = events.try_recv() {
        if let OrchestratorEvent::Finished { task_id, .. } = event {
            assert_eq!(task_id.as_str(), "t2");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn teardown_mid_run_releases_everything() {
    let backend = FakeBackend::with_tasks(&["t1"]);
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);

    let run = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("shoes").await }
    });
    settle().await;
    assert_eq!(broker.total_sessions(), 1);

    orch.teardown().await;
    assert_eq!(broker.total_sessions(), 0);
    assert_eq!(orch.state().await, RunState::Idle);
    assert_eq!(orch.current_task().await, None);
    assert_matches!(run.await.unwrap(), Err(OrchestratorError::Superseded { .. }));

    // The cancelled fallback never fires.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(backend.results_calls("t1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn teardown_during_submission_stops_the_run() {
    let backend = FakeBackend::with_tasks(&["t1"]).submit_delay(Duration::from_millis(300));
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);

    let run = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("shoes").await }
    });
    settle().await;
    assert_eq!(orch.state().await, RunState::Submitting);

    orch.teardown().await;
    assert_matches!(
        run.await.unwrap(),
        Err(OrchestratorError::Superseded { ref task_id }) if task_id.as_str() == "t1"
    );
    assert!(broker.log().is_empty());
    assert_eq!(orch.state().await, RunState::Idle);
}

#[tokio::test(start_paused = true)]
async fn slow_older_submission_does_not_displace_newer_run() {
    let backend = FakeBackend::with_tasks(&["t1", "t2"]).submit_delay(Duration::from_millis(500));
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);

    // Both submissions are in flight; the older one returns first, at 500ms.
    let older = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("shoes").await }
    });
    settle().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let newer = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("boots").await }
    });

    assert_matches!(
        older.await.unwrap(),
        Err(OrchestratorError::Superseded { ref task_id }) if task_id.as_str() == "t1"
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;
    assert_eq!(orch.state().await, RunState::Awaiting);
    assert_eq!(orch.current_task().await.unwrap().as_str(), "t2");
    assert_eq!(broker.log(), vec![BrokerLog::Opened(topic("t2"))]);

    broker.publish(&topic("t2"), status("t2", "COMPLETED"));
    assert_eq!(newer.await.unwrap().unwrap().task_id.as_str(), "t2");
}

#[tokio::test(start_paused = true)]
async fn channel_errors_leave_the_fallback_in_charge() {
    let backend = FakeBackend::with_tasks(&["t1"]);
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);
    let start = Instant::now();

    let run = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("shoes").await }
    });
    settle().await;
    broker.inject_error(
        &topic("t1"),
        cte_grouping::channel::ChannelError::Protocol("broker hiccup".into()),
    );

    run.await.unwrap().unwrap();
    assert_eq!(
        backend.results_calls("t1"),
        vec![start + Duration::from_millis(5000)]
    );
}

#[tokio::test(start_paused = true)]
async fn regenerate_uses_current_task_then_actions_follow_it() {
    let backend = FakeBackend::with_tasks(&["t1", "t2"]);
    let broker = MemoryBroker::new();
    let orch = orchestrator(&backend, &broker);

    let first = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request("shoes").await }
    });
    settle().await;
    broker.publish(&topic("t1"), status("t1", "COMPLETED"));
    first.await.unwrap().unwrap();

    let second = tokio::spawn({
        let orch = orch.clone();
        async move { orch.regenerate("only red shoes").await }
    });
    settle().await;
    broker.publish(&topic("t2"), status("t2", "COMPLETED"));
    let bundle = second.await.unwrap().unwrap();
    assert_eq!(bundle.task_id.as_str(), "t2");

    orch.approve().await.unwrap();
    orch.rate(4).await.unwrap();

    let calls = backend.calls();
    assert!(calls.contains(&Call::Regenerate {
        previous: "t1".into(),
        query: "only red shoes".into(),
    }));
    assert!(calls.ends_with(&[Call::Approve("t2".into()), Call::Rate("t2".into(), 4)]));
}
