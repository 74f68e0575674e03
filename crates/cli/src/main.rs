//! `cte-grouping` -- command-line client for the grouping backend.
//!
//! Submits a grouping query (or regenerates an existing task), waits for
//! the push channel or the fallback timer to report completion, and
//! prints the fetched results and filters as JSON on stdout. Logs go to
//! stderr.
//!
//! Configuration comes from the environment (and `.env`); see
//! [`GroupingConfig::from_env`] for the variables. `LOG_FORMAT=json`
//! switches log output to JSON lines.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cte_core::grouping::RateRequest;
use cte_core::types::TaskId;
use cte_core::validation::ensure_valid;
use cte_grouping::api::GroupingApi;
use cte_grouping::backend::GroupingBackend;
use cte_grouping::client::StompClient;
use cte_grouping::config::GroupingConfig;
use cte_grouping::events::OrchestratorEvent;
use cte_grouping::orchestrator::TaskOrchestrator;
use cte_grouping::transport::stomp::StompTransport;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::Instrument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const DEFAULT_LOG_FILTER: &str = "cte_grouping=info,cte_cli=info";

#[derive(Parser, Debug)]
#[command(name = "cte-grouping")]
#[command(about = "Submit product grouping tasks and fetch their results")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a new query and wait for its results.
    Request {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Regenerate an existing task with a new query.
    Regenerate {
        task_id: String,
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Approve a task's grouping.
    Approve { task_id: String },
    /// Rate a task's grouping from 1 to 5.
    Rate { task_id: String, rating: u8 },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let span = tracing::info_span!("cli", run_id = %Uuid::new_v4());

    match run(cli.command).instrument(span).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(command: Command) -> anyhow::Result<String> {
    let config = GroupingConfig::from_env().context("Invalid configuration")?;
    let api = GroupingApi::new(config.api_base_url.clone(), config.request_timeout)
        .context("Failed to build HTTP client")?;

    tracing::info!(
        api_url = %config.api_base_url,
        ws_url = %config.ws_url,
        fallback_delay_ms = config.fallback_delay.as_millis() as u64,
        "Starting cte-grouping",
    );

    let output = match command {
        Command::Request { query } => {
            let orchestrator = build_orchestrator(api, &config);
            let bundle = orchestrator.request(&query.join(" ")).await?;
            serde_json::to_value(bundle)?
        }
        Command::Regenerate { task_id, query } => {
            let orchestrator = build_orchestrator(api, &config);
            let bundle = orchestrator
                .regenerate_from(TaskId::new(task_id), &query.join(" "))
                .await?;
            serde_json::to_value(bundle)?
        }
        Command::Approve { task_id } => {
            let task_id = TaskId::new(task_id);
            api.approve(&task_id).await?;
            tracing::info!(task_id = %task_id, "Grouping approved");
            json!({ "taskId": task_id, "approved": true })
        }
        Command::Rate { task_id, rating } => {
            let request = RateRequest { rating };
            ensure_valid(&request)?;
            let task_id = TaskId::new(task_id);
            api.rate(&task_id, &request).await?;
            tracing::info!(task_id = %task_id, rating, "Grouping rated");
            json!({ "taskId": task_id, "rating": rating })
        }
    };

    Ok(serde_json::to_string_pretty(&output)?)
}

fn build_orchestrator(api: GroupingApi, config: &GroupingConfig) -> TaskOrchestrator {
    let transport = StompTransport::new(StompClient::new(config.ws_url.clone(), config.heartbeat));
    let orchestrator =
        TaskOrchestrator::new(Arc::new(api), Arc::new(transport), config.orchestrator());
    log_events(&orchestrator);
    orchestrator
}

/// Mirror orchestrator events into the log until the orchestrator is gone.
fn log_events(orchestrator: &TaskOrchestrator) {
    let mut events = orchestrator.subscribe();
    tokio::spawn(
        async move {
            loop {
                match events.recv().await {
                    Ok(OrchestratorEvent::Status(event)) => tracing::info!(
                        task_id = %event.task_id,
                        status = event.status.as_str(),
                        progress = event.progress,
                        message = event.message.as_deref(),
                        at = ?event.occurred_at(),
                        "Task status",
                    ),
                    Ok(OrchestratorEvent::StateChanged { task_id, state }) => tracing::debug!(
                        task_id = ?task_id.as_ref().map(TaskId::as_str),
                        ?state,
                        "Run state",
                    ),
                    Ok(OrchestratorEvent::Finished { task_id, source }) => {
                        tracing::info!(task_id = %task_id, ?source, "Task finished")
                    }
                    Ok(OrchestratorEvent::Failed { task_id, message }) => tracing::warn!(
                        task_id = ?task_id.as_ref().map(TaskId::as_str),
                        %message,
                        "Run failed",
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Event log lagging")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        .in_current_span(),
    );
}
