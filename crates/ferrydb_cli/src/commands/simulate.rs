//! Simulate command implementation.
//!
//! Runs a replication session between a seeded in-memory collection and a
//! seeded in-memory remote, then prints what happened.

use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use ferrydb_codec::Value;
use ferrydb_replication::{
    Direction, ReplicationConfig, ReplicationEvent, ReplicationRegistry, ReplicationState,
    ReplicationStats, ReplicationStatus, RetryConfig,
};
use ferrydb_storage::{DocumentStorage, MemoryStorage};
use ferrydb_testkit::{seeded_remote, todo, FlakyTransport, MemoryRemote};
use serde::Serialize;
use tracing::info;

/// Which directions to replicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Directions {
    /// Remote to local only.
    Pull,
    /// Local to remote only.
    Push,
    /// Both ways.
    Both,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// One line per event, then a summary.
    Text,
    /// A single JSON document.
    Json,
}

/// Options of one simulation.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Documents seeded on the remote.
    pub remote_docs: usize,
    /// Documents seeded locally.
    pub local_docs: usize,
    /// Batch size for both directions.
    pub batch_size: usize,
    /// Directions to replicate.
    pub directions: Directions,
    /// Run live for this long instead of once.
    pub live_seconds: Option<u64>,
    /// Transport calls to fail before the remote answers.
    pub failures: usize,
    /// Extra remote documents, each `ID=JSON`.
    pub extra_remote_docs: Vec<String>,
    /// Output format.
    pub format: Format,
}

/// An event as printed.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EventRecord {
    Active { active: bool },
    Received {
        id: String,
        deleted: bool,
        data: serde_json::Value,
    },
    Change {
        direction: Direction,
        id: String,
        revision: String,
        data: serde_json::Value,
    },
    Denied { id: String, reason: String },
    Error { message: String },
    Alive { alive: bool },
    Status { status: ReplicationStatus },
    Complete,
    Canceled,
}

impl From<&ReplicationEvent> for EventRecord {
    fn from(event: &ReplicationEvent) -> Self {
        match event {
            ReplicationEvent::Active(active) => Self::Active { active: *active },
            ReplicationEvent::Received(doc) => Self::Received {
                id: doc.id.to_string(),
                deleted: doc.deleted,
                data: doc.data.to_json(),
            },
            ReplicationEvent::Change {
                direction,
                document,
            } => Self::Change {
                direction: *direction,
                id: document.id.to_string(),
                revision: document.revision.to_string(),
                data: document.data.to_json(),
            },
            ReplicationEvent::Denied { document, reason } => Self::Denied {
                id: document.id.to_string(),
                reason: reason.clone(),
            },
            ReplicationEvent::Error(err) => Self::Error {
                message: err.to_string(),
            },
            ReplicationEvent::Alive(alive) => Self::Alive { alive: *alive },
            ReplicationEvent::Status(status) => Self::Status { status: *status },
            ReplicationEvent::Complete => Self::Complete,
            ReplicationEvent::Canceled => Self::Canceled,
        }
    }
}

impl EventRecord {
    fn describe(&self) -> String {
        match self {
            Self::Active { active } => format!("active     {active}"),
            Self::Received { id, deleted, .. } => {
                format!("received   {id}{}", if *deleted { " (deleted)" } else { "" })
            }
            Self::Change {
                direction,
                id,
                revision,
                ..
            } => format!("change     {direction:?} {id} @ {revision}"),
            Self::Denied { id, reason } => format!("denied     {id}: {reason}"),
            Self::Error { message } => format!("error      {message}"),
            Self::Alive { alive } => format!("alive      {alive}"),
            Self::Status { status } => format!("status     {status:?}"),
            Self::Complete => "complete".to_string(),
            Self::Canceled => "canceled".to_string(),
        }
    }
}

/// Outcome of a simulation.
#[derive(Debug, Serialize)]
struct SimulationReport {
    endpoint: String,
    status: ReplicationStatus,
    stats: ReplicationStats,
    local_documents: usize,
    remote_documents: usize,
    events: Vec<EventRecord>,
}

/// Runs the simulate command.
pub fn run(options: SimulateOptions) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(simulate(&options))?;

    match options.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => {
            for event in &report.events {
                println!("{}", event.describe());
            }
            println!();
            println!("Endpoint:          {}", report.endpoint);
            println!("Final status:      {:?}", report.status);
            println!("Rounds:            {}", report.stats.rounds);
            println!("Pulled:            {}", report.stats.pulled);
            println!("Pushed:            {}", report.stats.pushed);
            println!("Skipped:           {}", report.stats.skipped);
            println!("Denied:            {}", report.stats.denied);
            println!("Retries:           {}", report.stats.retries);
            println!("Local documents:   {}", report.local_documents);
            println!("Remote documents:  {}", report.remote_documents);
        }
    }
    Ok(())
}

fn config(options: &SimulateOptions) -> ReplicationConfig {
    let config = ReplicationConfig::new("memory://simulated-remote")
        .with_pull_batch_size(options.batch_size)
        .with_push_batch_size(options.batch_size)
        .with_live(options.live_seconds.is_some())
        .with_live_interval(Duration::from_secs(1))
        .with_retry(
            RetryConfig::new(Duration::from_millis(200)).with_max_delay(Duration::from_secs(2)),
        )
        .with_auto_start(false);
    match options.directions {
        Directions::Pull => config.pull_only(),
        Directions::Push => config.push_only(),
        Directions::Both => config,
    }
}

/// Parses `ID=JSON` into a document id and body.
fn parse_remote_doc(spec: &str) -> Result<(String, Value), Box<dyn std::error::Error>> {
    let (id, json) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected ID=JSON, got `{spec}`"))?;
    if id.is_empty() {
        return Err(format!("missing document id in `{spec}`").into());
    }
    let json: serde_json::Value = serde_json::from_str(json)?;
    Ok((id.to_string(), Value::from_json(&json)?))
}

async fn simulate(
    options: &SimulateOptions,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let remote: MemoryRemote = seeded_remote(options.remote_docs);
    for spec in &options.extra_remote_docs {
        let (id, data) = parse_remote_doc(spec)?;
        remote.write(id, data);
    }
    let storage = Arc::new(MemoryStorage::new("todos"));
    for n in 0..options.local_docs {
        storage.upsert(
            format!("local-{n:04}").into(),
            todo(&format!("written locally {n}"), false),
        )?;
    }

    let registry = ReplicationRegistry::new();
    let transport = Arc::new(FlakyTransport::new(remote.clone(), options.failures));
    let state = ReplicationState::new(&registry, storage.clone(), transport, config(options))?;
    let mut events = state.events();
    state.start()?;
    info!(endpoint = %state.endpoint(), "simulation started");

    let status = match options.live_seconds {
        None => state.await_completion().await,
        Some(seconds) => {
            state.await_initial_replication().await?;
            // One remote edit while live, picked up on the next interval.
            remote.write("remote-live-edit", Value::object([("title", "edited remotely")]));
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            state.cancel().await;
            state.status()
        }
    };

    let mut records = Vec::new();
    while let Ok(event) = events.try_recv() {
        records.push(EventRecord::from(&event));
    }

    Ok(SimulationReport {
        endpoint: state.endpoint().to_string(),
        status,
        stats: state.stats(),
        local_documents: storage.count()?,
        remote_documents: remote.live_count(),
        events: records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrydb_replication::RemoteDocument;

    #[test]
    fn parses_remote_doc() {
        let (id, data) = parse_remote_doc(r#"a={"title":"x","n":2}"#).unwrap();
        assert_eq!(id, "a");
        assert_eq!(data, Value::object([("n", Value::from(2i64)), ("title", Value::from("x"))]));
    }

    #[test]
    fn rejects_bad_remote_doc() {
        assert!(parse_remote_doc("no-separator").is_err());
        assert!(parse_remote_doc(r#"={"title":"x"}"#).is_err());
        assert!(parse_remote_doc("a={not json").is_err());
        assert!(parse_remote_doc(r#"a={"ratio":0.5}"#).is_err());
    }

    #[test]
    fn json_records_carry_body() {
        let doc = RemoteDocument::live("a", Value::object([("title", "x")]));
        let record = EventRecord::from(&ReplicationEvent::Received(doc));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "received");
        assert_eq!(json["data"]["title"], "x");
    }
}
