//! Replication session orchestration.
//!
//! A [`ReplicationState`] owns one session between a local collection and a
//! remote endpoint. It runs on a single tokio task which repeats *rounds*:
//! a round drains the pull and push directions concurrently, batch by
//! batch, until neither has more. After a round the session either
//! completes (one-shot), idles until the next trigger (live) or, if the
//! round failed, backs off and tries again.
//!
//! ```text
//! Created ─start─▶ Running ─ok─▶ Idle ─trigger─▶ Running
//!                    │  ▲                          │
//!                  error│ backoff                 ok (one-shot)
//!                    ▼  │                          ▼
//!                  Retrying                     Completed
//!
//! any state ─cancel / storage closed─▶ Canceled
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ferrydb_storage::{ChangeEvent, ChangeStream, DocumentStorage};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::{ReplicationConfig, RetryConfig};
use crate::endpoint::EndpointHash;
use crate::error::{ReplicationError, ReplicationResult};
use crate::events::{EventBus, EventStream, ReplicationEvent};
use crate::pull::PullEngine;
use crate::push::PushEngine;
use crate::registry::{Registration, ReplicationRegistry};
use crate::revision::RevisionTagger;
use crate::transport::ReplicationTransport;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationStatus {
    /// Created with `auto_start` off and not started yet.
    Created,
    /// A round is in progress.
    Running,
    /// Live session waiting for the next trigger.
    Idle,
    /// The last round failed; waiting out the backoff.
    Retrying,
    /// One-shot session that replicated everything.
    Completed,
    /// Stopped by cancellation or because storage closed.
    Canceled,
}

impl ReplicationStatus {
    /// Returns true while the session is working or about to retry.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Retrying)
    }

    /// Returns true once the session can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

/// Counters over the life of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationStats {
    /// Rounds that finished without error.
    pub rounds: u64,
    /// Entries received from the remote.
    pub received: u64,
    /// Pulled entries written locally.
    pub pulled: u64,
    /// Local documents accepted by the remote.
    pub pushed: u64,
    /// Feed rows not pushed because they came from this endpoint.
    pub skipped: u64,
    /// Local documents refused by the remote.
    pub denied: u64,
    /// Failed rounds, each followed by a retry.
    pub retries: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

/// State shared between the handle and the session task.
struct Shared<T: ReplicationTransport> {
    collection: String,
    endpoint: EndpointHash,
    live: bool,
    live_interval: Duration,
    retry: RetryConfig,
    storage: Arc<dyn DocumentStorage>,
    checkpoints: CheckpointStore,
    tagger: RevisionTagger,
    pull: Option<PullEngine<T>>,
    push: Option<PushEngine<T>>,
    events: Arc<EventBus>,
    status: watch::Sender<ReplicationStatus>,
    alive: watch::Sender<bool>,
    initial_done: watch::Sender<bool>,
    trigger: Notify,
    requested: AtomicBool,
    cancel: CancellationToken,
    stats: RwLock<ReplicationStats>,
}

enum Launch {
    Pending(Registration),
    Running(JoinHandle<()>),
    Finished,
}

/// A replication session between a collection and one remote endpoint.
///
/// Dropping the handle cancels the session.
///
/// # Example
///
/// ```rust,ignore
/// let registry = ReplicationRegistry::new();
/// let state = ReplicationState::new(
///     &registry,
///     storage,
///     Arc::new(transport),
///     ReplicationConfig::new("https://sync.example.com/todos").with_live(false),
/// )?;
/// state.await_initial_replication().await?;
/// ```
pub struct ReplicationState<T: ReplicationTransport> {
    shared: Arc<Shared<T>>,
    launch: Mutex<Launch>,
}

impl<T: ReplicationTransport> ReplicationState<T> {
    /// Create a session and, if `config.auto_start` is set, start it.
    ///
    /// Fails if the configuration is invalid, if `registry` already holds a
    /// session for the same collection and endpoint, or if auto-start is
    /// requested outside a tokio runtime.
    pub fn new(
        registry: &Arc<ReplicationRegistry>,
        storage: Arc<dyn DocumentStorage>,
        transport: Arc<T>,
        config: ReplicationConfig,
    ) -> ReplicationResult<Self> {
        config.validate()?;

        let collection = storage.name().to_string();
        let endpoint = EndpointHash::derive(&[
            config.database.as_str(),
            collection.as_str(),
            config.identifier.as_str(),
        ]);
        let cancel = CancellationToken::new();
        let registration =
            ReplicationRegistry::register(registry, &collection, &endpoint, cancel.clone())?;

        let events = Arc::new(EventBus::new());
        let checkpoints = CheckpointStore::new(storage.clone(), endpoint.clone());
        let pull = config.pull.as_ref().map(|options| {
            PullEngine::new(
                transport.clone(),
                storage.clone(),
                checkpoints.clone(),
                events.clone(),
                options.batch_size,
            )
        });
        let push = config.push.as_ref().map(|options| {
            PushEngine::new(
                transport.clone(),
                storage.clone(),
                checkpoints.clone(),
                events.clone(),
                options.batch_size,
            )
        });

        let shared = Arc::new(Shared {
            tagger: RevisionTagger::new(&endpoint),
            collection,
            endpoint,
            live: config.live,
            live_interval: config.live_interval,
            retry: config.retry.clone(),
            storage,
            checkpoints,
            pull,
            push,
            events,
            status: watch::Sender::new(ReplicationStatus::Created),
            alive: watch::Sender::new(true),
            initial_done: watch::Sender::new(false),
            trigger: Notify::new(),
            requested: AtomicBool::new(false),
            cancel,
            stats: RwLock::new(ReplicationStats::default()),
        });

        let state = Self {
            shared,
            launch: Mutex::new(Launch::Pending(registration)),
        };
        if config.auto_start {
            state.start()?;
        }
        Ok(state)
    }

    /// Start the session task. Does nothing if already started or cancelled.
    pub fn start(&self) -> ReplicationResult<()> {
        let mut launch = self.launch.lock();
        let registration = match std::mem::replace(&mut *launch, Launch::Finished) {
            Launch::Pending(registration) => registration,
            other => {
                *launch = other;
                return Ok(());
            }
        };
        let Ok(runtime) = Handle::try_current() else {
            *launch = Launch::Pending(registration);
            return Err(ReplicationError::Configuration(
                "replication must be started inside a tokio runtime".into(),
            ));
        };

        // Subscribe before the task runs so no local write is missed.
        let local_changes = self.shared.live.then(|| self.shared.storage.subscribe());
        let shared = Arc::clone(&self.shared);
        let task = runtime.spawn(run_session(shared, local_changes, registration));
        *launch = Launch::Running(task);
        Ok(())
    }

    /// Request a round as soon as possible.
    ///
    /// Requests made while a round is running collapse into a single
    /// follow-up round. Has no effect once the session has ended.
    pub fn run(&self) {
        self.shared.requested.store(true, Ordering::SeqCst);
        self.shared.trigger.notify_one();
    }

    /// Stop the session and wait for its task to finish.
    ///
    /// An in-flight transport call is abandoned; its result is never applied.
    pub async fn cancel(&self) {
        self.shared.cancel.cancel();
        let launch = std::mem::replace(&mut *self.launch.lock(), Launch::Finished);
        match launch {
            Launch::Running(task) => {
                if let Err(err) = task.await {
                    warn!(
                        collection = %self.shared.collection,
                        error = %err,
                        "replication task failed"
                    );
                }
            }
            Launch::Pending(registration) => {
                drop(registration);
                self.shared.finish_canceled();
            }
            Launch::Finished => {}
        }
    }

    /// Subscribe to session events from now on.
    pub fn events(&self) -> EventStream {
        self.shared.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ReplicationStatus {
        *self.shared.status.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn watch_status(&self) -> watch::Receiver<ReplicationStatus> {
        self.shared.status.subscribe()
    }

    /// Whether the remote answered the most recent call.
    pub fn is_alive(&self) -> bool {
        *self.shared.alive.borrow()
    }

    /// Snapshot of the session counters.
    pub fn stats(&self) -> ReplicationStats {
        self.shared.stats.read().clone()
    }

    /// Name of the replicated collection.
    pub fn collection(&self) -> &str {
        &self.shared.collection
    }

    /// Endpoint identity of this session.
    pub fn endpoint(&self) -> &EndpointHash {
        &self.shared.endpoint
    }

    /// Checkpoints of this session.
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.shared.checkpoints
    }

    /// Resolves after the first round that drained every configured direction.
    ///
    /// Fails with [`ReplicationError::Cancelled`] if the session stops first.
    pub async fn await_initial_replication(&self) -> ReplicationResult<()> {
        let mut initial = self.shared.initial_done.subscribe();
        let mut status = self.shared.status.subscribe();
        loop {
            if *initial.borrow_and_update() {
                return Ok(());
            }
            if *status.borrow_and_update() == ReplicationStatus::Canceled {
                return Err(ReplicationError::Cancelled);
            }
            tokio::select! {
                changed = initial.changed() => {
                    if changed.is_err() {
                        return Err(ReplicationError::Cancelled);
                    }
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(ReplicationError::Cancelled);
                    }
                }
            }
        }
    }

    /// Resolves the next time the session has nothing left to do: idle in
    /// live mode with no [`run`](Self::run) pending, or completed in one-shot
    /// mode.
    pub async fn await_in_sync(&self) -> ReplicationResult<()> {
        self.await_initial_replication().await?;
        let mut status = self.shared.status.subscribe();
        loop {
            // The session clears `requested` only after leaving Idle, so read
            // it before the status.
            let requested = self.shared.requested.load(Ordering::SeqCst);
            match *status.borrow_and_update() {
                ReplicationStatus::Canceled => return Err(ReplicationError::Cancelled),
                ReplicationStatus::Completed => return Ok(()),
                ReplicationStatus::Idle if !requested => return Ok(()),
                _ => {}
            }
            if status.changed().await.is_err() {
                return Err(ReplicationError::Cancelled);
            }
        }
    }

    /// Resolves with the final status once the session has ended.
    pub async fn await_completion(&self) -> ReplicationStatus {
        self.wait_for_status(|s| s.is_terminal()).await
    }

    async fn wait_for_status(&self, done: impl Fn(ReplicationStatus) -> bool) -> ReplicationStatus {
        let mut status = self.shared.status.subscribe();
        let reached = match status.wait_for(|s| done(*s)).await {
            Ok(reached) => *reached,
            Err(_) => ReplicationStatus::Canceled,
        };
        reached
    }
}

impl<T: ReplicationTransport> Drop for ReplicationState<T> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn run_session<T: ReplicationTransport>(
    shared: Arc<Shared<T>>,
    mut local_changes: Option<ChangeStream>,
    registration: Registration,
) {
    info!(
        collection = %shared.collection,
        endpoint = shared.endpoint.short(),
        live = shared.live,
        pull = shared.pull.is_some(),
        push = shared.push.is_some(),
        "replication started"
    );
    shared.events.emit(ReplicationEvent::Alive(true));

    let mut failures: u32 = 0;
    let completed = loop {
        shared.set_status(ReplicationStatus::Running);
        shared.requested.store(false, Ordering::SeqCst);
        shared.events.emit(ReplicationEvent::Active(true));
        let outcome = shared.round().await;
        shared.events.emit(ReplicationEvent::Active(false));

        match outcome {
            Ok(()) => {
                failures = 0;
                shared.stats.write().rounds += 1;
                if !shared.initial_done.send_replace(true) {
                    info!(collection = %shared.collection, "initial replication complete");
                }
                if !shared.live {
                    break true;
                }
                shared.set_status(ReplicationStatus::Idle);
                if !shared.wait_for_trigger(&mut local_changes).await {
                    break false;
                }
            }
            Err(_) if shared.cancel.is_cancelled() => break false,
            Err(ReplicationError::Cancelled) => break false,
            Err(err) if err.is_storage_closed() => {
                info!(collection = %shared.collection, "storage closed, stopping replication");
                break false;
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                let delay = shared.retry.delay_for_attempt(failures);
                shared.record_failure(&err, failures, delay);
                shared.set_status(ReplicationStatus::Retrying);
                tokio::select! {
                    _ = shared.cancel.cancelled() => break false,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    };

    // Free the registry slot before anyone observes the final status.
    drop(registration);
    if completed {
        shared.set_status(ReplicationStatus::Completed);
        shared.events.emit(ReplicationEvent::Complete);
        info!(collection = %shared.collection, "replication completed");
    } else {
        shared.finish_canceled();
    }
}

async fn next_change(stream: &mut Option<ChangeStream>) -> Option<ChangeEvent> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

impl<T: ReplicationTransport> Shared<T> {
    async fn round(&self) -> ReplicationResult<()> {
        let (pulled, pushed) = tokio::join!(self.drain_pull(), self.drain_push());
        pulled.and(pushed)
    }

    async fn drain_pull(&self) -> ReplicationResult<()> {
        let Some(engine) = &self.pull else {
            return Ok(());
        };
        loop {
            let report = engine.run_batch(&self.cancel).await?;
            self.set_alive(true);
            {
                let mut stats = self.stats.write();
                stats.received += report.fetched as u64;
                stats.pulled += report.applied as u64;
            }
            if !report.has_more {
                return Ok(());
            }
        }
    }

    async fn drain_push(&self) -> ReplicationResult<()> {
        let Some(engine) = &self.push else {
            return Ok(());
        };
        loop {
            let report = engine.run_batch(&self.cancel).await?;
            if report.pushed + report.denied > 0 {
                self.set_alive(true);
            }
            {
                let mut stats = self.stats.write();
                stats.pushed += report.pushed as u64;
                stats.denied += report.denied as u64;
                stats.skipped += report.skipped as u64;
            }
            if !report.has_more {
                return Ok(());
            }
        }
    }

    /// Wait in `Idle` until something asks for a round. Returns false when
    /// the session should stop instead.
    async fn wait_for_trigger(&self, local_changes: &mut Option<ChangeStream>) -> bool {
        let tick = tokio::time::sleep(self.live_interval);
        tokio::pin!(tick);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = self.trigger.notified() => {
                    debug!(collection = %self.collection, "run requested");
                    break;
                }
                _ = &mut tick => {
                    debug!(collection = %self.collection, "live interval elapsed");
                    break;
                }
                change = next_change(local_changes) => match change {
                    Some(event) if self.is_pushable(&event) => {
                        debug!(
                            collection = %self.collection,
                            sequence = event.sequence,
                            "local write"
                        );
                        break;
                    }
                    Some(_) => continue,
                    None => {
                        info!(
                            collection = %self.collection,
                            "storage closed, stopping replication"
                        );
                        return false;
                    }
                },
            }
        }

        // Writes already queued are covered by the round about to run.
        if let Some(stream) = local_changes {
            while stream.try_recv().is_ok() {}
        }
        true
    }

    fn is_pushable(&self, event: &ChangeEvent) -> bool {
        self.push.is_some() && !self.tagger.is_tagged_as_pulled(&event.document.revision)
    }

    fn set_status(&self, status: ReplicationStatus) {
        if self.status.send_replace(status) != status {
            debug!(collection = %self.collection, ?status, "status changed");
            self.events.emit(ReplicationEvent::Status(status));
        }
    }

    fn set_alive(&self, alive: bool) {
        if self.alive.send_replace(alive) != alive {
            self.events.emit(ReplicationEvent::Alive(alive));
        }
    }

    fn record_failure(&self, err: &ReplicationError, attempt: u32, delay: Duration) {
        {
            let mut stats = self.stats.write();
            stats.retries += 1;
            stats.last_error = Some(err.to_string());
        }
        if err.is_retryable() {
            warn!(
                collection = %self.collection,
                error = %err,
                attempt,
                ?delay,
                "replication round failed, retrying"
            );
        } else {
            error!(
                collection = %self.collection,
                error = %err,
                attempt,
                ?delay,
                "replication round failed, retrying"
            );
        }
        self.events.emit(ReplicationEvent::Error(err.clone()));
        if matches!(err, ReplicationError::Transport { .. }) {
            self.set_alive(false);
        }
    }

    fn finish_canceled(&self) {
        self.cancel.cancel();
        if self.status.borrow().is_terminal() {
            return;
        }
        self.set_status(ReplicationStatus::Canceled);
        self.events.emit(ReplicationEvent::Canceled);
        info!(collection = %self.collection, "replication canceled");
    }
}
