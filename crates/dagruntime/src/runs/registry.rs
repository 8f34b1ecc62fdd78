use chrono::{DateTime, Utc};
use dagcore::{EventSink, RunEvent, RunId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

/// Snapshot of one tracked run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub events: Vec<RunEvent>,
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Events from a given position onward, plus whether the run has ended.
#[derive(Debug, Clone)]
pub struct RunProgress {
    pub events: Vec<RunEvent>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct RunEntry {
    state: RunState,
    sender: mpsc::Sender<RunEvent>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<RunEvent>>>,
}

/// In-memory store of live and recently finished runs.
///
/// Every appended event goes to the run's backlog and to a bounded delivery
/// queue. The queue has a single logical consumer: concurrent `pop_next`
/// callers split the events between them, so observers that need the full
/// history read the backlog.
pub struct RunRegistry {
    runs: Mutex<HashMap<RunId, RunEntry>>,
    ttl: Duration,
    queue_capacity: usize,
}

impl RunRegistry {
    pub fn new(ttl: Duration, queue_capacity: usize) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            ttl,
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RunId, RunEntry>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a new run of the given kind (e.g. `workflow`).
    pub fn create(&self, kind: impl Into<String>) -> RunState {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let state = RunState {
            run_id: Uuid::new_v4(),
            kind: kind.into(),
            started_at: Utc::now(),
            finished_at: None,
            events: Vec::new(),
        };
        let snapshot = state.clone();

        self.lock().insert(
            state.run_id,
            RunEntry {
                state,
                sender,
                receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            },
        );
        tracing::debug!(run_id = %snapshot.run_id, kind = %snapshot.kind, "Run created");
        snapshot
    }

    pub fn get(&self, run_id: RunId) -> Option<RunState> {
        self.lock().get(&run_id).map(|entry| entry.state.clone())
    }

    pub fn contains(&self, run_id: RunId) -> bool {
        self.lock().contains_key(&run_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Backlog entries with `seq >= from_seq`.
    pub fn events_since(&self, run_id: RunId, from_seq: u64) -> Option<RunProgress> {
        let runs = self.lock();
        let entry = runs.get(&run_id)?;
        let start = usize::try_from(from_seq).unwrap_or(usize::MAX);
        Some(RunProgress {
            events: entry.state.events.get(start..).map(<[_]>::to_vec).unwrap_or_default(),
            finished_at: entry.state.finished_at,
        })
    }

    /// Record an event. Unknown runs are ignored; a full delivery queue
    /// drops the live copy but the backlog always keeps it.
    pub fn append(&self, run_id: RunId, mut event: RunEvent) {
        let mut runs = self.lock();
        let Some(entry) = runs.get_mut(&run_id) else {
            tracing::debug!(run_id = %run_id, "Dropping event for unknown run");
            return;
        };

        event.seq = entry.state.events.len() as u64;
        if let Err(mpsc::error::TrySendError::Full(dropped)) = entry.sender.try_send(event.clone()) {
            tracing::debug!(run_id = %run_id, seq = dropped.seq, "Delivery queue full, event kept in backlog only");
        }
        entry.state.events.push(event);
    }

    /// Mark the run finished. Only the first call sets `finished_at`.
    pub fn finish(&self, run_id: RunId) {
        if let Some(entry) = self.lock().get_mut(&run_id) {
            if entry.state.finished_at.is_none() {
                entry.state.finished_at = Some(Utc::now());
                tracing::debug!(run_id = %run_id, events = entry.state.events.len(), "Run finished");
            }
        }
    }

    /// Wait up to `timeout` for the next queued event.
    ///
    /// Returns `None` on timeout or if the run is unknown or removed.
    pub async fn pop_next(&self, run_id: RunId, timeout: Duration) -> Option<RunEvent> {
        let receiver = self.lock().get(&run_id).map(|entry| entry.receiver.clone())?;

        tokio::time::timeout(timeout, async move {
            let mut queue = receiver.lock().await;
            queue.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    /// Remove expired runs now. Returns how many were removed.
    pub fn gc(&self) -> usize {
        self.gc_at(Utc::now())
    }

    /// Remove runs finished more than TTL before `now`, and unfinished runs
    /// started more than twice the TTL before `now`.
    pub fn gc_at(&self, now: DateTime<Utc>) -> usize {
        let stuck_after = self.ttl.saturating_mul(2);
        let older_than = |at: DateTime<Utc>, limit: Duration| {
            (now - at).to_std().map(|age| age > limit).unwrap_or(false)
        };

        let mut runs = self.lock();
        let before = runs.len();
        runs.retain(|_, entry| match entry.state.finished_at {
            Some(finished_at) => !older_than(finished_at, self.ttl),
            None => !older_than(entry.state.started_at, stuck_after),
        });
        let removed = before - runs.len();

        if removed > 0 {
            tracing::info!(removed, remaining = runs.len(), "Reclaimed expired runs");
        }
        removed
    }

    /// Run `gc` every `every` on the current tokio runtime until the returned
    /// handle is stopped or dropped.
    pub fn spawn_reclaimer(self: &Arc<Self>, every: Duration) -> Reclaimer {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let registry = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.gc();
                    }
                }
            }
            tracing::debug!("Run reclaimer stopped");
        });

        tracing::info!(every_secs = every.as_secs_f64(), ttl_secs = self.ttl.as_secs(), "Run reclaimer started");
        Reclaimer {
            handle,
            guard: token.drop_guard(),
        }
    }
}

impl EventSink for RunRegistry {
    fn append(&self, run_id: RunId, event: RunEvent) {
        RunRegistry::append(self, run_id, event);
    }
}

/// Background GC task; cancelled when stopped or dropped.
pub struct Reclaimer {
    handle: JoinHandle<()>,
    guard: DropGuard,
}

impl Reclaimer {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(self) {
        let Reclaimer { handle, guard } = self;
        drop(guard);
        if let Err(e) = handle.await {
            tracing::warn!("Run reclaimer ended abnormally: {}", e);
        }
    }
}
