use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, Method, Transport};
use crate::cache::{provisional_key, LocalStore, PendingMutation};
use crate::connectivity::Connectivity;
use crate::error::Result;
use crate::policy::interceptor::fold_write;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for a single replayed request.
pub const DEFAULT_REPLAY_TIMEOUT_SECS: u64 = 30;

/// Failed passes in a row before a `Stalled` notification goes out.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Buffer size for the notification channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every mutation in the snapshot was replayed.
    Success { replayed: usize },
    /// The pass stopped early. `mutation_id` is the entry that failed and
    /// stays at the head of the queue; `None` when the queue could not be
    /// read at all.
    Failure {
        mutation_id: Option<u64>,
        replayed: usize,
        error: String,
    },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started,
    Finished(SyncOutcome),
    /// The same queue has failed to drain `consecutive_failures` passes in a
    /// row; the blocking entry needs attention.
    Stalled {
        mutation_id: Option<u64>,
        consecutive_failures: u32,
    },
}

/// Result of asking for a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRun {
    /// Another pass was already running; this trigger was dropped.
    Skipped,
    Completed(SyncOutcome),
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub replay_timeout: Duration,
    /// Zero disables `Stalled` notifications.
    pub max_consecutive_failures: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            replay_timeout: Duration::from_secs(DEFAULT_REPLAY_TIMEOUT_SECS),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// Resets the single-flight flag however the pass ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    store: Arc<LocalStore>,
    transport: Arc<dyn Transport>,
    options: SyncOptions,
    syncing: AtomicBool,
    consecutive_failures: AtomicU32,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    pub fn new(store: Arc<LocalStore>, transport: Arc<dyn Transport>, options: SyncOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            transport,
            options,
            syncing: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            events,
        }
    }

    /// Register for start/finish/stalled notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SyncState {
        if self.is_syncing() {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    /// Whether a pass is in progress.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("No sync listeners registered");
        }
    }

    /// Run one pass over a snapshot of the queue, unless one is already
    /// running, in which case this call does nothing and returns `Skipped`.
    pub async fn sync(&self) -> SyncRun {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync already in progress, trigger dropped");
            return SyncRun::Skipped;
        }
        let guard = PassGuard(&self.syncing);

        self.emit(SyncEvent::Started);
        let outcome = self.run_pass().await;
        self.track_failures(&outcome);

        match &outcome {
            SyncOutcome::Success { replayed } => {
                info!(replayed, "Offline mutations synchronized")
            }
            SyncOutcome::Failure {
                mutation_id,
                replayed,
                error,
            } => error!(?mutation_id, replayed, error = %error, "Error synchronizing offline mutations"),
        }
        // Finished goes out before the flag is released, so a retrigger's
        // Started can never overtake it.
        self.emit(SyncEvent::Finished(outcome.clone()));
        drop(guard);
        SyncRun::Completed(outcome)
    }

    async fn run_pass(&self) -> SyncOutcome {
        let snapshot = match self.store.list_mutations().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return SyncOutcome::Failure {
                    mutation_id: None,
                    replayed: 0,
                    error: e.to_string(),
                }
            }
        };

        if snapshot.is_empty() {
            debug!("No offline mutations to sync");
            return SyncOutcome::Success { replayed: 0 };
        }
        debug!(pending = snapshot.len(), "Replaying offline mutations");

        let mut replayed = 0;
        for mutation in &snapshot {
            if let Err(e) = self.replay(mutation).await {
                warn!(mutation_id = mutation.id, url = %mutation.url, error = %e, "Replay failed, stopping pass");
                return SyncOutcome::Failure {
                    mutation_id: Some(mutation.id),
                    replayed,
                    error: e.to_string(),
                };
            }
            replayed += 1;
        }

        SyncOutcome::Success { replayed }
    }

    async fn replay(&self, mutation: &PendingMutation) -> Result<()> {
        let request = mutation.to_request();
        debug!(mutation_id = mutation.id, method = %mutation.method, url = %mutation.url, "Sending mutation");

        let response = tokio::time::timeout(self.options.replay_timeout, self.transport.send(&request))
            .await
            .map_err(|_| ApiError::Timeout(self.options.replay_timeout))??;

        self.store.remove_mutation(mutation.id).await?;

        if mutation.provisional {
            self.store
                .apply_mutation(
                    &mutation.collection_key,
                    &provisional_key(mutation.id),
                    Method::Delete,
                    None,
                )
                .await?;
        }

        if response.body.is_some() {
            fold_write(
                &self.store,
                &mutation.collection_key,
                mutation.method,
                &mutation.url,
                response.body.as_ref(),
            )
            .await?;
        }
        Ok(())
    }

    fn track_failures(&self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Success { .. } => self.consecutive_failures.store(0, Ordering::Release),
            SyncOutcome::Failure { mutation_id, .. } => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                let limit = self.options.max_consecutive_failures;
                if limit > 0 && failures >= limit {
                    warn!(?mutation_id, failures, "Offline queue is stuck");
                    self.emit(SyncEvent::Stalled {
                        mutation_id: *mutation_id,
                        consecutive_failures: failures,
                    });
                }
            }
        }
    }

    /// Spawn a task that starts a pass every time connectivity comes back.
    /// The task ends when every `Connectivity` handle is dropped.
    pub fn watch_connectivity(self: &Arc<Self>, connectivity: &Connectivity) -> JoinHandle<()> {
        let mut rx = connectivity.subscribe();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            // Only real changes notify, so waking up online means an
            // offline→online edge happened, even if intermediate values
            // were coalesced.
            while rx.changed().await.is_ok() {
                if !*rx.borrow_and_update() {
                    continue;
                }
                info!("Connectivity restored, syncing offline mutations");
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine.sync().await;
                });
            }
        })
    }
}
