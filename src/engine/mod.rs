mod capacity;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod store;

pub use capacity::{CapacityPolicy, capacity_for_day, capacity_for_slot, check_admission, seats_used};
pub use error::EngineError;
pub use lifecycle::{Operation, SeatEffect};
pub use store::{ReservationStore, SharedSlot, SlotState};

use std::io;
use std::path::PathBuf;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that arrive together share one fsync:
/// block for the first, drain whatever else is queued, flush once, answer everyone.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_err = batch
        .iter()
        .find_map(|(event, _)| wal.append_buffered(event).err());
    // Flush even after an append error so half-buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation admission and lifecycle engine.
///
/// Lock order: `write_gate` (shared) before any slot write lock. Compaction takes the
/// gate exclusively so no write can slip between its snapshot and the log swap.
pub struct Engine {
    pub store: ReservationStore,
    pub policy: CapacityPolicy,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) write_gate: RwLock<()>,
}

impl Engine {
    /// Replay the log at `wal_path` and start its writer task. Must run inside a tokio runtime.
    pub fn new(wal_path: PathBuf, policy: CapacityPolicy) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: ReservationStore::new(),
            policy,
            wal_tx,
            write_gate: RwLock::new(()),
        };

        // Sole owner of every slot during replay, so try_write never contends.
        // blocking_write would panic here when called from async code.
        for event in &events {
            let slot = engine.store.slot_or_insert(event.key());
            let mut guard = slot
                .try_write()
                .map_err(|_| io::Error::other("replay: slot lock contended"))?;
            engine.store.apply_event(&mut guard, event);
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events, {} reservations live",
                events.len(),
                engine.store.len()
            );
        }

        Ok(engine)
    }

    /// Send an event to the group-commit writer and wait for its fsync.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Make an event durable, then apply it to the locked slot.
    pub(super) async fn persist_and_apply(
        &self,
        slot: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(slot, event);
        Ok(())
    }

    /// Resolve a reservation id to its slot and take the slot's write lock.
    /// The id is re-checked under the lock, since it may have been deleted meanwhile.
    pub(super) async fn resolve_write(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SlotState>, EngineError> {
        let key = self.store.key_for(&id).ok_or(EngineError::NotFound(id))?;
        let slot = self.store.slot(&key).ok_or(EngineError::NotFound(id))?;
        let guard = slot.write_owned().await;
        if guard.get(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }
}

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}
