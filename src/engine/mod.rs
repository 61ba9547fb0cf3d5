mod admission;
mod availability;
mod conflict;
mod error;
mod mutations;
pub mod pricing;
mod queries;

pub use availability::{occupancy, openings, peak_occupancy};
pub use conflict::{find_conflict, has_conflict, parse_date, parse_window};
pub use error::{EngineError, Status};
pub use pricing::compute_total;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::DEFAULT_LOCK_TIMEOUT;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        // Flush what we have first, then handle the other command.
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if let Err(e) = &result {
                    tracing::error!("WAL flush of {} events failed: {e}", batch.len());
                }
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Send one event to the writer task and wait for its fsync.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::TransactionFailure("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::TransactionFailure("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::TransactionFailure(format!("WAL: {e}")))
}

// ── Engine ───────────────────────────────────────────────

/// One tenant's reservation store: listings, their reservations, and the WAL
/// that makes them durable.
pub struct Engine {
    pub state: Arc<DashMap<ResourceId, SharedResourceState>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes catalog changes (create) against compaction, so the log
    /// holds at most one live `ResourceCreated` per id and no create lands
    /// in a log that a compaction is about to replace.
    pub(super) catalog_lock: Arc<Mutex<()>>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → resource id
    pub(super) reservation_index: Arc<DashMap<Ulid, ResourceId>>,
    lock_timeout: Duration,
}

/// Apply an event directly to a ResourceState (no locking, caller holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event, index: &DashMap<Ulid, ResourceId>) {
    match event {
        Event::PricingSet { pricing, .. } => {
            rs.pricing = Some(*pricing);
        }
        Event::ReservationAdmitted { reservation } => {
            index.insert(reservation.id, reservation.resource_id);
            rs.insert_reservation(reservation.clone());
        }
        Event::ReservationCancelled { id, .. } => {
            rs.remove_reservation(*id);
            index.remove(id);
        }
        Event::ResourceDeleted { .. } => {
            rs.deleted = true;
        }
        // Creation happens at the map level
        Event::ResourceCreated { .. } => {}
    }
}

/// Resource an event mutates in place (everything except creation).
fn event_resource_id(event: &Event) -> Option<ResourceId> {
    match event {
        Event::PricingSet { id, .. } | Event::ResourceDeleted { id } => Some(*id),
        Event::ReservationAdmitted { reservation } => Some(reservation.resource_id),
        Event::ReservationCancelled { resource_id, .. } => Some(*resource_id),
        Event::ResourceCreated { .. } => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: Arc::new(DashMap::new()),
            wal_tx,
            catalog_lock: Arc::new(Mutex::new(())),
            notify,
            reservation_index: Arc::new(DashMap::new()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        };

        // We're the sole owner of these Arcs during replay, so try_write never
        // contends. Never block here: this may run inside an async context.
        for event in &events {
            match event {
                Event::ResourceCreated {
                    id,
                    kind,
                    name,
                    capacity,
                    pricing,
                } => {
                    // The first creation of a live id wins, as it did when served.
                    if engine.state.contains_key(id) {
                        tracing::warn!("ignoring duplicate ResourceCreated for {id} in WAL");
                        continue;
                    }
                    let rs = ResourceState::new(*id, *kind, name.clone(), *capacity, *pricing);
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::ResourceDeleted { id } => {
                    engine.state.remove(id);
                }
                other => {
                    if let Some(resource_id) = event_resource_id(other)
                        && let Some(entry) = engine.state.get(&resource_id)
                    {
                        let rs = entry.clone();
                        if let Ok(mut guard) = rs.try_write() {
                            apply_to_resource(&mut guard, other, &engine.reservation_index);
                        }
                    }
                }
            }
        }

        tracing::debug!(
            "replayed {} events into {} resources",
            events.len(),
            engine.state.len()
        );
        Ok(engine)
    }

    /// How long writers wait for a resource lock before failing.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn get_resource(&self, id: &ResourceId) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_reservation(&self, reservation_id: &Ulid) -> Option<ResourceId> {
        self.reservation_index.get(reservation_id).map(|e| *e.value())
    }

    /// Take the resource-scoped write lock that serializes check-then-insert.
    /// Bounded by the lock timeout; on expiry nothing has been touched.
    pub(super) async fn lock_resource(
        &self,
        rs: SharedResourceState,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let waited = Instant::now();
        let guard = tokio::time::timeout(self.lock_timeout, rs.write_owned())
            .await
            .map_err(|_| {
                EngineError::TransactionFailure(format!(
                    "timed out after {:?} waiting for resource lock",
                    self.lock_timeout
                ))
            })?;
        metrics::histogram!(crate::observability::LOCK_WAIT_SECONDS)
            .record(waited.elapsed().as_secs_f64());
        Ok(guard)
    }

    /// WAL-append + apply + notify, holding the resource lock throughout.
    ///
    /// Runs as its own task: if the caller is dropped mid-commit the event is
    /// still either applied in memory or reported failed, never left durable
    /// but invisible. The lock is released when the task finishes.
    pub(super) async fn commit(
        &self,
        mut guard: OwnedRwLockWriteGuard<ResourceState>,
        event: Event,
    ) -> Result<(), EngineError> {
        let wal_tx = self.wal_tx.clone();
        let index = self.reservation_index.clone();
        let notify = self.notify.clone();
        tokio::spawn(async move {
            wal_append(&wal_tx, &event).await?;
            apply_to_resource(&mut guard, &event, &index);
            notify.send(guard.id, &event);
            Ok::<(), EngineError>(())
        })
        .await
        .map_err(|e| EngineError::TransactionFailure(format!("commit task failed: {e}")))?
    }

    /// Reservation → resource, then the resource write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(ResourceId, OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .get_resource_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let guard = self.lock_resource(rs).await?;
        Ok((resource_id, guard))
    }
}
