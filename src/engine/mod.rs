mod availability;
mod calendar;
mod clock;
mod error;
mod ledger;
mod mutations;
mod queries;
mod summary;
#[cfg(test)]
mod tests;

pub use availability::{check, remaining};
pub use calendar::Calendar;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::EngineError;
pub use ledger::{LockedSlots, SharedSlot, SlotState};
pub use queries::ReservationFilter;
pub use summary::summarize;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::limits::LOCK_TIMEOUT;
use crate::model::*;
use crate::notify::{Notice, NoticeKind, NotifyHub};
use crate::observability;
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

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is queued, then does a
/// single fsync for the batch and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
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
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let start = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(start.elapsed().as_secs_f64());
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
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so no partial bytes leak into the next batch
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// Booking state of one tenant.
///
/// Reservation mutations write-lock their slots (sorted by key), read
/// `calendar` briefly and release it before taking `commit_gate`. Calendar
/// writers take `commit_gate` then `calendar` and never touch slot locks.
pub struct Engine {
    pub tenant: String,
    pub(super) calendar: RwLock<Calendar>,
    pub(super) slots: DashMap<SlotKey, SharedSlot>,
    pub(super) reservations: DashMap<Ulid, Reservation>,
    /// client id → its single Pending/Confirmed reservation
    pub(super) active_by_client: DashMap<String, Ulid>,
    pub(super) idempotency: DashMap<String, Ulid>,
    /// Held shared across WAL append + apply; compaction takes it exclusively.
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
}

/// Apply a calendar event (caller holds the calendar write lock).
fn apply_calendar_event(calendar: &mut Calendar, event: &Event) {
    match event {
        Event::RulesSet { rules } => calendar.rules = Some(rules.clone()),
        Event::PeriodUpserted { period } => calendar.upsert_period(period.clone()),
        Event::PeriodRemoved { id } => {
            calendar.remove_period(*id);
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(
        tenant: &str,
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut engine = Self {
            tenant: tenant.to_string(),
            calendar: RwLock::new(Calendar::default()),
            slots: DashMap::new(),
            reservations: DashMap::new(),
            active_by_client: DashMap::new(),
            idempotency: DashMap::new(),
            commit_gate: RwLock::new(()),
            wal_tx,
            notify,
            clock,
        };

        // Sole owner during replay: every try_write succeeds. Never block here,
        // tenants are created lazily from inside the runtime.
        for event in &events {
            match event {
                Event::RulesSet { .. } | Event::PeriodUpserted { .. } | Event::PeriodRemoved { .. } => {
                    apply_calendar_event(engine.calendar.get_mut(), event);
                }
                _ => {
                    let mut guards = Vec::new();
                    for key in engine.slots_touched(event) {
                        let guard = engine
                            .slot(&key)
                            .try_write_owned()
                            .map_err(|_| io::Error::other(format!("replay: slot {key} contended")))?;
                        guards.push(guard);
                    }
                    engine.apply_reservation_event(event, &mut LockedSlots::new(guards));
                }
            }
        }

        tracing::debug!(
            "tenant {tenant}: replayed {} events, {} reservations",
            events.len(),
            engine.reservations.len()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
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

    /// The shared ledger entry for a slot, created empty on first use.
    pub(super) fn slot(&self, key: &SlotKey) -> SharedSlot {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(SlotState::new(key.clone()))))
            .clone()
    }

    /// Write-lock a set of slots in key order. Gives up with `Contention`
    /// when a lock is not granted within the lock timeout.
    pub(super) async fn lock_slots(&self, keys: &[SlotKey]) -> Result<LockedSlots, EngineError> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let slot = self.slot(&key);
            match tokio::time::timeout(LOCK_TIMEOUT, slot.write_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                    tracing::warn!("tenant {}: lock timeout on slot {key}", self.tenant);
                    return Err(EngineError::Contention(key));
                }
            }
        }
        Ok(LockedSlots::new(guards))
    }

    /// Slots a reservation event reads or writes, given current state.
    fn slots_touched(&self, event: &Event) -> Vec<SlotKey> {
        match event {
            Event::ReservationCreated { reservation } => vec![reservation.slot()],
            Event::StatusChanged { id, .. } | Event::TableAssigned { id, .. } => self
                .reservations
                .get(id)
                .map(|r| vec![r.slot()])
                .unwrap_or_default(),
            Event::ReservationReplaced { id, details, .. } => {
                let mut keys = vec![details.slot()];
                if let Some(r) = self.reservations.get(id) {
                    keys.push(r.slot());
                }
                keys.sort();
                keys.dedup();
                keys
            }
            _ => Vec::new(),
        }
    }

    /// Apply a reservation event to the record store, the client and
    /// idempotency indexes, and the locked slots.
    pub(super) fn apply_reservation_event(&self, event: &Event, slots: &mut LockedSlots) {
        match event {
            Event::ReservationCreated { reservation } => {
                if reservation.status.is_active() {
                    slots.hold(&reservation.slot(), reservation.party_size());
                    if let Some(client) = &reservation.client_id {
                        self.active_by_client.insert(client.clone(), reservation.id);
                    }
                }
                if let Some(key) = &reservation.idempotency_key {
                    self.idempotency.insert(key.clone(), reservation.id);
                }
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::StatusChanged { id, status, at } => {
                let Some(mut r) = self.reservations.get_mut(id) else {
                    return;
                };
                let (was_active, now_active) = (r.status.is_active(), status.is_active());
                if was_active && !now_active {
                    slots.release(&r.slot(), r.party_size());
                    if let Some(client) = &r.client_id {
                        self.active_by_client.remove_if(client, |_, owner| owner == id);
                    }
                } else if !was_active && now_active {
                    slots.hold(&r.slot(), r.party_size());
                    if let Some(client) = &r.client_id {
                        self.active_by_client.insert(client.clone(), *id);
                    }
                }
                r.status = *status;
                r.updated_at = *at;
            }
            Event::ReservationReplaced { id, details, at } => {
                let Some(mut r) = self.reservations.get_mut(id) else {
                    return;
                };
                if r.status.is_active() {
                    slots.release(&r.slot(), r.party_size());
                    slots.hold(&details.slot(), details.party_size());
                }
                r.details = details.clone();
                r.updated_at = *at;
            }
            Event::TableAssigned { id, table, at } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.table = table.clone();
                    r.updated_at = *at;
                }
            }
            Event::RulesSet { .. } | Event::PeriodUpserted { .. } | Event::PeriodRemoved { .. } => {}
        }
    }

    /// WAL-append then apply, under the shared commit gate.
    pub(super) async fn persist_and_apply(
        &self,
        event: &Event,
        slots: &mut LockedSlots,
    ) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(event).await?;
        self.apply_reservation_event(event, slots);
        Ok(())
    }

    /// WAL-append then apply a calendar change. Takes the gate before the
    /// calendar lock.
    pub(super) async fn persist_calendar_event<T>(
        &self,
        validate: impl FnOnce(&Calendar) -> Result<(Event, T), EngineError>,
    ) -> Result<T, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut calendar = self.calendar.write().await;
        let (event, out) = validate(&*calendar)?;
        self.wal_append(&event).await?;
        apply_calendar_event(&mut calendar, &event);
        Ok(out)
    }

    pub(super) fn publish(&self, reservation: &Reservation, kind: NoticeKind) {
        self.notify.publish(Notice::new(&self.tenant, reservation, kind));
    }

    /// Rewrite the WAL as the minimal event list reproducing current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::new();
        {
            let calendar = self.calendar.read().await;
            if let Some(rules) = &calendar.rules {
                events.push(Event::RulesSet {
                    rules: rules.clone(),
                });
            }
            for period in &calendar.periods {
                events.push(Event::PeriodUpserted {
                    period: period.clone(),
                });
            }
        }
        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|r| r.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);
        events.extend(
            reservations
                .into_iter()
                .map(|reservation| Event::ReservationCreated { reservation }),
        );

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("tenant {}: compacted WAL to {count} events", self.tenant);
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
