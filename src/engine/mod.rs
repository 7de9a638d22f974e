mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;
mod validate;

pub use error::EngineError;
pub use validate::{validate_bounds, validate_view};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

pub type SharedCalendarState = Arc<RwLock<CalendarState>>;

type Pending = (Vec<Event>, oneshot::Sender<io::Result<()>>);

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// Committed together: all of `events` or none of them.
    Append {
        events: Vec<Event>,
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

/// Owns the WAL. Appends that queue up while one batch is being written are
/// committed together with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { events, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(events, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { events, response } => batch.push((events, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<Pending>) {
    let events: usize = batch.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(events as f64);
    let started = Instant::now();
    let result = flush_batch(wal, &batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    for (_, tx) in batch {
        let _ = tx.send(match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

/// On failure the log is cut back to where the batch began, so no caller
/// that saw an error finds its events again on replay.
fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let mark = wal.committed_len()?;
    let result = batch
        .iter()
        .flat_map(|(events, _)| events)
        .try_for_each(|event| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.rollback_to(mark)
    {
        tracing::error!("WAL rollback to {mark} bytes failed: {e}");
    }
    result
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Per-tenant calendar store. Every mutation is logged before it is applied.
pub struct Engine {
    pub state: DashMap<Ulid, SharedCalendarState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// appointment id → calendar id. Ids are reserved here before their
    /// event is logged.
    pub(super) appointment_index: DashMap<Ulid, Ulid>,
    /// Mutations hold it shared from validation until applied; compaction
    /// holds it exclusively from snapshot until the log is swapped.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply an appointment event to its calendar. The caller holds the write lock.
fn apply_to_calendar(cal: &mut CalendarState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::AppointmentScheduled {
            id,
            calendar_id,
            start,
            end,
            title,
        } => {
            cal.appointments.push(Appointment {
                id: *id,
                start: *start,
                end: *end,
                title: title.clone(),
            });
            index.insert(*id, *calendar_id);
        }
        Event::AppointmentMoved { id, span, .. } => {
            if let Some(pos) = cal.position(*id) {
                let appointment = &mut cal.appointments[pos];
                appointment.start = Some(span.start);
                appointment.end = Some(span.end);
            }
        }
        Event::AppointmentCancelled { id, .. } => {
            cal.remove_appointment(*id);
            index.remove(id);
        }
        // calendar lifecycle is handled at the map level
        Event::CalendarCreated { .. } | Event::CalendarDeleted { .. } => {}
    }
}

fn event_calendar_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::AppointmentScheduled { calendar_id, .. }
        | Event::AppointmentMoved { calendar_id, .. }
        | Event::AppointmentCancelled { calendar_id, .. } => Some(*calendar_id),
        Event::CalendarCreated { .. } | Event::CalendarDeleted { .. } => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            appointment_index: DashMap::new(),
            compaction_gate: RwLock::new(()),
        };
        for event in &events {
            engine.replay_event(event);
        }
        tracing::debug!(
            "replayed {} events into {} calendars",
            events.len(),
            engine.state.len()
        );
        Ok(engine)
    }

    /// Replay runs before the engine is shared, so the locks are never
    /// contended. It may run inside the runtime, which rules out blocking_*.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::CalendarCreated { id, name } => {
                let cal = CalendarState::new(*id, name.clone());
                self.state.insert(*id, Arc::new(RwLock::new(cal)));
            }
            Event::CalendarDeleted { id } => {
                if let Some((_, cal)) = self.state.remove(id) {
                    let guard = cal.try_read().expect("replay: uncontended read");
                    self.unindex(&guard);
                }
            }
            other => {
                let Some(cal) = event_calendar_id(other).and_then(|cid| self.get_calendar(&cid))
                else {
                    return;
                };
                let mut guard = cal.try_write().expect("replay: uncontended write");
                apply_to_calendar(&mut guard, other, &self.appointment_index);
            }
        }
    }

    pub(super) fn unindex(&self, cal: &CalendarState) {
        for appointment in &cal.appointments {
            self.appointment_index.remove(&appointment.id);
        }
    }

    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append_all(vec![event.clone()]).await
    }

    /// Hand `events` to the group-commit writer and wait until they are durable.
    pub(super) async fn wal_append_all(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_calendar(&self, id: &Ulid) -> Option<SharedCalendarState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn calendar_for_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_index.get(appointment_id).map(|e| *e.value())
    }

    /// Whether `cal` is still the calendar registered under `id`. A writer
    /// that waited on the lock of a since-deleted calendar sees `false`.
    pub(super) fn is_live(&self, id: &Ulid, cal: &SharedCalendarState) -> bool {
        self.state
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), cal))
    }

    /// Claim `id` for `calendar_id`, failing if any calendar already has it.
    pub(super) fn reserve_appointment_id(
        &self,
        id: Ulid,
        calendar_id: Ulid,
    ) -> Result<(), EngineError> {
        match self.appointment_index.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(calendar_id);
                Ok(())
            }
        }
    }

    /// Log, apply and broadcast an appointment event.
    pub(super) async fn persist_and_apply(
        &self,
        calendar_id: Ulid,
        cal: &mut CalendarState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_calendar(cal, event, &self.appointment_index);
        self.notify.send(calendar_id, event);
        Ok(())
    }

    /// Write-lock the calendar that owns `appointment_id`.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<CalendarState>), EngineError> {
        let calendar_id = self
            .calendar_for_appointment(appointment_id)
            .ok_or(EngineError::NotFound(*appointment_id))?;
        let cal = self
            .get_calendar(&calendar_id)
            .ok_or(EngineError::NotFound(calendar_id))?;
        let guard = cal.clone().write_owned().await;
        if !self.is_live(&calendar_id, &cal) || guard.position(*appointment_id).is_none() {
            return Err(EngineError::NotFound(*appointment_id));
        }
        Ok((calendar_id, guard))
    }
}
