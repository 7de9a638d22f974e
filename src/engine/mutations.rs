use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::validate::{validate_bounds, validate_text};
use super::{apply_to_calendar, event_calendar_id, Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_calendar(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if self.state.len() >= MAX_CALENDARS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many calendars"));
        }
        validate_text(name.as_deref(), MAX_NAME_LEN, "calendar name too long")?;
        let _gate = self.compaction_gate.read().await;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::CalendarCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(CalendarState::new(id, name))));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Delete a calendar together with its appointments.
    pub async fn delete_calendar(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let cal = self.get_calendar(&id).ok_or(EngineError::NotFound(id))?;
        let guard = cal.write().await;
        if !self.is_live(&id, &cal) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::CalendarDeleted { id };
        self.wal_append(&event).await?;
        self.unindex(&guard);
        self.state.remove(&id);
        drop(guard);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    pub async fn schedule_appointment(
        &self,
        id: Ulid,
        calendar_id: Ulid,
        start: Option<Ms>,
        end: Option<Ms>,
        title: Option<String>,
    ) -> Result<(), EngineError> {
        validate_bounds(start, end)?;
        validate_text(title.as_deref(), MAX_TITLE_LEN, "title too long")?;
        let _gate = self.compaction_gate.read().await;
        let cal = self
            .get_calendar(&calendar_id)
            .ok_or(EngineError::NotFound(calendar_id))?;
        let mut guard = cal.write().await;
        if !self.is_live(&calendar_id, &cal) {
            return Err(EngineError::NotFound(calendar_id));
        }
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_CALENDAR {
            return Err(EngineError::LimitExceeded("too many appointments in calendar"));
        }
        self.reserve_appointment_id(id, calendar_id)?;

        let event = Event::AppointmentScheduled { id, calendar_id, start, end, title };
        let result = self.persist_and_apply(calendar_id, &mut guard, &event).await;
        if result.is_err() {
            self.appointment_index.remove(&id);
        }
        result
    }

    /// Schedule several appointments, possibly across calendars. The batch is
    /// logged as one unit: either every appointment is scheduled or none is.
    pub async fn batch_schedule_appointments(
        &self,
        appointments: Vec<AppointmentInfo>,
    ) -> Result<(), EngineError> {
        if appointments.is_empty() {
            return Ok(());
        }
        if appointments.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        for a in &appointments {
            validate_bounds(a.start, a.end)?;
            validate_text(a.title.as_deref(), MAX_TITLE_LEN, "title too long")?;
        }

        let mut per_calendar: BTreeMap<Ulid, usize> = BTreeMap::new();
        for a in &appointments {
            *per_calendar.entry(a.calendar_id).or_default() += 1;
        }

        let _gate = self.compaction_gate.read().await;
        // BTreeMap order gives a global lock order across concurrent batches.
        let mut guards = BTreeMap::new();
        for (&calendar_id, &incoming) in &per_calendar {
            let cal = self
                .get_calendar(&calendar_id)
                .ok_or(EngineError::NotFound(calendar_id))?;
            let guard = cal.clone().write_owned().await;
            if !self.is_live(&calendar_id, &cal) {
                return Err(EngineError::NotFound(calendar_id));
            }
            if guard.appointments.len() + incoming > MAX_APPOINTMENTS_PER_CALENDAR {
                return Err(EngineError::LimitExceeded("too many appointments in calendar"));
            }
            guards.insert(calendar_id, guard);
        }

        let mut reserved = Vec::with_capacity(appointments.len());
        for a in &appointments {
            if let Err(e) = self.reserve_appointment_id(a.id, a.calendar_id) {
                self.release_ids(&reserved);
                return Err(e);
            }
            reserved.push(a.id);
        }

        let events: Vec<Event> = appointments
            .into_iter()
            .map(|a| Event::AppointmentScheduled {
                id: a.id,
                calendar_id: a.calendar_id,
                start: a.start,
                end: a.end,
                title: a.title,
            })
            .collect();
        if let Err(e) = self.wal_append_all(events.clone()).await {
            self.release_ids(&reserved);
            return Err(e);
        }
        for event in &events {
            let Some(calendar_id) = event_calendar_id(event) else {
                continue;
            };
            if let Some(guard) = guards.get_mut(&calendar_id) {
                apply_to_calendar(guard, event, &self.appointment_index);
            }
            self.notify.send(calendar_id, event);
        }
        Ok(())
    }

    fn release_ids(&self, ids: &[Ulid]) {
        for id in ids {
            self.appointment_index.remove(id);
        }
    }

    /// Give an appointment new bounds, keeping its place in the calendar.
    pub async fn move_appointment(&self, id: Ulid, start: Ms, end: Ms) -> Result<Ulid, EngineError> {
        validate_bounds(Some(start), Some(end))?;
        let _gate = self.compaction_gate.read().await;
        let (calendar_id, mut guard) = self.resolve_appointment_write(&id).await?;
        let event = Event::AppointmentMoved {
            id,
            calendar_id,
            span: Span::new(start, end),
        };
        self.persist_and_apply(calendar_id, &mut guard, &event).await?;
        Ok(calendar_id)
    }

    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (calendar_id, mut guard) = self.resolve_appointment_write(&id).await?;
        let event = Event::AppointmentCancelled { id, calendar_id };
        self.persist_and_apply(calendar_id, &mut guard, &event).await?;
        Ok(calendar_id)
    }

    /// Rewrite the WAL as the minimal event sequence for the current state.
    /// Mutations wait until the new log is in place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let calendars: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for cal in calendars {
            let guard = cal.read().await;
            events.push(Event::CalendarCreated {
                id: guard.id,
                name: guard.name.clone(),
            });
            events.extend(guard.appointments.iter().map(|a| Event::AppointmentScheduled {
                id: a.id,
                calendar_id: guard.id,
                start: a.start,
                end: a.end,
                title: a.title.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
