use std::time::Instant;

use ulid::Ulid;

use crate::grid::{self, GridLayout, ViewWindow};
use crate::model::*;
use crate::observability::{LAYOUT_DURATION_SECONDS, LAYOUT_NODES, LAYOUT_PASSES_TOTAL};

use super::validate::validate_view;
use super::{Engine, EngineError};

impl Engine {
    /// Calendars ordered by id.
    pub async fn list_calendars(&self) -> Vec<CalendarInfo> {
        let calendars: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(calendars.len());
        for cal in calendars {
            let guard = cal.read().await;
            out.push(CalendarInfo {
                id: guard.id,
                name: guard.name.clone(),
                appointment_count: guard.appointments.len(),
            });
        }
        out.sort_by_key(|c| c.id);
        out
    }

    /// Appointments of a calendar in scheduling order. Unknown calendars have none.
    pub async fn get_appointments(&self, calendar_id: Ulid) -> Vec<AppointmentInfo> {
        let Some(cal) = self.get_calendar(&calendar_id) else {
            return Vec::new();
        };
        let guard = cal.read().await;
        guard
            .appointments
            .iter()
            .map(|a| AppointmentInfo {
                id: a.id,
                calendar_id,
                start: a.start,
                end: a.end,
                title: a.title.clone(),
            })
            .collect()
    }

    /// Run the layout pass for one calendar over `view`.
    pub async fn grid_layout(
        &self,
        calendar_id: Ulid,
        view: &ViewWindow,
    ) -> Result<GridLayout, EngineError> {
        validate_view(view)?;
        let cal = self
            .get_calendar(&calendar_id)
            .ok_or(EngineError::NotFound(calendar_id))?;
        let guard = cal.read().await;

        let started = Instant::now();
        let layout = grid::layout(&guard.appointments, view);
        let elapsed = started.elapsed();
        drop(guard);

        let nodes = layout.node_count();
        metrics::counter!(LAYOUT_PASSES_TOTAL).increment(1);
        metrics::histogram!(LAYOUT_DURATION_SECONDS).record(elapsed.as_secs_f64());
        metrics::histogram!(LAYOUT_NODES).record(nodes as f64);
        tracing::debug!(
            %calendar_id,
            start = %view.start,
            columns = view.columns,
            nodes,
            "layout pass in {elapsed:?}"
        );
        Ok(layout)
    }
}
