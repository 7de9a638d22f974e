use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Milliseconds on the naive local timeline.
pub type Ms = i64;

/// Half-open interval `[start, end)`. Zero-length spans are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// An appointment as the host supplies it. Either bound may still be missing
/// while the host is mid-edit; such appointments are skipped by the layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub title: Option<String>,
}

impl Appointment {
    pub fn new(id: Ulid, start: Ms, end: Ms) -> Self {
        Self {
            id,
            start: Some(start),
            end: Some(end),
            title: None,
        }
    }

    /// The appointment's span, if both bounds are present and ordered.
    pub fn span(&self) -> Option<Span> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start <= end => Some(Span::new(start, end)),
            _ => None,
        }
    }
}

/// A well-formed appointment reduced to what the layout needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub id: Ulid,
    #[serde(flatten)]
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct CalendarState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Appointments in scheduling order. Moves update in place.
    pub appointments: Vec<Appointment>,
}

impl CalendarState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            appointments: Vec::new(),
        }
    }

    pub fn position(&self, id: Ulid) -> Option<usize> {
        self.appointments.iter().position(|a| a.id == id)
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        self.position(id).map(|pos| self.appointments.remove(pos))
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CalendarCreated {
        id: Ulid,
        name: Option<String>,
    },
    CalendarDeleted {
        id: Ulid,
    },
    AppointmentScheduled {
        id: Ulid,
        calendar_id: Ulid,
        start: Option<Ms>,
        end: Option<Ms>,
        title: Option<String>,
    },
    AppointmentMoved {
        id: Ulid,
        calendar_id: Ulid,
        span: Span,
    },
    AppointmentCancelled {
        id: Ulid,
        calendar_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub appointment_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentInfo {
    pub id: Ulid,
    pub calendar_id: Ulid,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub title: Option<String>,
}
