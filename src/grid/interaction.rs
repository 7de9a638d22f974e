//! Drag, drop and resize arithmetic over the grid's half-hour slots.
//!
//! Every function returns the span the appointment would be moved to, or
//! `None` when the gesture leaves it where it is.

use crate::calendar::{is_all_day, DayKey, HALF_HOUR_MS, HOUR_MS};
use crate::model::*;

use super::visibility::ViewWindow;

pub const SLOT_MS: Ms = HALF_HOUR_MS;

/// Zero when the visible hours are inverted.
fn slots_per_day(view: &ViewWindow) -> u32 {
    view.visible_end_hour
        .saturating_add(1)
        .saturating_sub(view.visible_start_hour)
        .saturating_mul(2)
}

/// Drop slots in the timed grid: two per visible hour per column.
pub fn slot_count(view: &ViewWindow) -> u32 {
    slots_per_day(view).saturating_mul(view.columns)
}

/// Start of slot `index`, counted column by column from the window's first day.
pub fn slot_start(view: &ViewWindow, index: u32) -> Option<Ms> {
    if index >= slot_count(view) {
        return None;
    }
    let per_day = slots_per_day(view);
    let day = view.start.add_days(i64::from(index / per_day));
    Some(day.at(view.visible_start_hour, 0) + Ms::from(index % per_day) * SLOT_MS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeHandle {
    Top,
    Bottom,
}

/// Drag one edge of `span` onto a slot. The opposite edge stays put and the
/// result always covers the whole target slot.
pub fn resize(span: &Span, slot_start: Ms, handle: ResizeHandle) -> Option<Span> {
    let fixed = match handle {
        ResizeHandle::Bottom => span.start,
        ResizeHandle::Top => span.end,
    };
    let resized = Span::new(fixed.min(slot_start), fixed.max(slot_start + SLOT_MS));
    (resized != *span).then_some(resized)
}

/// Drop onto a timed slot. All-day entries become one hour long.
pub fn drop_on_slot(span: &Span, slot_start: Ms) -> Option<Span> {
    if is_all_day(span) {
        return Some(Span::new(slot_start, slot_start + HOUR_MS));
    }
    if span.start == slot_start {
        return None;
    }
    Some(Span::new(slot_start, slot_start + span.duration_ms()))
}

/// Drop onto a day of the all-day row. Timed entries become one-day blockers.
pub fn drop_on_blocker_day(span: &Span, day: DayKey) -> Option<Span> {
    let start = day.midnight();
    if !is_all_day(span) {
        return Some(Span::new(start, day.succ().midnight()));
    }
    if span.start == start {
        return None;
    }
    Some(Span::new(start, start + span.duration_ms()))
}
