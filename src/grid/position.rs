//! Pixel and percentage geometry for laid-out entries.

use serde::Serialize;

use crate::calendar::{hour_of, minute_of, DayKey};
use crate::model::*;

use super::visibility::ViewWindow;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Density {
    #[default]
    Cozy,
    Compact,
}

impl Density {
    /// Height of one hour row in the timed grid.
    pub fn row_height(self) -> f64 {
        match self {
            Density::Cozy => 69.0,
            Density::Compact => 48.0,
        }
    }

    /// Height of one lane in the all-day row.
    pub fn blocker_row_height(self) -> f64 {
        match self {
            Density::Cozy => 34.0,
            Density::Compact => 25.0,
        }
    }
}

/// Offset of instant `t` from the top of the first visible hour.
pub fn top_position(t: Ms, view: &ViewWindow, row_height: f64) -> f64 {
    let hours = f64::from(hour_of(t)) - f64::from(view.visible_start_hour);
    row_height * hours + row_height / 60.0 * f64::from(minute_of(t))
}

/// Offset of instant `t` from the bottom of the last visible hour.
pub fn bottom_position(t: Ms, view: &ViewWindow, row_height: f64) -> f64 {
    let hours = f64::from(view.visible_end_hour) + 1.0 - f64::from(hour_of(t));
    row_height * hours - row_height / 60.0 * f64::from(minute_of(t))
}

/// Vertical placement of a timed entry inside one day column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Geometry {
    pub top: f64,
    pub bottom: f64,
}

/// Entries running past either edge of the column's visible hours are pinned
/// to that edge.
pub fn appointment_geometry(span: &Span, day: DayKey, view: &ViewWindow, density: Density) -> Geometry {
    let row_height = density.row_height();
    let (from, to) = view.hours_on(day);
    let top = if span.start < from {
        0.0
    } else {
        top_position(span.start, view, row_height)
    };
    let bottom = if span.end > to {
        0.0
    } else {
        bottom_position(span.end, view, row_height)
    };
    Geometry { top, bottom }
}

/// Horizontal placement as percentages of the column width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LaneGeometry {
    pub left_pct: f64,
    pub width_pct: f64,
}

pub fn lane_geometry(level: u32, width: u32, max_level: u32) -> LaneGeometry {
    let lanes = f64::from(max_level) + 1.0;
    LaneGeometry {
        left_pct: 100.0 * f64::from(level) / lanes,
        width_pct: 100.0 * f64::from(width) / lanes,
    }
}

pub fn blocker_top(level: u32, density: Density) -> f64 {
    density.blocker_row_height() * f64::from(level) + 1.0
}

/// Height of the all-day row container.
pub fn blockers_height(max_level: u32, density: Density) -> f64 {
    let height = (f64::from(max_level) + 1.0) * density.blocker_row_height();
    if max_level > 0 { height + 3.0 } else { height }
}

pub fn is_visible_hour(hour: u32, view: &ViewWindow) -> bool {
    view.visible_start_hour <= hour && hour <= view.visible_end_hour
}
