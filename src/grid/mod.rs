mod classify;
mod interaction;
mod lanes;
mod position;
mod visibility;

pub use classify::{classify, Classified};
pub use interaction::{
    drop_on_blocker_day, drop_on_slot, resize, slot_count, slot_start, ResizeHandle, SLOT_MS,
};
pub use lanes::{
    assign_levels, assign_widths, effective_span, layout_blockers, layout_day, DayLayout,
    LayoutNode, MIN_RENDERED_DURATION_MS,
};
pub use position::{
    appointment_geometry, blocker_top, blockers_height, bottom_position, is_visible_hour,
    lane_geometry, top_position, Density, Geometry, LaneGeometry,
};
pub use visibility::{
    blocker_in_view, by_start_then_longest, fits_window, visible_appointments, visible_blockers,
    ViewWindow,
};

use std::collections::BTreeMap;

use serde::Serialize;

use crate::calendar::DayKey;
use crate::model::Appointment;

/// Lanes for every visible day column plus the all-day row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GridLayout {
    pub days: BTreeMap<DayKey, DayLayout>,
    pub blockers: DayLayout,
}

impl GridLayout {
    pub fn node_count(&self) -> usize {
        self.blockers.nodes.len() + self.days.values().map(|d| d.nodes.len()).sum::<usize>()
    }
}

/// Full layout pass over a snapshot of appointments.
pub fn layout(appointments: &[Appointment], view: &ViewWindow) -> GridLayout {
    let classified = classify(appointments);
    let days = visible_appointments(&classified, view)
        .into_iter()
        .map(|(day, entries)| (day, layout_day(&entries)))
        .collect();
    let blockers = layout_blockers(&visible_blockers(&classified, view));
    GridLayout { days, blockers }
}
