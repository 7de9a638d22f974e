use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::calendar::{DayKey, SECOND_MS};
use crate::model::*;

use super::classify::Classified;

/// The days and hours currently on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewWindow {
    pub start: DayKey,
    pub columns: u32,
    pub visible_start_hour: u32,
    /// Last visible hour, inclusive.
    pub visible_end_hour: u32,
}

impl ViewWindow {
    /// Full-day window of `columns` days starting at `start`.
    pub fn new(start: DayKey, columns: u32) -> Self {
        Self {
            start,
            columns,
            visible_start_hour: 0,
            visible_end_hour: 23,
        }
    }

    pub fn with_visible_hours(mut self, start_hour: u32, end_hour: u32) -> Self {
        self.visible_start_hour = start_hour;
        self.visible_end_hour = end_hour;
        self
    }

    pub fn days(&self) -> impl Iterator<Item = DayKey> + use<> {
        let start = self.start;
        (0..i64::from(self.columns)).map(move |i| start.add_days(i))
    }

    /// First day after the window.
    pub fn end(&self) -> DayKey {
        self.start.add_days(i64::from(self.columns))
    }

    /// Visible instants of `day`: `[start_hour:00:00, end_hour:59:59]`.
    pub fn hours_on(&self, day: DayKey) -> (Ms, Ms) {
        let from = day.at(self.visible_start_hour, 0);
        let to = day.at(self.visible_end_hour, 59) + 59 * SECOND_MS;
        (from, to)
    }
}

/// Whether `span` intersects the closed window `[from, to]`.
pub fn fits_window(span: &Span, from: Ms, to: Ms) -> bool {
    let spans_window = span.start < from && span.end > to;
    let starts_inside = from <= span.start && span.start < to;
    let ends_inside = from < span.end && span.end <= to;
    spans_window || starts_inside || ends_inside
}

/// Whether an all-day span intersects `[view_start, view_end)` by date.
pub fn blocker_in_view(span: &Span, view_start: DayKey, view_end: DayKey) -> bool {
    let start = DayKey::of(span.start);
    let end = DayKey::of(span.end);
    let spans_view = start < view_start && end > view_end;
    let starts_inside = view_start <= start && start < view_end;
    let ends_inside = view_start < end && end <= view_end;
    spans_view || starts_inside || ends_inside
}

/// Earliest start first; among equal starts the longer entry first.
pub fn by_start_then_longest(a: &Entry, b: &Entry) -> Ordering {
    a.span
        .start
        .cmp(&b.span.start)
        .then_with(|| b.span.end.cmp(&a.span.end))
}

/// Timed entries visible in each column, sorted for lane assignment.
///
/// Only days that have a bucket appear; a bucket whose entries all fall
/// outside the visible hours yields an empty list.
pub fn visible_appointments(
    classified: &Classified,
    view: &ViewWindow,
) -> BTreeMap<DayKey, Vec<Entry>> {
    let mut visible = BTreeMap::new();
    for day in view.days() {
        let Some(bucket) = classified.per_day.get(&day) else {
            continue;
        };
        let (from, to) = view.hours_on(day);
        let mut entries: Vec<Entry> = bucket
            .iter()
            .filter(|e| fits_window(&e.span, from, to))
            .copied()
            .collect();
        entries.sort_by(by_start_then_longest);
        visible.insert(day, entries);
    }
    visible
}

/// All-day entries intersecting the window's days, sorted for lane assignment.
pub fn visible_blockers(classified: &Classified, view: &ViewWindow) -> Vec<Entry> {
    let (view_start, view_end) = (view.start, view.end());
    let mut blockers: Vec<Entry> = classified
        .all_day
        .iter()
        .filter(|e| blocker_in_view(&e.span, view_start, view_end))
        .copied()
        .collect();
    blockers.sort_by(by_start_then_longest);
    blockers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::classify::classify;
    use ulid::Ulid;

    fn day(y: i32, m: u32, d: u32) -> DayKey {
        DayKey::from_ymd(y, m, d).unwrap()
    }

    fn entry(start: Ms, end: Ms) -> Entry {
        Entry {
            id: Ulid::new(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn window_disjunction() {
        let d = day(2024, 2, 1);
        let (from, to) = ViewWindow::new(d, 1).with_visible_hours(8, 17).hours_on(d);
        assert_eq!(from, d.at(8, 0));
        assert_eq!(to, d.at(17, 59) + 59 * SECOND_MS);

        // spans the whole window
        assert!(fits_window(&Span::new(d.at(7, 0), d.at(19, 0)), from, to));
        // starts inside
        assert!(fits_window(&Span::new(d.at(17, 30), d.at(20, 0)), from, to));
        // ends inside
        assert!(fits_window(&Span::new(d.at(6, 0), d.at(8, 30)), from, to));
        // ends exactly at window start
        assert!(!fits_window(&Span::new(d.at(6, 0), d.at(8, 0)), from, to));
        // entirely after
        assert!(!fits_window(&Span::new(d.at(18, 0), d.at(19, 0)), from, to));
    }

    #[test]
    fn sorted_by_start_then_longest() {
        let d = day(2024, 2, 1);
        let short = Appointment::new(Ulid::new(), d.at(9, 0), d.at(9, 30));
        let long = Appointment::new(Ulid::new(), d.at(9, 0), d.at(11, 0));
        let early = Appointment::new(Ulid::new(), d.at(8, 0), d.at(8, 30));
        let c = classify(&[short.clone(), long.clone(), early.clone()]);
        let v = visible_appointments(&c, &ViewWindow::new(d, 1));
        let ids: Vec<_> = v[&d].iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![early.id, long.id, short.id]);
    }

    #[test]
    fn only_window_days_are_kept() {
        let d = day(2024, 2, 1);
        let inside = Appointment::new(Ulid::new(), d.at(9, 0), d.at(10, 0));
        let outside = Appointment::new(Ulid::new(), d.add_days(3).at(9, 0), d.add_days(3).at(10, 0));
        let c = classify(&[inside, outside]);
        let v = visible_appointments(&c, &ViewWindow::new(d, 2));
        assert_eq!(v.keys().copied().collect::<Vec<_>>(), vec![d]);
    }

    #[test]
    fn hidden_hours_leave_empty_bucket() {
        let d = day(2024, 2, 1);
        let night = Appointment::new(Ulid::new(), d.at(2, 0), d.at(3, 0));
        let c = classify(&[night]);
        let v = visible_appointments(&c, &ViewWindow::new(d, 1).with_visible_hours(8, 17));
        assert!(v[&d].is_empty());
    }

    #[test]
    fn midnight_crossing_visible_on_both_days() {
        let d = day(2024, 2, 1);
        let late = Appointment::new(Ulid::new(), d.at(23, 30), d.succ().at(0, 30));
        let c = classify(&[late.clone()]);
        let v = visible_appointments(&c, &ViewWindow::new(d, 2));
        assert_eq!(v[&d][0].id, late.id);
        assert_eq!(v[&d.succ()][0].id, late.id);
    }

    #[test]
    fn blocker_visibility_by_date() {
        let d = day(2024, 2, 5);
        let view = ViewWindow::new(d, 7);
        let all_day = |from: DayKey, days: i64| {
            Appointment::new(Ulid::new(), from.midnight(), from.add_days(days).midnight())
        };

        let before = all_day(d.add_days(-2), 2); // ends at view start
        let straddles_start = all_day(d.add_days(-1), 2);
        let inside = all_day(d.add_days(3), 1);
        let covers = all_day(d.add_days(-1), 10);
        let after = all_day(d.add_days(7), 1);

        let c = classify(&[
            before.clone(),
            straddles_start.clone(),
            inside.clone(),
            covers.clone(),
            after.clone(),
        ]);
        let ids: Vec<_> = visible_blockers(&c, &view).iter().map(|e| e.id).collect();
        // sorted: covers (-1, longer) before straddles_start (-1), then inside
        assert_eq!(ids, vec![covers.id, straddles_start.id, inside.id]);
    }

    #[test]
    fn ordering_ties_keep_input_order() {
        let a = entry(0, 10);
        let b = entry(0, 10);
        let mut v = vec![a, b];
        v.sort_by(by_start_then_longest);
        assert_eq!(v[0].id, a.id);
    }
}
