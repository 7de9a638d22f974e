use std::collections::BTreeMap;

use crate::calendar::{is_all_day, DayKey};
use crate::model::*;

/// Appointments split into per-day buckets and the all-day row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    /// Timed entries by every calendar day their range touches, in input order.
    pub per_day: BTreeMap<DayKey, Vec<Entry>>,
    /// All-day entries in input order.
    pub all_day: Vec<Entry>,
}

/// Bucket appointments by day. Appointments without both bounds are skipped.
///
/// A timed appointment crossing midnight is listed under each day it touches;
/// the entry itself is not split.
pub fn classify(appointments: &[Appointment]) -> Classified {
    let mut out = Classified::default();
    for appointment in appointments {
        let Some(span) = appointment.span() else {
            continue;
        };
        let entry = Entry {
            id: appointment.id,
            span,
        };
        if is_all_day(&span) {
            out.all_day.push(entry);
            continue;
        }
        for day in DayKey::of(span.start).through(DayKey::of(span.end)) {
            out.per_day.entry(day).or_default().push(entry);
        }
    }
    out
}
