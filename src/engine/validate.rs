use crate::grid::ViewWindow;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

fn validate_instant(t: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Check whichever bounds are present. Both missing is fine: the host may
/// schedule a placeholder and fill the times in with a move.
pub fn validate_bounds(start: Option<Ms>, end: Option<Ms>) -> Result<(), EngineError> {
    if let Some(start) = start {
        validate_instant(start)?;
    }
    if let Some(end) = end {
        validate_instant(end)?;
    }
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(EngineError::InvalidSpan { start, end });
        }
        if end - start > MAX_APPOINTMENT_DURATION_MS {
            return Err(EngineError::LimitExceeded("appointment too long"));
        }
    }
    Ok(())
}

pub(super) fn validate_text(
    text: Option<&str>,
    max_len: usize,
    what: &'static str,
) -> Result<(), EngineError> {
    match text {
        Some(t) if t.len() > max_len => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

pub fn validate_view(view: &ViewWindow) -> Result<(), EngineError> {
    if view.columns == 0 {
        return Err(EngineError::InvalidView("at least one day column is required"));
    }
    if view.columns > MAX_VIEW_COLUMNS {
        return Err(EngineError::InvalidView("too many day columns"));
    }
    if view.visible_end_hour > MAX_VISIBLE_HOUR {
        return Err(EngineError::InvalidView("end hour must be at most 23"));
    }
    if view.visible_start_hour > view.visible_end_hour {
        return Err(EngineError::InvalidView("start hour is after end hour"));
    }
    Ok(())
}
