use crate::calendar::DAY_MS;
use crate::model::Ms;

/// Earliest accepted instant (1970-01-01T00:00).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// Latest accepted instant (9999-12-31T23:59:59.999).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;
pub const MAX_APPOINTMENT_DURATION_MS: Ms = 366 * DAY_MS;

pub const MAX_TITLE_LEN: usize = 1024;
pub const MAX_NAME_LEN: usize = 1024;

pub const MAX_APPOINTMENTS_PER_CALENDAR: usize = 100_000;
pub const MAX_CALENDARS_PER_TENANT: usize = 10_000;
pub const MAX_BATCH_SIZE: usize = 1_000;

pub const MAX_VIEW_COLUMNS: u32 = 366;
pub const MAX_VISIBLE_HOUR: u32 = 23;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 256;
