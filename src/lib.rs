//! Lane-assignment layout for a planning calendar, served over the Postgres
//! wire protocol. `grid` holds the pure layout passes; `engine` keeps
//! calendars in memory behind a write-ahead log.

pub mod auth;
pub mod calendar;
pub mod compactor;
pub mod engine;
pub mod grid;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
