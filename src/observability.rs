use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "gridlane_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "gridlane_query_duration_seconds";

// ── Layout ──────────────────────────────────────────────────────

/// Counter: layout passes run.
pub const LAYOUT_PASSES_TOTAL: &str = "gridlane_layout_passes_total";

/// Histogram: time spent in one layout pass, in seconds.
pub const LAYOUT_DURATION_SECONDS: &str = "gridlane_layout_duration_seconds";

/// Histogram: nodes produced per pass, blockers included.
pub const LAYOUT_NODES: &str = "gridlane_layout_nodes";

// ── Resources ───────────────────────────────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "gridlane_connections_active";
pub const CONNECTIONS_TOTAL: &str = "gridlane_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "gridlane_connections_rejected_total";

/// Gauge: loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "gridlane_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "gridlane_wal_flush_duration_seconds";

/// Histogram: events per group commit.
pub const WAL_FLUSH_BATCH_SIZE: &str = "gridlane_wal_flush_batch_size";

/// Install the Prometheus exporter. No-op without a port.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCalendar { .. } => "insert_calendar",
        Command::DeleteCalendar { .. } => "delete_calendar",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::BatchInsertAppointments { .. } => "batch_insert_appointments",
        Command::MoveAppointment { .. } => "move_appointment",
        Command::DeleteAppointment { .. } => "delete_appointment",
        Command::SelectCalendars => "select_calendars",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectLayout { json: false, .. } => "select_layout",
        Command::SelectLayout { json: true, .. } => "select_layout_json",
        Command::Listen { .. } => "listen",
    }
}
