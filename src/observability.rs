use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "reservd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "reservd_query_duration_seconds";

// ── Admission ───────────────────────────────────────────────────

/// Counter: booking requests admitted as pending reservations.
pub const RESERVATIONS_ADMITTED_TOTAL: &str = "reservd_reservations_admitted_total";

/// Counter: booking requests turned away for lack of seats.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "reservd_reservations_rejected_total";

// ── Background jobs ─────────────────────────────────────────────

/// Counter: daily sweep runs. Labels: status.
pub const SWEEP_RUNS_TOTAL: &str = "reservd_sweep_runs_total";

/// Counter: reservations moved to completed by the sweep.
pub const SWEEP_COMPLETED_TOTAL: &str = "reservd_sweep_completed_total";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "reservd_wal_compactions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "reservd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "reservd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "reservd_connections_rejected_total";

/// Counter: statements refused because the session's role lacks the privilege.
pub const AUTH_FAILURES_TOTAL: &str = "reservd_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reservd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "reservd_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectAvailability { .. } => "select_availability",
        Command::InsertReservation(_) => "insert_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::UpdateStatus { .. } => "update_status",
        Command::DeleteReservation { .. } => "delete_reservation",
    }
}
