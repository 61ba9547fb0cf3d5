use std::io;
use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "stayd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "stayd_query_duration_seconds";

/// Counter: admission outcomes. Labels: kind, status.
pub const ADMISSIONS_TOTAL: &str = "stayd_admissions_total";

/// Histogram: admission latency in seconds, lock wait and fsync included.
pub const ADMISSION_DURATION_SECONDS: &str = "stayd_admission_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "stayd_connections_active";
pub const CONNECTIONS_TOTAL: &str = "stayd_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "stayd_connections_rejected_total";

/// Gauge: loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "stayd_tenants_active";

pub const WAL_FLUSH_DURATION_SECONDS: &str = "stayd_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "stayd_wal_flush_batch_size";

/// Histogram: time spent waiting for a resource write lock.
pub const LOCK_WAIT_SECONDS: &str = "stayd_lock_wait_seconds";

/// Install the Prometheus exporter. No-op if no port is configured.
pub fn init(port: Option<u16>) -> io::Result<()> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| io::Error::other(format!("metrics exporter: {e}")))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label of a command for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertStay { .. } => "insert_stay",
        Command::InsertEvent { .. } => "insert_event",
        Command::InsertExperience { .. } => "insert_experience",
        Command::SetPricing { .. } => "set_pricing",
        Command::DeleteResource { .. } => "delete_resource",
        Command::BookStay { .. } => "book_stay",
        Command::BookEvent { .. } => "book_event",
        Command::BookExperience { .. } => "book_experience",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::SelectResources => "select_resources",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse_sql;

    #[test]
    fn labels_follow_the_statement() {
        let cmd = parse_sql("SELECT * FROM resources").unwrap();
        assert_eq!(command_label(&cmd), "select_resources");
        let cmd = parse_sql("DELETE FROM resources WHERE id = 1").unwrap();
        assert_eq!(command_label(&cmd), "delete_resource");
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
