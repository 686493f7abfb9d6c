use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tablebook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tablebook_query_duration_seconds";

/// Counter: booking attempts. Labels: outcome (`confirmed` or the error kind).
pub const BOOKINGS_TOTAL: &str = "tablebook_bookings_total";

/// Histogram: booking latency in seconds, including the WAL fsync.
pub const BOOKING_DURATION_SECONDS: &str = "tablebook_booking_duration_seconds";

/// Counter: successful client signups.
pub const CLIENTS_REGISTERED_TOTAL: &str = "tablebook_clients_registered_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tablebook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tablebook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tablebook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tablebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tablebook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::RegisterClient { .. } => "register_client",
        Command::AuthenticateClient { .. } => "authenticate_client",
        Command::BookReservation { .. } => "book_reservation",
        Command::SelectClientReservations { .. } => "select_client_reservations",
        Command::SelectTableReservations { .. } => "select_table_reservations",
        Command::SelectTables { .. } => "select_tables",
        Command::SelectRestaurants => "select_restaurants",
    }
}
