use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "covers_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "covers_query_duration_seconds";

/// Counter: reservations accepted. Labels: source.
pub const RESERVATIONS_CREATED_TOTAL: &str = "covers_reservations_created_total";

/// Counter: booking requests turned down. Labels: reason.
pub const REJECTIONS_TOTAL: &str = "covers_rejections_total";

/// Counter: committed status changes. Labels: status (the new one).
pub const STATUS_CHANGES_TOTAL: &str = "covers_status_changes_total";

/// Counter: committed edits of booking details.
pub const REPLACEMENTS_TOTAL: &str = "covers_replacements_total";

/// Counter: slot lock waits that hit the lock timeout.
pub const LOCK_TIMEOUTS_TOTAL: &str = "covers_lock_timeouts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "covers_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "covers_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "covers_connections_rejected_total";

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "covers_tenants_active";

/// Counter: refused logins.
pub const AUTH_FAILURES_TOTAL: &str = "covers_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "covers_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "covers_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "covers_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateReservation(_) => "create_reservation",
        Command::ChangeStatus { .. } => "change_status",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::EditReservation { .. } => "edit_reservation",
        Command::AssignTable { .. } => "assign_table",
        Command::SetRules(_) => "set_rules",
        Command::SetPeriodCapacity { .. } => "set_period_capacity",
        Command::UpsertPeriod(_) => "upsert_period",
        Command::DeletePeriod { .. } => "delete_period",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectSummaries { .. } => "select_summaries",
        Command::SelectPeriods { .. } => "select_periods",
        Command::SelectRules => "select_rules",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
