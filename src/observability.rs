use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome, reason.
pub const BOOKINGS_TOTAL: &str = "slotkeep_bookings_total";

/// Counter: committed status transitions. Labels: from, to.
pub const TRANSITIONS_TOTAL: &str = "slotkeep_transitions_total";

/// Counter: appointments canceled by an administrative cascade. Labels: trigger.
pub const CASCADE_CANCELLATIONS_TOTAL: &str = "slotkeep_cascade_cancellations_total";

/// Counter: whole-operation retries after a transient failure. Labels: op.
pub const COMMIT_RETRIES_TOTAL: &str = "slotkeep_commit_retries_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeep_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotkeep_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
