use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "moorage_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "moorage_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "moorage_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "moorage_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "moorage_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "moorage_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "moorage_wal_flush_batch_size";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: lock or booking attempts rejected by an overlap. Labels: reason.
pub const CONFLICTS_TOTAL: &str = "moorage_conflicts_total";

/// Counter: locks placed.
pub const LOCKS_PLACED_TOTAL: &str = "moorage_locks_placed_total";

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "moorage_bookings_created_total";

/// Counter: expired records removed by the sweeper.
pub const SWEPT_RECORDS_TOTAL: &str = "moorage_swept_records_total";

/// Counter: confirmations that could not be delivered.
pub const NOTIFICATION_FAILURES_TOTAL: &str = "moorage_notification_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Request variant to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::CheckAvailability { .. } => "check_availability",
        Request::LockSlot { .. } => "lock_slot",
        Request::ReleaseSlot { .. } => "release_slot",
        Request::CreateBooking(_) => "create_booking",
        Request::RecordSettlement { .. } => "record_settlement",
        Request::CancelBooking { .. } => "cancel_booking",
        Request::GetBooking { .. } => "get_booking",
        Request::ListSlots { .. } => "list_slots",
        Request::ListSettlements { .. } => "list_settlements",
    }
}
