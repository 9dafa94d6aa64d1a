use std::net::SocketAddr;

// ── Engine ──────────────────────────────────────────────────────

/// Counter: proposals evaluated by `Schedule::apply`. Labels: change, outcome.
pub const PROPOSALS_TOTAL: &str = "fleetslot_proposals_total";

// ── Store ───────────────────────────────────────────────────────

/// Counter: changes submitted to the in-memory store. Labels: change, outcome.
pub const STORE_COMMITS_TOTAL: &str = "fleetslot_store_commits_total";

/// Counter: drafts cancelled by the reaper.
pub const REAPED_DRAFTS_TOTAL: &str = "fleetslot_reaped_drafts_total";

// ── Session ─────────────────────────────────────────────────────

/// Counter: optimistic commits sent by sessions. Labels: change.
pub const SESSION_COMMITS_TOTAL: &str = "fleetslot_session_commits_total";

/// Counter: optimistic mutations rolled back. Labels: reason.
pub const SESSION_REVERTS_TOTAL: &str = "fleetslot_session_reverts_total";

/// Counter: acknowledgements dropped because a newer commit superseded them.
pub const STALE_ACKS_TOTAL: &str = "fleetslot_stale_acks_total";

/// Counter: per-vehicle index rebuilds from authoritative snapshots.
pub const RECONCILES_TOTAL: &str = "fleetslot_reconciles_total";

/// Histogram: time from sending a commit to its acknowledgement, in seconds.
pub const COMMIT_LATENCY_SECONDS: &str = "fleetslot_commit_latency_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("failed to install Prometheus metrics exporter: {e}"),
    }
}
