// Private module declaration
mod server;

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Push event throughput per topic
// - Merge outcomes (applied vs rejected, by rejection reason)
// - Pull refreshes (scheduled, completed, failed/timed out)
// - Optimistic applies and remote command failures
// - Tracking gauge and channel connection state
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the synchronization stack.
pub struct SyncMetrics {
    registry: Registry,

    // Push Event Metrics
    pub events_received: IntCounterVec,

    // Snapshot Store Metrics
    pub merges_applied: IntCounter,
    pub merges_rejected: IntCounterVec,

    // Refresh Metrics
    pub refreshes_scheduled: IntCounter,
    pub refreshes_completed: IntCounter,
    pub refreshes_failed: IntCounter,

    // Customer Action Metrics
    pub optimistic_applies: IntCounter,
    pub remote_command_failures: IntCounterVec,

    // Engine State Metrics
    pub tracked_orders: IntGauge,
    pub connection_state: IntGauge,
}

impl SyncMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_received = IntCounterVec::new(
            Opts::new("sync_events_received_total", "Push events received per topic"),
            &["topic"],
        )?;
        registry.register(Box::new(events_received.clone()))?;

        let merges_applied = IntCounter::new(
            "store_merges_applied_total",
            "Partial updates merged into the snapshot store",
        )?;
        registry.register(Box::new(merges_applied.clone()))?;

        let merges_rejected = IntCounterVec::new(
            Opts::new(
                "store_merges_rejected_total",
                "Partial updates rejected by state machine validation",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(merges_rejected.clone()))?;

        let refreshes_scheduled = IntCounter::new(
            "refreshes_scheduled_total",
            "Authoritative pull refreshes scheduled",
        )?;
        registry.register(Box::new(refreshes_scheduled.clone()))?;

        let refreshes_completed = IntCounter::new(
            "refreshes_completed_total",
            "Pull refreshes that replaced the local snapshot",
        )?;
        registry.register(Box::new(refreshes_completed.clone()))?;

        let refreshes_failed = IntCounter::new(
            "refreshes_failed_total",
            "Pull refreshes that failed or timed out",
        )?;
        registry.register(Box::new(refreshes_failed.clone()))?;

        let optimistic_applies = IntCounter::new(
            "optimistic_applies_total",
            "Customer actions applied locally before backend confirmation",
        )?;
        registry.register(Box::new(optimistic_applies.clone()))?;

        let remote_command_failures = IntCounterVec::new(
            Opts::new(
                "remote_command_failures_total",
                "REST commands that failed and applied no local change",
            ),
            &["command"],
        )?;
        registry.register(Box::new(remote_command_failures.clone()))?;

        let tracked_orders = IntGauge::new(
            "tracked_orders",
            "Orders currently tracked by the reconciliation engine",
        )?;
        registry.register(Box::new(tracked_orders.clone()))?;

        let connection_state = IntGauge::new(
            "channel_connection_state",
            "Event channel state (0=Disconnected, 1=Connecting, 2=Connected)",
        )?;
        registry.register(Box::new(connection_state.clone()))?;

        Ok(Self {
            registry,
            events_received,
            merges_applied,
            merges_rejected,
            refreshes_scheduled,
            refreshes_completed,
            refreshes_failed,
            optimistic_applies,
            remote_command_failures,
            tracked_orders,
            connection_state,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn test_metrics_register_without_conflicts() {
        let metrics = SyncMetrics::new().unwrap();
        metrics.events_received.with_label_values(&["ORDER_CREATED"]).inc();
        metrics.merges_applied.inc();
        metrics.tracked_orders.set(3);

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&metrics.registry().gather(), &mut buffer)
            .unwrap();
        let exposition = String::from_utf8(buffer).unwrap();
        assert!(exposition.contains("sync_events_received_total"));
        assert!(exposition.contains("tracked_orders 3"));
    }
}
