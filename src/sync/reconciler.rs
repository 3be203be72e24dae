use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::OrderApi;
use crate::domain::order::{
    CompositeOrder, OrderError, OrderEvent, OrderId, OrderPatch, ProposalId, ProposalResolver,
};
use crate::metrics::SyncMetrics;

use super::channel::{ChannelEvent, ConnectionState, EventChannel};
use super::store::OrderSnapshotStore;

// ============================================================================
// Reconciliation Engine - arbitrates push events against pull refreshes
// ============================================================================
//
// Per tracked order id the engine runs a SYNCED / STALE / REFRESHING state
// machine:
//
// - a push event whose payload carries a usable delta merges directly and
//   the order stays SYNCED;
// - a rejected merge (illegal transition, unknown id, malformed payload) or
//   a payload without a delta marks the order STALE and schedules exactly
//   one debounced pull that `replace`s the authoritative snapshot;
// - while a refresh is in flight, incoming deltas are not merged (the
//   in-flight replace wins); they raise a dirty flag that triggers one
//   follow-up pull after the replace lands;
// - a reconnect marks every tracked order STALE, since events may have been
//   missed while the channel was down;
// - customer accept/reject/cancel applies its patch optimistically and
//   self-heals with a refresh if no corroborating update arrives within a
//   bounded window.
//
// Refresh completions carry a ticket; a completion whose ticket no longer
// matches (untracked, superseded) is discarded.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Collapse window for concurrent STALE triggers on one order.
    pub refresh_debounce: Duration,
    /// Deadline for a REFRESHING pull; exceeding it reverts to STALE.
    pub refresh_timeout: Duration,
    /// How long an optimistic apply waits for a corroborating update before
    /// scheduling a self-healing refresh.
    pub corroboration_window: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            refresh_debounce: Duration::from_millis(250),
            refresh_timeout: Duration::from_secs(10),
            corroboration_window: Duration::from_secs(5),
        }
    }
}

/// Synchronization state of one tracked order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    Stale,
    Refreshing,
}

#[derive(Debug)]
struct OrderTracker {
    sync: SyncState,
    /// Bumped on every committed merge/replace; corroboration watches it.
    epoch: u64,
    /// Ticket of the currently scheduled or in-flight refresh.
    refresh_ticket: Option<Uuid>,
    /// Events arrived while a refresh was in flight.
    dirty: bool,
}

impl OrderTracker {
    fn new() -> Self {
        Self {
            sync: SyncState::Synced,
            epoch: 0,
            refresh_ticket: None,
            dirty: false,
        }
    }
}

struct EngineInner {
    store: Arc<OrderSnapshotStore>,
    api: Arc<dyn OrderApi>,
    metrics: Arc<SyncMetrics>,
    config: ReconcilerConfig,
    tracked: Mutex<HashMap<OrderId, OrderTracker>>,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<EngineInner>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<OrderSnapshotStore>,
        api: Arc<dyn OrderApi>,
        metrics: Arc<SyncMetrics>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                api,
                metrics,
                config,
                tracked: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Wire a channel into the engine: one task pumps events, another
    /// follows connection-state transitions.
    pub fn attach_channel(&self, channel: &dyn EventChannel) {
        let mut events = channel.events();
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => engine.handle_channel_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "event stream lagged; resyncing all tracked orders");
                        engine.resync_all().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut states = channel.connection_states();
        let engine = self.clone();
        tokio::spawn(async move {
            let mut previous = *states.borrow();
            while states.changed().await.is_ok() {
                let next = *states.borrow_and_update();
                engine.handle_connection_change(previous, next).await;
                previous = next;
            }
        });
    }

    // ------------------------------------------------------------------
    // Tracking lifecycle
    // ------------------------------------------------------------------

    /// Start synchronizing one order. Unless a snapshot is already present,
    /// the first refresh doubles as the bootstrap fetch.
    pub async fn track(&self, order_id: OrderId) {
        {
            let mut tracked = self.inner.tracked.lock().await;
            if tracked.contains_key(&order_id) {
                return;
            }
            tracked.insert(order_id.clone(), OrderTracker::new());
            self.inner.metrics.tracked_orders.set(tracked.len() as i64);
        }
        tracing::debug!(order_id = %order_id, "order tracked");
        if !self.inner.store.contains(&order_id).await {
            self.mark_stale(order_id).await;
        }
    }

    /// Stop synchronizing one order. The last committed snapshot stays in
    /// the store; refresh results that arrive late are discarded.
    pub async fn untrack(&self, order_id: &OrderId) {
        let mut tracked = self.inner.tracked.lock().await;
        if tracked.remove(order_id).is_some() {
            self.inner.metrics.tracked_orders.set(tracked.len() as i64);
            tracing::debug!(order_id = %order_id, "order untracked");
        }
    }

    pub async fn sync_state(&self, order_id: &OrderId) -> Option<SyncState> {
        self.inner.tracked.lock().await.get(order_id).map(|t| t.sync)
    }

    // ------------------------------------------------------------------
    // Push events
    // ------------------------------------------------------------------

    pub async fn handle_channel_event(&self, event: ChannelEvent) {
        self.inner
            .metrics
            .events_received
            .with_label_values(&[event.topic.as_str()])
            .inc();

        let decoded = match OrderEvent::parse(&event.topic, &event.payload) {
            Ok(decoded) => decoded,
            Err(error) => {
                tracing::warn!(topic = %event.topic, error = %error, "dropping undecodable event");
                return;
            }
        };
        let order_id = decoded.order_id().clone();

        // a freshly created order starts being tracked right away
        if let OrderEvent::Created { order, .. } = &decoded {
            if let Some(full) = order {
                self.install_snapshot(&order_id, full.clone()).await;
            }
            self.track(order_id).await;
            return;
        }

        let patch = {
            let mut tracked = self.inner.tracked.lock().await;
            match tracked.get_mut(&order_id) {
                None => {
                    tracing::debug!(order_id = %order_id, topic = %event.topic, "event for untracked order ignored");
                    return;
                }
                Some(tracker) if tracker.sync == SyncState::Refreshing => {
                    // the in-flight replace wins over this delta
                    tracker.dirty = true;
                    tracing::debug!(order_id = %order_id, "refresh in flight; delta deferred");
                    return;
                }
                Some(_) => decoded.to_patch(),
            }
        };

        match patch {
            Some(patch) => match self.inner.store.merge(&order_id, &patch).await {
                Ok(_) => {
                    self.inner.metrics.merges_applied.inc();
                    self.bump_epoch(&order_id).await;
                }
                Err(error) => {
                    self.inner
                        .metrics
                        .merges_rejected
                        .with_label_values(&[error.kind()])
                        .inc();
                    tracing::warn!(
                        order_id = %order_id,
                        error = %error,
                        "merge rejected; scheduling authoritative refresh"
                    );
                    self.mark_stale(order_id).await;
                }
            },
            None => {
                // payload told us something changed but not what
                self.mark_stale(order_id).await;
            }
        }
    }

    pub async fn handle_connection_change(&self, previous: ConnectionState, next: ConnectionState) {
        self.inner.metrics.connection_state.set(match next {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        });
        match (previous, next) {
            (ConnectionState::Connected, ConnectionState::Connected) => {}
            (_, ConnectionState::Connected) => {
                tracing::info!("channel connected; resyncing tracked orders");
                self.resync_all().await;
            }
            (_, ConnectionState::Disconnected) => {
                // advisory only: reads keep serving the last committed state
                tracing::warn!("channel disconnected; live updates paused");
            }
            _ => {}
        }
    }

    /// A reconnect may have missed events for any tracked order.
    pub async fn resync_all(&self) {
        let order_ids: Vec<OrderId> = {
            self.inner.tracked.lock().await.keys().cloned().collect()
        };
        join_all(order_ids.into_iter().map(|order_id| {
            let engine = self.clone();
            async move { engine.mark_stale(order_id).await }
        }))
        .await;
    }

    // ------------------------------------------------------------------
    // Customer actions
    // ------------------------------------------------------------------

    /// Accept a vendor proposal. Validates locally, issues the remote
    /// command, then applies the patch optimistically. Re-accepting an
    /// already-accepted proposal is a local no-op success.
    pub async fn accept_proposal(
        &self,
        order_id: &OrderId,
        proposal_id: &ProposalId,
    ) -> Result<CompositeOrder, OrderError> {
        let order = self.inner.store.get(order_id).await?;
        let patch = ProposalResolver::resolve_accept(&order, proposal_id)?;
        let live = order
            .proposal(proposal_id)
            .map(ProposalResolver::can_accept)
            .unwrap_or(false);
        if live {
            self.run_remote_command("accept_proposal", self.inner.api.accept_proposal(proposal_id))
                .await?;
        }
        self.apply_optimistic(order_id, &patch).await
    }

    /// Reject a vendor proposal, cancelling the owning sub-order or, with
    /// `cancel_entire_order`, the whole composite order.
    pub async fn reject_proposal(
        &self,
        order_id: &OrderId,
        proposal_id: &ProposalId,
        cancel_entire_order: bool,
    ) -> Result<CompositeOrder, OrderError> {
        let order = self.inner.store.get(order_id).await?;
        let patch = ProposalResolver::resolve_reject(&order, proposal_id, cancel_entire_order)?;
        let live = order
            .proposal(proposal_id)
            .map(ProposalResolver::can_reject)
            .unwrap_or(false);
        if live {
            self.run_remote_command(
                "reject_proposal",
                self.inner.api.reject_proposal(proposal_id, cancel_entire_order),
            )
            .await?;
        }
        self.apply_optimistic(order_id, &patch).await
    }

    /// Customer-initiated full-order cancellation.
    pub async fn cancel_order(&self, order_id: &OrderId) -> Result<CompositeOrder, OrderError> {
        self.inner.store.get(order_id).await?;
        self.run_remote_command("cancel_order", self.inner.api.cancel_order(order_id))
            .await?;
        self.apply_optimistic(order_id, &OrderPatch::CancelAll).await
    }

    async fn run_remote_command(
        &self,
        command: &'static str,
        call: impl std::future::Future<Output = Result<(), crate::api::ApiError>>,
    ) -> Result<(), OrderError> {
        match call.await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.inner
                    .metrics
                    .remote_command_failures
                    .with_label_values(&[command])
                    .inc();
                tracing::warn!(command, error = %error, "remote command failed; no local change applied");
                Err(OrderError::RemoteCommandFailed(error))
            }
        }
    }

    /// Apply a customer-action patch as if the corroborating event had
    /// already arrived, then arm the self-heal timer.
    async fn apply_optimistic(
        &self,
        order_id: &OrderId,
        patch: &OrderPatch,
    ) -> Result<CompositeOrder, OrderError> {
        let committed = self.inner.store.merge(order_id, patch).await?;
        self.inner.metrics.optimistic_applies.inc();

        let armed_epoch = {
            let mut tracked = self.inner.tracked.lock().await;
            tracked.get_mut(order_id).map(|tracker| {
                tracker.epoch += 1;
                tracker.epoch
            })
        };
        if let Some(epoch) = armed_epoch {
            let engine = self.clone();
            let order_id = order_id.clone();
            let window = self.inner.config.corroboration_window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let unconfirmed = {
                    let tracked = engine.inner.tracked.lock().await;
                    matches!(
                        tracked.get(&order_id),
                        Some(tracker)
                            if tracker.epoch == epoch && tracker.sync == SyncState::Synced
                    )
                };
                if unconfirmed {
                    tracing::debug!(
                        order_id = %order_id,
                        "no corroborating update after optimistic apply; refreshing"
                    );
                    engine.mark_stale(order_id).await;
                }
            });
        }
        Ok(committed)
    }

    // ------------------------------------------------------------------
    // Refresh machinery
    // ------------------------------------------------------------------

    async fn install_snapshot(&self, order_id: &OrderId, order: CompositeOrder) {
        self.inner.store.replace(order_id, order).await;
        self.bump_epoch(order_id).await;
    }

    async fn bump_epoch(&self, order_id: &OrderId) {
        let mut tracked = self.inner.tracked.lock().await;
        if let Some(tracker) = tracked.get_mut(order_id) {
            tracker.epoch += 1;
        }
    }

    /// Flag an order as out of sync and schedule a debounced refresh.
    /// Triggers while one is already scheduled collapse into it.
    pub async fn mark_stale(&self, order_id: OrderId) {
        let ticket = {
            let mut tracked = self.inner.tracked.lock().await;
            let Some(tracker) = tracked.get_mut(&order_id) else {
                return;
            };
            match tracker.sync {
                SyncState::Stale => return,
                SyncState::Refreshing => {
                    tracker.dirty = true;
                    return;
                }
                SyncState::Synced => {
                    tracker.sync = SyncState::Stale;
                    let ticket = Uuid::new_v4();
                    tracker.refresh_ticket = Some(ticket);
                    ticket
                }
            }
        };
        self.inner.metrics.refreshes_scheduled.inc();
        self.schedule_refresh(order_id, ticket);
    }

    fn schedule_refresh(&self, order_id: OrderId, ticket: Uuid) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_refresh(order_id, ticket).await;
        });
    }

    async fn run_refresh(&self, order_id: OrderId, ticket: Uuid) {
        tokio::time::sleep(self.inner.config.refresh_debounce).await;
        {
            let mut tracked = self.inner.tracked.lock().await;
            let Some(tracker) = tracked.get_mut(&order_id) else {
                return;
            };
            if tracker.refresh_ticket != Some(ticket) || tracker.sync != SyncState::Stale {
                return;
            }
            tracker.sync = SyncState::Refreshing;
            tracker.dirty = false;
        }

        tracing::debug!(order_id = %order_id, ticket = %ticket, "refreshing order snapshot");
        let fetched = tokio::time::timeout(
            self.inner.config.refresh_timeout,
            self.inner.api.fetch_order(&order_id),
        )
        .await;

        let mut tracked = self.inner.tracked.lock().await;
        let Some(tracker) = tracked.get_mut(&order_id) else {
            tracing::debug!(order_id = %order_id, "refresh result for untracked order discarded");
            return;
        };
        if tracker.refresh_ticket != Some(ticket) {
            return;
        }

        match fetched {
            Ok(Ok(order)) => {
                let committed = self.inner.store.replace(&order_id, order).await;
                tracker.epoch += 1;
                tracker.sync = SyncState::Synced;
                tracker.refresh_ticket = None;
                self.inner.metrics.refreshes_completed.inc();
                tracing::info!(
                    order_id = %order_id,
                    status = ?committed.status,
                    "order snapshot refreshed"
                );
                if tracker.dirty {
                    // deltas were deferred while this refresh was in flight
                    tracker.dirty = false;
                    tracker.sync = SyncState::Stale;
                    let follow_up = Uuid::new_v4();
                    tracker.refresh_ticket = Some(follow_up);
                    self.inner.metrics.refreshes_scheduled.inc();
                    self.schedule_refresh(order_id.clone(), follow_up);
                }
            }
            Ok(Err(error)) => {
                tracker.sync = SyncState::Stale;
                tracker.refresh_ticket = None;
                self.inner.metrics.refreshes_failed.inc();
                tracing::warn!(
                    order_id = %order_id,
                    error = %error,
                    "refresh failed; eligible for re-trigger on the next event"
                );
            }
            Err(_elapsed) => {
                tracker.sync = SyncState::Stale;
                tracker.refresh_ticket = None;
                self.inner.metrics.refreshes_failed.inc();
                tracing::warn!(order_id = %order_id, "refresh timed out; order remains stale");
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryOrderApi;
    use crate::domain::order::fixtures;
    use crate::domain::order::{
        OrderStatus, ProposalStatus, SubOrderStatus, TOPIC_ORDER_CONFIRMED, TOPIC_ORDER_CREATED,
        TOPIC_ORDER_DELIVERED, TOPIC_ORDER_READY, TOPIC_PROPOSAL_ACCEPTED,
    };
    use serde_json::json;

    fn fast_config() -> ReconcilerConfig {
        ReconcilerConfig {
            refresh_debounce: Duration::from_millis(20),
            refresh_timeout: Duration::from_millis(500),
            corroboration_window: Duration::from_millis(60),
        }
    }

    struct Harness {
        engine: ReconciliationEngine,
        api: Arc<InMemoryOrderApi>,
        store: Arc<OrderSnapshotStore>,
    }

    fn harness(config: ReconcilerConfig) -> Harness {
        let api = Arc::new(InMemoryOrderApi::new());
        let store = Arc::new(OrderSnapshotStore::new());
        let metrics = Arc::new(SyncMetrics::new().unwrap());
        let engine = ReconciliationEngine::new(store.clone(), api.clone(), metrics, config);
        Harness { engine, api, store }
    }

    /// Seed backend and local cache with the same snapshot and track it.
    async fn seed(h: &Harness, order: &CompositeOrder) {
        h.api.insert(order.clone()).await;
        h.store.replace(&order.id, order.clone()).await;
        h.engine.track(order.id.clone()).await;
    }

    fn event(topic: &str, payload: serde_json::Value) -> ChannelEvent {
        ChannelEvent {
            topic: topic.to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_direct_merge_fast_path_stays_synced() {
        let h = harness(fast_config());
        let order = fixtures::two_vendor_order("ord-1");
        seed(&h, &order).await;

        h.engine
            .handle_channel_event(event(
                TOPIC_ORDER_CONFIRMED,
                json!({"orderId": "ord-1", "subOrderId": "sub-1"}),
            ))
            .await;

        let snapshot = h.store.get(&order.id).await.unwrap();
        assert_eq!(snapshot.sub_orders[0].status, SubOrderStatus::Confirmed);
        assert_eq!(h.engine.sync_state(&order.id).await, Some(SyncState::Synced));
        assert_eq!(h.api.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_event_delivery_is_idempotent() {
        let h = harness(fast_config());
        let mut order = fixtures::two_vendor_order("ord-1");
        order.sub_orders[0]
            .proposals
            .push(fixtures::quantity_proposal("prop-1", "sub-1", "item-1", 1));
        seed(&h, &order).await;

        let accepted = event(
            TOPIC_PROPOSAL_ACCEPTED,
            json!({"orderId": "ord-1", "proposalId": "prop-1"}),
        );
        h.engine.handle_channel_event(accepted.clone()).await;
        let once = h.store.get(&order.id).await.unwrap();

        h.engine.handle_channel_event(accepted).await;
        let twice = h.store.get(&order.id).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(
            twice.sub_orders[0].proposals[0].status,
            ProposalStatus::Accepted
        );
        assert_eq!(h.api.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_illegal_merge_triggers_exactly_one_refresh() {
        let h = harness(fast_config());
        let mut order = fixtures::two_vendor_order("ord-1");
        order.sub_orders[0].status = SubOrderStatus::Delivered;
        seed(&h, &order).await;

        // READY on a delivered sub-order is a backward transition
        h.engine
            .handle_channel_event(event(
                TOPIC_ORDER_READY,
                json!({"orderId": "ord-1", "subOrderId": "sub-1"}),
            ))
            .await;

        assert_eq!(h.engine.sync_state(&order.id).await, Some(SyncState::Stale));
        let snapshot = h.store.get(&order.id).await.unwrap();
        assert_eq!(snapshot.sub_orders[0].status, SubOrderStatus::Delivered);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.api.fetch_count(), 1);
        assert_eq!(h.engine.sync_state(&order.id).await, Some(SyncState::Synced));
    }

    #[tokio::test]
    async fn test_stale_triggers_collapse_into_one_pull() {
        let h = harness(fast_config());
        let order = fixtures::two_vendor_order("ord-1");
        seed(&h, &order).await;

        // two delta-less events inside the debounce window
        for _ in 0..2 {
            h.engine
                .handle_channel_event(event(
                    TOPIC_ORDER_DELIVERED,
                    json!({"orderId": "ord-1"}),
                ))
                .await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.api.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_refreshes_every_tracked_order_once() {
        let h = harness(fast_config());
        for raw in ["ord-1", "ord-2", "ord-3"] {
            let order = fixtures::two_vendor_order(raw);
            seed(&h, &order).await;
        }

        h.engine
            .handle_connection_change(ConnectionState::Disconnected, ConnectionState::Connected)
            .await;
        // overlapping trigger inside the debounce window collapses
        h.engine
            .handle_connection_change(ConnectionState::Disconnected, ConnectionState::Connected)
            .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.api.fetch_count(), 3);
        for raw in ["ord-1", "ord-2", "ord-3"] {
            assert_eq!(
                h.engine.sync_state(&OrderId::from(raw)).await,
                Some(SyncState::Synced)
            );
        }
    }

    #[tokio::test]
    async fn test_optimistic_accept_with_corroborating_event_skips_refresh() {
        let h = harness(fast_config());
        let mut order = fixtures::two_vendor_order("ord-1");
        order.sub_orders[1]
            .proposals
            .push(fixtures::quantity_proposal("prop-1", "sub-2", "item-2", 1));
        seed(&h, &order).await;

        let updated = h
            .engine
            .accept_proposal(&order.id, &ProposalId::from("prop-1"))
            .await
            .unwrap();
        assert_eq!(
            updated.sub_orders[1].proposals[0].status,
            ProposalStatus::Accepted
        );
        assert_eq!(updated.sub_orders[1].items[0].quantity, 1);

        // the backend's confirmation event arrives in time
        h.engine
            .handle_channel_event(event(
                TOPIC_PROPOSAL_ACCEPTED,
                json!({"orderId": "ord-1", "proposalId": "prop-1"}),
            ))
            .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.api.fetch_count(), 0);
        assert_eq!(h.engine.sync_state(&order.id).await, Some(SyncState::Synced));
    }

    #[tokio::test]
    async fn test_optimistic_accept_self_heals_without_corroboration() {
        let h = harness(fast_config());
        let mut order = fixtures::two_vendor_order("ord-1");
        order.sub_orders[1]
            .proposals
            .push(fixtures::quantity_proposal("prop-1", "sub-2", "item-2", 1));
        seed(&h, &order).await;

        h.engine
            .accept_proposal(&order.id, &ProposalId::from("prop-1"))
            .await
            .unwrap();

        // no corroborating event: the engine refetches after the window
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(h.api.fetch_count(), 1);
        assert_eq!(h.engine.sync_state(&order.id).await, Some(SyncState::Synced));
        // backend applied the accept too, so state converges
        let snapshot = h.store.get(&order.id).await.unwrap();
        assert_eq!(
            snapshot.sub_orders[1].proposals[0].status,
            ProposalStatus::Accepted
        );
    }

    #[tokio::test]
    async fn test_remote_command_failure_applies_nothing() {
        let h = harness(fast_config());
        let mut order = fixtures::two_vendor_order("ord-1");
        order.sub_orders[1]
            .proposals
            .push(fixtures::quantity_proposal("prop-1", "sub-2", "item-2", 1));
        seed(&h, &order).await;

        h.api.set_fail_commands(true);
        let result = h
            .engine
            .accept_proposal(&order.id, &ProposalId::from("prop-1"))
            .await;
        assert!(matches!(result, Err(OrderError::RemoteCommandFailed(_))));

        let snapshot = h.store.get(&order.id).await.unwrap();
        assert_eq!(
            snapshot.sub_orders[1].proposals[0].status,
            ProposalStatus::Pending
        );
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.api.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_reject_entire_order_cancels_everything() {
        let h = harness(fast_config());
        let mut order = fixtures::two_vendor_order("ord-1");
        order.sub_orders[1]
            .proposals
            .push(fixtures::quantity_proposal("prop-1", "sub-2", "item-2", 1));
        seed(&h, &order).await;

        let updated = h
            .engine
            .reject_proposal(&order.id, &ProposalId::from("prop-1"), true)
            .await
            .unwrap();

        assert_eq!(updated.status, OrderStatus::Cancelled);
        assert!(updated
            .sub_orders
            .iter()
            .all(|s| s.status == SubOrderStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_order_created_event_auto_tracks_and_installs_snapshot() {
        let h = harness(fast_config());
        let order = fixtures::two_vendor_order("ord-9");
        h.api.insert(order.clone()).await;

        h.engine
            .handle_channel_event(event(
                TOPIC_ORDER_CREATED,
                json!({
                    "orderId": "ord-9",
                    "order": serde_json::to_value(&order).unwrap()
                }),
            ))
            .await;

        assert_eq!(h.engine.sync_state(&order.id).await, Some(SyncState::Synced));
        assert_eq!(h.store.get(&order.id).await.unwrap(), order);
        // snapshot came with the event; no bootstrap pull needed
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.api.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_event_for_untracked_order_is_ignored() {
        let h = harness(fast_config());
        h.engine
            .handle_channel_event(event(
                TOPIC_ORDER_CONFIRMED,
                json!({"orderId": "ord-ghost", "subOrderId": "sub-1"}),
            ))
            .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.api.fetch_count(), 0);
        assert!(!h.store.contains(&OrderId::from("ord-ghost")).await);
    }

    #[tokio::test]
    async fn test_untrack_discards_scheduled_refresh() {
        let h = harness(fast_config());
        let order = fixtures::two_vendor_order("ord-1");
        h.api.insert(order.clone()).await;
        // no local snapshot: tracking schedules a bootstrap refresh
        h.engine.track(order.id.clone()).await;
        h.engine.untrack(&order.id).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.api.fetch_count(), 0);
        assert!(!h.store.contains(&order.id).await);
    }

    #[tokio::test]
    async fn test_refresh_timeout_reverts_to_stale() {
        let mut config = fast_config();
        config.refresh_timeout = Duration::from_millis(40);
        let h = harness(config);
        let order = fixtures::two_vendor_order("ord-1");
        seed(&h, &order).await;
        h.api.set_fetch_delay(Duration::from_millis(200));

        h.engine
            .handle_channel_event(event(
                TOPIC_ORDER_DELIVERED,
                json!({"orderId": "ord-1"}),
            ))
            .await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(h.engine.sync_state(&order.id).await, Some(SyncState::Stale));
    }

    #[tokio::test]
    async fn test_deltas_during_refresh_are_discarded_and_followed_up() {
        let mut config = fast_config();
        config.refresh_debounce = Duration::from_millis(10);
        let h = harness(config);
        let order = fixtures::two_vendor_order("ord-1");
        seed(&h, &order).await;
        h.api.set_fetch_delay(Duration::from_millis(80));

        // delta-less event: schedules a refresh that will hang for 80ms
        h.engine
            .handle_channel_event(event(
                TOPIC_ORDER_DELIVERED,
                json!({"orderId": "ord-1"}),
            ))
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // a delta arriving mid-refresh must not outlive the replace
        h.engine
            .handle_channel_event(event(
                TOPIC_ORDER_CONFIRMED,
                json!({"orderId": "ord-1", "subOrderId": "sub-1"}),
            ))
            .await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        // initial refresh plus one follow-up for the deferred delta
        assert_eq!(h.api.fetch_count(), 2);
        assert_eq!(h.engine.sync_state(&order.id).await, Some(SyncState::Synced));
        // backend never saw the confirmation, so the replace wins
        let snapshot = h.store.get(&order.id).await.unwrap();
        assert_eq!(snapshot.sub_orders[0].status, SubOrderStatus::Pending);
    }
}
