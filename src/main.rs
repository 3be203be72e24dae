use std::sync::Arc;
use std::time::Duration;

use actix::Actor;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod domain;
mod metrics;
mod sync;

use api::{CreateOrderRequest, InMemoryOrderApi, NewOrderItem, OrderApi};
use domain::order::{
    events, Proposal, ProposalId, ProposalStatus, ProposalType, SubOrderStatus,
};
use sync::actor::{AcceptProposal, CancelOrder, RejectProposal, Track, Untrack};
use sync::{
    Credential, EventChannel, InMemoryEventChannel, OrderFilter, OrderSnapshotStore,
    ReconcilerActor, ReconcilerConfig, ReconciliationEngine,
};

#[actix::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_sync=debug")),
        )
        .init();

    tracing::info!("🚀 Starting multi-vendor order synchronization demo");

    // === 1. Initialize Prometheus metrics ===
    let metrics = Arc::new(metrics::SyncMetrics::new()?);
    let metrics_registry = Arc::new(metrics.registry().clone());
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, 9090).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 2. Wire the collaborators: fake backend + in-memory channel ===
    let backend = Arc::new(InMemoryOrderApi::new());
    let channel = Arc::new(InMemoryEventChannel::new());
    let store = Arc::new(OrderSnapshotStore::new());

    // === 3. Start the reconciliation engine and its actor surface ===
    let engine = ReconciliationEngine::new(
        store.clone(),
        backend.clone(),
        metrics.clone(),
        ReconcilerConfig::default(),
    );
    engine.attach_channel(channel.as_ref());
    let reconciler = ReconcilerActor::new(engine.clone()).start();

    channel.connect(&Credential("demo-token".to_string())).await?;

    // === 4. Seed an older delivered order and start tracking it ===
    let mut history = backend
        .create_order(CreateOrderRequest {
            items: vec![NewOrderItem {
                product_id: "prod-filter-papers".into(),
                vendor_id: "vendor-roastery".into(),
                quantity: 1,
            }],
            delivery_address: "1 Harbor Way".to_string(),
            delivery_latitude: 52.37,
            delivery_longitude: 4.89,
        })
        .await?;
    for sub in history.sub_orders.clone() {
        backend
            .advance_sub_order(&history.id, &sub.id, SubOrderStatus::Delivered)
            .await?;
    }
    history = backend.fetch_order(&history.id).await?;
    store.replace(&history.id, history.clone()).await;
    reconciler
        .send(Track {
            order_id: history.id.clone(),
        })
        .await?;
    tracing::info!(order_id = %history.id, status = ?history.status, "Seeded delivered order");

    // === 5. Place a cart spanning two vendors ===
    let order = backend
        .create_order(CreateOrderRequest {
            items: vec![
                NewOrderItem {
                    product_id: "prod-espresso".into(),
                    vendor_id: "vendor-roastery".into(),
                    quantity: 2,
                },
                NewOrderItem {
                    product_id: "prod-croissant".into(),
                    vendor_id: "vendor-bakery".into(),
                    quantity: 4,
                },
            ],
            delivery_address: "1 Harbor Way".to_string(),
            delivery_latitude: 52.37,
            delivery_longitude: 4.89,
        })
        .await?;
    tracing::info!(order_id = %order.id, status = ?order.status, "✅ Order placed");

    // the gateway announces the new order; the engine auto-tracks it
    channel.emit(
        events::TOPIC_ORDER_CREATED,
        serde_json::json!({
            "orderId": order.id,
            "order": serde_json::to_value(&order)?,
        }),
    )?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // === 6. First vendor confirms; delta merges directly ===
    let roastery_sub = order.sub_orders[0].id.clone();
    backend
        .advance_sub_order(&order.id, &roastery_sub, SubOrderStatus::Confirmed)
        .await?;
    channel.emit(
        events::TOPIC_ORDER_CONFIRMED,
        serde_json::json!({"orderId": order.id, "subOrderId": roastery_sub}),
    )?;

    // === 7. Second vendor proposes a quantity reduction ===
    let bakery_sub = &order.sub_orders[1];
    let proposal = Proposal {
        id: ProposalId::from("prop-1"),
        sub_order_id: bakery_sub.id.clone(),
        item_id: bakery_sub.items[0].id.clone(),
        kind: ProposalType::QuantityReduced,
        proposed_quantity: Some(2),
        status: ProposalStatus::Pending,
    };
    backend.raise_proposal(&order.id, proposal.clone()).await?;
    channel.emit(
        events::TOPIC_VENDOR_ORDER_PROPOSED,
        serde_json::json!({
            "orderId": order.id,
            "proposal": serde_json::to_value(&proposal)?,
        }),
    )?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let waiting = store.get(&order.id).await?;
    tracing::info!(
        status = ?waiting.status,
        total = waiting.total_amount,
        "⏳ Customer decision required"
    );

    // === 8. Customer accepts the proposal through the actor surface ===
    let updated = reconciler
        .send(AcceptProposal {
            order_id: order.id.clone(),
            proposal_id: proposal.id.clone(),
        })
        .await??;
    tracing::info!(
        status = ?updated.status,
        total = updated.total_amount,
        "✅ Proposal accepted, totals recomputed"
    );

    // the corroborating event arrives and merges as a no-op
    channel.emit(
        events::TOPIC_PROPOSAL_ACCEPTED,
        serde_json::json!({"orderId": order.id, "proposalId": proposal.id}),
    )?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // === 9. The first vendor runs out too; customer drops that shop ===
    let unavailable = Proposal {
        id: ProposalId::from("prop-2"),
        sub_order_id: roastery_sub.clone(),
        item_id: order.sub_orders[0].items[0].id.clone(),
        kind: ProposalType::Unavailable,
        proposed_quantity: None,
        status: ProposalStatus::Pending,
    };
    backend.raise_proposal(&order.id, unavailable.clone()).await?;
    channel.emit(
        events::TOPIC_VENDOR_ORDER_PROPOSED,
        serde_json::json!({
            "orderId": order.id,
            "proposal": serde_json::to_value(&unavailable)?,
        }),
    )?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let after_reject = reconciler
        .send(RejectProposal {
            order_id: order.id.clone(),
            proposal_id: unavailable.id.clone(),
            cancel_entire_order: false,
        })
        .await??;
    tracing::info!(
        status = ?after_reject.status,
        "🚫 Proposal rejected; that vendor's sub-order is cancelled"
    );
    channel.emit(
        events::TOPIC_PROPOSAL_REJECTED,
        serde_json::json!({
            "orderId": order.id,
            "proposalId": unavailable.id,
            "cancelEntireOrder": false,
        }),
    )?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // === 10. Drop and re-establish the channel; tracked orders resync ===
    tracing::info!("🔌 Simulating a transport drop");
    channel.disconnect().await;
    backend
        .advance_sub_order(&order.id, &bakery_sub.id, SubOrderStatus::Confirmed)
        .await?;
    // the confirmation event is lost while the channel is down, and the
    // backend answers the catch-up pulls slowly
    backend.set_fetch_delay(Duration::from_millis(100));
    channel.connect(&Credential("demo-token".to_string())).await?;
    tokio::time::sleep(Duration::from_millis(800)).await;

    let resynced = store.get(&order.id).await?;
    tracing::info!(
        status = ?resynced.status,
        sync = ?engine.sync_state(&order.id).await,
        "🔄 Reconnect refetched the missed confirmation"
    );

    // === 11. A backend outage fails commands without touching local state ===
    backend.set_fail_commands(true);
    let outcome = reconciler
        .send(CancelOrder {
            order_id: order.id.clone(),
        })
        .await?;
    match outcome {
        Err(error) => tracing::warn!(error = %error, "Cancellation failed as expected during outage"),
        Ok(cancelled) => tracing::error!(status = ?cancelled.status, "Cancellation unexpectedly succeeded"),
    }
    backend.set_fail_commands(false);

    // === 12. Final listing and synchronization stats ===
    let active = store
        .list(&OrderFilter {
            active_only: true,
            ..OrderFilter::default()
        })
        .await;
    let summaries = backend.fetch_orders().await?;
    tracing::info!(
        active = active.len(),
        known_to_backend = summaries.len(),
        refresh_fetches = backend.fetch_count(),
        "Store listing before shutdown"
    );
    reconciler
        .send(Untrack {
            order_id: order.id.clone(),
        })
        .await?;

    tracing::info!("🎉 Demo complete");
    Ok(())
}
