use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::order::{
    state_machine, CompositeOrder, ItemId, OrderError, OrderId, OrderItem, OrderPatch, OrderStatus,
    Proposal, ProposalId, ProposalResolver, SubOrder, SubOrderId, SubOrderStatus, VendorId,
};

use super::{ApiError, CreateOrderRequest, OrderApi, OrderSummary};

// ============================================================================
// In-Memory Order API - fake backend for the demo binary and tests
// ============================================================================
//
// Holds authoritative order state and applies the same domain rules a real
// backend would, so optimistic client state and refetched state agree.
// `fetch_count` lets tests assert on the exact number of pull refreshes.
//
// ============================================================================

const DEMO_UNIT_PRICE: f64 = 10.0;

pub struct InMemoryOrderApi {
    orders: Mutex<HashMap<OrderId, CompositeOrder>>,
    next_id: AtomicUsize,
    fetch_count: AtomicUsize,
    fetch_delay_ms: AtomicU64,
    fail_commands: AtomicBool,
}

impl InMemoryOrderApi {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            fetch_count: AtomicUsize::new(0),
            fetch_delay_ms: AtomicU64::new(0),
            fail_commands: AtomicBool::new(false),
        }
    }

    /// Seed the backend with an existing order.
    pub async fn insert(&self, order: CompositeOrder) {
        self.orders.lock().await.insert(order.id.clone(), order);
    }

    /// Number of `fetch_order` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Make every mutating command fail, simulating a backend outage.
    pub fn set_fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    /// Delay every `fetch_order` response, simulating a slow backend.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Vendor-side action: raise a proposal against a stored order. Returns
    /// the stored copy so callers can emit the matching push event.
    pub async fn raise_proposal(
        &self,
        order_id: &OrderId,
        proposal: Proposal,
    ) -> Result<CompositeOrder, ApiError> {
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| ApiError::NotFound(order_id.to_string()))?;
        state_machine::apply_patch(order, &OrderPatch::ProposalRaised { proposal })
            .map_err(|e| ApiError::Rejected(e.to_string()))?;
        Ok(order.clone())
    }

    /// Vendor-side action: advance a sub-order along its lifecycle.
    pub async fn advance_sub_order(
        &self,
        order_id: &OrderId,
        sub_order_id: &SubOrderId,
        status: SubOrderStatus,
    ) -> Result<CompositeOrder, ApiError> {
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| ApiError::NotFound(order_id.to_string()))?;
        state_machine::apply_patch(
            order,
            &OrderPatch::SubOrderStatus {
                sub_order_id: sub_order_id.clone(),
                status,
            },
        )
        .map_err(|e| ApiError::Rejected(e.to_string()))?;
        Ok(order.clone())
    }

    fn check_commands(&self) -> Result<(), ApiError> {
        if self.fail_commands.load(Ordering::SeqCst) {
            Err(ApiError::Transport("simulated backend outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn allocate(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn resolve(
        &self,
        proposal_id: &ProposalId,
        make_patch: impl Fn(&CompositeOrder, &ProposalId) -> Result<OrderPatch, OrderError>,
    ) -> Result<(), ApiError> {
        self.check_commands()?;
        let mut orders = self.orders.lock().await;
        let order = orders
            .values_mut()
            .find(|o| o.proposal(proposal_id).is_some())
            .ok_or_else(|| ApiError::NotFound(proposal_id.to_string()))?;
        let patch =
            make_patch(order, proposal_id).map_err(|e| ApiError::Rejected(e.to_string()))?;
        state_machine::apply_patch(order, &patch)
            .map_err(|e| ApiError::Rejected(e.to_string()))?;
        Ok(())
    }
}

impl Default for InMemoryOrderApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderApi for InMemoryOrderApi {
    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CompositeOrder, ApiError> {
        self.check_commands()?;
        if request.items.is_empty() {
            return Err(ApiError::Rejected("order without items".to_string()));
        }

        // split the cart into one sub-order per vendor, preserving cart order
        let mut vendors: Vec<VendorId> = Vec::new();
        for item in &request.items {
            if !vendors.contains(&item.vendor_id) {
                vendors.push(item.vendor_id.clone());
            }
        }

        let order_id = OrderId::new(self.allocate("ord"));
        let mut sub_orders = Vec::new();
        for vendor_id in vendors {
            let items: Vec<OrderItem> = request
                .items
                .iter()
                .filter(|i| i.vendor_id == vendor_id)
                .map(|i| {
                    let mut item = OrderItem {
                        id: ItemId::new(self.allocate("item")),
                        product_id: i.product_id.clone(),
                        product_name: format!("Product {}", i.product_id),
                        quantity: i.quantity,
                        unit_price: DEMO_UNIT_PRICE,
                        total_price: 0.0,
                    };
                    item.recompute_total();
                    item
                })
                .collect();
            let mut sub = SubOrder {
                id: SubOrderId::new(self.allocate("sub")),
                vendor_name: format!("Vendor {vendor_id}"),
                vendor_id,
                status: SubOrderStatus::Pending,
                items,
                proposals: Vec::new(),
                subtotal: 0.0,
            };
            sub.recompute_subtotal();
            sub_orders.push(sub);
        }

        let mut order = CompositeOrder {
            id: order_id.clone(),
            status: state_machine::derive_status(&sub_orders),
            sub_orders,
            total_amount: 0.0,
            delivery_address: request.delivery_address,
            created_at: Utc::now(),
        };
        order.recompute_total();

        self.orders.lock().await.insert(order_id, order.clone());
        Ok(order)
    }

    async fn fetch_orders(&self) -> Result<Vec<OrderSummary>, ApiError> {
        let orders = self.orders.lock().await;
        let mut summaries: Vec<OrderSummary> = orders
            .values()
            .map(|o| OrderSummary {
                id: o.id.clone(),
                status: o.status,
                total_amount: o.total_amount,
                created_at: o.created_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<CompositeOrder, ApiError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.orders
            .lock()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(order_id.to_string()))
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<(), ApiError> {
        self.check_commands()?;
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| ApiError::NotFound(order_id.to_string()))?;
        if order.status == OrderStatus::Completed {
            return Err(ApiError::Rejected("order already completed".to_string()));
        }
        state_machine::apply_patch(order, &OrderPatch::CancelAll)
            .map_err(|e| ApiError::Rejected(e.to_string()))?;
        Ok(())
    }

    async fn accept_proposal(&self, proposal_id: &ProposalId) -> Result<(), ApiError> {
        self.resolve(proposal_id, ProposalResolver::resolve_accept).await
    }

    async fn reject_proposal(
        &self,
        proposal_id: &ProposalId,
        cancel_entire_order: bool,
    ) -> Result<(), ApiError> {
        self.resolve(proposal_id, |order, id| {
            ProposalResolver::resolve_reject(order, id, cancel_entire_order)
        })
        .await
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
