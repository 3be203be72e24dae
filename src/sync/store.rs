use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::domain::order::{
    state_machine, CompositeOrder, OrderError, OrderId, OrderPatch, OrderStatus,
};

// ============================================================================
// Order Snapshot Store - authoritative local cache of composite orders
// ============================================================================
//
// Single-writer-per-key: all mutations of one order id serialize on that
// entry's lock. Patches are applied to a working copy and committed only on
// success, so an illegal patch leaves the store untouched and readers never
// observe a half-merged snapshot.
//
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// Keep only orders with this derived status.
    pub status: Option<OrderStatus>,
    /// Drop completed and cancelled orders.
    pub active_only: bool,
}

impl OrderFilter {
    fn matches(&self, order: &CompositeOrder) -> bool {
        if let Some(status) = self.status {
            if order.status != status {
                return false;
            }
        }
        if self.active_only
            && matches!(order.status, OrderStatus::Completed | OrderStatus::Cancelled)
        {
            return false;
        }
        true
    }
}

pub struct OrderSnapshotStore {
    orders: RwLock<HashMap<OrderId, Arc<Mutex<CompositeOrder>>>>,
}

impl OrderSnapshotStore {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
        }
    }

    async fn entry(&self, order_id: &OrderId) -> Option<Arc<Mutex<CompositeOrder>>> {
        self.orders.read().await.get(order_id).cloned()
    }

    /// Latest committed snapshot for one order.
    pub async fn get(&self, order_id: &OrderId) -> Result<CompositeOrder, OrderError> {
        let entry = self
            .entry(order_id)
            .await
            .ok_or_else(|| OrderError::NotFound(order_id.clone()))?;
        let guard = entry.lock().await;
        Ok(guard.clone())
    }

    pub async fn contains(&self, order_id: &OrderId) -> bool {
        self.orders.read().await.contains_key(order_id)
    }

    /// Filtered listing, newest first. Re-derives from current store state
    /// on every call; it is not a frozen iterator.
    pub async fn list(&self, filter: &OrderFilter) -> Vec<CompositeOrder> {
        let entries: Vec<_> = self.orders.read().await.values().cloned().collect();
        let mut orders = Vec::with_capacity(entries.len());
        for entry in entries {
            let order = entry.lock().await.clone();
            if filter.matches(&order) {
                orders.push(order);
            }
        }
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }

    /// Apply a validated partial update. Illegal patches are rejected and
    /// the stored snapshot remains unchanged; there is no partial
    /// application.
    pub async fn merge(
        &self,
        order_id: &OrderId,
        patch: &OrderPatch,
    ) -> Result<CompositeOrder, OrderError> {
        let entry = self
            .entry(order_id)
            .await
            .ok_or_else(|| OrderError::NotFound(order_id.clone()))?;
        let mut guard = entry.lock().await;

        let mut working = guard.clone();
        if let Err(error) = state_machine::apply_patch(&mut working, patch) {
            tracing::warn!(
                order_id = %order_id,
                error = %error,
                "merge rejected, snapshot unchanged"
            );
            return Err(error);
        }
        *guard = working.clone();
        tracing::debug!(order_id = %order_id, status = ?working.status, "merge committed");
        Ok(working)
    }

    /// Install an authoritative full snapshot (pull refresh), unconditionally
    /// overwriting local state for that id. The composite status is a pure
    /// function of the sub-orders, so it is re-derived rather than trusted.
    pub async fn replace(&self, order_id: &OrderId, mut order: CompositeOrder) -> CompositeOrder {
        let derived = state_machine::derive_status(&order.sub_orders);
        if derived != order.status {
            tracing::warn!(
                order_id = %order_id,
                wire = ?order.status,
                derived = ?derived,
                "snapshot status diverged from derivation"
            );
            order.status = derived;
        }

        let entry = {
            let mut orders = self.orders.write().await;
            orders
                .entry(order_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(order.clone())))
                .clone()
        };
        let mut guard = entry.lock().await;
        *guard = order.clone();
        order
    }

    pub async fn remove(&self, order_id: &OrderId) {
        self.orders.write().await.remove(order_id);
    }
}

impl Default for OrderSnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
