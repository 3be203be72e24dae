use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::order::{
    CompositeOrder, OrderId, OrderStatus, ProductId, ProposalId, VendorId,
};

mod memory;

pub use memory::InMemoryOrderApi;

// ============================================================================
// Order API - REST collaborator consumed as an interface
// ============================================================================
//
// The transport (HTTP client, retries, backoff, auth headers) is outside
// this crate; callers inject an implementation. The in-memory implementation
// below backs the demo binary and the reconciler tests.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("request failed: {0}")]
    Transport(String),
}

/// Line item of a new order. The cart knows each item's vendor, so the
/// backend can split the cart into per-vendor sub-orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub vendor_id: VendorId,
    pub quantity: u32,
}

/// Body of `POST /orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<NewOrderItem>,
    pub delivery_address: String,
    pub delivery_latitude: f64,
    pub delivery_longitude: f64,
}

/// One row of `GET /orders/customer-orders` (no nested items).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: OrderId,
    pub status: OrderStatus,
    pub total_amount: f64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait OrderApi: Send + Sync {
    /// `POST /orders` — place the cart; returns the full composite order.
    async fn create_order(&self, request: CreateOrderRequest)
        -> Result<CompositeOrder, ApiError>;

    /// `GET /orders/customer-orders` — summaries of the customer's orders.
    async fn fetch_orders(&self) -> Result<Vec<OrderSummary>, ApiError>;

    /// `GET /orders/customer-orders/{id}` — authoritative full snapshot,
    /// including nested items and proposals.
    async fn fetch_order(&self, order_id: &OrderId) -> Result<CompositeOrder, ApiError>;

    /// `PUT /orders/{id}/status` with `{"status": "CANCELLED"}`.
    async fn cancel_order(&self, order_id: &OrderId) -> Result<(), ApiError>;

    /// `POST /orders/proposals/{id}/accept` (no body).
    async fn accept_proposal(&self, proposal_id: &ProposalId) -> Result<(), ApiError>;

    /// `POST /orders/proposals/{id}/reject` with `{"cancelEntireOrder": bool}`.
    async fn reject_proposal(
        &self,
        proposal_id: &ProposalId,
        cancel_entire_order: bool,
    ) -> Result<(), ApiError>;
}
