use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Backend-assigned identifiers are opaque strings; each gets its own newtype
/// so an order id can never be passed where a proposal id is expected.
macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(OrderId);
opaque_id!(SubOrderId);
opaque_id!(ProposalId);
opaque_id!(VendorId);
opaque_id!(ProductId);
opaque_id!(ItemId);

/// Composite order status, derived from the sub-order multiset.
/// Never set directly by callers; see `state_machine::derive_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    PendingVendorConfirmation,
    WaitingCustomerDecision,
    Ready,
    InDelivery,
    Completed,
    Cancelled,
}

/// One vendor's fulfillment status within a composite order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubOrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    PickedUp,
    OnTheWay,
    Delivered,
    Cancelled,
}

impl SubOrderStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, SubOrderStatus::Delivered | SubOrderStatus::Cancelled)
    }

    /// Position along the fulfillment chain. `Cancelled` sits outside the
    /// chain and is reachable from any non-terminal state instead.
    pub(crate) fn chain_position(self) -> Option<u8> {
        match self {
            SubOrderStatus::Pending => Some(0),
            SubOrderStatus::Confirmed => Some(1),
            SubOrderStatus::Preparing => Some(2),
            SubOrderStatus::Ready => Some(3),
            SubOrderStatus::PickedUp => Some(4),
            SubOrderStatus::OnTheWay => Some(5),
            SubOrderStatus::Delivered => Some(6),
            SubOrderStatus::Cancelled => None,
        }
    }
}

/// Resolution state of a vendor proposal. Terminal once accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ProposalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProposalStatus::Pending)
    }
}

/// What the vendor is asking for: drop the item entirely, or reduce its
/// quantity. A reduction to zero must be sent as `Unavailable` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalType {
    Unavailable,
    QuantityReduced,
}

/// A single line item within a sub-order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: ItemId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub total_price: f64,
}

impl OrderItem {
    pub fn recompute_total(&mut self) {
        self.total_price = self.unit_price * f64::from(self.quantity);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&OrderStatus::PendingVendorConfirmation).unwrap();
        assert_eq!(json, "\"PENDING_VENDOR_CONFIRMATION\"");

        let json = serde_json::to_string(&SubOrderStatus::PickedUp).unwrap();
        assert_eq!(json, "\"PICKED_UP\"");

        let json = serde_json::to_string(&SubOrderStatus::OnTheWay).unwrap();
        assert_eq!(json, "\"ON_THE_WAY\"");

        let status: SubOrderStatus = serde_json::from_str("\"PREPARING\"").unwrap();
        assert_eq!(status, SubOrderStatus::Preparing);
    }

    #[test]
    fn test_terminal_sub_order_states() {
        assert!(SubOrderStatus::Delivered.is_terminal());
        assert!(SubOrderStatus::Cancelled.is_terminal());
        assert!(!SubOrderStatus::Pending.is_terminal());
        assert!(!SubOrderStatus::OnTheWay.is_terminal());
    }

    #[test]
    fn test_chain_positions_are_monotonic() {
        let chain = [
            SubOrderStatus::Pending,
            SubOrderStatus::Confirmed,
            SubOrderStatus::Preparing,
            SubOrderStatus::Ready,
            SubOrderStatus::PickedUp,
            SubOrderStatus::OnTheWay,
            SubOrderStatus::Delivered,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].chain_position() < pair[1].chain_position());
        }
        assert_eq!(SubOrderStatus::Cancelled.chain_position(), None);
    }

    #[test]
    fn test_proposal_status_terminality() {
        assert!(!ProposalStatus::Pending.is_terminal());
        assert!(ProposalStatus::Accepted.is_terminal());
        assert!(ProposalStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_item_total_recompute() {
        let mut item = OrderItem {
            id: ItemId::from("item-1"),
            product_id: ProductId::from("prod-1"),
            product_name: "Oat milk".to_string(),
            quantity: 3,
            unit_price: 2.5,
            total_price: 0.0,
        };
        item.recompute_total();
        assert_eq!(item.total_price, 7.5);
    }

    #[test]
    fn test_opaque_id_wire_format() {
        let id = OrderId::from("ord-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"ord-42\"");
        let back: OrderId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
