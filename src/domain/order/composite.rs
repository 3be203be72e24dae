use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::errors::OrderError;
use super::value_objects::{
    ItemId, OrderId, OrderItem, OrderStatus, ProposalId, ProposalStatus, ProposalType,
    SubOrderId, SubOrderStatus, VendorId,
};

// ============================================================================
// Composite Order Snapshot - one customer order spanning multiple vendors
// ============================================================================

/// A vendor-initiated change request against one item of a sub-order.
/// Resolved exactly once by the customer; terminal afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: ProposalId,
    pub sub_order_id: SubOrderId,
    pub item_id: ItemId,
    #[serde(rename = "type")]
    pub kind: ProposalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_quantity: Option<u32>,
    pub status: ProposalStatus,
}

impl Proposal {
    /// Wire-contract consistency: `proposedQuantity` is present iff the kind
    /// is `QUANTITY_REDUCED`, and a reduction to zero is not a reduction.
    pub fn validate(&self) -> Result<(), OrderError> {
        match self.kind {
            ProposalType::QuantityReduced => match self.proposed_quantity {
                Some(0) => Err(OrderError::MalformedProposal {
                    proposal_id: self.id.clone(),
                    reason: "quantity zero must be sent as UNAVAILABLE".to_string(),
                }),
                Some(_) => Ok(()),
                None => Err(OrderError::MalformedProposal {
                    proposal_id: self.id.clone(),
                    reason: "QUANTITY_REDUCED without proposedQuantity".to_string(),
                }),
            },
            ProposalType::Unavailable => {
                if self.proposed_quantity.is_some() {
                    Err(OrderError::MalformedProposal {
                        proposal_id: self.id.clone(),
                        reason: "UNAVAILABLE must not carry proposedQuantity".to_string(),
                    })
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// One vendor's portion of a composite order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubOrder {
    pub id: SubOrderId,
    pub vendor_id: VendorId,
    pub vendor_name: String,
    pub status: SubOrderStatus,
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub proposals: Vec<Proposal>,
    pub subtotal: f64,
}

impl SubOrder {
    pub fn has_pending_proposal(&self) -> bool {
        self.proposals.iter().any(|p| !p.status.is_terminal())
    }

    pub fn proposal(&self, proposal_id: &ProposalId) -> Option<&Proposal> {
        self.proposals.iter().find(|p| &p.id == proposal_id)
    }

    pub fn item_mut(&mut self, item_id: &ItemId) -> Option<&mut OrderItem> {
        self.items.iter_mut().find(|i| &i.id == item_id)
    }

    pub fn recompute_subtotal(&mut self) {
        for item in &mut self.items {
            item.recompute_total();
        }
        self.subtotal = self.items.iter().map(|i| i.total_price).sum();
    }

    /// A cancelled sub-order may hold no unresolved proposals; anything still
    /// pending at cancellation time is resolved as rejected.
    pub(crate) fn reject_pending_proposals(&mut self) {
        for proposal in &mut self.proposals {
            if proposal.status == ProposalStatus::Pending {
                proposal.status = ProposalStatus::Rejected;
            }
        }
    }
}

/// The customer-facing order spanning one or more vendors. `status` and
/// `total_amount` are derived values; mutation happens only through validated
/// patch application in the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeOrder {
    pub id: OrderId,
    pub status: OrderStatus,
    pub sub_orders: Vec<SubOrder>,
    pub total_amount: f64,
    pub delivery_address: String,
    pub created_at: DateTime<Utc>,
}

impl CompositeOrder {
    pub fn sub_order_mut(&mut self, sub_order_id: &SubOrderId) -> Option<&mut SubOrder> {
        self.sub_orders.iter_mut().find(|s| &s.id == sub_order_id)
    }

    pub fn proposal(&self, proposal_id: &ProposalId) -> Option<&Proposal> {
        self.sub_orders.iter().find_map(|s| s.proposal(proposal_id))
    }

    pub fn owning_sub_order(&self, proposal_id: &ProposalId) -> Option<&SubOrder> {
        self.sub_orders.iter().find(|s| s.proposal(proposal_id).is_some())
    }

    /// Recompute item totals, sub-order subtotals and the order total.
    /// Called when an accepted proposal changed quantities or availability;
    /// everything else keeps the backend-provided amounts.
    pub fn recompute_total(&mut self) {
        for sub in &mut self.sub_orders {
            sub.recompute_subtotal();
        }
        self.total_amount = self.sub_orders.iter().map(|s| s.subtotal).sum();
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
