use serde::Deserialize;

use super::composite::{CompositeOrder, Proposal};
use super::state_machine::{OrderPatch, ProposalResolution};
use super::value_objects::{OrderId, ProposalId, SubOrderId, SubOrderStatus};

// ============================================================================
// Order Push Events - named topics delivered over the event channel
// ============================================================================
//
// Every payload carries at minimum the affected `orderId`. Richer payloads
// (sub-order id, full proposal, full order) are optional and unlock the
// direct-merge fast path; without them the reconciler falls back to an
// authoritative refetch.
//
// ============================================================================

pub const TOPIC_ORDER_CREATED: &str = "ORDER_CREATED";
pub const TOPIC_ORDER_CONFIRMED: &str = "ORDER_CONFIRMED";
pub const TOPIC_ORDER_CANCELLED: &str = "ORDER_CANCELLED";
pub const TOPIC_ORDER_READY: &str = "ORDER_READY";
pub const TOPIC_ORDER_PICKED_UP: &str = "ORDER_PICKED_UP";
pub const TOPIC_ORDER_ON_THE_WAY: &str = "ORDER_ON_THE_WAY";
pub const TOPIC_ORDER_DELIVERED: &str = "ORDER_DELIVERED";
pub const TOPIC_VENDOR_ORDER_PROPOSED: &str = "VENDOR_ORDER_PROPOSED";
pub const TOPIC_PROPOSAL_ACCEPTED: &str = "PROPOSAL_ACCEPTED";
pub const TOPIC_PROPOSAL_REJECTED: &str = "PROPOSAL_REJECTED";

/// The fixed topic set a session subscribes to on connect. Static per
/// session; never negotiated dynamically.
pub const ORDER_TOPICS: [&str; 10] = [
    TOPIC_ORDER_CREATED,
    TOPIC_ORDER_CONFIRMED,
    TOPIC_ORDER_CANCELLED,
    TOPIC_ORDER_READY,
    TOPIC_ORDER_PICKED_UP,
    TOPIC_ORDER_ON_THE_WAY,
    TOPIC_ORDER_DELIVERED,
    TOPIC_VENDOR_ORDER_PROPOSED,
    TOPIC_PROPOSAL_ACCEPTED,
    TOPIC_PROPOSAL_REJECTED,
];

#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("unknown event topic: {0}")]
    UnknownTopic(String),

    #[error("payload carries no order id: {0}")]
    MissingOrderId(serde_json::Error),
}

/// Decoded push event.
#[derive(Debug, Clone)]
pub enum OrderEvent {
    Created {
        order_id: OrderId,
        order: Option<CompositeOrder>,
    },
    SubOrderAdvanced {
        order_id: OrderId,
        sub_order_id: Option<SubOrderId>,
        status: SubOrderStatus,
    },
    Cancelled {
        order_id: OrderId,
        sub_order_id: Option<SubOrderId>,
    },
    ProposalRaised {
        order_id: OrderId,
        proposal: Option<Proposal>,
    },
    ProposalResolved {
        order_id: OrderId,
        proposal_id: Option<ProposalId>,
        resolution: ProposalResolution,
    },
}

/// Envelope guaranteed by the backend contract.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MinimalPayload {
    order_id: OrderId,
}

/// Optional enrichments; anything undecodable degrades to "no delta".
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PayloadDetail {
    sub_order_id: Option<SubOrderId>,
    proposal_id: Option<ProposalId>,
    proposal: Option<Proposal>,
    order: Option<CompositeOrder>,
    cancel_entire_order: Option<bool>,
}

impl OrderEvent {
    /// Decode a named event. Fails only when the topic is unknown or the
    /// payload does not even carry an order id; a malformed enrichment is
    /// dropped so the event still reaches the refetch path.
    pub fn parse(topic: &str, payload: &serde_json::Value) -> Result<Self, EventParseError> {
        let minimal: MinimalPayload = serde_json::from_value(payload.clone())
            .map_err(EventParseError::MissingOrderId)?;
        let detail: PayloadDetail =
            serde_json::from_value(payload.clone()).unwrap_or_default();
        let order_id = minimal.order_id;

        let event = match topic {
            TOPIC_ORDER_CREATED => OrderEvent::Created {
                order_id,
                order: detail.order,
            },
            TOPIC_ORDER_CONFIRMED => OrderEvent::SubOrderAdvanced {
                order_id,
                sub_order_id: detail.sub_order_id,
                status: SubOrderStatus::Confirmed,
            },
            TOPIC_ORDER_READY => OrderEvent::SubOrderAdvanced {
                order_id,
                sub_order_id: detail.sub_order_id,
                status: SubOrderStatus::Ready,
            },
            TOPIC_ORDER_PICKED_UP => OrderEvent::SubOrderAdvanced {
                order_id,
                sub_order_id: detail.sub_order_id,
                status: SubOrderStatus::PickedUp,
            },
            TOPIC_ORDER_ON_THE_WAY => OrderEvent::SubOrderAdvanced {
                order_id,
                sub_order_id: detail.sub_order_id,
                status: SubOrderStatus::OnTheWay,
            },
            TOPIC_ORDER_DELIVERED => OrderEvent::SubOrderAdvanced {
                order_id,
                sub_order_id: detail.sub_order_id,
                status: SubOrderStatus::Delivered,
            },
            TOPIC_ORDER_CANCELLED => OrderEvent::Cancelled {
                order_id,
                sub_order_id: detail.sub_order_id,
            },
            TOPIC_VENDOR_ORDER_PROPOSED => OrderEvent::ProposalRaised {
                order_id,
                proposal: detail.proposal,
            },
            TOPIC_PROPOSAL_ACCEPTED => OrderEvent::ProposalResolved {
                order_id,
                proposal_id: detail.proposal_id,
                resolution: ProposalResolution::Accepted,
            },
            TOPIC_PROPOSAL_REJECTED => OrderEvent::ProposalResolved {
                order_id,
                proposal_id: detail.proposal_id,
                resolution: ProposalResolution::Rejected {
                    cancel_entire_order: detail.cancel_entire_order.unwrap_or(false),
                },
            },
            other => return Err(EventParseError::UnknownTopic(other.to_string())),
        };
        Ok(event)
    }

    pub fn order_id(&self) -> &OrderId {
        match self {
            OrderEvent::Created { order_id, .. }
            | OrderEvent::SubOrderAdvanced { order_id, .. }
            | OrderEvent::Cancelled { order_id, .. }
            | OrderEvent::ProposalRaised { order_id, .. }
            | OrderEvent::ProposalResolved { order_id, .. } => order_id,
        }
    }

    /// Extract a merge patch when the payload carries enough data to apply
    /// the update locally. `None` means the reconciler must refetch.
    pub fn to_patch(&self) -> Option<OrderPatch> {
        match self {
            // creation installs a snapshot, it does not merge into one
            OrderEvent::Created { .. } => None,
            OrderEvent::SubOrderAdvanced {
                sub_order_id: Some(sub_order_id),
                status,
                ..
            } => Some(OrderPatch::SubOrderStatus {
                sub_order_id: sub_order_id.clone(),
                status: *status,
            }),
            OrderEvent::Cancelled {
                sub_order_id: Some(sub_order_id),
                ..
            } => Some(OrderPatch::SubOrderStatus {
                sub_order_id: sub_order_id.clone(),
                status: SubOrderStatus::Cancelled,
            }),
            // a cancellation without a sub-order id cancels the whole order
            OrderEvent::Cancelled {
                sub_order_id: None, ..
            } => Some(OrderPatch::CancelAll),
            OrderEvent::ProposalRaised {
                proposal: Some(proposal),
                ..
            } => Some(OrderPatch::ProposalRaised {
                proposal: proposal.clone(),
            }),
            OrderEvent::ProposalResolved {
                proposal_id: Some(proposal_id),
                resolution,
                ..
            } => Some(OrderPatch::ProposalResolved {
                proposal_id: proposal_id.clone(),
                resolution: *resolution,
            }),
            _ => None,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_sub_order_event_with_delta() {
        let event = OrderEvent::parse(
            TOPIC_ORDER_CONFIRMED,
            &json!({"orderId": "ord-1", "subOrderId": "sub-2"}),
        )
        .unwrap();

        assert_eq!(event.order_id(), &OrderId::from("ord-1"));
        let patch = event.to_patch().unwrap();
        assert_eq!(
            patch,
            OrderPatch::SubOrderStatus {
                sub_order_id: SubOrderId::from("sub-2"),
                status: SubOrderStatus::Confirmed,
            }
        );
    }

    #[test]
    fn test_parse_minimal_payload_has_no_patch() {
        let event =
            OrderEvent::parse(TOPIC_ORDER_DELIVERED, &json!({"orderId": "ord-1"})).unwrap();
        assert!(event.to_patch().is_none());
    }

    #[test]
    fn test_parse_proposal_raised_with_full_proposal() {
        let payload = json!({
            "orderId": "ord-1",
            "proposal": {
                "id": "prop-1",
                "subOrderId": "sub-1",
                "itemId": "item-1",
                "type": "QUANTITY_REDUCED",
                "proposedQuantity": 2,
                "status": "PENDING"
            }
        });
        let event = OrderEvent::parse(TOPIC_VENDOR_ORDER_PROPOSED, &payload).unwrap();
        match event.to_patch().unwrap() {
            OrderPatch::ProposalRaised { proposal } => {
                assert_eq!(proposal.id, ProposalId::from("prop-1"));
                assert_eq!(proposal.proposed_quantity, Some(2));
            }
            other => panic!("unexpected patch: {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed_enrichment_degrades_to_refetch() {
        // proposal enrichment is structurally broken; order id still decodes
        let payload = json!({
            "orderId": "ord-1",
            "proposal": {"id": "prop-1", "type": "NO_SUCH_TYPE"}
        });
        let event = OrderEvent::parse(TOPIC_VENDOR_ORDER_PROPOSED, &payload).unwrap();
        assert_eq!(event.order_id(), &OrderId::from("ord-1"));
        assert!(event.to_patch().is_none());
    }

    #[test]
    fn test_parse_rejected_proposal_carries_cancel_flag() {
        let payload = json!({
            "orderId": "ord-1",
            "proposalId": "prop-1",
            "cancelEntireOrder": true
        });
        let event = OrderEvent::parse(TOPIC_PROPOSAL_REJECTED, &payload).unwrap();
        match event.to_patch().unwrap() {
            OrderPatch::ProposalResolved { resolution, .. } => assert_eq!(
                resolution,
                ProposalResolution::Rejected {
                    cancel_entire_order: true
                }
            ),
            other => panic!("unexpected patch: {other:?}"),
        }
    }

    #[test]
    fn test_parse_full_order_cancellation() {
        let event =
            OrderEvent::parse(TOPIC_ORDER_CANCELLED, &json!({"orderId": "ord-1"})).unwrap();
        assert_eq!(event.to_patch(), Some(OrderPatch::CancelAll));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            OrderEvent::parse("ORDER_EXPLODED", &json!({"orderId": "ord-1"})),
            Err(EventParseError::UnknownTopic(_))
        ));
        assert!(matches!(
            OrderEvent::parse(TOPIC_ORDER_CREATED, &json!({"something": "else"})),
            Err(EventParseError::MissingOrderId(_))
        ));
    }
}
