use super::composite::{CompositeOrder, Proposal};
use super::errors::OrderError;
use super::proposals;
use super::value_objects::{OrderStatus, ProposalId, SubOrderId, SubOrderStatus};

// ============================================================================
// Order State Machine - transition lattice and composite status derivation
// ============================================================================
//
// Sub-orders move monotonically along
//
//   PENDING -> CONFIRMED -> PREPARING -> READY -> PICKED_UP -> ON_THE_WAY -> DELIVERED
//
// with CANCELLED reachable from any non-terminal state. Forward skips are
// legal (push events may be missed); repeating the current status is an
// idempotent no-op (at-least-once delivery across reconnects); moving
// backward or leaving a terminal state is rejected as IllegalTransition.
//
// The composite status is never stored authoritatively: it is re-derived
// from the sub-order multiset after every mutation.
//
// ============================================================================

/// A validated partial update against one composite order. Produced by the
/// event fast path and by the proposal resolver, applied atomically by the
/// snapshot store.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderPatch {
    /// One sub-order advanced (or was cancelled).
    SubOrderStatus {
        sub_order_id: SubOrderId,
        status: SubOrderStatus,
    },
    /// A vendor raised a change request against one item.
    ProposalRaised { proposal: Proposal },
    /// The customer (or a corroborating event) resolved a proposal.
    ProposalResolved {
        proposal_id: ProposalId,
        resolution: ProposalResolution,
    },
    /// Full-order cancellation; every non-terminal sub-order is cancelled.
    CancelAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalResolution {
    Accepted,
    Rejected { cancel_entire_order: bool },
}

/// Check one sub-order transition against the lattice.
pub fn validate_transition(
    sub_order_id: &SubOrderId,
    from: SubOrderStatus,
    to: SubOrderStatus,
) -> Result<(), OrderError> {
    if from == to {
        // duplicate event delivery
        return Ok(());
    }
    let illegal = || OrderError::IllegalTransition {
        sub_order_id: sub_order_id.clone(),
        from,
        to,
    };
    if from.is_terminal() {
        return Err(illegal());
    }
    if to == SubOrderStatus::Cancelled {
        return Ok(());
    }
    match (from.chain_position(), to.chain_position()) {
        (Some(f), Some(t)) if t > f => Ok(()),
        _ => Err(illegal()),
    }
}

/// Derive the composite status from the sub-order multiset. Rule order is
/// significant: cancellation and pending-decision dominate everything else.
pub fn derive_status(sub_orders: &[super::composite::SubOrder]) -> OrderStatus {
    if !sub_orders.is_empty()
        && sub_orders.iter().all(|s| s.status == SubOrderStatus::Cancelled)
    {
        return OrderStatus::Cancelled;
    }
    if sub_orders.iter().any(|s| s.has_pending_proposal()) {
        return OrderStatus::WaitingCustomerDecision;
    }
    if sub_orders.iter().any(|s| s.status == SubOrderStatus::Pending) {
        return OrderStatus::PendingVendorConfirmation;
    }
    let active: Vec<_> = sub_orders
        .iter()
        .filter(|s| s.status != SubOrderStatus::Cancelled)
        .collect();
    if !active.is_empty() && active.iter().all(|s| s.status == SubOrderStatus::Delivered) {
        return OrderStatus::Completed;
    }
    if active.iter().any(|s| {
        matches!(
            s.status,
            SubOrderStatus::PickedUp | SubOrderStatus::OnTheWay
        )
    }) {
        return OrderStatus::InDelivery;
    }
    OrderStatus::Ready
}

/// Apply a patch to an order, validating every touched transition first.
/// On error the order has not been mutated in any observable way when the
/// caller applies to a working copy, which is exactly what the store does.
pub fn apply_patch(order: &mut CompositeOrder, patch: &OrderPatch) -> Result<(), OrderError> {
    match patch {
        OrderPatch::SubOrderStatus {
            sub_order_id,
            status,
        } => {
            let sub = order
                .sub_order_mut(sub_order_id)
                .ok_or_else(|| OrderError::SubOrderNotFound(sub_order_id.clone()))?;
            validate_transition(sub_order_id, sub.status, *status)?;
            sub.status = *status;
            if *status == SubOrderStatus::Cancelled {
                sub.reject_pending_proposals();
            }
        }
        OrderPatch::ProposalRaised { proposal } => {
            proposal.validate()?;
            if order.proposal(&proposal.id).is_none() {
                let sub = order
                    .sub_order_mut(&proposal.sub_order_id)
                    .ok_or_else(|| OrderError::SubOrderNotFound(proposal.sub_order_id.clone()))?;
                if sub.status.is_terminal() {
                    return Err(OrderError::InvalidProposalState {
                        proposal_id: proposal.id.clone(),
                        reason: format!(
                            "raised against a sub-order already {:?}",
                            sub.status
                        ),
                    });
                }
                if !sub.items.iter().any(|i| i.id == proposal.item_id) {
                    return Err(OrderError::MalformedProposal {
                        proposal_id: proposal.id.clone(),
                        reason: format!("unknown item {}", proposal.item_id),
                    });
                }
                sub.proposals.push(proposal.clone());
            }
            // an already-known proposal id is a duplicate delivery: no-op
        }
        OrderPatch::ProposalResolved {
            proposal_id,
            resolution,
        } => {
            proposals::apply_resolution(order, proposal_id, *resolution)?;
        }
        OrderPatch::CancelAll => {
            for sub in &mut order.sub_orders {
                if !sub.status.is_terminal() {
                    sub.status = SubOrderStatus::Cancelled;
                    sub.reject_pending_proposals();
                }
            }
        }
    }
    order.status = derive_status(&order.sub_orders);
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================
