use super::composite::CompositeOrder;
use super::errors::OrderError;
use super::state_machine::{self, OrderPatch, ProposalResolution};
use super::value_objects::{ProposalId, ProposalStatus, ProposalType, SubOrderStatus};

// ============================================================================
// Proposal Resolver - legality of customer responses to vendor proposals
// ============================================================================
//
// Resolution is idempotent from the client's perspective: re-resolving a
// terminal proposal yields the patch computed from the current terminal
// state (a no-op on application) rather than an error, so duplicate
// accept/reject delivery from a flaky network is harmless. Only a genuinely
// conflicting outcome (accept after reject, or vice versa) is rejected.
//
// ============================================================================

pub struct ProposalResolver;

impl ProposalResolver {
    pub fn can_accept(proposal: &super::composite::Proposal) -> bool {
        proposal.status == ProposalStatus::Pending
    }

    pub fn can_reject(proposal: &super::composite::Proposal) -> bool {
        proposal.status == ProposalStatus::Pending
    }

    /// Patch that accepts the proposal: marks it ACCEPTED, applies the
    /// quantity reduction (or removes the item), and recomputes totals.
    pub fn resolve_accept(
        order: &CompositeOrder,
        proposal_id: &ProposalId,
    ) -> Result<OrderPatch, OrderError> {
        let (proposal, owner_status) = Self::locate(order, proposal_id)?;
        Self::check_owner_consistency(proposal_id, proposal.status, owner_status)?;

        let resolution = match proposal.status {
            // already rejected: report the terminal state that actually holds
            ProposalStatus::Rejected => ProposalResolution::Rejected {
                cancel_entire_order: Self::whole_order_cancelled(order),
            },
            _ => ProposalResolution::Accepted,
        };
        Ok(OrderPatch::ProposalResolved {
            proposal_id: proposal_id.clone(),
            resolution,
        })
    }

    /// Patch that rejects the proposal, cancelling the owning sub-order and,
    /// when `cancel_entire_order` is set, every other non-terminal sub-order.
    pub fn resolve_reject(
        order: &CompositeOrder,
        proposal_id: &ProposalId,
        cancel_entire_order: bool,
    ) -> Result<OrderPatch, OrderError> {
        let (proposal, owner_status) = Self::locate(order, proposal_id)?;
        Self::check_owner_consistency(proposal_id, proposal.status, owner_status)?;

        let resolution = match proposal.status {
            ProposalStatus::Accepted => ProposalResolution::Accepted,
            ProposalStatus::Rejected => ProposalResolution::Rejected {
                cancel_entire_order: Self::whole_order_cancelled(order),
            },
            ProposalStatus::Pending => ProposalResolution::Rejected {
                cancel_entire_order,
            },
        };
        Ok(OrderPatch::ProposalResolved {
            proposal_id: proposal_id.clone(),
            resolution,
        })
    }

    fn locate<'a>(
        order: &'a CompositeOrder,
        proposal_id: &ProposalId,
    ) -> Result<(&'a super::composite::Proposal, SubOrderStatus), OrderError> {
        let proposal = order
            .proposal(proposal_id)
            .ok_or_else(|| OrderError::ProposalNotFound(proposal_id.clone()))?;
        let owner = order
            .owning_sub_order(proposal_id)
            .ok_or_else(|| OrderError::ProposalNotFound(proposal_id.clone()))?;
        Ok((proposal, owner.status))
    }

    fn check_owner_consistency(
        proposal_id: &ProposalId,
        proposal_status: ProposalStatus,
        owner_status: SubOrderStatus,
    ) -> Result<(), OrderError> {
        if owner_status == SubOrderStatus::Cancelled && proposal_status == ProposalStatus::Pending {
            return Err(OrderError::InvalidProposalState {
                proposal_id: proposal_id.clone(),
                reason: "owning sub-order was cancelled for a different reason".to_string(),
            });
        }
        Ok(())
    }

    fn whole_order_cancelled(order: &CompositeOrder) -> bool {
        order
            .sub_orders
            .iter()
            .all(|s| s.status == SubOrderStatus::Cancelled)
    }
}

/// Apply a resolution to the order. Called from `state_machine::apply_patch`
/// so the snapshot store's merge validation goes through one place.
pub(crate) fn apply_resolution(
    order: &mut CompositeOrder,
    proposal_id: &ProposalId,
    resolution: ProposalResolution,
) -> Result<(), OrderError> {
    let (sub_idx, prop_idx) = order
        .sub_orders
        .iter()
        .enumerate()
        .find_map(|(si, sub)| {
            sub.proposals
                .iter()
                .position(|p| &p.id == proposal_id)
                .map(|pi| (si, pi))
        })
        .ok_or_else(|| OrderError::ProposalNotFound(proposal_id.clone()))?;

    let current = order.sub_orders[sub_idx].proposals[prop_idx].status;
    if order.sub_orders[sub_idx].status == SubOrderStatus::Cancelled
        && current == ProposalStatus::Pending
    {
        return Err(OrderError::InvalidProposalState {
            proposal_id: proposal_id.clone(),
            reason: "owning sub-order was cancelled for a different reason".to_string(),
        });
    }

    match (current, resolution) {
        (ProposalStatus::Pending, ProposalResolution::Accepted) => {
            accept(order, sub_idx, prop_idx);
            Ok(())
        }
        (
            ProposalStatus::Pending,
            ProposalResolution::Rejected {
                cancel_entire_order,
            },
        ) => reject(order, sub_idx, prop_idx, cancel_entire_order),
        // duplicate delivery of the outcome that already holds: no-op
        (ProposalStatus::Accepted, ProposalResolution::Accepted) => Ok(()),
        (ProposalStatus::Rejected, ProposalResolution::Rejected { .. }) => Ok(()),
        (current, _) => Err(OrderError::ConflictingResolution {
            proposal_id: proposal_id.clone(),
            current,
        }),
    }
}

fn accept(order: &mut CompositeOrder, sub_idx: usize, prop_idx: usize) {
    let sub = &mut order.sub_orders[sub_idx];
    sub.proposals[prop_idx].status = ProposalStatus::Accepted;
    let proposal = sub.proposals[prop_idx].clone();

    match proposal.kind {
        ProposalType::Unavailable => {
            sub.items.retain(|i| i.id != proposal.item_id);
        }
        ProposalType::QuantityReduced => {
            if let Some(item) = sub.item_mut(&proposal.item_id) {
                if let Some(quantity) = proposal.proposed_quantity {
                    item.quantity = quantity;
                    item.recompute_total();
                }
            }
        }
    }
    order.recompute_total();
}

fn reject(
    order: &mut CompositeOrder,
    sub_idx: usize,
    prop_idx: usize,
    cancel_entire_order: bool,
) -> Result<(), OrderError> {
    let sub_order_id = order.sub_orders[sub_idx].id.clone();
    let from = order.sub_orders[sub_idx].status;
    state_machine::validate_transition(&sub_order_id, from, SubOrderStatus::Cancelled)?;

    {
        let sub = &mut order.sub_orders[sub_idx];
        sub.proposals[prop_idx].status = ProposalStatus::Rejected;
        sub.status = SubOrderStatus::Cancelled;
        sub.reject_pending_proposals();
    }

    if cancel_entire_order {
        for sub in &mut order.sub_orders {
            if !sub.status.is_terminal() {
                sub.status = SubOrderStatus::Cancelled;
                sub.reject_pending_proposals();
            }
        }
    }
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================
