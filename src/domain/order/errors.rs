use super::value_objects::{OrderId, ProposalId, ProposalStatus, SubOrderId, SubOrderStatus};
use crate::api::ApiError;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    /// The state machine rejected a sub-order transition. Recoverable: the
    /// reconciler refetches the authoritative snapshot instead of applying.
    #[error("illegal sub-order transition {from:?} -> {to:?} on {sub_order_id}")]
    IllegalTransition {
        sub_order_id: SubOrderId,
        from: SubOrderStatus,
        to: SubOrderStatus,
    },

    /// A terminal proposal was asked to resolve the opposite way. Treated
    /// like an illegal transition: local state is kept and refetched.
    #[error("proposal {proposal_id} is already resolved as {current:?}")]
    ConflictingResolution {
        proposal_id: ProposalId,
        current: ProposalStatus,
    },

    /// Proposal and owning sub-order disagree (e.g. a pending proposal on a
    /// sub-order that was cancelled for a different reason). Surfaced to the
    /// caller, never auto-corrected.
    #[error("proposal {proposal_id} state is inconsistent: {reason}")]
    InvalidProposalState {
        proposal_id: ProposalId,
        reason: String,
    },

    #[error("malformed proposal {proposal_id}: {reason}")]
    MalformedProposal {
        proposal_id: ProposalId,
        reason: String,
    },

    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("sub-order {0} not found")]
    SubOrderNotFound(SubOrderId),

    #[error("proposal {0} not found")]
    ProposalNotFound(ProposalId),

    /// A REST command (accept/reject/cancel) failed. No local state change
    /// was applied; retrying is the caller's decision.
    #[error("remote command failed: {0}")]
    RemoteCommandFailed(#[from] ApiError),
}

impl OrderError {
    /// Stable label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::IllegalTransition { .. } => "illegal_transition",
            OrderError::ConflictingResolution { .. } => "conflicting_resolution",
            OrderError::InvalidProposalState { .. } => "invalid_proposal_state",
            OrderError::MalformedProposal { .. } => "malformed_proposal",
            OrderError::NotFound(_) => "not_found",
            OrderError::SubOrderNotFound(_) => "sub_order_not_found",
            OrderError::ProposalNotFound(_) => "proposal_not_found",
            OrderError::RemoteCommandFailed(_) => "remote_command_failed",
        }
    }
}
