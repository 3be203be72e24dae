use actix::prelude::*;

use crate::domain::order::{CompositeOrder, OrderError, OrderId, ProposalId};

use super::reconciler::ReconciliationEngine;

// ============================================================================
// Reconciler Actor - infrastructure surface over the reconciliation engine
// ============================================================================
//
// Domain logic stays in plain handlers (resolver, state machine); the actor
// only exposes the engine's tracking lifecycle and customer actions as
// messages, so process wiring can hold a single Addr instead of the engine.
//
// ============================================================================

// ============================================================================
// Actor Messages
// ============================================================================

#[derive(Message)]
#[rtype(result = "()")]
pub struct Track {
    pub order_id: OrderId,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Untrack {
    pub order_id: OrderId,
}

#[derive(Message)]
#[rtype(result = "Result<CompositeOrder, OrderError>")]
pub struct AcceptProposal {
    pub order_id: OrderId,
    pub proposal_id: ProposalId,
}

#[derive(Message)]
#[rtype(result = "Result<CompositeOrder, OrderError>")]
pub struct RejectProposal {
    pub order_id: OrderId,
    pub proposal_id: ProposalId,
    pub cancel_entire_order: bool,
}

#[derive(Message)]
#[rtype(result = "Result<CompositeOrder, OrderError>")]
pub struct CancelOrder {
    pub order_id: OrderId,
}

pub struct ReconcilerActor {
    engine: ReconciliationEngine,
}

impl ReconcilerActor {
    pub fn new(engine: ReconciliationEngine) -> Self {
        Self { engine }
    }
}

impl Actor for ReconcilerActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("ReconcilerActor started");
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Handler<Track> for ReconcilerActor {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, msg: Track, _: &mut Self::Context) -> Self::Result {
        let engine = self.engine.clone();
        Box::pin(async move { engine.track(msg.order_id).await })
    }
}

impl Handler<Untrack> for ReconcilerActor {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, msg: Untrack, _: &mut Self::Context) -> Self::Result {
        let engine = self.engine.clone();
        Box::pin(async move { engine.untrack(&msg.order_id).await })
    }
}

impl Handler<AcceptProposal> for ReconcilerActor {
    type Result = ResponseFuture<Result<CompositeOrder, OrderError>>;

    fn handle(&mut self, msg: AcceptProposal, _: &mut Self::Context) -> Self::Result {
        let engine = self.engine.clone();
        Box::pin(async move {
            engine
                .accept_proposal(&msg.order_id, &msg.proposal_id)
                .await
        })
    }
}

impl Handler<RejectProposal> for ReconcilerActor {
    type Result = ResponseFuture<Result<CompositeOrder, OrderError>>;

    fn handle(&mut self, msg: RejectProposal, _: &mut Self::Context) -> Self::Result {
        let engine = self.engine.clone();
        Box::pin(async move {
            engine
                .reject_proposal(&msg.order_id, &msg.proposal_id, msg.cancel_entire_order)
                .await
        })
    }
}

impl Handler<CancelOrder> for ReconcilerActor {
    type Result = ResponseFuture<Result<CompositeOrder, OrderError>>;

    fn handle(&mut self, msg: CancelOrder, _: &mut Self::Context) -> Self::Result {
        let engine = self.engine.clone();
        Box::pin(async move { engine.cancel_order(&msg.order_id).await })
    }
}
