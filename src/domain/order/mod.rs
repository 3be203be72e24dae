// ============================================================================
// Order Domain - composite orders, proposals and their state machine
// ============================================================================
//
// This module contains ALL order-specific logic:
// - Value objects (ids, statuses, OrderItem)
// - Snapshot types (CompositeOrder, SubOrder, Proposal)
// - Push events (topics, payload decoding, merge fast path)
// - State machine (transition lattice, composite derivation, patches)
// - Proposal resolver (customer responses to vendor proposals)
// - Errors (OrderError enum)
//
// Domain logic is plain code; the synchronization infrastructure lives in
// `crate::sync` and only talks to this module through validated patches.
//
// ============================================================================

pub mod composite;
pub mod errors;
pub mod events;
pub mod proposals;
pub mod state_machine;
pub mod value_objects;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export for convenience
pub use composite::*;
pub use errors::*;
pub use events::*;
pub use proposals::*;
pub use state_machine::*;
pub use value_objects::*;
