// ============================================================================
// Sync Module - real-time synchronization infrastructure
// ============================================================================
//
// Keeps the local order cache consistent with the backend under concurrent
// push events and pull refreshes:
//
// - channel/     - EventChannel abstraction + in-memory implementation
// - store/       - OrderSnapshotStore, the authoritative local cache
// - reconciler/  - ReconciliationEngine, push/pull arbitration
// - actor/       - ReconcilerActor, the actix infrastructure surface
//
// ============================================================================

pub mod actor;
pub mod channel;
pub mod reconciler;
pub mod store;

pub use actor::ReconcilerActor;
pub use channel::{
    ChannelError, ChannelEvent, ConnectionState, Credential, EventChannel, InMemoryEventChannel,
};
pub use reconciler::{ReconcilerConfig, ReconciliationEngine, SyncState};
pub use store::{OrderFilter, OrderSnapshotStore};
