use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::domain::order::events::ORDER_TOPICS;

// ============================================================================
// Event Channel - abstract real-time subscription primitive
// ============================================================================
//
// Delivery guarantees implementations must honor:
// - at-most-once per physical connection,
// - at-least-once across reconnects (a reconnect may redeliver events the
//   client already processed, or drop events entirely; no ordering guarantee
//   holds across a reconnect boundary).
//
// Connecting implicitly subscribes to the fixed `ORDER_TOPICS` set for the
// session; topics are never negotiated dynamically. After a credential
// teardown (`disconnect`) the channel must not auto-reconnect.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Opaque bearer token handed out by the credential provider.
#[derive(Debug, Clone)]
pub struct Credential(pub String);

/// A named event with its raw payload.
#[derive(Debug, Clone)]
pub struct ChannelEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Advisory: the channel is down. In-flight reads are unaffected;
    /// tracked orders go stale and are refreshed on reconnect.
    #[error("event channel is disconnected")]
    Disconnected,

    #[error("credential rejected")]
    InvalidCredential,
}

#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Establish the connection and subscribe to `ORDER_TOPICS`.
    async fn connect(&self, credential: &Credential) -> Result<(), ChannelError>;

    /// Tear down the connection; called on credential invalidation.
    async fn disconnect(&self);

    /// Subscribe to the event stream. Each receiver sees every event
    /// delivered after the call.
    fn events(&self) -> broadcast::Receiver<ChannelEvent>;

    /// Watch connection-state transitions.
    fn connection_states(&self) -> watch::Receiver<ConnectionState>;

    fn connection_state(&self) -> ConnectionState;
}

// ============================================================================
// In-Memory Channel - test/demo transport
// ============================================================================

/// Event channel without a wire: events are injected with [`emit`] and the
/// connection lifecycle is driven explicitly. Used by the demo binary and
/// by reconciler tests to simulate reconnects and duplicate delivery.
///
/// [`emit`]: InMemoryEventChannel::emit
pub struct InMemoryEventChannel {
    events: broadcast::Sender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
}

impl InMemoryEventChannel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { events, state }
    }

    /// Deliver an event to every subscriber, as the backend gateway would.
    pub fn emit(&self, topic: &str, payload: serde_json::Value) -> Result<(), ChannelError> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(ChannelError::Disconnected);
        }
        tracing::trace!(topic = %topic, "delivering channel event");
        // receivers may not be attached yet; that is not an error here
        let _ = self.events.send(ChannelEvent {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    /// Drive the connection state directly, e.g. to simulate a transport
    /// dropping and re-establishing the socket.
    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

impl Default for InMemoryEventChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventChannel for InMemoryEventChannel {
    async fn connect(&self, credential: &Credential) -> Result<(), ChannelError> {
        if credential.0.is_empty() {
            return Err(ChannelError::InvalidCredential);
        }
        self.state.send_replace(ConnectionState::Connecting);
        self.state.send_replace(ConnectionState::Connected);
        tracing::debug!(topics = ORDER_TOPICS.len(), "channel connected, topics subscribed");
        Ok(())
    }

    async fn disconnect(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
        tracing::debug!("channel disconnected");
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn connection_states(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_requires_connection() {
        let channel = InMemoryEventChannel::new();
        let result = channel.emit("ORDER_CREATED", json!({"orderId": "ord-1"}));
        assert!(matches!(result, Err(ChannelError::Disconnected)));

        channel.connect(&Credential("token".into())).await.unwrap();
        let mut events = channel.events();
        channel
            .emit("ORDER_CREATED", json!({"orderId": "ord-1"}))
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.topic, "ORDER_CREATED");
        assert_eq!(event.payload["orderId"], "ord-1");
    }

    #[tokio::test]
    async fn test_connection_state_transitions_are_observable() {
        let channel = InMemoryEventChannel::new();
        let mut states = channel.connection_states();
        assert_eq!(*states.borrow(), ConnectionState::Disconnected);

        channel.connect(&Credential("token".into())).await.unwrap();
        assert_eq!(channel.connection_state(), ConnectionState::Connected);

        channel.disconnect().await;
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_empty_credential_is_rejected() {
        let channel = InMemoryEventChannel::new();
        let result = channel.connect(&Credential(String::new())).await;
        assert!(matches!(result, Err(ChannelError::InvalidCredential)));
        assert_eq!(channel.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_transport_level_state_changes_block_emission() {
        let channel = InMemoryEventChannel::new();
        channel.connect(&Credential("token".into())).await.unwrap();

        // transport dropped the socket and is redialing
        channel.set_state(ConnectionState::Connecting);
        let result = channel.emit("ORDER_READY", json!({"orderId": "ord-1"}));
        assert!(matches!(result, Err(ChannelError::Disconnected)));

        channel.set_state(ConnectionState::Connected);
        assert!(channel.emit("ORDER_READY", json!({"orderId": "ord-1"})).is_ok());
    }
}
