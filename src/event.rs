//! Observability events emitted by the connection runtime (§4.12, C10).

use tokio::sync::broadcast;

use crate::connection::ConnectionState;

/// Default capacity of the event broadcast channel. Lagging subscribers
/// miss older events rather than stalling the connection.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// A state change or noteworthy outcome in the connection's lifecycle.
#[derive(Debug, Clone)]
pub enum Event {
    /// The connection moved from one lifecycle state to another.
    StateChanged { from: ConnectionState, to: ConnectionState },
    /// A health check completed.
    HealthCheck { healthy: bool, consecutive_failures: u32 },
    /// A reconnect attempt is about to be made, after `delay`.
    Reconnecting { attempt: u32, delay: std::time::Duration },
    /// Reconnection gave up after exhausting the configured attempts.
    ReconnectFailed { attempts: u32 },
    /// The connection handshake completed and the bus assigned us a unique
    /// name.
    Connected { unique_name: String },
}

/// Publishes [`Event`]s to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Construct a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to future events. Events published before this call are
    /// not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns silently if there are no subscribers.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
