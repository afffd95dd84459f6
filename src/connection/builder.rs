//! Connection configuration surface (§4.8, §4.11, C11).

use std::time::Duration;

use crate::correlator::DEFAULT_CALL_TIMEOUT;
use crate::health::HealthPolicy;
use crate::pipeline::dispatcher::DEFAULT_QUEUE_CAPACITY;
use crate::reconnect::ReconnectPolicy;
use crate::sasl::{self, Mechanism};

/// Which well-known bus to connect to, or an explicit address string.
#[derive(Debug, Clone)]
pub enum BusChoice {
    Session,
    System,
    Address(String),
}

/// Fully resolved connection configuration, built via [`ConnectionBuilder`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub bus: BusChoice,
    pub call_timeout: Duration,
    pub mechanisms: Vec<Mechanism>,
    pub negotiate_unix_fd: bool,
    pub auto_reconnect: bool,
    pub reconnect_policy: ReconnectPolicy,
    pub health_enabled: bool,
    pub health_policy: HealthPolicy,
    pub dispatcher_capacity: usize,
    pub event_capacity: usize,
    pub busy_high_water_mark: usize,
    pub parent_span: Option<tracing::Span>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            bus: BusChoice::Session,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            mechanisms: sasl::default_mechanisms(),
            negotiate_unix_fd: false,
            auto_reconnect: true,
            reconnect_policy: ReconnectPolicy::default(),
            health_enabled: true,
            health_policy: HealthPolicy::default(),
            dispatcher_capacity: DEFAULT_QUEUE_CAPACITY,
            event_capacity: crate::event::DEFAULT_EVENT_CAPACITY,
            busy_high_water_mark: DEFAULT_BUSY_HIGH_WATER_MARK,
            parent_span: None,
        }
    }
}

/// Default cap on the number of simultaneously pending calls before
/// `Connection::call` starts rejecting new ones with `ErrorKind::Busy`
/// instead of growing the pending map unboundedly (§5).
pub const DEFAULT_BUSY_HIGH_WATER_MARK: usize = 4096;

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
}

impl ConnectionBuilder {
    /// Start from the default configuration, targeting the session bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Target the session bus (`DBUS_SESSION_BUS_ADDRESS`).
    pub fn session_bus(mut self) -> Self {
        self.config.bus = BusChoice::Session;
        self
    }

    /// Target the system bus (`DBUS_SYSTEM_BUS_ADDRESS`, falling back to
    /// the well-known socket path).
    pub fn system_bus(mut self) -> Self {
        self.config.bus = BusChoice::System;
        self
    }

    /// Target an explicit D-Bus address string.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.bus = BusChoice::Address(address.into());
        self
    }

    /// Override the default method call timeout.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Override the SASL mechanism negotiation order.
    pub fn mechanisms(mut self, mechanisms: Vec<Mechanism>) -> Self {
        self.config.mechanisms = mechanisms;
        self
    }

    /// Negotiate Unix file descriptor passing during the SASL handshake.
    pub fn negotiate_unix_fd(mut self, negotiate: bool) -> Self {
        self.config.negotiate_unix_fd = negotiate;
        self
    }

    /// Enable or disable automatic reconnection.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Override the reconnect backoff policy.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect_policy = policy;
        self
    }

    /// Enable or disable periodic `Peer.Ping` health checks.
    pub fn health_checks(mut self, enabled: bool) -> Self {
        self.config.health_enabled = enabled;
        self
    }

    /// Override the health check policy.
    pub fn health_policy(mut self, policy: HealthPolicy) -> Self {
        self.config.health_policy = policy;
        self
    }

    /// Override the inbound dispatcher queue capacity.
    pub fn dispatcher_capacity(mut self, capacity: usize) -> Self {
        self.config.dispatcher_capacity = capacity;
        self
    }

    /// Override the number of simultaneously pending calls admitted before
    /// `Connection::call` fails fast with `ErrorKind::Busy` (§5).
    pub fn busy_high_water_mark(mut self, mark: usize) -> Self {
        self.config.busy_high_water_mark = mark;
        self
    }

    /// Parent every span this connection's background tasks open (the I/O
    /// loop, health checks, reconnect attempts) under `span`, so they nest
    /// into the caller's own tracing hierarchy instead of starting bare.
    pub fn parent_span(mut self, span: tracing::Span) -> Self {
        self.config.parent_span = Some(span);
        self
    }

    /// Finish building, returning the resolved configuration.
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}
