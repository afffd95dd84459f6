//! Connection core: lifecycle, bring-up, and the steady-state I/O loop
//! (§4.8, C8).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::correlator::Correlator;
use crate::error::{Error, ErrorKind};
use crate::event::{Event, EventBus};
use crate::frame::Framer;
use crate::health::{HealthMonitor, HealthOutcome};
use crate::message::{Message, MessageKind};
use crate::peer::{self, PeerHandler};
use crate::pipeline::dispatcher::Dispatcher;
use crate::pipeline::Pipeline;
use crate::reconnect::{ReconnectDecision, ReconnectState};
use crate::sasl::{SaslClient, SaslOutcome};
use crate::serial::SerialAllocator;
use crate::transport::address;
use crate::transport::BusTransport;

use super::builder::{BusChoice, ConnectionConfig};
use super::state::ConnectionState;

struct Shared {
    config: ConnectionConfig,
    writer: AsyncMutex<Option<WriteHalf<BusTransport>>>,
    state: StdMutex<ConnectionState>,
    serials: SerialAllocator,
    correlator: Correlator,
    events: EventBus,
    dispatcher_sender: mpsc::Sender<Arc<Message>>,
    pipeline: Arc<Pipeline>,
    unique_name: OnceLock<String>,
    /// Abort handles for every background task this connection has spawned,
    /// so `close()` can tear them all down deterministically instead of
    /// relying on the transport drop to unwind them.
    tasks: StdMutex<Vec<AbortHandle>>,
    /// Set once `close()` has been called. Suppresses auto-reconnect on the
    /// disconnect that an intentional close causes.
    closing: AtomicBool,
    /// Wakes `supervise` to re-run the reconnect loop after
    /// `reset_reconnect_state()`, and to notice `closing` and exit.
    rearm: Notify,
}

/// A connection to a message bus.
///
/// Cloning shares the same underlying connection; every clone observes the
/// same state, dispatches to the same handlers, and is backed by the same
/// transport.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// The outcome of a successful bring-up: a connected transport, its SASL
/// guid, and whether Unix fd passing was agreed.
struct Handshake {
    transport: BusTransport,
    leftover: Vec<u8>,
    #[allow(dead_code)]
    guid: String,
    #[allow(dead_code)]
    unix_fd_enabled: bool,
}

impl Connection {
    /// Connect to the configured bus, completing the SASL handshake and
    /// the initial `Hello` call before returning.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, Error> {
        let mut pipeline = Pipeline::new();
        pipeline.register(PeerHandler::new());
        let pipeline = Arc::new(pipeline);

        let (reply_sender, mut reply_receiver) = mpsc::channel::<Message>(32);
        let mut dispatcher = Dispatcher::new(config.dispatcher_capacity, pipeline.clone(), reply_sender);
        let dispatcher_sender = dispatcher.sender();

        let shared = Arc::new(Shared {
            events: EventBus::new(config.event_capacity),
            writer: AsyncMutex::new(None),
            state: StdMutex::new(ConnectionState::Disconnected),
            serials: SerialAllocator::new(),
            correlator: Correlator::new(),
            dispatcher_sender,
            pipeline,
            unique_name: OnceLock::new(),
            tasks: StdMutex::new(Vec::new()),
            closing: AtomicBool::new(false),
            rearm: Notify::new(),
            config,
        });

        let reply_shared = shared.clone();
        let reply_task = tokio::spawn(
            async move {
                while let Some(reply) = reply_receiver.recv().await {
                    if let Err(error) = write_message(&reply_shared, reply).await {
                        warn!(%error, "failed to send pipeline-originated reply");
                    }
                }
            }
            .instrument(background_span(&shared)),
        );
        shared.tasks.lock().unwrap().push(reply_task.abort_handle());

        let dispatcher_task = tokio::spawn(dispatcher.run().instrument(background_span(&shared)));
        shared.tasks.lock().unwrap().push(dispatcher_task.abort_handle());

        bring_up(&shared).await?;

        let supervisor = shared.clone();
        let span = background_span(&shared);
        let supervisor_task = tokio::spawn(async move { supervise(supervisor).await }.instrument(span));
        shared.tasks.lock().unwrap().push(supervisor_task.abort_handle());

        Ok(Self { shared })
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }

    /// The unique name assigned by the bus in response to `Hello`.
    pub fn unique_name(&self) -> Option<&str> {
        self.shared.unique_name.get().map(String::as_str)
    }

    /// Subscribe to lifecycle, health, and reconnect events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// The number of method calls currently awaiting a reply.
    pub fn pending_call_count(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    /// A cloneable handle onto the inbound side of the handler pipeline, for
    /// feeding it synthetic messages (e.g. in tests or bridging code).
    pub fn dispatcher_sender(&self) -> mpsc::Sender<Arc<Message>> {
        self.shared.dispatcher_sender.clone()
    }

    /// Issue a method call and wait for its reply.
    #[instrument(skip(self, message), fields(serial))]
    pub async fn call(&self, mut message: Message) -> Result<Message, Error> {
        if !self.state().admits_calls() {
            return Err(ErrorKind::NotConnected(self.state()).into());
        }

        let no_reply = message.no_reply_expected();
        if !no_reply && self.shared.correlator.pending_count() >= self.shared.config.busy_high_water_mark {
            return Err(ErrorKind::Busy.into());
        }

        let serial = self.shared.serials.next();
        message.serial = serial;
        tracing::Span::current().record("serial", &serial);

        let Some(message) = self.shared.pipeline.dispatch_outbound(message).await else {
            return Err(ErrorKind::Cancelled.into());
        };

        write_message(&self.shared, message).await?;

        if no_reply {
            return Ok(Message::method_return(serial));
        }

        self.shared.correlator.wait_for_reply(serial, self.shared.config.call_timeout).await
    }

    /// Emit a signal. Fire-and-forget: no reply is expected.
    pub async fn emit_signal(&self, mut message: Message) -> Result<(), Error> {
        if !matches!(message.kind, MessageKind::Signal { .. }) {
            return Err(ErrorKind::InvalidData("emit_signal requires a Signal message".into()).into());
        }
        message.serial = self.shared.serials.next();

        let Some(message) = self.shared.pipeline.dispatch_outbound(message).await else {
            return Ok(());
        };

        write_message(&self.shared, message).await
    }

    /// Gracefully shut down the transport (§4.8, §5).
    ///
    /// Every background task this connection owns is stopped, pending calls
    /// fail with `Disconnected`, and subsequent calls to `call()` /
    /// `emit_signal()` fail with `NotConnected`. Closing an already-closed
    /// connection is a no-op.
    pub async fn close(&self) -> Result<(), Error> {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.rearm.notify_one();

        for task in self.shared.tasks.lock().unwrap().drain(..) {
            task.abort();
        }

        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        self.shared.correlator.cancel_all(|| ErrorKind::Disconnected.into());
        set_state(&self.shared, ConnectionState::Disconnected);

        Ok(())
    }

    /// Clear reconnect attempt counters and re-arm auto-reconnect after it
    /// reached `FAILED` (§4.7). Wakes the supervisory task, which starts a
    /// fresh reconnect attempt sequence from attempt zero.
    pub fn reset_reconnect_state(&self) {
        let is_failed = *self.shared.state.lock().unwrap() == ConnectionState::Failed;
        if is_failed {
            set_state(&self.shared, ConnectionState::Disconnected);
            self.shared.rearm.notify_one();
        }
    }
}

/// The span background tasks (I/O loop, health checks, reconnect) nest
/// under, so a caller that configured `parent_span` sees them as part of
/// its own tracing hierarchy rather than as bare, parentless spans.
fn background_span(shared: &Arc<Shared>) -> tracing::Span {
    shared.config.parent_span.clone().unwrap_or_else(tracing::Span::none)
}

fn set_state(shared: &Arc<Shared>, new: ConnectionState) {
    let old = {
        let mut state = shared.state.lock().unwrap();
        let old = *state;
        *state = new;
        old
    };
    if old != new {
        shared.events.publish(Event::StateChanged { from: old, to: new });
    }
}

async fn write_message(shared: &Arc<Shared>, message: Message) -> Result<(), Error> {
    let bytes = message.encode()?;
    let mut guard = shared.writer.lock().await;
    let Some(writer) = guard.as_mut() else {
        return Err(ErrorKind::NotConnected(*shared.state.lock().unwrap()).into());
    };
    if let Err(error) = writer.write_all(&bytes).await {
        return Err(Error::from(error));
    }
    Ok(())
}

/// Resolve the configured bus choice to an address string.
fn resolve_address(bus: &BusChoice) -> Result<String, Error> {
    match bus {
        BusChoice::Session => address::session_bus_address(),
        BusChoice::System => Ok(address::system_bus_address()),
        BusChoice::Address(address) => Ok(address.clone()),
    }
}

/// Connect the transport and drive it through the SASL handshake.
async fn handshake(shared: &Arc<Shared>) -> Result<Handshake, Error> {
    let address = resolve_address(&shared.config.bus)?;
    let mut transport = BusTransport::connect(&address).await?;

    transport.write_all(&[SaslClient::initial_byte()]).await?;

    let mut client = SaslClient::new(shared.config.mechanisms.clone(), shared.config.negotiate_unix_fd);
    let first = client.start();
    transport.write_all(&first).await?;

    let mut buffer = Vec::new();
    loop {
        if let Some(newline) = buffer.iter().position(|&byte| byte == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line).into_owned();

            match client.feed_line(&line) {
                SaslOutcome::Send(bytes) => {
                    transport.write_all(&bytes).await?;
                }
                SaslOutcome::Authenticated { guid, unix_fd_enabled, begin } => {
                    transport.write_all(&begin).await?;
                    return Ok(Handshake { transport, leftover: buffer, guid, unix_fd_enabled });
                }
                SaslOutcome::Failed(error) => return Err(error),
            }
            continue;
        }

        let mut chunk = [0u8; 512];
        let n = transport.read(&mut chunk).await?;
        if n == 0 {
            return Err(ErrorKind::TransportFailure("connection closed during SASL handshake".into()).into());
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// Run the full bring-up sequence: connect, authenticate, split the
/// transport, send `Hello`, and start the steady-state I/O loop.
async fn bring_up(shared: &Arc<Shared>) -> Result<(), Error> {
    set_state(shared, ConnectionState::Connecting);
    set_state(shared, ConnectionState::Authenticating);

    let Handshake { mut transport, leftover, .. } = handshake(shared).await?;

    let hello_serial = shared.serials.next();
    let mut hello = peer::hello_call();
    hello.serial = hello_serial;
    transport.write_all(&hello.encode()?).await?;

    let mut framer = Framer::new();
    framer.feed(&leftover);

    let unique_name = loop {
        match framer.next_frame()? {
            Some(frame) => {
                let message = Message::decode(&frame)?;
                if message.reply_serial() == Some(hello_serial) {
                    match message.kind {
                        MessageKind::Error { error_name, .. } => {
                            return Err(ErrorKind::AuthenticationFailed(format!(
                                "Hello call failed: {error_name}"
                            ))
                            .into());
                        }
                        _ => {
                            let name = message
                                .body
                                .first()
                                .and_then(crate::value::Value::as_str)
                                .map(str::to_owned)
                                .ok_or_else(|| {
                                    ErrorKind::MalformedMessage("Hello reply missing unique name".into())
                                })?;
                            break name;
                        }
                    }
                } else {
                    deliver(shared, message).await;
                }
            }
            None => {
                let mut chunk = [0u8; 4096];
                let n = transport.read(&mut chunk).await?;
                if n == 0 {
                    return Err(ErrorKind::TransportFailure("connection closed before Hello reply".into()).into());
                }
                framer.feed(&chunk[..n]);
            }
        }
    };

    let _ = shared.unique_name.set(unique_name.clone());

    let (read_half, write_half) = tokio::io::split(transport);
    *shared.writer.lock().await = Some(write_half);

    set_state(shared, ConnectionState::Connected);
    shared.events.publish(Event::Connected { unique_name });

    let io_task = tokio::spawn(io_read_loop(shared.clone(), read_half, framer).instrument(background_span(shared)));
    shared.tasks.lock().unwrap().push(io_task.abort_handle());

    if shared.config.health_enabled {
        let health_task = tokio::spawn(health_loop(shared.clone()).instrument(background_span(shared)));
        shared.tasks.lock().unwrap().push(health_task.abort_handle());
    }

    Ok(())
}

async fn deliver(shared: &Arc<Shared>, message: Message) {
    let message = match shared.correlator.resolve(message) {
        Ok(()) => return,
        Err(message) => message,
    };

    let message = Arc::new(message);
    if shared.dispatcher_sender.send(message).await.is_err() {
        debug!("dispatcher channel closed; dropping inbound message");
    }
}

async fn io_read_loop(shared: Arc<Shared>, mut read_half: ReadHalf<BusTransport>, mut framer: Framer) {
    let mut chunk = [0u8; 4096];

    loop {
        match framer.next_frame() {
            Ok(Some(frame)) => match Message::decode(&frame) {
                Ok(message) => deliver(&shared, message).await,
                Err(error) => {
                    warn!(%error, "dropping malformed inbound frame");
                }
            },
            Ok(None) => match read_half.read(&mut chunk).await {
                Ok(0) => {
                    info!("transport closed");
                    break;
                }
                Ok(n) => framer.feed(&chunk[..n]),
                Err(error) => {
                    warn!(%error, "transport read error");
                    break;
                }
            },
            Err(error) => {
                error!(%error, "framing error, disconnecting");
                break;
            }
        }
    }

    on_disconnect(shared).await;
}

async fn on_disconnect(shared: Arc<Shared>) {
    *shared.writer.lock().await = None;
    shared.correlator.cancel_all(|| ErrorKind::Disconnected.into());

    if shared.closing.load(Ordering::SeqCst) {
        set_state(&shared, ConnectionState::Disconnected);
        return;
    }

    if shared.config.auto_reconnect {
        set_state(&shared, ConnectionState::Reconnecting);
        reconnect_loop(shared).await;
    } else {
        set_state(&shared, ConnectionState::Failed);
    }
}

async fn reconnect_loop(shared: Arc<Shared>) {
    let mut state = ReconnectState::new(shared.config.reconnect_policy);

    loop {
        if shared.closing.load(Ordering::SeqCst) {
            return;
        }

        match state.on_failure() {
            ReconnectDecision::RetryAfter { attempt, delay } => {
                shared.events.publish(Event::Reconnecting { attempt, delay });
                tokio::time::sleep(delay).await;

                if shared.closing.load(Ordering::SeqCst) {
                    return;
                }

                match bring_up(&shared).await {
                    Ok(()) => {
                        state.reset();
                        shared.events.publish(Event::Connected {
                            unique_name: shared.unique_name.get().cloned().unwrap_or_default(),
                        });
                        return;
                    }
                    Err(error) => {
                        warn!(%error, attempt, "reconnect attempt failed");
                        continue;
                    }
                }
            }
            ReconnectDecision::Exhausted { attempts } => {
                shared.events.publish(Event::ReconnectFailed { attempts });
                set_state(&shared, ConnectionState::Failed);
                return;
            }
        }
    }
}

async fn health_loop(shared: Arc<Shared>) {
    let mut monitor = HealthMonitor::new();
    let policy = shared.config.health_policy;

    loop {
        tokio::time::sleep(policy.interval).await;

        if shared.closing.load(Ordering::SeqCst) || *shared.state.lock().unwrap() == ConnectionState::Failed {
            return;
        }
        if shared.writer.lock().await.is_none() {
            // A reconnect is in flight; let it finish before probing again.
            continue;
        }

        let ping = peer_ping_call();
        let outcome = send_ping(&shared, ping, policy.check_timeout).await;

        let health_outcome = match outcome {
            Ok(()) => monitor.record_success(),
            Err(error) => {
                debug!(%error, "health check failed");
                monitor.record_failure(&policy)
            }
        };

        match health_outcome {
            HealthOutcome::Recovered => {
                set_state(&shared, ConnectionState::Connected);
                shared.events.publish(Event::HealthCheck { healthy: true, consecutive_failures: 0 });
            }
            HealthOutcome::StillHealthy => {}
            HealthOutcome::Degraded { consecutive_failures } => {
                set_state(&shared, ConnectionState::Unhealthy);
                shared.events.publish(Event::HealthCheck { healthy: false, consecutive_failures });
            }
            HealthOutcome::Escalate { consecutive_failures } => {
                shared.events.publish(Event::HealthCheck { healthy: false, consecutive_failures });
                warn!(consecutive_failures, "health check escalation, forcing disconnect");
                *shared.writer.lock().await = None;
                shared.correlator.cancel_all(|| ErrorKind::Disconnected.into());

                if shared.closing.load(Ordering::SeqCst) {
                    set_state(&shared, ConnectionState::Disconnected);
                    return;
                }

                if shared.config.auto_reconnect {
                    set_state(&shared, ConnectionState::Reconnecting);
                    reconnect_loop(shared.clone()).await;
                } else {
                    set_state(&shared, ConnectionState::Failed);
                }
                return;
            }
        }
    }
}

fn peer_ping_call() -> Message {
    Message::method_call(
        crate::object_path::ObjectPathBuf::new("/org/freedesktop/DBus".to_owned()).expect("valid"),
        "Ping",
    )
    .with_interface("org.freedesktop.DBus.Peer")
}

async fn send_ping(shared: &Arc<Shared>, mut ping: Message, timeout: Duration) -> Result<(), Error> {
    let serial = shared.serials.next();
    ping.serial = serial;
    write_message(shared, ping).await?;
    let reply = shared.correlator.wait_for_reply(serial, timeout).await?;
    match reply.kind {
        MessageKind::Error { error_name, .. } => {
            Err(ErrorKind::RemoteError { name: error_name, message: None }.into())
        }
        _ => Ok(()),
    }
}

/// Watches for a `reset_reconnect_state()` re-arm request after `FAILED`
/// and restarts the reconnect loop with a fresh attempt counter (§4.7).
/// Exits once `close()` has been called.
async fn supervise(shared: Arc<Shared>) {
    loop {
        shared.rearm.notified().await;

        if shared.closing.load(Ordering::SeqCst) {
            return;
        }

        if *shared.state.lock().unwrap() != ConnectionState::Disconnected {
            continue;
        }

        set_state(&shared, ConnectionState::Reconnecting);
        reconnect_loop(shared.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_explicit_address() {
        let address = resolve_address(&BusChoice::Address("unix:path=/tmp/x".into())).unwrap();
        assert_eq!(address, "unix:path=/tmp/x");
    }

    #[test]
    fn system_bus_falls_back_to_well_known_path() {
        std::env::remove_var("DBUS_SYSTEM_BUS_ADDRESS");
        let address = resolve_address(&BusChoice::System).unwrap();
        assert_eq!(address, crate::transport::address::DEFAULT_SYSTEM_BUS_ADDRESS);
    }
}
