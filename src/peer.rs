//! `org.freedesktop.DBus.Peer` (answered inbound) and `Hello` (issued
//! outbound) (§4.12, C12).

use std::fs;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use tracing::{trace, warn};

use crate::message::{Message, MessageKind};
use crate::object_path::ObjectPathBuf;
use crate::pipeline::{Handler, Outcome};
use crate::value::Value;

const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";

/// The path taken by `/etc/machine-id`, with the historical dbus fallback.
fn read_machine_id() -> String {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(contents) = fs::read_to_string(path) {
            let id = contents.trim();
            if !id.is_empty() {
                return id.to_owned();
            }
        }
    }
    warn!("no machine-id file found; reporting an all-zero id");
    "0".repeat(32)
}

/// A handler that answers `org.freedesktop.DBus.Peer.Ping` and
/// `org.freedesktop.DBus.Peer.GetMachineId` on behalf of this process.
///
/// Registered at the head of every connection's pipeline so user handlers
/// never see these calls. Replies are emitted via `Outcome::Reply`, which
/// the dispatcher routes back out through the transport; the handler itself
/// holds no reference to it.
#[derive(Default)]
pub struct PeerHandler {
    machine_id: OnceLock<String>,
}

impl PeerHandler {
    /// Construct a peer handler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn machine_id(&self) -> &str {
        self.machine_id.get_or_init(read_machine_id)
    }
}

impl Handler for PeerHandler {
    fn handle_inbound(
        &self,
        message: Arc<Message>,
    ) -> Pin<Box<dyn Future<Output = Outcome<Arc<Message>>> + Send>> {
        let MessageKind::MethodCall { interface, member, .. } = &message.kind else {
            return Box::pin(async move { Outcome::Forward(message) });
        };

        if interface.as_deref() != Some(PEER_INTERFACE) {
            return Box::pin(async move { Outcome::Forward(message) });
        }

        let reply = match member.as_str() {
            "Ping" => Some(Message::method_return(message.serial)),
            "GetMachineId" => Some(
                Message::method_return(message.serial)
                    .with_body(vec![Value::string(self.machine_id().to_owned()).expect("validated")]),
            ),
            other => {
                trace!(member = other, "unhandled org.freedesktop.DBus.Peer method");
                None
            }
        };

        match reply {
            Some(reply) => {
                let reply = reply.with_destination_opt(message.sender.clone());
                Box::pin(async move { Outcome::Reply(reply) })
            }
            None => Box::pin(async move { Outcome::Forward(message) }),
        }
    }
}

/// Build the outbound `Hello` call sent once at the end of `connect()`.
pub fn hello_call() -> Message {
    Message::method_call(ObjectPathBuf::new("/org/freedesktop/DBus".to_owned()).expect("valid"), "Hello")
        .with_interface("org.freedesktop.DBus")
        .with_destination("org.freedesktop.DBus")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_ping_with_empty_return() {
        let handler = PeerHandler::new();

        let mut call = Message::method_call(
            ObjectPathBuf::new("/org/freedesktop/DBus/Peer".into()).unwrap(),
            "Ping",
        )
        .with_interface(PEER_INTERFACE);
        call.serial = 9;

        match handler.handle_inbound(Arc::new(call)).await {
            Outcome::Reply(reply) => {
                assert_eq!(reply.reply_serial(), Some(9));
                assert!(reply.body.is_empty());
            }
            _ => panic!("expected Ping to be answered with a reply"),
        }
    }

    #[tokio::test]
    async fn answers_get_machine_id() {
        let handler = PeerHandler::new();

        let mut call = Message::method_call(
            ObjectPathBuf::new("/org/freedesktop/DBus/Peer".into()).unwrap(),
            "GetMachineId",
        )
        .with_interface(PEER_INTERFACE);
        call.serial = 11;

        match handler.handle_inbound(Arc::new(call)).await {
            Outcome::Reply(reply) => {
                assert_eq!(reply.reply_serial(), Some(11));
                assert_eq!(reply.body.len(), 1);
            }
            _ => panic!("expected GetMachineId to be answered with a reply"),
        }
    }

    #[tokio::test]
    async fn ignores_calls_to_other_interfaces() {
        let handler = PeerHandler::new();

        let mut call = Message::method_call(
            ObjectPathBuf::new("/org/freedesktop/DBus".into()).unwrap(),
            "Hello",
        )
        .with_interface("org.freedesktop.DBus");
        call.serial = 1;

        match handler.handle_inbound(Arc::new(call)).await {
            Outcome::Forward(_) => {}
            _ => panic!("expected the call to be forwarded, not consumed"),
        }
    }
}
