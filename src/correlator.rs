//! Matches outbound method calls to their replies by serial, with timeout
//! and cancellation (§5, C6).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::trace;

use crate::error::{Error, ErrorKind};
use crate::message::Message;

/// The default time a pending call waits for a reply before failing with
/// [`ErrorKind::CallTimeout`].
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A reply to a pending call: either a `METHOD_RETURN` or an `ERROR`.
pub type Reply = Result<Message, Error>;

/// Tracks in-flight method calls keyed by the serial they were sent with.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<u32, oneshot::Sender<Reply>>>,
}

impl Correlator {
    /// Construct an empty correlator.
    pub fn new() -> Self {
        Self { pending: Mutex::new(HashMap::new()) }
    }

    /// Register a serial as awaiting a reply, returning the receiving half
    /// of the channel the eventual reply will arrive on.
    fn register(&self, serial: u32) -> oneshot::Receiver<Reply> {
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().unwrap().insert(serial, sender);
        receiver
    }

    /// Wait for the reply to `serial`, up to `call_timeout`.
    ///
    /// On timeout the pending entry is removed so a late reply is simply
    /// dropped rather than delivered to a caller who has moved on. The same
    /// cleanup happens if this future itself is dropped before resolving
    /// (the caller cancelled the call): the guard below removes the pending
    /// entry unconditionally, whichever way the `await` ends.
    pub async fn wait_for_reply(&self, serial: u32, call_timeout: Duration) -> Reply {
        let receiver = self.register(serial);
        let _guard = PendingGuard { correlator: self, serial };

        match timeout(call_timeout, receiver).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ErrorKind::Disconnected.into()),
            Err(_) => Err(ErrorKind::CallTimeout.into()),
        }
    }

    /// Deliver an inbound `METHOD_RETURN` or `ERROR` to whoever is waiting
    /// on its `REPLY_SERIAL`, if anyone still is.
    ///
    /// Returns `Ok(())` if the message was claimed by a pending call;
    /// `Err(message)` hands the message back so it can instead go to the
    /// handler pipeline (this can legitimately happen after a timeout
    /// already resolved the waiter).
    pub fn resolve(&self, message: Message) -> Result<(), Message> {
        let Some(reply_serial) = message.reply_serial() else {
            return Err(message);
        };

        let sender = self.pending.lock().unwrap().remove(&reply_serial);
        let Some(sender) = sender else {
            trace!(reply_serial, "no pending call for reply serial");
            return Err(message);
        };

        let reply = match &message.kind {
            crate::message::MessageKind::Error { error_name, .. } => {
                let text = message
                    .body
                    .first()
                    .and_then(|value| value.as_str())
                    .map(str::to_owned);
                Err(ErrorKind::RemoteError { name: error_name.clone(), message: text }.into())
            }
            _ => Ok(message),
        };

        // The receiver may already be gone (caller dropped the future); that
        // is not this correlator's problem to report.
        let _ = sender.send(reply);
        Ok(())
    }

    /// Cancel every pending call, e.g. because the connection dropped.
    pub fn cancel_all(&self, error: impl Fn() -> Error) {
        let mut pending = self.pending.lock().unwrap();
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(error()));
        }
    }

    /// Cancel a single pending call by serial, e.g. in response to an
    /// explicit cancellation request from the caller.
    pub fn cancel(&self, serial: u32) {
        if let Some(sender) = self.pending.lock().unwrap().remove(&serial) {
            let _ = sender.send(Err(ErrorKind::Cancelled.into()));
        }
    }

    /// The number of calls currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Removes its serial's pending entry on drop, whether that happens because
/// `wait_for_reply` returned normally or because the calling future was
/// dropped (cancellation) before a reply or timeout resolved it.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    serial: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.pending.lock().unwrap().remove(&self.serial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_path::ObjectPathBuf;

    #[tokio::test]
    async fn resolves_a_matching_method_return() {
        let correlator = std::sync::Arc::new(Correlator::new());
        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.wait_for_reply(42, Duration::from_secs(1)).await })
        };

        tokio::task::yield_now().await;
        let mut reply = Message::method_return(42);
        reply.serial = 100;
        assert!(correlator.resolve(reply.clone()).is_ok());

        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap(), reply);
    }

    #[tokio::test]
    async fn reply_errors_surface_as_remote_error() {
        let correlator = std::sync::Arc::new(Correlator::new());
        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.wait_for_reply(7, Duration::from_secs(1)).await })
        };

        tokio::task::yield_now().await;
        let mut error_message = Message::error("org.freedesktop.DBus.Error.Failed", 7)
            .with_body(vec![crate::value::Value::string("nope").unwrap()]);
        error_message.serial = 200;
        assert!(correlator.resolve(error_message).is_ok());

        let result = waiter.await.unwrap();
        let error = result.unwrap_err();
        let (name, message) = error.remote_error().unwrap();
        assert_eq!(name, "org.freedesktop.DBus.Error.Failed");
        assert_eq!(message, Some("nope"));
    }

    #[tokio::test]
    async fn times_out_when_no_reply_arrives() {
        let correlator = Correlator::new();
        let result = correlator.wait_for_reply(1, Duration::from_millis(20)).await;
        assert!(result.unwrap_err().is_timeout());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn dropping_the_call_future_removes_the_pending_entry() {
        let correlator = std::sync::Arc::new(Correlator::new());
        let task = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.wait_for_reply(5, Duration::from_secs(30)).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(correlator.pending_count(), 1);

        // Abort the task mid-await, as dropping a `Connection::call` future
        // would: the pending entry must not outlive the cancelled caller.
        task.abort();
        let _ = task.await;

        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn unrelated_message_is_not_resolved() {
        let correlator = Correlator::new();
        let mut signal = Message::signal(
            ObjectPathBuf::new("/org/freedesktop/DBus".into()).unwrap(),
            "org.freedesktop.DBus",
            "NameOwnerChanged",
        );
        signal.serial = 3;
        assert!(correlator.resolve(signal).is_err());
    }
}
