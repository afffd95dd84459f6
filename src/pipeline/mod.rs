//! Handler pipeline: the boundary between the I/O domain and application
//! code (§4.5, §5, C5).
//!
//! Handlers form an ordered chain, walked in one direction for inbound
//! messages (transport → user, head to tail) and the reverse direction for
//! outbound ones (user → transport, tail to head) — the same registration
//! order, just traversed backwards. A handler may forward a message
//! (optionally transformed), consume it outright, or, inbound only, consume
//! it and emit a reply that re-enters the chain from the tail, outbound.
//! A message that reaches the far end without being consumed is logged and
//! dropped.

pub mod dispatcher;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::message::Message;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// What a handler decided to do with the message it was given.
pub enum Outcome<T> {
    /// Pass the (possibly transformed) message on to the next handler.
    Forward(T),
    /// The message was fully handled; stop propagating it further.
    Consumed,
    /// The message was fully handled, and `reply` should be emitted in the
    /// opposite direction (inbound handlers only — e.g. answering a `Ping`
    /// with an outbound `MethodReturn`).
    Reply(Message),
}

/// A single link in the pipeline. Default methods forward unchanged, so a
/// handler only needs to implement the direction(s) it cares about.
pub trait Handler: Send + Sync {
    /// React to a message travelling from the transport toward the user.
    fn handle_inbound(&self, message: Arc<Message>) -> BoxFuture<Outcome<Arc<Message>>> {
        Box::pin(async move { Outcome::Forward(message) })
    }

    /// React to a message travelling from the user toward the transport.
    fn handle_outbound(&self, message: Message) -> BoxFuture<Outcome<Message>> {
        Box::pin(async move { Outcome::Forward(message) })
    }
}

/// The outcome of walking a full inbound chain.
pub enum InboundResult {
    /// Every handler forwarded; here is what reached the tail unconsumed.
    Tail(Arc<Message>),
    /// Some handler consumed the message outright.
    Consumed,
    /// Some handler consumed the message and asked for this reply to be
    /// emitted outbound.
    Reply(Message),
}

/// The ordered handler chain itself (§4.5).
#[derive(Default)]
pub struct Pipeline {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Pipeline {
    /// An empty pipeline.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Append a handler at the tail of the inbound chain (equivalently, the
    /// head of the outbound chain).
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.push(handler);
    }

    /// Walk `message` head → tail.
    pub async fn dispatch_inbound(&self, message: Arc<Message>) -> InboundResult {
        let mut current = message;
        for handler in &self.handlers {
            match handler.handle_inbound(current).await {
                Outcome::Forward(next) => current = next,
                Outcome::Consumed => return InboundResult::Consumed,
                Outcome::Reply(reply) => return InboundResult::Reply(reply),
            }
        }
        InboundResult::Tail(current)
    }

    /// Walk `message` tail → head (the reverse of registration order).
    /// Returns `None` if some handler consumed it before it reached the
    /// head; the caller should not write a consumed message to the
    /// transport.
    pub async fn dispatch_outbound(&self, message: Message) -> Option<Message> {
        let mut current = message;
        for handler in self.handlers.iter().rev() {
            match handler.handle_outbound(current).await {
                Outcome::Forward(next) => current = next,
                Outcome::Consumed | Outcome::Reply(_) => {
                    debug!("outbound message consumed before reaching the transport");
                    return None;
                }
            }
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_path::ObjectPathBuf;

    struct Swallow;
    impl Handler for Swallow {
        fn handle_inbound(&self, _message: Arc<Message>) -> BoxFuture<Outcome<Arc<Message>>> {
            Box::pin(async { Outcome::Consumed })
        }
    }

    struct Rename(&'static str);
    impl Handler for Rename {
        fn handle_inbound(&self, message: Arc<Message>) -> BoxFuture<Outcome<Arc<Message>>> {
            let mut next = (*message).clone();
            next.sender = Some(self.0.to_owned());
            Box::pin(async move { Outcome::Forward(Arc::new(next)) })
        }
    }

    fn sample_signal() -> Arc<Message> {
        Arc::new(Message::signal(
            ObjectPathBuf::new("/org/example/Object".into()).unwrap(),
            "org.example.Iface",
            "Changed",
        ))
    }

    #[tokio::test]
    async fn unconsumed_message_reaches_the_tail() {
        let pipeline = Pipeline::new();
        match pipeline.dispatch_inbound(sample_signal()).await {
            InboundResult::Tail(_) => {}
            _ => panic!("expected the message to reach the tail"),
        }
    }

    #[tokio::test]
    async fn a_handler_can_consume_and_stop_propagation() {
        let mut pipeline = Pipeline::new();
        pipeline.register(Arc::new(Swallow));
        pipeline.register(Arc::new(Rename("should-not-run")));

        match pipeline.dispatch_inbound(sample_signal()).await {
            InboundResult::Consumed => {}
            _ => panic!("expected the first handler to consume the message"),
        }
    }

    #[tokio::test]
    async fn earlier_handlers_can_transform_before_later_ones_see_it() {
        let mut pipeline = Pipeline::new();
        pipeline.register(Arc::new(Rename("rewritten")));

        match pipeline.dispatch_inbound(sample_signal()).await {
            InboundResult::Tail(message) => assert_eq!(message.sender.as_deref(), Some("rewritten")),
            _ => panic!("expected the transformed message at the tail"),
        }
    }
}
