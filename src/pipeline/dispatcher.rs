//! Bounded-channel bridge between the I/O task and the handler pipeline (§5).

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::Message;

use super::{InboundResult, Pipeline};

/// Default bound on the inbound handler queue. Chosen to absorb a burst of
/// signals without unbounded growth; once full the I/O task's `send`
/// blocks, propagating backpressure to the socket read loop.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Bridges the I/O task (owns the socket) to the handler pipeline, which
/// runs on the ambient Tokio worker pool instead.
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    reply_sender: mpsc::Sender<Message>,
    sender: mpsc::Sender<Arc<Message>>,
    receiver: Option<mpsc::Receiver<Arc<Message>>>,
}

impl Dispatcher {
    /// Construct a dispatcher that walks `pipeline` for every inbound
    /// message, routing any handler-emitted reply through `reply_sender`.
    pub fn new(capacity: usize, pipeline: Arc<Pipeline>, reply_sender: mpsc::Sender<Message>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self { pipeline, reply_sender, sender, receiver: Some(receiver) }
    }

    /// A cloneable handle the I/O task uses to push inbound messages in.
    pub fn sender(&self) -> mpsc::Sender<Arc<Message>> {
        self.sender.clone()
    }

    /// Consume the dispatcher and run its drain loop until the sender side
    /// is dropped (i.e. the connection is tearing down).
    ///
    /// Each message walks the pipeline on its own spawned task, so one slow
    /// handler does not stall delivery of the next message; overall inbound
    /// throughput is still bounded by the channel capacity upstream.
    pub async fn run(mut self) {
        let mut receiver = self.receiver.take().expect("dispatcher run() called more than once");

        while let Some(message) = receiver.recv().await {
            let pipeline = self.pipeline.clone();
            let reply_sender = self.reply_sender.clone();

            tokio::spawn(async move {
                match pipeline.dispatch_inbound(message).await {
                    InboundResult::Consumed => {}
                    InboundResult::Reply(reply) => {
                        if reply_sender.send(reply).await.is_err() {
                            warn!("reply channel closed; dropping pipeline-originated reply");
                        }
                    }
                    InboundResult::Tail(message) => {
                        debug!(serial = message.serial, "message reached pipeline tail unconsumed; dropping");
                    }
                }
            });
        }

        warn!("dispatcher channel closed, exiting drain loop");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_path::ObjectPathBuf;
    use crate::pipeline::{Handler, Outcome};
    use std::future::Future;
    use std::pin::Pin;

    struct Echo;
    impl Handler for Echo {
        fn handle_inbound(
            &self,
            message: Arc<Message>,
        ) -> Pin<Box<dyn Future<Output = Outcome<Arc<Message>>> + Send>> {
            Box::pin(async move { Outcome::Reply(Message::method_return(message.serial)) })
        }
    }

    #[tokio::test]
    async fn a_handler_emitted_reply_is_routed_to_the_reply_sender() {
        let mut pipeline = Pipeline::new();
        pipeline.register(Arc::new(Echo));

        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        let dispatcher = Dispatcher::new(4, Arc::new(pipeline), reply_tx);
        let sender = dispatcher.sender();

        tokio::spawn(dispatcher.run());

        let mut call =
            Message::method_call(ObjectPathBuf::new("/org/example/Object".into()).unwrap(), "Ping");
        call.serial = 77;
        sender.send(Arc::new(call)).await.unwrap();

        let reply = reply_rx.recv().await.unwrap();
        assert_eq!(reply.reply_serial(), Some(77));
    }

    #[tokio::test]
    async fn an_unconsumed_message_is_dropped_without_a_reply() {
        let pipeline = Pipeline::new();

        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        let dispatcher = Dispatcher::new(4, Arc::new(pipeline), reply_tx);
        let sender = dispatcher.sender();

        tokio::spawn(dispatcher.run());

        let mut signal = Message::signal(
            ObjectPathBuf::new("/org/example/Object".into()).unwrap(),
            "org.example.Iface",
            "Changed",
        );
        signal.serial = 1;
        sender.send(Arc::new(signal)).await.unwrap();

        // give the spawned pipeline task a chance to run; no reply should
        // ever arrive since nothing in an empty pipeline produces one.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(reply_rx.try_recv().is_err());
    }
}
