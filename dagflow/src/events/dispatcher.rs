//! Ordered, failure-isolated delivery of events to a handler.

use super::{PipelineEvent, PipelineEventHandler};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Delivers events to a handler from a dedicated background task.
///
/// Events are delivered in send order. A slow handler never blocks the
/// sender; a failing or panicking handler is logged and skipped.
#[derive(Debug)]
pub struct EventDispatcher {
    tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Starts a dispatcher for `handler`, or a no-op dispatcher if `None`.
    ///
    /// Must be called from within a tokio runtime when a handler is given.
    #[must_use]
    pub fn spawn(handler: Option<Arc<dyn PipelineEventHandler>>) -> Self {
        let Some(handler) = handler else {
            return Self {
                tx: None,
                worker: None,
            };
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<PipelineEvent>();
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(handler.as_ref(), &event).await;
            }
        });

        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Queues an event. Never blocks.
    pub fn send(&self, event: PipelineEvent) {
        send_to(self.tx.as_ref(), event);
    }

    /// Returns a handle that queues events from other tasks.
    ///
    /// The handle does not keep the queue open: once [`finish`](Self::finish)
    /// is called, events sent through it are dropped.
    #[must_use]
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.as_ref().map(mpsc::UnboundedSender::downgrade),
        }
    }

    /// Closes the queue and waits up to `grace` for queued events to be
    /// delivered. Undelivered events are left to the detached worker.
    pub async fn finish(mut self, grace: Duration) {
        drop(self.tx.take());
        let Some(worker) = self.worker.take() else {
            return;
        };

        if tokio::time::timeout(grace, worker).await.is_err() {
            warn!(
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "Event handler did not drain in time; detaching"
            );
        }
    }
}

/// Cloneable handle onto an [`EventDispatcher`]'s queue.
///
/// Events sent through any handle share the dispatcher's single ordered
/// queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<mpsc::WeakUnboundedSender<PipelineEvent>>,
}

impl EventSender {
    /// Queues an event. Never blocks.
    pub fn send(&self, event: PipelineEvent) {
        let tx = self.tx.as_ref().and_then(mpsc::WeakUnboundedSender::upgrade);
        send_to(tx.as_ref(), event);
    }
}

fn send_to(tx: Option<&mpsc::UnboundedSender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = tx {
        if tx.send(event).is_err() {
            debug!("Event dispatcher already stopped; dropping event");
        }
    }
}

async fn deliver(handler: &dyn PipelineEventHandler, event: &PipelineEvent) {
    match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(
                event_type = event.event_type(),
                error = %e,
                "Event handler failed"
            );
        }
        Err(_) => {
            warn!(event_type = event.event_type(), "Event handler panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventHandler;
    use async_trait::async_trait;

    fn started(node: &str) -> PipelineEvent {
        PipelineEvent::NodeStarted {
            node_id: node.to_string(),
            pipeline: "p".to_string(),
        }
    }

    struct Flaky {
        seen: CollectingEventHandler,
    }

    #[async_trait]
    impl PipelineEventHandler for Flaky {
        async fn handle(&self, event: &PipelineEvent) -> anyhow::Result<()> {
            match event.node_id() {
                Some("boom") => anyhow::bail!("handler exploded"),
                Some("panic") => panic!("handler panicked"),
                _ => self.seen.handle(event).await,
            }
        }
    }

    #[tokio::test]
    async fn test_dispatcher_preserves_order() {
        let handler = Arc::new(CollectingEventHandler::new());
        let dispatcher = EventDispatcher::spawn(Some(handler.clone()));

        for node in ["a", "b", "c"] {
            dispatcher.send(started(node));
        }
        dispatcher.finish(Duration::from_secs(1)).await;

        assert_eq!(handler.node_ids("node.started"), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_dispatcher_isolates_handler_failures() {
        let handler = Arc::new(Flaky {
            seen: CollectingEventHandler::new(),
        });
        let dispatcher = EventDispatcher::spawn(Some(handler.clone()));

        dispatcher.send(started("a"));
        dispatcher.send(started("boom"));
        dispatcher.send(started("panic"));
        dispatcher.send(started("b"));
        dispatcher.finish(Duration::from_secs(1)).await;

        assert_eq!(handler.seen.node_ids("node.started"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_sender_shares_queue_and_does_not_outlive_finish() {
        let handler = Arc::new(CollectingEventHandler::new());
        let dispatcher = EventDispatcher::spawn(Some(handler.clone()));
        let sender = dispatcher.sender();

        dispatcher.send(started("a"));
        sender.send(started("b"));
        dispatcher.send(started("c"));

        let start = std::time::Instant::now();
        dispatcher.finish(Duration::from_secs(5)).await;
        assert!(start.elapsed() < Duration::from_secs(1));

        sender.send(started("late"));
        assert_eq!(handler.node_ids("node.started"), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_dispatcher_without_handler() {
        let dispatcher = EventDispatcher::spawn(None);
        dispatcher.send(started("a"));
        dispatcher.finish(Duration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn test_finish_detaches_slow_handler() {
        struct Slow;

        #[async_trait]
        impl PipelineEventHandler for Slow {
            async fn handle(&self, _event: &PipelineEvent) -> anyhow::Result<()> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        }

        let dispatcher = EventDispatcher::spawn(Some(Arc::new(Slow)));
        dispatcher.send(started("a"));

        let start = std::time::Instant::now();
        dispatcher.finish(Duration::from_millis(20)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
