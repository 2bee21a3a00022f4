//! Per-task event fan-out.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use crate::runtime::types::DownloadEvent;

/// Default per-observer buffer before the slowest observer starts lagging.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// One task's event channel.
///
/// Publishing never blocks: with no observer attached the event is dropped,
/// and an observer that falls more than the buffer behind skips ahead. Once
/// closed, publishing is a no-op and new subscriptions are refused.
#[derive(Debug)]
pub struct EventChannel {
    sender: Mutex<Option<broadcast::Sender<DownloadEvent>>>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender: Mutex::new(Some(sender)) }
    }

    /// New channel with one observer already attached.
    pub fn with_observer(capacity: usize) -> (Self, broadcast::Receiver<DownloadEvent>) {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        (Self { sender: Mutex::new(Some(sender)) }, receiver)
    }

    fn lock(&self) -> MutexGuard<'_, Option<broadcast::Sender<DownloadEvent>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver an event to every current observer. Returns the number of
    /// observers it reached.
    pub fn publish(&self, event: DownloadEvent) -> usize {
        let sender = self.lock().clone();
        match sender {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Attach a new observer. Returns `None` once the channel is closed.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<DownloadEvent>> {
        self.lock().as_ref().map(broadcast::Sender::subscribe)
    }

    /// Close the channel. Observers see end-of-stream after draining what is
    /// already buffered. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        self.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    pub fn observer_count(&self) -> usize {
        self.lock().as_ref().map_or(0, broadcast::Sender::receiver_count)
    }
}

/// Turn a subscription into a stream that ends when the channel closes.
/// Events missed through lag are skipped.
pub fn event_stream(
    receiver: broadcast::Receiver<DownloadEvent>,
) -> impl Stream<Item = DownloadEvent> + Send + 'static {
    BroadcastStream::new(receiver).filter_map(|item| match item {
        Ok(event) => Some(event),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            debug!(skipped, "event observer lagged; skipping missed events");
            None
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::runtime::types::{EventKind, OutputStream, TaskId};

    fn line(task_id: TaskId, data: &str) -> DownloadEvent {
        DownloadEvent::output(task_id, 1, OutputStream::Stdout, data.to_owned())
    }

    #[tokio::test]
    async fn publish_without_observers_is_dropped() {
        let channel = EventChannel::new(4);
        assert_eq!(channel.publish(line(TaskId::new(), "lost")), 0);

        let mut rx = channel.subscribe().unwrap();
        let task_id = TaskId::new();
        assert_eq!(channel.publish(line(task_id, "kept")), 1);
        assert_eq!(rx.recv().await.unwrap().data, "kept");
    }

    #[tokio::test]
    async fn observers_see_events_in_order_then_end() {
        let channel = EventChannel::new(16);
        let task_id = TaskId::new();
        let a = event_stream(channel.subscribe().unwrap());
        let b = event_stream(channel.subscribe().unwrap());
        assert_eq!(channel.observer_count(), 2);

        channel.publish(DownloadEvent::lifecycle(EventKind::Start, task_id, 1, "go"));
        channel.publish(line(task_id, "A"));
        channel.publish(line(task_id, "B"));
        channel.publish(DownloadEvent::lifecycle(EventKind::Success, task_id, 1, "done"));
        assert!(channel.close());

        for stream in [a, b] {
            let seen: Vec<String> = stream.map(|e| e.data).collect().await;
            assert_eq!(seen, ["go", "A", "B", "done"]);
        }
    }

    #[tokio::test]
    async fn close_is_once_and_refuses_late_observers() {
        let channel = EventChannel::new(4);
        assert!(channel.close());
        assert!(!channel.close());
        assert!(channel.is_closed());
        assert!(channel.subscribe().is_none());
        assert_eq!(channel.publish(line(TaskId::new(), "after")), 0);
    }

    #[tokio::test]
    async fn lagging_observer_skips_without_blocking_publisher() {
        let channel = EventChannel::new(2);
        let task_id = TaskId::new();
        let stream = event_stream(channel.subscribe().unwrap());

        for i in 0..10 {
            channel.publish(line(task_id, &i.to_string()));
        }
        channel.close();

        let seen: Vec<String> = stream.map(|e| e.data).collect().await;
        assert_eq!(seen, ["8", "9"]);
    }
}
