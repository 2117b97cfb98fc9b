//! Event Bus
//!
//! Per-run broadcast topics plus a firehose that sees every run. Delivery
//! is fire-and-forget: events published with nobody listening are gone,
//! and a subscriber that falls more than `capacity` events behind skips
//! ahead instead of slowing the publisher.

use futures::stream::{self, Stream};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::metrics;
use crate::storage::RunStatus;

/// Something that happened to a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RunEvent {
    /// One line of tool output, without its terminator
    #[serde(rename_all = "camelCase")]
    OutputLine { run_id: i64, line: String },

    /// Always the last event of a run; the store is final when it arrives
    #[serde(rename_all = "camelCase")]
    RunCompleted {
        run_id: i64,
        status: RunStatus,
        exit_code: i32,
        duration_ms: u64,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> i64 {
        match self {
            RunEvent::OutputLine { run_id, .. } | RunEvent::RunCompleted { run_id, .. } => *run_id,
        }
    }

    /// Wire name, also used as the SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::OutputLine { .. } => "output-line",
            RunEvent::RunCompleted { .. } => "run-completed",
        }
    }

    pub fn is_completion(&self) -> bool {
        matches!(self, RunEvent::RunCompleted { .. })
    }
}

struct BusInner {
    topics: Mutex<HashMap<i64, broadcast::Sender<RunEvent>>>,
    firehose: broadcast::Sender<RunEvent>,
    capacity: usize,
}

/// Publish/subscribe hub keyed by run id
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .field("topics", &self.topic_count())
            .finish()
    }
}

impl EventBus {
    /// # Arguments
    ///
    /// * `capacity` - Events buffered per topic before slow subscribers lag
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (firehose, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BusInner {
                topics: Mutex::new(HashMap::new()),
                firehose,
                capacity,
            }),
        }
    }

    fn topics(&self) -> std::sync::MutexGuard<'_, HashMap<i64, broadcast::Sender<RunEvent>>> {
        self.inner.topics.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Create the topic for a run that is about to start
    pub fn open_topic(&self, run_id: i64) {
        let capacity = self.inner.capacity;
        self.topics()
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(capacity).0);
    }

    /// Drop the topic; subscribers drain what is buffered, then end
    pub fn close_topic(&self, run_id: i64) {
        self.topics().remove(&run_id);
    }

    /// Subscribe to one run's events from now on
    ///
    /// Subscribing to a run with no open topic yields an already-ended
    /// subscription.
    pub fn subscribe(&self, run_id: i64) -> RunSubscription {
        let rx = match self.topics().get(&run_id) {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        };
        RunSubscription {
            run_id: Some(run_id),
            rx,
            finished: false,
        }
    }

    /// Subscribe to every run's events
    pub fn subscribe_all(&self) -> RunSubscription {
        RunSubscription {
            run_id: None,
            rx: self.inner.firehose.subscribe(),
            finished: false,
        }
    }

    /// Deliver to the run's subscribers and the firehose
    ///
    /// Returns how many per-run subscribers received the event.
    pub fn publish(&self, event: RunEvent) -> usize {
        let sender = self.topics().get(&event.run_id()).cloned();
        let _ = self.inner.firehose.send(event.clone());
        match sender {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn topic_count(&self) -> usize {
        self.topics().len()
    }

    /// Live subscribers on a run topic
    pub fn subscriber_count(&self, run_id: i64) -> usize {
        self.topics()
            .get(&run_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// Scoped subscription; dropping it unsubscribes
#[derive(Debug)]
pub struct RunSubscription {
    run_id: Option<i64>,
    rx: broadcast::Receiver<RunEvent>,
    finished: bool,
}

impl RunSubscription {
    /// `None` for the firehose
    pub fn run_id(&self) -> Option<i64> {
        self.run_id
    }

    /// Next event, or `None` once the run's topic has ended
    pub async fn recv(&mut self) -> Option<RunEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.run_id.is_some() && event.is_completion() {
                        self.finished = true;
                    }
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        run_id = ?self.run_id,
                        "Subscriber lagged, skipped {} events",
                        skipped
                    );
                    metrics::SUBSCRIBER_LAG_EVENTS_TOTAL.inc_by(skipped);
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = RunEvent> + Send + 'static {
        stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn line(run_id: i64, text: &str) -> RunEvent {
        RunEvent::OutputLine {
            run_id,
            line: text.to_string(),
        }
    }

    fn done(run_id: i64) -> RunEvent {
        RunEvent::RunCompleted {
            run_id,
            status: RunStatus::Completed,
            exit_code: 0,
            duration_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_each_subscriber_gets_every_event() {
        let bus = EventBus::new(16);
        bus.open_topic(1);
        let mut a = bus.subscribe(1);
        let mut b = bus.subscribe(1);

        assert_eq!(bus.publish(line(1, "one")), 2);
        bus.publish(done(1));
        bus.close_topic(1);

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await, Some(line(1, "one")));
            assert_eq!(sub.recv().await, Some(done(1)));
            assert_eq!(sub.recv().await, None);
        }
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let bus = EventBus::new(16);
        bus.open_topic(7);
        assert_eq!(bus.publish(line(7, "lost")), 0);

        let mut sub = bus.subscribe(7);
        bus.publish(line(7, "seen"));
        assert_eq!(sub.recv().await, Some(line(7, "seen")));
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = EventBus::new(16);
        bus.open_topic(1);
        bus.open_topic(2);
        let mut one = bus.subscribe(1);

        bus.publish(line(2, "other run"));
        bus.publish(line(1, "mine"));
        assert_eq!(one.recv().await, Some(line(1, "mine")));
    }

    #[tokio::test]
    async fn test_subscribe_to_closed_topic_ends_immediately() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe(99);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = EventBus::new(4);
        bus.open_topic(3);
        let sub = bus.subscribe(3);
        assert_eq!(bus.subscriber_count(3), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(3), 0);
        bus.close_topic(3);
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let bus = EventBus::new(2);
        bus.open_topic(5);
        let mut slow = bus.subscribe(5);

        for i in 0..6 {
            bus.publish(line(5, &i.to_string()));
        }
        bus.publish(done(5));
        bus.close_topic(5);

        let mut seen = Vec::new();
        while let Some(event) = slow.recv().await {
            seen.push(event);
        }
        assert!(seen.len() < 7);
        assert_eq!(seen.last(), Some(&done(5)));
    }

    #[tokio::test]
    async fn test_firehose_sees_all_runs() {
        let bus = EventBus::new(16);
        bus.open_topic(1);
        bus.open_topic(2);
        let mut all = bus.subscribe_all();

        bus.publish(line(1, "a"));
        bus.publish(line(2, "b"));
        bus.publish(done(1));

        assert_eq!(all.recv().await.map(|e| e.run_id()), Some(1));
        assert_eq!(all.recv().await.map(|e| e.run_id()), Some(2));
        assert!(all.recv().await.unwrap().is_completion());
    }

    #[tokio::test]
    async fn test_into_stream_ends_after_completion() {
        let bus = EventBus::new(16);
        bus.open_topic(4);
        let sub = bus.subscribe(4);
        bus.publish(line(4, "x"));
        bus.publish(done(4));

        // The topic is still open; the completion event alone ends the stream
        let events: Vec<RunEvent> = sub.into_stream().collect().await;
        assert_eq!(events, vec![line(4, "x"), done(4)]);
    }

    #[test]
    fn test_event_serialization() {
        let value = serde_json::to_value(done(9)).unwrap();
        assert_eq!(value["type"], "run-completed");
        assert_eq!(value["runId"], 9);
        assert_eq!(value["exitCode"], 0);
        assert_eq!(value["durationMs"], 5);
        assert_eq!(value["status"], "completed");

        let value = serde_json::to_value(line(9, "hello")).unwrap();
        assert_eq!(value["type"], "output-line");
        assert_eq!(value["line"], "hello");
        assert_eq!(line(9, "x").name(), "output-line");
    }
}
