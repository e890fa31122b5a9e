//! Typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! Traffic is partitioned into two [`Topic`] lanes so components only
//! receive the messages they care about:
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Hardware`] | Probe movement start/finish, unit status changes |
//! | [`Topic::Tasks`] | Task lifecycle: scheduled, started, changed, finished |

use probos_types::Event;
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Movement and unit-status events emitted by the rig.
    Hardware,
    /// Task lifecycle events emitted by the task processor.
    Tasks,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    hardware: broadcast::Sender<Event>,
    tasks: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (hardware, _) = broadcast::channel(capacity);
        let (tasks, _) = broadcast::channel(capacity);
        Self { hardware, tasks }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    /// Zero subscribers is a normal condition, not an error: the rig keeps
    /// working whether or not anything is watching it.
    pub fn publish(&self, topic: Topic, event: Event) -> usize {
        // broadcast::send fails only when there are no receivers.
        self.topic_sender(topic).send(event).unwrap_or(0)
    }

    /// Subscribe to a specific [`Topic`] channel.
    ///
    /// The returned [`TopicReceiver`] yields only events published to that
    /// topic.
    pub fn subscribe(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Hardware => &self.hardware,
            Topic::Tasks => &self.tasks,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TopicReceiver
// ────────────────────────────────────────────────────────────────────────────

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns `None` when the bus has shut down.  A lagged subscriber skips
    /// the dropped events with a warning and keeps receiving.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
