//! Real-time fan-out of room events.
//!
//! Every topic is a Tokio broadcast channel created on first use.
//! Publishing to a topic nobody listens on is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use huddle_protocol::{RoomId, ServerEvent, UserId};
use tokio::sync::broadcast;

/// A subscription group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Everyone watching `room:{id}`.
    Room(RoomId),
    /// One user's personal channel.
    User(UserId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room(id) => write!(f, "room:{}", id.0),
            Self::User(id) => write!(f, "user:{}", id.0),
        }
    }
}

/// An event waiting to be published once its change is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: Topic,
    pub event: ServerEvent,
}

impl Publication {
    pub fn room(event: ServerEvent) -> Self {
        Self {
            topic: Topic::Room(event.room_id()),
            event,
        }
    }

    pub fn user(user: UserId, event: ServerEvent) -> Self {
        Self {
            topic: Topic::User(user),
            event,
        }
    }
}

pub struct FanOut {
    topics: Mutex<HashMap<Topic, broadcast::Sender<ServerEvent>>>,
    capacity: usize,
}

impl FanOut {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<Topic, broadcast::Sender<ServerEvent>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<ServerEvent> {
        self.topics()
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Sends `event` to current subscribers of `topic`. Returns how many
    /// received it.
    pub fn publish(&self, topic: Topic, event: ServerEvent) -> usize {
        match self.topics().get(&topic) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Publishes in order.
    pub fn publish_all(&self, publications: impl IntoIterator<Item = Publication>) {
        for Publication { topic, event } in publications {
            let delivered = self.publish(topic, event);
            tracing::trace!(%topic, delivered, "event published");
        }
    }

    /// Drops topics with no remaining subscribers.
    pub fn prune(&self) -> usize {
        let mut topics = self.topics();
        let before = topics.len();
        topics.retain(|_, sender| sender.receiver_count() > 0);
        before - topics.len()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics()
            .get(&topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl fmt::Debug for FanOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOut")
            .field("topics", &self.topics().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
