// Invalidation bus
// Topic-keyed publish/subscribe so cache dependencies are declared by subscription.

use std::fmt;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::{ResourceType, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Catalog listings (and their counts) for a resource type.
    Resources(ResourceType),
    /// Availability for one type, or for every type when `None`.
    Availability(Option<ResourceType>),
    /// A user's booking ledger.
    Bookings(UserId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Resources(resource_type) => write!(f, "resources:{}", resource_type),
            Topic::Availability(None) => f.write_str("availability"),
            Topic::Availability(Some(resource_type)) => {
                write!(f, "availability:{}", resource_type)
            }
            Topic::Bookings(user_id) => write!(f, "bookings:{}", user_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<Topic>,
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl InvalidationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns how many subscribers will see the topic.
    pub fn publish(&self, topic: Topic) -> usize {
        debug!(%topic, "publishing invalidation");
        self.sender.send(topic).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<Topic>,
}

impl Subscription {
    /// Next topic, or `None` once the bus is gone. A lagging subscriber skips
    /// the topics it missed.
    pub async fn next(&mut self) -> Option<Topic> {
        loop {
            match self.receiver.recv().await {
                Ok(topic) => return Some(topic),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "invalidation subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_next(&mut self) -> Option<Topic> {
        loop {
            match self.receiver.try_recv() {
                Ok(topic) => return Some(topic),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
