//! Notification Dispatcher - fans a detected change out to destinations
//!
//! Delivery is at-least-once and deliberately not transactional with the
//! marker update: the marker advances even if some destinations were briefly
//! unreachable, so those destinations miss that one notification rather than
//! receiving duplicates later.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::store::Destination;

/// Delivery seam to the chat platform
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn deliver(&self, destination: &Destination, text: &str) -> Result<(), DeliveryError>;
}

pub struct Dispatcher {
    messenger: Arc<dyn Messenger>,
}

impl Dispatcher {
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self { messenger }
    }

    /// Deliver a rendered notification to every destination.
    ///
    /// Destinations are deduplicated by delivery coordinates, collapsing
    /// legacy user/channel rows that point at the same chat. A failure for
    /// one destination is logged and never blocks the rest; it is also not
    /// cause to unsubscribe that destination. Returns the number of
    /// successful deliveries.
    pub async fn dispatch(&self, destinations: &[Destination], text: &str) -> usize {
        let mut seen = HashSet::new();
        let mut delivered = 0usize;

        for destination in destinations {
            if !seen.insert(destination.delivery_key()) {
                continue;
            }

            match self.messenger.deliver(destination, text).await {
                Ok(()) => {
                    debug!("Delivered notification to {:?}", destination);
                    delivered += 1;
                }
                Err(e) => {
                    warn!("Failed to deliver to {:?}: {}", destination, e);
                }
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Messenger that records deliveries and fails for configured chats
    struct FakeMessenger {
        failing_chats: Vec<i64>,
        delivered: Mutex<Vec<Destination>>,
    }

    impl FakeMessenger {
        fn new(failing_chats: Vec<i64>) -> Self {
            Self {
                failing_chats,
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Messenger for FakeMessenger {
        async fn deliver(
            &self,
            destination: &Destination,
            _text: &str,
        ) -> Result<(), DeliveryError> {
            let (chat_id, _) = destination.delivery_key();
            if self.failing_chats.contains(&chat_id) {
                return Err(DeliveryError("bot was kicked".into()));
            }
            self.delivered.lock().unwrap().push(*destination);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_block_remaining_destinations() {
        let messenger = Arc::new(FakeMessenger::new(vec![-1001]));
        let dispatcher = Dispatcher::new(messenger.clone());

        let destinations = vec![
            Destination::User(100),
            Destination::Channel(-1001),
            Destination::Topic {
                chat_id: -1002,
                thread_id: 7,
            },
        ];

        let delivered = dispatcher.dispatch(&destinations, "hello").await;

        assert_eq!(delivered, 2);
        let log = messenger.delivered.lock().unwrap();
        assert!(log.contains(&Destination::User(100)));
        assert!(log.contains(&Destination::Topic {
            chat_id: -1002,
            thread_id: 7
        }));
    }

    #[tokio::test]
    async fn test_duplicate_destinations_collapse() {
        let messenger = Arc::new(FakeMessenger::new(vec![]));
        let dispatcher = Dispatcher::new(messenger.clone());

        // A legacy user row and a channel row for the same chat, plus an
        // exact duplicate topic
        let destinations = vec![
            Destination::User(500),
            Destination::Channel(500),
            Destination::Topic {
                chat_id: -1,
                thread_id: 2,
            },
            Destination::Topic {
                chat_id: -1,
                thread_id: 2,
            },
        ];

        let delivered = dispatcher.dispatch(&destinations, "hello").await;

        assert_eq!(delivered, 2);
        assert_eq!(messenger.delivered.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_topics_in_same_chat_are_distinct() {
        let messenger = Arc::new(FakeMessenger::new(vec![]));
        let dispatcher = Dispatcher::new(messenger.clone());

        let destinations = vec![
            Destination::Topic {
                chat_id: -1,
                thread_id: 2,
            },
            Destination::Topic {
                chat_id: -1,
                thread_id: 3,
            },
            Destination::Channel(-1),
        ];

        let delivered = dispatcher.dispatch(&destinations, "hello").await;
        assert_eq!(delivered, 3);
    }
}
