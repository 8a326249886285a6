//! Fan-out of transfer events to connected viewers

use crate::ports::EventPublisher;
use dashmap::DashMap;
use hearth_types::TransferEvent;
use tokio::sync::mpsc;
use tracing::{debug, info};

struct Subscriber {
    username: String,
    tx: mpsc::UnboundedSender<TransferEvent>,
}

/// Receiving end handed to a connection; pass `id` back to
/// [`Broadcaster::unsubscribe`] when the connection closes.
pub struct Subscription {
    pub id: String,
    pub receiver: mpsc::UnboundedReceiver<TransferEvent>,
}

/// Registry of live viewer connections.
///
/// Every subscriber sees every event: the index is shared by the whole
/// household, not partitioned per user.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: DashMap<String, Subscriber>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, username: &str) -> Subscription {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, receiver) = mpsc::unbounded_channel();
        self.subscribers.insert(
            id.clone(),
            Subscriber {
                username: username.to_string(),
                tx,
            },
        );
        info!("Viewer subscribed: {} ({})", username, id);
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: &str) {
        if let Some((_, sub)) = self.subscribers.remove(id) {
            info!("Viewer unsubscribed: {} ({})", sub.username, id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl EventPublisher for Broadcaster {
    fn publish(&self, event: TransferEvent) {
        // Drop subscribers whose connection went away without unsubscribing
        self.subscribers.retain(|id, sub| {
            if sub.tx.send(event.clone()).is_ok() {
                true
            } else {
                debug!("Pruning closed viewer {} ({})", sub.username, id);
                false
            }
        });
    }
}
