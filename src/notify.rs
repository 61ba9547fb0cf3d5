use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ResourceId};

const CHANNEL_CAPACITY: usize = 256;

/// Per-listing change feed. Every committed event is published as JSON.
pub struct NotifyHub {
    channels: DashMap<ResourceId, broadcast::Sender<String>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a listing's changes. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: ResourceId) -> broadcast::Receiver<String> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, resource_id: ResourceId, event: &Event) {
        let Some(sender) = self.channels.get(&resource_id) else {
            return;
        };
        match serde_json::to_string(event) {
            Ok(payload) => {
                let _ = sender.send(payload);
            }
            Err(e) => tracing::error!("change feed encode for resource {resource_id}: {e}"),
        }
    }

    pub fn remove(&self, resource_id: &ResourceId) {
        self.channels.remove(resource_id);
    }
}
