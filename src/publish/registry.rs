use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::engine::Publisher;

/// Per-room bookkeeping of live publishers, plus the URIs of externally
/// registered ones (remote-published streams this client vouches for).
///
/// The self-stream reconciler uses this to tell genuinely local streams from
/// stale leftovers. Owned by the publish controller; never ambient state.
pub struct PublisherRegistry {
    publishers: Mutex<HashMap<String, Vec<Arc<dyn Publisher>>>>,
    external_uris: Mutex<Vec<String>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self {
            publishers: Mutex::new(HashMap::new()),
            external_uris: Mutex::new(Vec::new()),
        }
    }

    pub fn add_publisher(&self, room_id: &str, publisher: Arc<dyn Publisher>) {
        debug!(room_id = %room_id, stream_id = %publisher.stream_id(), "Registering publisher");

        self.publishers
            .lock()
            .unwrap()
            .entry(room_id.to_string())
            .or_default()
            .push(publisher);
    }

    /// Removes one publisher; a repeat removal is a no-op.
    pub fn remove_publisher(&self, room_id: &str, stream_id: &str) {
        let mut publishers = self.publishers.lock().unwrap();

        if let Some(room_publishers) = publishers.get_mut(room_id) {
            room_publishers.retain(|publisher| publisher.stream_id() != stream_id);
        }
    }

    /// Stream ids of the publishers currently live in a room.
    pub fn publisher_ids(&self, room_id: &str) -> Vec<String> {
        self.publishers
            .lock()
            .unwrap()
            .get(room_id)
            .map(|room_publishers| {
                room_publishers
                    .iter()
                    .map(|publisher| publisher.stream_id())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn publisher_count(&self, room_id: &str) -> usize {
        self.publishers
            .lock()
            .unwrap()
            .get(room_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Marks a bare stream URI as externally published (and thus not stale).
    pub fn register_external_uri(&self, uri: &str) {
        let mut uris = self.external_uris.lock().unwrap();
        if !uris.iter().any(|u| u == uri) {
            uris.push(uri.to_string());
        }
    }

    pub fn external_uris(&self) -> Vec<String> {
        self.external_uris.lock().unwrap().clone()
    }

    /// Drains every registered publisher, for teardown.
    pub fn drain_publishers(&self) -> Vec<Arc<dyn Publisher>> {
        let mut publishers = self.publishers.lock().unwrap();
        let drained = publishers
            .drain()
            .flat_map(|(_, room_publishers)| room_publishers)
            .collect();
        self.external_uris.lock().unwrap().clear();

        drained
    }
}

impl Default for PublisherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stub::StubEngine;
    use crate::engine::{MediaConstraints, MediaEngine, MediaSource, PublishRequest};

    async fn live_publisher(engine: &StubEngine) -> Arc<dyn Publisher> {
        engine
            .publish(PublishRequest::new(MediaSource::Constraints(
                MediaConstraints {
                    audio: true,
                    video: true,
                    screen: false,
                },
            )))
            .await
            .unwrap()
            .publisher
            .unwrap()
    }

    #[tokio::test]
    async fn tracks_publishers_per_room() {
        let engine = StubEngine::new();
        let registry = PublisherRegistry::new();

        let first = live_publisher(&engine).await;
        let second = live_publisher(&engine).await;

        registry.add_publisher("room-1", first.clone());
        registry.add_publisher("room-1", second.clone());
        registry.add_publisher("room-2", live_publisher(&engine).await);

        assert_eq!(registry.publisher_count("room-1"), 2);
        assert!(registry
            .publisher_ids("room-1")
            .contains(&first.stream_id()));

        registry.remove_publisher("room-1", &first.stream_id());
        assert_eq!(registry.publisher_count("room-1"), 1);

        // Removing again must not disturb the remaining entry.
        registry.remove_publisher("room-1", &first.stream_id());
        assert_eq!(registry.publisher_count("room-1"), 1);
    }

    #[test]
    fn external_uris_deduplicate() {
        let registry = PublisherRegistry::new();

        registry.register_external_uri("cast://ext-1");
        registry.register_external_uri("cast://ext-1");

        assert_eq!(registry.external_uris(), vec!["cast://ext-1".to_string()]);
    }
}
