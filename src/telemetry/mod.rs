//! Telemetry bridge
//!
//! Snapshots the level tags of every plant on its own cadence and publishes
//! them as JSON `{"h1": .., "h2": .., "h3": ..}` on a per-plant topic. It
//! runs beside the twin and reads only what the simulation tasks have
//! already written.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tags::{PlantTags, StoreError, TagStore};
use crate::twin::CancellationToken;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to read levels: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to encode message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Subscriber for {topic} is gone")]
    Disconnected { topic: String },
}

/// Level snapshot of one plant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelMessage {
    pub h1: f64,
    pub h2: f64,
    pub h3: f64,
}

impl LevelMessage {
    /// `(tank name, level)` pairs in cascade order
    pub fn tanks(&self) -> [(&'static str, f64); 3] {
        [("h1", self.h1), ("h2", self.h2), ("h3", self.h3)]
    }
}

/// A published payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

/// Sink for topic/payload pairs
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), TelemetryError>;
}

/// In-process publisher backed by an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: Sender<Message>,
}

impl ChannelPublisher {
    pub fn channel() -> (Self, Receiver<Message>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), TelemetryError> {
        self.tx
            .send(Message {
                topic: topic.to_string(),
                payload: payload.to_string(),
            })
            .map_err(|_| TelemetryError::Disconnected {
                topic: topic.to_string(),
            })
    }
}

pub struct TelemetryBridge {
    store: Arc<dyn TagStore>,
    plants: Vec<PlantTags>,
    topic_prefix: String,
    publisher: Arc<dyn Publisher>,
}

impl TelemetryBridge {
    pub fn new(
        store: Arc<dyn TagStore>,
        plants: Vec<PlantTags>,
        topic_prefix: impl Into<String>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            store,
            plants,
            topic_prefix: topic_prefix.into(),
            publisher,
        }
    }

    /// Topic of the plant with zero-based `index`; plants are numbered from 1
    pub fn topic(&self, index: usize) -> String {
        format!("{}/plant{}", self.topic_prefix, index + 1)
    }

    fn snapshot(&self, tags: &PlantTags) -> Result<LevelMessage, StoreError> {
        let levels = self.store.read_many(&tags.sensors())?;
        match levels[..] {
            [h1, h2, h3] => Ok(LevelMessage { h1, h2, h3 }),
            _ => Err(StoreError::UnknownTag(tags.h1.clone())),
        }
    }

    fn publish_plant(&self, index: usize, tags: &PlantTags) -> Result<LevelMessage, TelemetryError> {
        let message = self.snapshot(tags)?;
        let payload = serde_json::to_string(&message)?;
        let topic = self.topic(index);
        self.publisher.publish(&topic, &payload)?;
        debug!("{topic}: {payload}");
        Ok(message)
    }

    /// Publish one snapshot per plant. One plant failing does not stop the others.
    pub fn publish_once(&self) -> Vec<Result<LevelMessage, TelemetryError>> {
        self.plants
            .iter()
            .enumerate()
            .map(|(index, tags)| self.publish_plant(index, tags))
            .collect()
    }

    /// Publish every `period` until cancelled
    pub fn run(self, period: Duration, token: CancellationToken) {
        info!("Telemetry bridge publishing {} plants every {:?}", self.plants.len(), period);
        while !token.is_cancelled() {
            for (index, result) in self.publish_once().into_iter().enumerate() {
                if let Err(e) = result {
                    warn!("plant {}: telemetry failed: {e}", index + 1);
                }
            }
            if token.sleep(period) {
                break;
            }
        }
        info!("Telemetry bridge stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::MemoryTagStore;

    fn bridge() -> (TelemetryBridge, Arc<MemoryTagStore>, Receiver<Message>) {
        let plants = vec![PlantTags::for_plant(0), PlantTags::for_plant(1)];
        let store = Arc::new(MemoryTagStore::with_points(
            "memory://test",
            Duration::from_millis(10),
            plants[0].all(),
        ));
        store.connect().unwrap();
        let (publisher, rx) = ChannelPublisher::channel();
        let bridge = TelemetryBridge::new(store.clone(), plants, "iot/levels", Arc::new(publisher));
        (bridge, store, rx)
    }

    #[test]
    fn test_publishes_level_json_per_plant() {
        let (bridge, store, rx) = bridge();
        store.write("ns=3;i=1008", 1.25).unwrap();
        store.write("ns=3;i=1010", 0.5).unwrap();

        let results = bridge.publish_once();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());

        let message = rx.try_recv().unwrap();
        assert_eq!(message.topic, "iot/levels/plant1");
        let levels: LevelMessage = serde_json::from_str(&message.payload).unwrap();
        assert_eq!(levels, LevelMessage { h1: 1.25, h2: 0.0, h3: 0.5 });
    }

    #[test]
    fn test_failing_plant_does_not_block_others() {
        // plant 2 has no registered points
        let (bridge, _store, rx) = bridge();
        let results = bridge.publish_once();

        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(TelemetryError::Store(StoreError::UnknownTag(_)))
        ));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_dropped_subscriber_is_an_error() {
        let (bridge, _store, rx) = bridge();
        drop(rx);
        let results = bridge.publish_once();
        assert!(matches!(results[0], Err(TelemetryError::Disconnected { .. })));
    }
}
