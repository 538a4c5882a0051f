//! Alert consumer
//!
//! Classifies published levels against an alarm band, stores one record per
//! tank and raises an alert message whenever a level leaves the band.
//! Failures are returned to the caller per message; a stream consumer logs
//! them and moves on to the next message.

mod sink;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::{LevelMessage, Message, Publisher, TelemetryError};
use crate::twin::CancellationToken;

pub use sink::{CountingSink, JsonLinesSink, MemorySink, RecordSink};

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Malformed payload on {topic}: {source}")]
    Payload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Topic {0} does not name a plant")]
    Topic(String),

    #[error("Failed to store records: {0}")]
    Sink(#[from] std::io::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to publish alert: {0}")]
    Publish(#[from] TelemetryError),
}

/// Classification of one level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelState {
    Low,
    Normal,
    High,
}

impl LevelState {
    pub fn label(self) -> &'static str {
        match self {
            LevelState::Low => "low",
            LevelState::Normal => "normal",
            LevelState::High => "high",
        }
    }
}

/// Acceptable level range in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlarmBand {
    pub min: f64,
    pub max: f64,
}

impl AlarmBand {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Both bounds count as normal
    pub fn classify(&self, level: f64) -> LevelState {
        if level < self.min {
            LevelState::Low
        } else if level > self.max {
            LevelState::High
        } else {
            LevelState::Normal
        }
    }
}

impl Default for AlarmBand {
    fn default() -> Self {
        Self { min: 1.1, max: 1.75 }
    }
}

/// One stored time-series point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelRecord {
    pub measurement: String,
    pub plant: String,
    pub tank: String,
    pub time: DateTime<Utc>,
    pub state: LevelState,
    pub level: f64,
}

/// Alerts raised for one plant by one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub plant: String,
    pub alerts: Vec<String>,
}

pub struct AlertProcessor<S: RecordSink> {
    band: AlarmBand,
    sink: S,
    alert_prefix: String,
    publisher: Option<Arc<dyn Publisher>>,
    processed: u64,
    failed: u64,
}

impl<S: RecordSink> AlertProcessor<S> {
    pub fn new(band: AlarmBand, sink: S, alert_prefix: impl Into<String>) -> Self {
        Self {
            band,
            sink,
            alert_prefix: alert_prefix.into(),
            publisher: None,
            processed: 0,
            failed: 0,
        }
    }

    /// Republish alerts through `publisher`
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// `(processed, failed)` message counts
    pub fn counts(&self) -> (u64, u64) {
        (self.processed, self.failed)
    }

    /// Handle one level message
    ///
    /// The plant name is the last topic segment. Returns the alert raised,
    /// if any level is out of band.
    pub fn process(&mut self, topic: &str, payload: &str) -> Result<Option<AlertMessage>, AlertError> {
        let result = self.process_inner(topic, payload);
        match result {
            Ok(_) => self.processed += 1,
            Err(_) => self.failed += 1,
        }
        result
    }

    fn process_inner(&mut self, topic: &str, payload: &str) -> Result<Option<AlertMessage>, AlertError> {
        let plant = topic
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| AlertError::Topic(topic.to_string()))?
            .to_string();
        let levels: LevelMessage =
            serde_json::from_str(payload).map_err(|source| AlertError::Payload {
                topic: topic.to_string(),
                source,
            })?;

        let now = Utc::now();
        let mut records = Vec::with_capacity(3);
        let mut alerts = Vec::new();

        for (tank, level) in levels.tanks() {
            let state = self.band.classify(level);
            match state {
                LevelState::Low => alerts.push(format!("LOW level in {tank} of {plant} ({level:.2} m)")),
                LevelState::High => alerts.push(format!("HIGH level in {tank} of {plant} ({level:.2} m)")),
                LevelState::Normal => {}
            }
            records.push(LevelRecord {
                measurement: "level_state".to_string(),
                plant: plant.clone(),
                tank: tank.to_string(),
                time: now,
                state,
                level,
            });
        }

        self.sink.write(&records)?;

        if alerts.is_empty() {
            return Ok(None);
        }

        let alert = AlertMessage { plant, alerts };
        if let Some(publisher) = &self.publisher {
            let topic = format!("{}/{}", self.alert_prefix, alert.plant);
            publisher.publish(&topic, &serde_json::to_string(&alert)?)?;
        }
        Ok(Some(alert))
    }

    /// Consume messages until the channel closes or `token` fires
    ///
    /// Failed messages are logged and skipped.
    pub fn consume(&mut self, rx: &Receiver<Message>, token: &CancellationToken) {
        let poll = std::time::Duration::from_millis(100);
        while !token.is_cancelled() {
            let message = match rx.recv_timeout(poll) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            match self.process(&message.topic, &message.payload) {
                Ok(Some(alert)) => {
                    for text in &alert.alerts {
                        warn!("{text}");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Dropping message from {}: {e}", message.topic),
            }
        }
        info!(
            "Alert consumer stopped after {} messages ({} failed)",
            self.processed, self.failed
        );
    }
}
