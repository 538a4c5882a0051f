//! In-process tag store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info};
use parking_lot::RwLock;

use super::{StoreError, TagStore};

/// Tag store kept in memory behind a timed reader-writer lock
///
/// Points must be registered up front; reading or writing an unregistered
/// point fails like a missing node on a real server. Every operation waits
/// at most `op_timeout` for the lock.
#[derive(Debug)]
pub struct MemoryTagStore {
    endpoint: String,
    op_timeout: Duration,
    points: RwLock<HashMap<String, f64>>,
    connected: AtomicBool,
    reachable: bool,
}

impl MemoryTagStore {
    pub fn new(endpoint: impl Into<String>, op_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            op_timeout,
            points: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
            reachable: true,
        }
    }

    /// Store with the given points registered at `0.0`
    pub fn with_points<'a, I>(endpoint: impl Into<String>, op_timeout: Duration, tags: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let store = Self::new(endpoint, op_timeout);
        {
            let mut points = store.points.write();
            for tag in tags {
                points.insert(tag.to_string(), 0.0);
            }
        }
        store
    }

    /// Store whose `connect` always fails
    pub fn unreachable(endpoint: impl Into<String>) -> Self {
        Self {
            reachable: false,
            ..Self::new(endpoint, Duration::from_millis(1))
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Add a point, keeping its value if it already exists
    pub fn register(&self, tag: &str) {
        self.points.write().entry(tag.to_string()).or_insert(0.0);
    }

    /// Copy of every point
    pub fn values(&self) -> HashMap<String, f64> {
        self.points.read().clone()
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }

    fn timeout(&self, tag: &str) -> StoreError {
        StoreError::Timeout {
            tag: tag.to_string(),
            timeout: self.op_timeout,
        }
    }
}

impl TagStore for MemoryTagStore {
    fn connect(&self) -> Result<(), StoreError> {
        if !self.reachable {
            return Err(StoreError::ConnectionRefused {
                endpoint: self.endpoint.clone(),
                reason: "endpoint unreachable".to_string(),
            });
        }
        self.connected.store(true, Ordering::Release);
        info!(
            "Connected to tag store {} ({} points)",
            self.endpoint,
            self.points.read().len()
        );
        Ok(())
    }

    fn disconnect(&self) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.connected.store(false, Ordering::Release);
        info!("Disconnected from tag store {}", self.endpoint);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn read(&self, tag: &str) -> Result<f64, StoreError> {
        self.ensure_connected()?;
        let points = self
            .points
            .try_read_for(self.op_timeout)
            .ok_or_else(|| self.timeout(tag))?;
        points
            .get(tag)
            .copied()
            .ok_or_else(|| StoreError::UnknownTag(tag.to_string()))
    }

    fn read_many(&self, tags: &[&str]) -> Result<Vec<f64>, StoreError> {
        self.ensure_connected()?;
        let points = self
            .points
            .try_read_for(self.op_timeout)
            .ok_or_else(|| self.timeout(tags.first().copied().unwrap_or_default()))?;
        tags.iter()
            .map(|tag| {
                points
                    .get(*tag)
                    .copied()
                    .ok_or_else(|| StoreError::UnknownTag(tag.to_string()))
            })
            .collect()
    }

    /// All points are checked before any is written
    fn write_many(&self, updates: &[(&str, f64)]) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let mut points = self
            .points
            .try_write_for(self.op_timeout)
            .ok_or_else(|| self.timeout(updates.first().map(|(tag, _)| *tag).unwrap_or_default()))?;
        if let Some((tag, _)) = updates.iter().find(|(tag, _)| !points.contains_key(*tag)) {
            return Err(StoreError::UnknownTag(tag.to_string()));
        }
        for (tag, value) in updates {
            if let Some(slot) = points.get_mut(*tag) {
                *slot = *value;
            }
        }
        debug!("{} points written", updates.len());
        Ok(())
    }

    fn write(&self, tag: &str, value: f64) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let mut points = self
            .points
            .try_write_for(self.op_timeout)
            .ok_or_else(|| self.timeout(tag))?;
        let slot = points
            .get_mut(tag)
            .ok_or_else(|| StoreError::UnknownTag(tag.to_string()))?;
        *slot = value;
        debug!("{tag} <- {value}");
        Ok(())
    }
}
