//! Tag-store boundary
//!
//! The twin talks to the outside world only through named floating point
//! points. Each plant owns six of them: three level sensors written by the
//! simulation task and three inflow actuators written by the control task.

mod memory;

use std::sync::Arc;
use std::time::Duration;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plant::ControlVector;

pub use memory::MemoryTagStore;

/// Tag-store failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Connection to {endpoint} refused: {reason}")]
    ConnectionRefused { endpoint: String, reason: String },

    #[error("Tag store is not connected")]
    NotConnected,

    #[error("Unknown tag {0}")]
    UnknownTag(String),

    #[error("Operation on tag {tag} timed out after {timeout:?}")]
    Timeout { tag: String, timeout: Duration },
}

/// Read/write contract of an addressable point store
///
/// Implementations are shared between tasks, so every operation takes
/// `&self` and must bound its own waiting time.
pub trait TagStore: Send + Sync {
    /// Open the connection. Called once before any task starts.
    fn connect(&self) -> Result<(), StoreError>;

    /// Close the connection. Called once after every task has exited.
    fn disconnect(&self) -> Result<(), StoreError>;

    fn is_connected(&self) -> bool;

    fn read(&self, tag: &str) -> Result<f64, StoreError>;

    fn write(&self, tag: &str, value: f64) -> Result<(), StoreError>;

    /// Read several points as one snapshot
    ///
    /// Stores that can must read the whole batch atomically; the default
    /// falls back to one read per point.
    fn read_many(&self, tags: &[&str]) -> Result<Vec<f64>, StoreError> {
        tags.iter().map(|tag| self.read(tag)).collect()
    }

    /// Write several points as one update
    ///
    /// Stores that can must apply the whole batch atomically; the default
    /// falls back to one write per point.
    fn write_many(&self, points: &[(&str, f64)]) -> Result<(), StoreError> {
        points.iter().try_for_each(|(tag, value)| self.write(tag, *value))
    }
}

/// Point identifiers of one plant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantTags {
    pub h1: String,
    pub h2: String,
    pub h3: String,
    pub u1: String,
    pub u2: String,
    pub u3: String,
}

impl PlantTags {
    /// Six consecutive numeric node ids `ns=<ns>;i=<first>..<first+5>`,
    /// levels first, then actuators
    pub fn sequential(namespace: u16, first: u32) -> Self {
        let id = |offset: u32| format!("ns={namespace};i={}", first + offset);
        Self {
            h1: id(0),
            h2: id(1),
            h3: id(2),
            u1: id(3),
            u2: id(4),
            u3: id(5),
        }
    }

    /// Default node ids of the plant with the given zero-based index
    pub fn for_plant(index: usize) -> Self {
        Self::sequential(3, 1008 + 6 * index as u32)
    }

    pub fn sensors(&self) -> [&str; 3] {
        [&self.h1, &self.h2, &self.h3]
    }

    pub fn actuators(&self) -> [&str; 3] {
        [&self.u1, &self.u2, &self.u3]
    }

    pub fn all(&self) -> [&str; 6] {
        [&self.h1, &self.h2, &self.h3, &self.u1, &self.u2, &self.u3]
    }
}

/// Typed view of one plant's six points
///
/// Pure pass-through: values are neither scaled nor filtered.
#[derive(Clone)]
pub struct PlantTagAdapter {
    store: Arc<dyn TagStore>,
    tags: PlantTags,
}

impl PlantTagAdapter {
    pub fn new(store: Arc<dyn TagStore>, tags: PlantTags) -> Self {
        Self { store, tags }
    }

    pub fn tags(&self) -> &PlantTags {
        &self.tags
    }

    fn read3(&self, tags: [&str; 3]) -> Result<Vector3<f64>, StoreError> {
        match self.store.read_many(&tags)?[..] {
            [a, b, c] => Ok(Vector3::new(a, b, c)),
            _ => Err(StoreError::UnknownTag(tags[0].to_string())),
        }
    }

    fn write3(&self, tags: [&str; 3], values: &Vector3<f64>) -> Result<(), StoreError> {
        let points = [
            (tags[0], values[0]),
            (tags[1], values[1]),
            (tags[2], values[2]),
        ];
        self.store.write_many(&points)
    }

    pub fn read_levels(&self) -> Result<Vector3<f64>, StoreError> {
        self.read3(self.tags.sensors())
    }

    pub fn write_levels(&self, levels: &Vector3<f64>) -> Result<(), StoreError> {
        self.write3(self.tags.sensors(), levels)
    }

    pub fn read_control(&self) -> Result<ControlVector, StoreError> {
        self.read3(self.tags.actuators())
    }

    pub fn write_control(&self, u: &ControlVector) -> Result<(), StoreError> {
        self.write3(self.tags.actuators(), u)
    }
}

impl std::fmt::Debug for PlantTagAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlantTagAdapter")
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_node_ids() {
        let first = PlantTags::for_plant(0);
        assert_eq!(first.h1, "ns=3;i=1008");
        assert_eq!(first.u3, "ns=3;i=1013");

        let third = PlantTags::for_plant(2);
        assert_eq!(third.h1, "ns=3;i=1020");
        assert_eq!(third.u3, "ns=3;i=1025");
    }

    #[test]
    fn test_adapter_pass_through() {
        let tags = PlantTags::for_plant(1);
        let store = Arc::new(MemoryTagStore::with_points(
            "memory://test",
            Duration::from_millis(10),
            tags.all(),
        ));
        store.connect().unwrap();

        let adapter = PlantTagAdapter::new(store.clone(), tags.clone());
        adapter.write_levels(&Vector3::new(0.1, 0.2, 0.3)).unwrap();
        adapter.write_control(&ControlVector::new(-1.0, 2.0, 3.5)).unwrap();

        assert_eq!(adapter.read_levels().unwrap(), Vector3::new(0.1, 0.2, 0.3));
        assert_eq!(adapter.read_control().unwrap(), ControlVector::new(-1.0, 2.0, 3.5));
        assert_eq!(store.read(&tags.u2).unwrap(), 2.0);
    }

    #[test]
    fn test_control_vector_never_read_half_written() {
        let tags = PlantTags::for_plant(0);
        let store = Arc::new(MemoryTagStore::with_points(
            "memory://test",
            Duration::from_millis(200),
            tags.all(),
        ));
        store.connect().unwrap();
        let writer = PlantTagAdapter::new(store.clone(), tags.clone());
        let reader = PlantTagAdapter::new(store, tags);

        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let handle = {
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut k = 0.0;
                while !done.load(std::sync::atomic::Ordering::Relaxed) {
                    k += 1.0;
                    writer.write_control(&ControlVector::new(k, k, k)).unwrap();
                }
            })
        };

        for _ in 0..50_000 {
            let u = reader.read_control().unwrap();
            assert!(u[0] == u[1] && u[1] == u[2], "mixed vector {u:?}");
        }
        done.store(true, std::sync::atomic::Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn test_adapter_surfaces_unknown_tag() {
        let store = Arc::new(MemoryTagStore::new("memory://test", Duration::from_millis(10)));
        store.connect().unwrap();

        let adapter = PlantTagAdapter::new(store, PlantTags::for_plant(0));
        let err = adapter.read_levels().unwrap_err();
        assert_eq!(err, StoreError::UnknownTag("ns=3;i=1008".to_string()));
    }
}
