//! Whole-value exchange of a plant's augmented state
//!
//! The simulation task publishes a complete vector after every accepted
//! cycle; readers always get a copy of one published vector, never a mix of
//! two.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::plant::{AugmentedState, PlantSnapshot, ReferenceVector};

#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<PlantSnapshot>>,
}

impl SharedState {
    pub fn new(reference: ReferenceVector) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlantSnapshot::zero(reference))),
        }
    }

    pub fn publish(&self, state: AugmentedState, reference: ReferenceVector) {
        *self.inner.lock() = PlantSnapshot { state, reference };
    }

    pub fn snapshot(&self) -> PlantSnapshot {
        *self.inner.lock()
    }

    pub fn state(&self) -> AugmentedState {
        self.inner.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_readers_never_see_mixed_vectors() {
        let shared = SharedState::new(ReferenceVector::zeros());
        let writer = {
            let shared = shared.clone();
            thread::spawn(move || {
                for k in 0..5_000 {
                    let v = k as f64;
                    shared.publish(AugmentedState::repeat(v), ReferenceVector::repeat(v));
                }
            })
        };

        for _ in 0..5_000 {
            let snap = shared.snapshot();
            let first = snap.state[0];
            assert!(snap.state.iter().all(|&x| x == first));
            assert!(snap.reference.iter().all(|&x| x == first));
        }
        writer.join().unwrap();
    }
}
