//! Periodic reference perturbation
//!
//! The randomizer keeps its own copy of every plant's reference, nudges each
//! component by a uniform increment, clamps it into the safe band and sends
//! the whole new vector to the plant's simulation task. Plants pick the
//! update up at their next cycle boundary.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};

use super::cancel::CancellationToken;
use crate::plant::{ReferenceBand, ReferenceVector};

/// Receiving end of a plant's reference updates
pub type ReferenceReceiver = Receiver<ReferenceVector>;

/// Newest pending reference, if any, draining older ones
pub fn latest_reference(rx: &ReferenceReceiver) -> Option<ReferenceVector> {
    rx.try_iter().last()
}

#[derive(Debug)]
pub struct ReferenceRandomizer {
    band: ReferenceBand,
    distribution: Uniform<f64>,
    rng: StdRng,
    references: Vec<ReferenceVector>,
    senders: Vec<Sender<ReferenceVector>>,
}

impl ReferenceRandomizer {
    /// `step` is the half-width of the uniform increment `[-step, step]`
    pub fn new(band: ReferenceBand, step: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            band,
            distribution: Uniform::new_inclusive(-step, step),
            rng,
            references: Vec::new(),
            senders: Vec::new(),
        }
    }

    /// Register a plant and return the channel its simulation task listens on
    pub fn add_plant(&mut self, initial: ReferenceVector) -> ReferenceReceiver {
        let (tx, rx) = unbounded();
        self.references.push(self.band.clamp_vector(&initial));
        self.senders.push(tx);
        rx
    }

    pub fn references(&self) -> &[ReferenceVector] {
        &self.references
    }

    /// One randomization round over every plant and tank
    pub fn perturb(&mut self) {
        for (plant, (reference, tx)) in self
            .references
            .iter_mut()
            .zip(self.senders.iter())
            .enumerate()
        {
            for href in reference.iter_mut() {
                let delta = self.distribution.sample(&mut self.rng);
                *href = self.band.clamp(*href + delta);
            }
            if tx.send(*reference).is_err() {
                debug!("plant {plant} no longer listens for reference updates");
            }
        }
    }

    /// Perturb every `period` until cancelled
    pub fn run(mut self, period: Duration, token: CancellationToken) {
        info!(
            "Reference randomizer running for {} plants every {:?}",
            self.references.len(),
            period
        );
        while !token.is_cancelled() {
            self.perturb();
            debug!("references: {:?}", self.references);
            if token.sleep(period) {
                break;
            }
        }
        info!("Reference randomizer stopped");
    }
}
