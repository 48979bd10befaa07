use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Mutex;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Impairment {
    Delivered,
    Lost,
    Corrupted { bit: usize },
}

/// Simulated loss on a receive path. With probability `loss_rate` a message is
/// hit, and a hit message is dropped or gets one bit flipped with equal odds.
#[derive(Debug)]
pub struct LinkImpairment {
    loss_rate: f64,
    rng: Mutex<StdRng>,
}

impl LinkImpairment {
    pub fn new(loss_rate: f64) -> Self {
        Self::with_rng(loss_rate, StdRng::from_os_rng())
    }

    pub fn with_seed(loss_rate: f64, seed: u64) -> Self {
        Self::with_rng(loss_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(loss_rate: f64, rng: StdRng) -> Self {
        Self {
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
        }
    }

    pub fn loss_rate(&self) -> f64 {
        self.loss_rate
    }

    pub fn apply(&self, data: &mut [u8]) -> Impairment {
        if data.is_empty() {
            return Impairment::Delivered;
        }
        let mut rng = self.rng.lock().unwrap();
        if !rng.random_bool(self.loss_rate) {
            return Impairment::Delivered;
        }
        if rng.random_bool(0.5) {
            return Impairment::Lost;
        }
        let bit = rng.random_range(0..data.len() * 8);
        data[bit / 8] ^= 1 << (bit % 8);
        Impairment::Corrupted { bit }
    }
}
