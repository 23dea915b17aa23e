//! Deterministic random number generation for synthetic data.
//!
//! RULE: Synthetic generation never touches a platform RNG.
//! Each customer gets its own stream seeded from (master_seed, index), so
//! adding customers never changes the walks of existing ones.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct StreamRng {
    inner: Pcg64Mcg,
}

impl StreamRng {
    /// The stream index must stay stable for a given entity.
    pub fn new(master_seed: u64, stream: u64) -> Self {
        let derived_seed = master_seed ^ (stream.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Index drawn proportionally to `weights`. None if no weight is positive.
    pub fn pick_weighted(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }
        let target = self.next_f64() * total;
        let mut acc = 0.0;
        let mut last_positive = None;
        for (i, w) in weights.iter().enumerate() {
            if *w <= 0.0 {
                continue;
            }
            acc += w;
            last_positive = Some(i);
            if target < acc {
                return Some(i);
            }
        }
        // Rounding can leave target a hair above the accumulated total.
        last_positive
    }
}
