//! Seed service
//!
//! Hands a single effective seed to every stage and derives sub-seeds with a
//! fixed schedule (`seed + k`). Stages that introduce pseudo-randomness read
//! the seed once at entry and draw every RNG from here, so reordering stage
//! internals never changes outputs.

use crate::config::RngBackend;
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Seed service for one run
#[derive(Debug, Clone, Copy)]
pub struct SeedService {
    seed: u64,
    backend: RngBackend,
}

impl SeedService {
    pub fn new(seed: u64, backend: RngBackend) -> Self {
        Self { seed, backend }
    }

    /// Effective seed
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Derived sub-seed `seed + offset` (wrapping)
    pub fn sub_seed(&self, offset: u64) -> u64 {
        self.seed.wrapping_add(offset)
    }

    /// Seeded RNG for sub-seed `seed + offset`
    ///
    /// Fails with `NondeterministicBackend` when the configured back-end
    /// cannot be seeded.
    pub fn rng(&self, offset: u64) -> Result<StdRng> {
        match self.backend {
            RngBackend::StdRng => Ok(StdRng::seed_from_u64(self.sub_seed(offset))),
            RngBackend::OsEntropy => Err(Error::NondeterministicBackend(
                "rng_backend 'os_entropy' cannot be seeded; use 'std_rng'".to_string(),
            )),
        }
    }

    /// Fail early when the back-end cannot be seeded
    pub fn ensure_deterministic(&self) -> Result<()> {
        self.rng(0).map(|_| ())
    }
}
