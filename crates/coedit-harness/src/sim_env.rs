//! Simulated environment: virtual clock and seeded randomness.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use coedit_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Debug)]
struct SimState {
    now: Instant,
    rng: ChaCha8Rng,
}

/// Deterministic environment shared by every participant of a simulation.
///
/// Time only moves when [`SimEnv::advance`] is called. All clones share the
/// same clock and RNG stream.
#[derive(Debug, Clone)]
pub struct SimEnv {
    state: Arc<Mutex<SimState>>,
}

impl SimEnv {
    /// Environment whose randomness is derived from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        let state = SimState { now: Instant::now(), rng: ChaCha8Rng::seed_from_u64(seed) };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now += by;
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).rng.fill_bytes(buffer);
    }
}
