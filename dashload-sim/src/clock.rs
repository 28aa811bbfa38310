//! Simulation clock and random number generation.

use dashload_core::SimTime;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::SimulationError;

/// Monotonic simulation clock with microsecond resolution.
///
/// Starts at zero and only moves forward. Independent of wall-clock time.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: SimTime,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Advances simulation time to `target`.
    ///
    /// # Errors
    ///
    /// - `SimulationError::InvalidEventScheduling` - If target time is in the past
    pub fn advance_to(&mut self, target: SimTime) -> Result<(), SimulationError> {
        if target < self.now {
            return Err(SimulationError::InvalidEventScheduling {
                reason: format!("Cannot advance time backwards from {} to {}", self.now, target),
            });
        }
        self.now = target;
        Ok(())
    }
}

/// Seeded random number generator for loss injection.
///
/// Uses ChaCha8 so the same seed reproduces the same run on every platform.
#[derive(Debug)]
pub struct DeterministicRng {
    rng: ChaCha8Rng,
}

impl DeterministicRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Uniform sample in `[0, 1)`.
    pub fn random_f64(&mut self) -> f64 {
        (self.rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// True with the given probability.
    pub fn random_bool(&mut self, probability: f64) -> bool {
        self.random_f64() < probability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advancement() {
        let mut clock = SimClock::new();
        assert_eq!(clock.now(), SimTime::ZERO);

        clock.advance_to(SimTime::from_millis(100)).unwrap();
        assert_eq!(clock.now(), SimTime::from_millis(100));

        // Standing still is allowed.
        clock.advance_to(SimTime::from_millis(100)).unwrap();
        clock.advance_to(SimTime::from_secs(1)).unwrap();
        assert_eq!(clock.now(), SimTime::from_secs(1));
    }

    #[test]
    fn test_clock_rejects_backwards() {
        let mut clock = SimClock::new();
        clock.advance_to(SimTime::from_millis(10)).unwrap();

        let result = clock.advance_to(SimTime::from_millis(5));
        assert!(matches!(
            result,
            Err(SimulationError::InvalidEventScheduling { .. })
        ));
        assert_eq!(clock.now(), SimTime::from_millis(10));
    }

    #[test]
    fn test_rng_reproducible() {
        let mut a = DeterministicRng::from_seed(7);
        let mut b = DeterministicRng::from_seed(7);
        for _ in 0..100 {
            assert_eq!(a.random_f64(), b.random_f64());
        }
        let mut c = DeterministicRng::from_seed(8);
        assert_ne!(DeterministicRng::from_seed(7).random_f64(), c.random_f64());
    }

    #[test]
    fn test_rng_bounds() {
        let mut rng = DeterministicRng::from_seed(1);
        for _ in 0..1_000 {
            let x = rng.random_f64();
            assert!((0.0..1.0).contains(&x));
        }
        assert!(!rng.random_bool(0.0));
        assert!(rng.random_bool(1.0));
    }
}
