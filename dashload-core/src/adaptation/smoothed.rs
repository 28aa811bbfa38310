//! Selection from an exponential moving average of throughput.

use super::{AdaptationInput, AdaptationState, AdaptationStrategy};

/// Weight kept from the previous average on each new sample.
pub const DEFAULT_HISTORY_WEIGHT: f64 = 0.8;

/// Ladder scan over `avg = w*avg + (1-w)*bw`, seeded with the first sample.
#[derive(Debug, Clone, Copy)]
pub struct SmoothedThroughputBased {
    history_weight: f64,
}

impl SmoothedThroughputBased {
    /// `history_weight` is clamped to `[0, 1]`.
    pub fn new(history_weight: f64) -> Self {
        Self {
            history_weight: history_weight.clamp(0.0, 1.0),
        }
    }

    pub fn history_weight(&self) -> f64 {
        self.history_weight
    }
}

impl Default for SmoothedThroughputBased {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WEIGHT)
    }
}

impl AdaptationStrategy for SmoothedThroughputBased {
    fn name(&self) -> &'static str {
        "smoothed"
    }

    fn select(&mut self, input: &AdaptationInput<'_>, state: &mut AdaptationState) -> u32 {
        if let Some(bw) = input.last_throughput_bps {
            let avg = match state.smoothed_throughput_bps {
                Some(avg) => self.history_weight * avg + (1.0 - self.history_weight) * bw,
                None => bw,
            };
            state.smoothed_throughput_bps = Some(avg);
        }

        state
            .smoothed_throughput_bps
            .and_then(|avg| input.ladder.highest_not_exceeding(avg))
            .unwrap_or(state.next_bitrate)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::ladder::BitrateLadder;

    fn feed(strategy: &mut SmoothedThroughputBased, state: &mut AdaptationState, bw: f64) -> u32 {
        let ladder = BitrateLadder::default();
        let input = AdaptationInput {
            ladder: &ladder,
            last_throughput_bps: Some(bw),
            buffered_ms: 0,
            probe_estimate_bps: None,
        };
        let selected = strategy.select(&input, state);
        state.next_bitrate = selected;
        selected
    }

    #[test]
    fn test_average_seeded_with_first_sample() {
        let mut strategy = SmoothedThroughputBased::default();
        let mut state = AdaptationState {
            next_bitrate: 700_000,
            ..Default::default()
        };

        assert_eq!(feed(&mut strategy, &mut state, 3_000_000.0), 2_800_000);
        assert_eq!(state.smoothed_throughput_bps, Some(3_000_000.0));

        // 0.8 * 3.0M + 0.2 * 1.0M = 2.6M
        assert_eq!(feed(&mut strategy, &mut state, 1_000_000.0), 2_100_000);
        let avg = state.smoothed_throughput_bps.unwrap();
        assert!((avg - 2_600_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_sample_keeps_candidate() {
        let mut strategy = SmoothedThroughputBased::default();
        let ladder = BitrateLadder::default();
        let input = AdaptationInput {
            ladder: &ladder,
            last_throughput_bps: None,
            buffered_ms: 0,
            probe_estimate_bps: None,
        };
        let mut state = AdaptationState {
            next_bitrate: 1_400_000,
            ..Default::default()
        };
        assert_eq!(strategy.select(&input, &mut state), 1_400_000);
        assert_eq!(state.smoothed_throughput_bps, None);
    }

    proptest! {
        #[test]
        fn test_average_bounded_by_samples(
            samples in prop::collection::vec(1.0f64..10_000_000.0, 1..200),
        ) {
            let mut strategy = SmoothedThroughputBased::default();
            let mut state = AdaptationState {
                next_bitrate: 700_000,
                ..Default::default()
            };
            for &bw in &samples {
                feed(&mut strategy, &mut state, bw);
            }

            let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let avg = state.smoothed_throughput_bps.unwrap();
            let tolerance = max * 1e-9;
            prop_assert!(avg >= min - tolerance && avg <= max + tolerance);
        }
    }
}
