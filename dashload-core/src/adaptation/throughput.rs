//! Throughput-based selection from the last chunk's measured rate.

use super::{AdaptationInput, AdaptationState, AdaptationStrategy};

/// Highest rung not exceeding the last measured throughput.
///
/// Leaves the candidate unchanged when no sample exists yet or when the
/// throughput is below the lowest rung.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThroughputBased;

impl AdaptationStrategy for ThroughputBased {
    fn name(&self) -> &'static str {
        "throughput"
    }

    fn select(&mut self, input: &AdaptationInput<'_>, state: &mut AdaptationState) -> u32 {
        input
            .last_throughput_bps
            .and_then(|bw| input.ladder.highest_not_exceeding(bw))
            .unwrap_or(state.next_bitrate)
    }
}
