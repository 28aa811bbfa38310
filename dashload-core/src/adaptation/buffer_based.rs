//! Buffer-occupancy selection.

use super::{AdaptationInput, AdaptationState, AdaptationStrategy};

/// Width of the occupancy band mapped to each rung.
pub const DEFAULT_BAND_MS: u32 = 5_000;

/// Maps each `band_ms` of buffered media to the next rung up.
///
/// With the default 6-rung ladder: below 5 s selects rung 0, below 10 s
/// rung 1, and so on; 25 s and above selects rung 5. Ladders of other sizes
/// keep the band width and saturate at the top rung.
#[derive(Debug, Clone, Copy)]
pub struct BufferBased {
    band_ms: u32,
}

impl BufferBased {
    pub fn new(band_ms: u32) -> Self {
        Self {
            band_ms: band_ms.max(1),
        }
    }

    pub fn rung_index(&self, buffered_ms: u32, rungs: usize) -> usize {
        let band = (buffered_ms / self.band_ms) as usize;
        band.min(rungs.saturating_sub(1))
    }
}

impl Default for BufferBased {
    fn default() -> Self {
        Self::new(DEFAULT_BAND_MS)
    }
}

impl AdaptationStrategy for BufferBased {
    fn name(&self) -> &'static str {
        "buffer"
    }

    fn select(&mut self, input: &AdaptationInput<'_>, state: &mut AdaptationState) -> u32 {
        let index = self.rung_index(input.buffered_ms, input.ladder.len());
        input.ladder.rung(index).unwrap_or(state.next_bitrate)
    }
}
