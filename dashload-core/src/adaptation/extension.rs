//! Slot for integrator-supplied adaptation logic.

use super::{AdaptationInput, AdaptationState, AdaptationStrategy};

/// Keeps the current bitrate.
///
/// Sessions configured with `extension` run this no-op until an integrator
/// plugs in their own [`AdaptationStrategy`] through
/// [`RateAdaptationEngine::with_strategy`](super::RateAdaptationEngine::with_strategy).
#[derive(Debug, Clone, Copy, Default)]
pub struct Extension;

impl AdaptationStrategy for Extension {
    fn name(&self) -> &'static str {
        "extension"
    }

    fn select(&mut self, _input: &AdaptationInput<'_>, state: &mut AdaptationState) -> u32 {
        state.next_bitrate
    }
}
