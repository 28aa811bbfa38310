//! Rate adaptation: picking the bitrate of the next chunk and when to request it.
//!
//! A session chooses one [`AdaptationStrategy`] at setup. The
//! [`RateAdaptationEngine`] wraps it with the parts shared by every strategy:
//! defaulting to the lowest rung, switch counting and the release policy.

pub mod buffer_based;
pub mod extension;
pub mod smoothed;
pub mod throughput;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

pub use buffer_based::BufferBased;
pub use extension::Extension;
pub use smoothed::SmoothedThroughputBased;
pub use throughput::ThroughputBased;

use crate::ladder::BitrateLadder;

/// Errors from strategy selection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdaptationError {
    #[error("Unknown adaptation strategy: {name}")]
    UnknownStrategy { name: String },
}

/// Everything a strategy may look at when choosing.
#[derive(Debug, Clone, Copy)]
pub struct AdaptationInput<'a> {
    pub ladder: &'a BitrateLadder,
    /// Throughput of the last completed chunk, `None` before the first one.
    pub last_throughput_bps: Option<f64>,
    pub buffered_ms: u32,
    /// Latest available-bandwidth estimate from a probe session, if any.
    pub probe_estimate_bps: Option<f64>,
}

/// Per-session adaptation state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdaptationState {
    /// Bitrate of the last issued request, 0 before the first.
    pub previous_bitrate: u32,
    /// Current candidate; strategies that cannot decide leave it unchanged.
    pub next_bitrate: u32,
    pub smoothed_throughput_bps: Option<f64>,
    pub switch_count: u32,
    pub decisions: u64,
}

/// Bitrate selection rule.
pub trait AdaptationStrategy: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Returns the bitrate for the next chunk.
    ///
    /// `state.next_bitrate` holds the current candidate on entry; it is always
    /// a ladder rung.
    fn select(&mut self, input: &AdaptationInput<'_>, state: &mut AdaptationState) -> u32;
}

/// The built-in strategies, chosen by name in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StrategyKind {
    ThroughputBased,
    SmoothedThroughputBased,
    BufferBased,
    Extension,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::ThroughputBased,
        StrategyKind::SmoothedThroughputBased,
        StrategyKind::BufferBased,
        StrategyKind::Extension,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::ThroughputBased => "throughput",
            StrategyKind::SmoothedThroughputBased => "smoothed",
            StrategyKind::BufferBased => "buffer",
            StrategyKind::Extension => "extension",
        }
    }

    /// Instantiates the strategy with its standard parameters.
    pub fn build(self) -> Box<dyn AdaptationStrategy> {
        match self {
            StrategyKind::ThroughputBased => Box::new(ThroughputBased),
            StrategyKind::SmoothedThroughputBased => Box::new(SmoothedThroughputBased::default()),
            StrategyKind::BufferBased => Box::new(BufferBased::default()),
            StrategyKind::Extension => Box::new(Extension),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = AdaptationError;

    /// Accepts the short names and their common aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "throughput" | "throughput-based" | "dash" => Ok(StrategyKind::ThroughputBased),
            "smoothed" | "smoothed-throughput" | "conventional" => {
                Ok(StrategyKind::SmoothedThroughputBased)
            }
            "buffer" | "buffer-based" | "bba" => Ok(StrategyKind::BufferBased),
            "extension" | "proposed" => Ok(StrategyKind::Extension),
            _ => Err(AdaptationError::UnknownStrategy {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When the chosen request may be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReleasePolicy {
    Immediate,
    /// Buffer full; wait this long before requesting.
    Deferred(Duration),
}

/// Outcome of one adaptation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdaptationDecision {
    pub bitrate_bps: u32,
    pub release: ReleasePolicy,
    pub switched: bool,
    pub switch_count: u32,
}

/// Runs the session's strategy once per request.
#[derive(Debug)]
pub struct RateAdaptationEngine {
    ladder: Arc<BitrateLadder>,
    strategy: Box<dyn AdaptationStrategy>,
    state: AdaptationState,
    max_buffer_ms: u32,
    chunk_duration: Duration,
    probe_estimate_bps: Option<f64>,
}

impl RateAdaptationEngine {
    pub fn new(
        ladder: Arc<BitrateLadder>,
        kind: StrategyKind,
        max_buffer_ms: u32,
        chunk_duration: Duration,
    ) -> Self {
        Self::with_strategy(ladder, kind.build(), max_buffer_ms, chunk_duration)
    }

    /// Uses a caller-supplied strategy.
    pub fn with_strategy(
        ladder: Arc<BitrateLadder>,
        strategy: Box<dyn AdaptationStrategy>,
        max_buffer_ms: u32,
        chunk_duration: Duration,
    ) -> Self {
        Self {
            ladder,
            strategy,
            state: AdaptationState::default(),
            max_buffer_ms,
            chunk_duration,
            probe_estimate_bps: None,
        }
    }

    /// Chooses the bitrate and release time of the next request.
    ///
    /// Called once before every request, including the first. The first call
    /// never counts as a switch.
    pub fn decide(&mut self, last_throughput_bps: Option<f64>, buffered_ms: u32) -> AdaptationDecision {
        if self.state.next_bitrate == 0 {
            self.state.next_bitrate = self.ladder.lowest();
        }

        let input = AdaptationInput {
            ladder: &self.ladder,
            last_throughput_bps,
            buffered_ms,
            probe_estimate_bps: self.probe_estimate_bps,
        };
        let proposed = self.strategy.select(&input, &mut self.state);

        // Custom strategies may propose off-ladder rates; snap down to a rung.
        let bitrate = if self.ladder.index_of(proposed).is_some() {
            proposed
        } else {
            self.ladder
                .highest_not_exceeding(f64::from(proposed))
                .unwrap_or_else(|| self.ladder.lowest())
        };

        let previous = self.state.previous_bitrate;
        let switched = previous != 0 && bitrate != previous;
        if switched {
            self.state.switch_count += 1;
        }
        self.state.previous_bitrate = bitrate;
        self.state.next_bitrate = bitrate;
        self.state.decisions += 1;

        let release = if buffered_ms < self.max_buffer_ms {
            ReleasePolicy::Immediate
        } else {
            ReleasePolicy::Deferred(self.chunk_duration)
        };

        tracing::debug!(
            strategy = self.strategy.name(),
            throughput_bps = ?last_throughput_bps,
            buffered_ms,
            bitrate,
            switched,
            "Adaptation decision"
        );

        AdaptationDecision {
            bitrate_bps: bitrate,
            release,
            switched,
            switch_count: self.state.switch_count,
        }
    }

    /// Feeds a bandwidth estimate from a probe session into later decisions.
    pub fn observe_probe_estimate(&mut self, available_bps: f64) {
        self.probe_estimate_bps = Some(available_bps);
    }

    pub fn state(&self) -> &AdaptationState {
        &self.state
    }

    pub fn ladder(&self) -> &BitrateLadder {
        &self.ladder
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }
}
