//! Dashload Core - adaptive streaming and bandwidth probing logic
//!
//! Host-independent state machines for the closed adaptation loop of a
//! chunked streaming client: the chunk transfer protocol, the playback buffer
//! model, the rate adaptation strategies and the packet-train bandwidth probe.
//! Nothing here reads a clock or touches the network; hosts feed events and
//! timestamps in and act on the returned decisions.

pub mod adaptation;
pub mod buffer;
pub mod config;
pub mod ladder;
pub mod probe;
pub mod time;
pub mod tracing_setup;
pub mod transfer;

// Re-export main types for convenient access
pub use adaptation::{
    AdaptationDecision, AdaptationError, AdaptationState, AdaptationStrategy,
    RateAdaptationEngine, ReleasePolicy, StrategyKind,
};
pub use buffer::{DrainOutcome, FillOutcome, PlaybackBuffer, StallPolicy};
pub use config::DashloadConfig;
pub use ladder::{BitrateLadder, LadderError};
pub use probe::{ProbeError, ProbeSession, RateSweep};
pub use time::SimTime;
pub use transfer::{ChunkReceiver, ChunkRequest, ChunkSender, TransferError};

/// Errors that can bubble up from any dashload subsystem.
#[derive(Debug, thiserror::Error)]
pub enum DashloadError {
    #[error("Ladder error: {0}")]
    Ladder(#[from] LadderError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Adaptation error: {0}")]
    Adaptation(#[from] AdaptationError),

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DashloadError {
    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            DashloadError::Configuration { .. }
                | DashloadError::Ladder(_)
                | DashloadError::Adaptation(_)
                | DashloadError::Probe(ProbeError::InvalidConfiguration { .. })
                | DashloadError::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DashloadError>;
