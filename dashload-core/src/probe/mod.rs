//! Available-bandwidth probing with packet trains.
//!
//! Two measurement protocols share the [`ProbeTrain`] record:
//! - [`slops`]: search over the source gap until the train no longer queues
//! - [`topp`]: sweep of increasing offered rates for offline turning-point detection

pub mod slops;
pub mod topp;
pub mod train;
pub mod trend;

pub use slops::{
    BandwidthEstimate, PathEstimate, ProbeSession, ProbeStatus, RoundOutcome, RoundRecord,
    StepPolicy, TrainPlan,
};
pub use topp::{
    RateSample, RateSweep, SweepStep, TrackingRatioDetector, TurningPoint, TurningPointDetector,
};
pub use train::{ProbePacket, ProbeTrain};
pub use trend::{GroupTrend, TrendReport};

/// Errors from probe sessions and sweeps.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    #[error("Invalid probe configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("No probe round in progress")]
    NoActiveRound,

    #[error("Probe round {round} still in progress")]
    RoundInProgress { round: u32 },

    #[error("Probe session already finished: {status:?}")]
    SessionFinished { status: ProbeStatus },

    #[error("Packet {seq} is not part of the current train")]
    UnknownPacket { seq: u32 },
}
