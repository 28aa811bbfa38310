//! Errors raised by the simulation host.

use dashload_core::{DashloadError, ProbeError, TransferError};
use thiserror::Error;

/// Errors that can occur during simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Event queue exceeded maximum capacity
    #[error("Event queue overflow: {count} events scheduled")]
    EventQueueOverflow {
        /// Number of queued events when scheduling failed
        count: usize,
    },

    /// Too many invariant violations occurred
    #[error("Too many invariant violations: {count}")]
    TooManyInvariantViolations {
        /// Number of violations that occurred
        count: usize,
    },

    /// Event could not be scheduled properly
    #[error("Invalid event scheduling: {reason}")]
    InvalidEventScheduling {
        /// Reason why scheduling failed
        reason: String,
    },

    /// Deterministic seed required but not provided
    #[error("No deterministic seed provided")]
    NoDeterministicSeed,

    /// Configuration rejected before the run started
    #[error("Invalid simulation setup: {0}")]
    Setup(#[from] DashloadError),

    /// Transfer protocol misuse by the host
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Probe protocol misuse by the host
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),
}
