//! Dashload Simulation Host - Deterministic runs of streaming and probing sessions.

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! Every run is driven by a single-threaded event scheduler over a simulated
//! bottleneck path, so the same configuration and seed always produce the
//! same report.
//!
//! # Features
//!
//! - **Streaming Sessions**: Adaptive client and chunk server over a stream transport
//! - **SLoPS Probing**: Probe trains over a lossy datagram path until convergence
//! - **TOPP Sweeps**: One train per offered rate with optional turning-point detection
//! - **Cross Traffic**: Time-varying competing load on the bottleneck
//! - **Invariant Checking**: Buffer bounds and request pipelining checked after every event
//!
//! # Example
//!
//! ```rust,no_run
//! use dashload_core::DashloadConfig;
//! use dashload_sim::{Scenario, StreamingSimulation};
//! use dashload_core::SimTime;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DashloadConfig::for_testing();
//! let horizon = SimTime::from_millis(config.streaming.stop_ms);
//!
//! let report = StreamingSimulation::new(&config)?
//!     .with_cross_traffic(Scenario::DropAndRecover.cross_traffic(horizon))
//!     .run()?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod invariants;
pub mod path;
pub mod probing;
pub mod scenarios;
pub mod scheduler;
pub mod streaming;
pub mod sweep;
pub mod transport;

pub use clock::{DeterministicRng, SimClock};
pub use error::SimulationError;
pub use invariants::{
    BufferBoundsInvariant, Invariant, InvariantViolation, SessionSnapshot,
    SingleOutstandingRequestInvariant, SwitchCountInvariant, standard_invariants,
};
pub use path::{BottleneckPath, CrossTrafficSchedule};
pub use probing::{ProbeReport, ProbeSimulation};
pub use scenarios::{Scenario, pathload_testbed};
pub use scheduler::{EventHandle, EventScheduler, MAX_EVENT_QUEUE_SIZE};
pub use streaming::{BitratePoint, ChunkRecord, StateDump, StreamingReport, StreamingSimulation};
pub use sweep::{SweepReport, SweepSimulation};
pub use transport::{DatagramTransport, Delivery, StreamTransport};

/// Maximum number of invariant violations before stopping simulation.
pub const MAX_INVARIANT_VIOLATIONS: usize = 10;
