//! Integration tests for dashload
//!
//! These tests drive the core state machines through the simulation host and
//! check behavior that only shows up when the components run together.

#[path = "integration/end_to_end.rs"]
mod end_to_end;

#[path = "integration/strategies.rs"]
mod strategies;

#[path = "integration/stalls.rs"]
mod stalls;

#[path = "integration/connection_failure.rs"]
mod connection_failure;

#[path = "integration/slops_probing.rs"]
mod slops_probing;

#[path = "integration/topp_sweep.rs"]
mod topp_sweep;
