//! Invariant checking for streaming sessions.

use std::fmt;
use std::sync::Arc;

use dashload_core::SimTime;
use serde::Serialize;

/// Session state observed after every processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub at: SimTime,
    pub buffered_ms: u32,
    pub max_buffer_ms: u32,
    /// Requests in flight plus requests waiting on a release timer.
    pub outstanding_requests: u32,
    pub switch_count: u32,
    pub decisions: u64,
}

/// Violation of a simulation invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: String,
    /// Detailed description of the violation
    pub description: String,
    /// When the violation occurred
    pub timestamp: SimTime,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invariant '{}' violated at {}: {}",
            self.invariant, self.timestamp, self.description
        )
    }
}

/// Trait for checking simulation invariants.
pub trait Invariant: Send + Sync {
    /// Checks if invariant holds for the current snapshot.
    ///
    /// # Errors
    /// Returns `InvariantViolation` if the invariant condition is not met.
    fn check(&self, snapshot: &SessionSnapshot) -> Result<(), InvariantViolation>;

    /// Returns name of this invariant.
    fn name(&self) -> &str;

    fn violation(&self, snapshot: &SessionSnapshot, description: String) -> InvariantViolation {
        InvariantViolation {
            invariant: self.name().to_string(),
            description,
            timestamp: snapshot.at,
        }
    }
}

/// Buffer level stays within `[0, max]`.
pub struct BufferBoundsInvariant;

impl Invariant for BufferBoundsInvariant {
    fn check(&self, snapshot: &SessionSnapshot) -> Result<(), InvariantViolation> {
        if snapshot.buffered_ms > snapshot.max_buffer_ms {
            return Err(self.violation(
                snapshot,
                format!(
                    "Buffered {} ms exceeds maximum {} ms",
                    snapshot.buffered_ms, snapshot.max_buffer_ms
                ),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "BufferBounds"
    }
}

/// No request pipelining.
pub struct SingleOutstandingRequestInvariant;

impl Invariant for SingleOutstandingRequestInvariant {
    fn check(&self, snapshot: &SessionSnapshot) -> Result<(), InvariantViolation> {
        if snapshot.outstanding_requests > 1 {
            return Err(self.violation(
                snapshot,
                format!("{} requests outstanding", snapshot.outstanding_requests),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "SingleOutstandingRequest"
    }
}

/// The first decision never counts as a switch.
pub struct SwitchCountInvariant;

impl Invariant for SwitchCountInvariant {
    fn check(&self, snapshot: &SessionSnapshot) -> Result<(), InvariantViolation> {
        let allowed = snapshot.decisions.saturating_sub(1);
        if u64::from(snapshot.switch_count) > allowed {
            return Err(self.violation(
                snapshot,
                format!(
                    "{} switches after {} decisions",
                    snapshot.switch_count, snapshot.decisions
                ),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "SwitchCount"
    }
}

/// The invariants every streaming run checks by default.
pub fn standard_invariants() -> Vec<Arc<dyn Invariant>> {
    vec![
        Arc::new(BufferBoundsInvariant),
        Arc::new(SingleOutstandingRequestInvariant),
        Arc::new(SwitchCountInvariant),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            at: SimTime::from_millis(5),
            buffered_ms: 10_000,
            max_buffer_ms: 30_000,
            outstanding_requests: 1,
            switch_count: 2,
            decisions: 5,
        }
    }

    #[test]
    fn test_healthy_snapshot_passes() {
        for invariant in standard_invariants() {
            assert!(invariant.check(&snapshot()).is_ok(), "{}", invariant.name());
        }
    }

    #[test]
    fn test_buffer_overflow_detected() {
        let bad = SessionSnapshot {
            buffered_ms: 30_001,
            ..snapshot()
        };
        let violation = BufferBoundsInvariant.check(&bad).unwrap_err();
        assert_eq!(violation.invariant, "BufferBounds");
        assert_eq!(violation.timestamp, SimTime::from_millis(5));
        assert!(violation.to_string().contains("30001"));
    }

    #[test]
    fn test_pipelining_detected() {
        let bad = SessionSnapshot {
            outstanding_requests: 2,
            ..snapshot()
        };
        assert!(SingleOutstandingRequestInvariant.check(&bad).is_err());
    }

    #[test]
    fn test_switch_on_first_decision_detected() {
        let bad = SessionSnapshot {
            switch_count: 1,
            decisions: 1,
            ..snapshot()
        };
        assert!(SwitchCountInvariant.check(&bad).is_err());
    }
}
