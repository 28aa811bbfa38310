//! Bitrate ladder shared read-only by every client session.

use serde::{Deserialize, Serialize};

/// Errors raised while building a bitrate ladder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LadderError {
    #[error("Bitrate ladder is empty")]
    Empty,

    #[error("Bitrate ladder contains a zero rung at index {index}")]
    ZeroRung { index: usize },

    #[error("Bitrate ladder is not strictly ascending at index {index}: {previous} then {current}")]
    NotAscending {
        index: usize,
        previous: u32,
        current: u32,
    },
}

/// Ordered set of representation bitrates in bits per second.
///
/// Rungs are strictly ascending and non-zero. The ladder is immutable once
/// built; sessions share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct BitrateLadder {
    rungs: Vec<u32>,
}

impl BitrateLadder {
    /// Builds a ladder from rungs given in ascending order.
    ///
    /// # Errors
    ///
    /// - `LadderError::Empty` - No rungs supplied
    /// - `LadderError::ZeroRung` - A rung of 0 bps
    /// - `LadderError::NotAscending` - Duplicate or out-of-order rungs
    pub fn new(rungs: Vec<u32>) -> Result<Self, LadderError> {
        if rungs.is_empty() {
            return Err(LadderError::Empty);
        }
        if let Some(index) = rungs.iter().position(|&rung| rung == 0) {
            return Err(LadderError::ZeroRung { index });
        }
        for (index, pair) in rungs.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(LadderError::NotAscending {
                    index: index + 1,
                    previous: pair[0],
                    current: pair[1],
                });
            }
        }
        Ok(Self { rungs })
    }

    /// Evenly spaced ladder `step, 2*step, ..., count*step`.
    pub fn evenly_spaced(step: u32, count: u32) -> Result<Self, LadderError> {
        let rungs = (1..=count).map(|i| step.saturating_mul(i)).collect();
        Self::new(rungs)
    }

    pub fn rungs(&self) -> &[u32] {
        &self.rungs
    }

    pub fn len(&self) -> usize {
        self.rungs.len()
    }

    /// Always false; a ladder holds at least one rung.
    pub fn is_empty(&self) -> bool {
        self.rungs.is_empty()
    }

    pub fn lowest(&self) -> u32 {
        self.rungs[0]
    }

    pub fn highest(&self) -> u32 {
        self.rungs[self.rungs.len() - 1]
    }

    pub fn rung(&self, index: usize) -> Option<u32> {
        self.rungs.get(index).copied()
    }

    pub fn index_of(&self, bitrate: u32) -> Option<usize> {
        self.rungs.binary_search(&bitrate).ok()
    }

    /// Highest rung not exceeding `bits_per_second`.
    ///
    /// Scans ascending and keeps the last rung that still fits. Returns `None`
    /// when even the lowest rung exceeds the throughput, so callers can leave
    /// their previous selection in place.
    pub fn highest_not_exceeding(&self, bits_per_second: f64) -> Option<u32> {
        self.rungs
            .iter()
            .copied()
            .take_while(|&rung| f64::from(rung) <= bits_per_second)
            .last()
    }
}

impl Default for BitrateLadder {
    /// 700 kbps to 4.2 Mbps in 700 kbps steps.
    fn default() -> Self {
        Self {
            rungs: vec![700_000, 1_400_000, 2_100_000, 2_800_000, 3_500_000, 4_200_000],
        }
    }
}

impl TryFrom<Vec<u32>> for BitrateLadder {
    type Error = LadderError;

    fn try_from(rungs: Vec<u32>) -> Result<Self, Self::Error> {
        Self::new(rungs)
    }
}

impl From<BitrateLadder> for Vec<u32> {
    fn from(ladder: BitrateLadder) -> Self {
        ladder.rungs
    }
}
