//! One-way-delay trend tests over a received train.

use serde::Serialize;

use super::train::ProbeTrain;

/// PCT above this marks a group as increasing.
pub const PCT_INCREASING_THRESHOLD: f64 = 0.55;
/// PDT above this marks a group as increasing.
pub const PDT_INCREASING_THRESHOLD: f64 = 0.4;

/// Indicators of one group of consecutive packets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroupTrend {
    /// Pairwise comparison test: share of pairs whose delay grew.
    pub pct: f64,
    /// Pairwise difference test: net delay change over total variation.
    pub pdt: f64,
}

impl GroupTrend {
    pub fn pct_increasing(&self) -> bool {
        self.pct > PCT_INCREASING_THRESHOLD
    }

    pub fn pdt_increasing(&self) -> bool {
        self.pdt > PDT_INCREASING_THRESHOLD
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub group_size: usize,
    pub groups: Vec<GroupTrend>,
    pub pct_increasing: usize,
    pub pdt_increasing: usize,
}

impl TrendReport {
    /// True when most groups show increasing delay under both tests.
    pub fn is_increasing(&self) -> bool {
        let half = self.groups.len() / 2;
        !self.groups.is_empty() && self.pct_increasing > half && self.pdt_increasing > half
    }
}

/// Splits the train's one-way delays into groups of `group_size` and tests each.
///
/// Packets missing either timestamp are skipped. A trailing partial group is
/// ignored, as is any `group_size` below 2.
pub fn analyze(train: &ProbeTrain, group_size: usize) -> TrendReport {
    let delays = train.one_way_delays_us();
    let groups: Vec<GroupTrend> = if group_size < 2 {
        Vec::new()
    } else {
        delays.chunks_exact(group_size).map(group_trend).collect()
    };

    TrendReport {
        group_size,
        pct_increasing: groups.iter().filter(|g| g.pct_increasing()).count(),
        pdt_increasing: groups.iter().filter(|g| g.pdt_increasing()).count(),
        groups,
    }
}

fn group_trend(delays: &[i64]) -> GroupTrend {
    let pairs = delays.len() - 1;
    let increases = delays.windows(2).filter(|pair| pair[1] > pair[0]).count();
    let pct = increases as f64 / pairs as f64;

    let variation: i64 = delays.windows(2).map(|pair| (pair[1] - pair[0]).abs()).sum();
    let pdt = if variation == 0 {
        0.0
    } else {
        (delays[pairs] - delays[0]) as f64 / variation as f64
    };

    GroupTrend { pct, pdt }
}
