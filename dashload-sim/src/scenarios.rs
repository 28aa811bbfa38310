//! Cross-traffic scenarios of the reference testbed.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use dashload_core::SimTime;
use dashload_core::config::DashloadConfig;

use crate::path::CrossTrafficSchedule;

/// Competing-load pattern on the streaming path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    /// No competing traffic.
    Steady,
    /// 1 Mbps source toggling every 50 s from 50 s on.
    FrequentChange,
    /// 4 Mbps from 100 s to 200 s.
    DropAndRecover,
    /// 4 Mbps from 100 s until the end.
    DropAndHold,
}

const ON_OFF_PERIOD: Duration = Duration::from_secs(50);
const ON_OFF_RATE_BPS: u64 = 1_000_000;
const DROP_RATE_BPS: u64 = 4_000_000;
const DROP_START: SimTime = SimTime::from_secs(100);
const DROP_END: SimTime = SimTime::from_secs(200);

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::Steady,
        Scenario::FrequentChange,
        Scenario::DropAndRecover,
        Scenario::DropAndHold,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::Steady => "steady",
            Scenario::FrequentChange => "frequent-change",
            Scenario::DropAndRecover => "drop-and-recover",
            Scenario::DropAndHold => "drop-and-hold",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Scenario::Steady => "no competing traffic",
            Scenario::FrequentChange => "1 Mbps on/off every 50 s",
            Scenario::DropAndRecover => "4 Mbps between 100 s and 200 s",
            Scenario::DropAndHold => "4 Mbps from 100 s on",
        }
    }

    /// Competing load for a run ending at `horizon`.
    pub fn cross_traffic(self, horizon: SimTime) -> CrossTrafficSchedule {
        match self {
            Scenario::Steady => CrossTrafficSchedule::constant(0),
            Scenario::FrequentChange => CrossTrafficSchedule::on_off(
                ON_OFF_RATE_BPS,
                ON_OFF_PERIOD,
                ON_OFF_PERIOD,
                SimTime::ZERO + ON_OFF_PERIOD,
                horizon,
            ),
            Scenario::DropAndRecover => CrossTrafficSchedule::constant(0)
                .with_change(DROP_START, DROP_RATE_BPS)
                .with_change(DROP_END, 0),
            Scenario::DropAndHold => {
                CrossTrafficSchedule::constant(0).with_change(DROP_START, DROP_RATE_BPS)
            }
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Scenario::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown scenario '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}

/// Probe testbed: 10 Mbps bottleneck with `competing_bps` of cross traffic.
pub fn pathload_testbed(competing_bps: u64) -> DashloadConfig {
    let mut config = DashloadConfig::default();
    config.simulation.probe_path.capacity_bps = 10_000_000;
    config.simulation.probe_path.competing_bps = competing_bps;
    config.probe.bottleneck_capacity_bps = 10_000_000;
    config
}
