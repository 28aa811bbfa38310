//! Fluid model of a single bottleneck link shared with competing traffic.

use std::time::Duration;

use dashload_core::SimTime;
use dashload_core::config::PathConfig;
use serde::Serialize;

/// Share of capacity left to the measured flow even under full competing load.
const MIN_SHARE_DIVISOR: u64 = 100;

/// Piecewise-constant competing load over time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossTrafficSchedule {
    /// `(from, bps)` pairs sorted by time; the first entry starts at zero.
    changes: Vec<(SimTime, u64)>,
}

impl CrossTrafficSchedule {
    /// Constant load of `bps` for the whole run.
    pub fn constant(bps: u64) -> Self {
        Self {
            changes: vec![(SimTime::ZERO, bps)],
        }
    }

    /// Changes the load to `bps` from `at` onward.
    pub fn with_change(mut self, at: SimTime, bps: u64) -> Self {
        match self.changes.binary_search_by_key(&at, |&(from, _)| from) {
            Ok(index) => self.changes[index].1 = bps,
            Err(index) => self.changes.insert(index, (at, bps)),
        }
        self
    }

    /// Source of `bps` switching on for `on`, then off for `off`, from `start` until `until`.
    pub fn on_off(bps: u64, on: Duration, off: Duration, start: SimTime, until: SimTime) -> Self {
        let mut schedule = Self::constant(0);
        if on.is_zero() {
            return schedule;
        }
        let mut at = start;
        while at < until {
            schedule = schedule.with_change(at, bps);
            at += on;
            schedule = schedule.with_change(at, 0);
            at += off;
        }
        schedule
    }

    /// Competing load at `at`.
    pub fn competing_at(&self, at: SimTime) -> u64 {
        self.changes
            .iter()
            .take_while(|&&(from, _)| from <= at)
            .last()
            .map(|&(_, bps)| bps)
            .unwrap_or(0)
    }

    pub fn changes(&self) -> &[(SimTime, u64)] {
        &self.changes
    }
}

/// When a packet leaves the bottleneck and when it reaches the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    pub departs_at: SimTime,
    pub arrives_at: SimTime,
}

/// FIFO bottleneck link with propagation delay.
///
/// Competing load is not queued as packets; it lowers the service rate seen
/// by the measured flow to `capacity - competing`.
#[derive(Debug, Clone)]
pub struct BottleneckPath {
    capacity_bps: u64,
    propagation_delay: Duration,
    cross_traffic: CrossTrafficSchedule,
    busy_until: SimTime,
    bytes_carried: u64,
}

impl BottleneckPath {
    pub fn new(capacity_bps: u64, propagation_delay: Duration) -> Self {
        Self {
            capacity_bps: capacity_bps.max(1),
            propagation_delay,
            cross_traffic: CrossTrafficSchedule::constant(0),
            busy_until: SimTime::ZERO,
            bytes_carried: 0,
        }
    }

    pub fn from_config(config: &PathConfig) -> Self {
        Self::new(
            config.capacity_bps,
            Duration::from_micros(config.propagation_delay_us),
        )
        .with_cross_traffic(CrossTrafficSchedule::constant(config.competing_bps))
    }

    pub fn with_cross_traffic(mut self, schedule: CrossTrafficSchedule) -> Self {
        self.cross_traffic = schedule;
        self
    }

    pub fn set_cross_traffic(&mut self, schedule: CrossTrafficSchedule) {
        self.cross_traffic = schedule;
    }

    /// Service rate available to the measured flow at `at`.
    pub fn effective_rate_bps(&self, at: SimTime) -> u64 {
        let floor = (self.capacity_bps / MIN_SHARE_DIVISOR).max(1);
        self.capacity_bps
            .saturating_sub(self.cross_traffic.competing_at(at))
            .max(floor)
    }

    /// Time to serialize `bytes` at the rate available at `at`.
    pub fn service_time(&self, bytes: u32, at: SimTime) -> Duration {
        let bits = u64::from(bytes) * 8 * 1_000_000;
        Duration::from_micros(bits.div_ceil(self.effective_rate_bps(at)))
    }

    /// Queues `bytes` entering the link at `now`.
    pub fn transmit(&mut self, now: SimTime, bytes: u32) -> Transmission {
        let start = now.max(self.busy_until);
        let departs_at = start + self.service_time(bytes, start);
        self.busy_until = departs_at;
        self.bytes_carried += u64::from(bytes);
        Transmission {
            departs_at,
            arrives_at: departs_at + self.propagation_delay,
        }
    }

    /// Time the last queued packet reaches the receiver.
    pub fn quiescent_at(&self) -> SimTime {
        self.busy_until + self.propagation_delay
    }

    pub fn capacity_bps(&self) -> u64 {
        self.capacity_bps
    }

    pub fn propagation_delay(&self) -> Duration {
        self.propagation_delay
    }

    pub fn busy_until(&self) -> SimTime {
        self.busy_until
    }

    pub fn bytes_carried(&self) -> u64 {
        self.bytes_carried
    }
}
