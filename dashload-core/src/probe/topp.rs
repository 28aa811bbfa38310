//! Trains of packet pairs: sweeping offered rates and measuring what the path delivers.

use serde::Serialize;

use super::ProbeError;
use super::train::ProbeTrain;

/// One offered rate of the sweep and its packet spacing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepStep {
    pub offered_rate_bps: u64,
    pub packet_interval_us: u64,
}

/// Measurement of one train of the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateSample {
    pub step: usize,
    pub offered_rate_bps: u64,
    pub offered_interval_us: u64,
    /// Mean gap between consecutive received packets.
    pub observed_gap_us: f64,
    pub bytes_received: u64,
    pub expected: u32,
    pub received: u32,
    pub measured_bps: f64,
}

impl RateSample {
    /// Fraction of the offered rate the path delivered.
    pub fn tracking_ratio(&self) -> f64 {
        if self.offered_rate_bps == 0 {
            return 0.0;
        }
        self.measured_bps / self.offered_rate_bps as f64
    }
}

/// Increasing sequence of offered rates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateSweep {
    steps: Vec<SweepStep>,
    packet_size: u32,
    train_size: u32,
}

impl RateSweep {
    /// Builds a sweep from offered rates, deriving each packet interval.
    ///
    /// # Errors
    ///
    /// - `ProbeError::InvalidConfiguration` - Empty, zero or non-increasing rates, or a train shorter than two packets
    pub fn new(rates_bps: &[u64], packet_size: u32, train_size: u32) -> Result<Self, ProbeError> {
        let steps = rates_bps
            .iter()
            .map(|&rate| SweepStep {
                offered_rate_bps: rate,
                packet_interval_us: interval_for_rate(packet_size, rate),
            })
            .collect();
        Self::from_steps(steps, packet_size, train_size)
    }

    /// Builds a sweep from explicit rate and interval pairs.
    pub fn from_steps(
        steps: Vec<SweepStep>,
        packet_size: u32,
        train_size: u32,
    ) -> Result<Self, ProbeError> {
        if steps.is_empty() {
            return Err(invalid("sweep has no rates"));
        }
        if packet_size == 0 {
            return Err(invalid("packet size must be positive"));
        }
        if train_size < 2 {
            return Err(invalid("sweep trains need at least two packets"));
        }
        if steps
            .iter()
            .any(|s| s.offered_rate_bps == 0 || s.packet_interval_us == 0)
        {
            return Err(invalid("sweep rates and intervals must be positive"));
        }
        if steps
            .windows(2)
            .any(|pair| pair[1].offered_rate_bps <= pair[0].offered_rate_bps)
        {
            return Err(invalid("sweep rates must be strictly increasing"));
        }
        Ok(Self {
            steps,
            packet_size,
            train_size,
        })
    }

    pub fn steps(&self) -> &[SweepStep] {
        &self.steps
    }

    pub fn packet_size(&self) -> u32 {
        self.packet_size
    }

    pub fn train_size(&self) -> u32 {
        self.train_size
    }

    /// Measures the train sent for step `index`.
    ///
    /// The realized rate is the offered rate of the received bytes scaled by
    /// how much the path stretched the spacing:
    /// `bytes*8 / (received * interval) * (interval / observed_gap)`.
    /// This is `(bytes*8) * (interval / observed_gap)` spread over the
    /// `received * interval` the arrivals would span at the offered rate, and
    /// reduces to `bytes*8 / (received * observed_gap)`.
    /// Returns `None` for an unknown step or a train with fewer than two arrivals.
    pub fn measure(&self, index: usize, train: &ProbeTrain) -> Option<RateSample> {
        let step = self.steps.get(index)?;
        let received = train.received();
        if received < 2 {
            return None;
        }

        let observed_gap_us = train.destination_gap_sum_us() as f64 / f64::from(received - 1);
        if observed_gap_us <= 0.0 {
            return None;
        }

        let bytes_received = train.bytes_received();
        let interval_secs = step.packet_interval_us as f64 / 1_000_000.0;
        let received_rate_bps = (bytes_received * 8) as f64 / (f64::from(received) * interval_secs);
        let measured_bps = received_rate_bps * (step.packet_interval_us as f64 / observed_gap_us);

        Some(RateSample {
            step: index,
            offered_rate_bps: step.offered_rate_bps,
            offered_interval_us: step.packet_interval_us,
            observed_gap_us,
            bytes_received,
            expected: train.expected(),
            received,
            measured_bps,
        })
    }
}

/// Interval between `packet_size`-byte packets sent at `rate_bps`, at least 1 µs.
pub fn interval_for_rate(packet_size: u32, rate_bps: u64) -> u64 {
    if rate_bps == 0 {
        return 0;
    }
    (u64::from(packet_size) * 8 * 1_000_000 / rate_bps).max(1)
}

fn invalid(reason: &str) -> ProbeError {
    ProbeError::InvalidConfiguration {
        reason: reason.to_string(),
    }
}

/// Where the realized rate stops following the offered rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TurningPoint {
    pub step: usize,
    /// Highest offered rate the path still tracked, 0 if none did.
    pub lower_bound_bps: u64,
    /// First offered rate the path failed to track.
    pub upper_bound_bps: u64,
}

/// Post-processing rule locating the turning point in a sweep.
pub trait TurningPointDetector {
    fn detect(&self, samples: &[RateSample]) -> Option<TurningPoint>;
}

/// First sample whose realized/offered ratio drops below `min_ratio`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingRatioDetector {
    pub min_ratio: f64,
}

impl TrackingRatioDetector {
    pub fn new(min_ratio: f64) -> Self {
        Self { min_ratio }
    }
}

impl TurningPointDetector for TrackingRatioDetector {
    fn detect(&self, samples: &[RateSample]) -> Option<TurningPoint> {
        let position = samples
            .iter()
            .position(|sample| sample.tracking_ratio() < self.min_ratio)?;
        let lower_bound_bps = position
            .checked_sub(1)
            .map(|prev| samples[prev].offered_rate_bps)
            .unwrap_or(0);
        Some(TurningPoint {
            step: samples[position].step,
            lower_bound_bps,
            upper_bound_bps: samples[position].offered_rate_bps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SimTime;

    fn train_with_gaps(packets: u32, send_gap: u64, recv_gap: u64) -> ProbeTrain {
        let mut train = ProbeTrain::new(packets, 750);
        for seq in 0..packets {
            let seq64 = u64::from(seq);
            train.record_departure(seq, SimTime::from_micros(seq64 * send_gap));
            train.record_arrival(seq, SimTime::from_micros(2_000 + seq64 * recv_gap));
        }
        train
    }

    #[test]
    fn test_intervals_from_rates() {
        let sweep = RateSweep::new(&[1_000_000, 2_000_000, 6_000_000], 750, 20).unwrap();
        let intervals: Vec<u64> = sweep.steps().iter().map(|s| s.packet_interval_us).collect();
        assert_eq!(intervals, vec![6_000, 3_000, 1_000]);
    }

    #[test]
    fn test_measure_tracks_when_undispersed() {
        let sweep = RateSweep::new(&[2_000_000], 750, 20).unwrap();
        let sample = sweep.measure(0, &train_with_gaps(20, 3_000, 3_000)).unwrap();
        assert!((sample.measured_bps - 2_000_000.0).abs() < 1e-6);
        assert!((sample.tracking_ratio() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_measure_reports_bottleneck_rate_when_dispersed() {
        let sweep = RateSweep::new(&[12_000_000], 750, 20).unwrap();
        // 500 us offered spacing stretched to 1000 us: 6 Mbps delivered.
        let sample = sweep.measure(0, &train_with_gaps(20, 500, 1_000)).unwrap();
        assert!((sample.measured_bps - 6_000_000.0).abs() < 1e-6);
        assert!((sample.tracking_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_measure_counts_only_received_bytes() {
        let sweep = RateSweep::new(&[2_000_000], 750, 20).unwrap();
        let mut train = ProbeTrain::new(20, 750);
        for seq in 0..20u32 {
            train.record_departure(seq, SimTime::from_micros(u64::from(seq) * 3_000));
        }
        // Half the train arrives, spread to twice the offered spacing.
        for seq in 0..10u32 {
            train.record_arrival(seq, SimTime::from_micros(2_000 + u64::from(seq) * 6_000));
        }

        let sample = sweep.measure(0, &train).unwrap();
        assert_eq!(sample.received, 10);
        assert_eq!(sample.bytes_received, 7_500);
        let per_arrival_bps = 7_500.0 * 8.0 / (10.0 * 0.006);
        assert!((sample.measured_bps - per_arrival_bps).abs() < 1e-6);
        assert!((sample.measured_bps - 1_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_measure_needs_two_arrivals() {
        let sweep = RateSweep::new(&[2_000_000], 750, 20).unwrap();
        let train = ProbeTrain::new(20, 750);
        assert!(sweep.measure(0, &train).is_none());
        assert!(sweep.measure(3, &train_with_gaps(20, 1, 1)).is_none());
    }

    #[test]
    fn test_rejects_bad_sweeps() {
        assert!(RateSweep::new(&[], 750, 20).is_err());
        assert!(RateSweep::new(&[2_000_000, 1_000_000], 750, 20).is_err());
        assert!(RateSweep::new(&[1_000_000], 750, 1).is_err());
        assert!(RateSweep::new(&[0, 1_000_000], 750, 20).is_err());
    }

    fn sample(step: usize, offered: u64, measured: f64) -> RateSample {
        RateSample {
            step,
            offered_rate_bps: offered,
            offered_interval_us: 0,
            observed_gap_us: 0.0,
            bytes_received: 0,
            expected: 0,
            received: 0,
            measured_bps: measured,
        }
    }

    #[test]
    fn test_tracking_ratio_detector() {
        let samples = vec![
            sample(0, 2_000_000, 2_000_000.0),
            sample(1, 4_000_000, 3_950_000.0),
            sample(2, 6_000_000, 5_900_000.0),
            sample(3, 8_000_000, 6_100_000.0),
            sample(4, 10_000_000, 6_000_000.0),
        ];

        let point = TrackingRatioDetector::new(0.9).detect(&samples).unwrap();
        assert_eq!(point.step, 3);
        assert_eq!(point.lower_bound_bps, 6_000_000);
        assert_eq!(point.upper_bound_bps, 8_000_000);

        assert!(TrackingRatioDetector::new(0.5).detect(&samples).is_none());
    }

    #[test]
    fn test_detector_first_sample_untracked() {
        let samples = vec![sample(0, 2_000_000, 500_000.0)];
        let point = TrackingRatioDetector::new(0.9).detect(&samples).unwrap();
        assert_eq!(point.lower_bound_bps, 0);
    }
}
