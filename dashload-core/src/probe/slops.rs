//! Self-loading periodic streams: widening the source gap until the path stops queueing.
//!
//! Each round sends a train at the current source gap. When the destination
//! gaps grow relative to the source gaps the train overloaded the bottleneck,
//! so the next round sends slower. A round whose increase ratio falls below
//! the convergence threshold yields the estimate.

use serde::{Deserialize, Serialize};

use super::ProbeError;
use super::train::ProbeTrain;
use crate::config::ProbeConfig;
use crate::time::SimTime;

/// How the gap increment evolves between rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepPolicy {
    /// Same increment every round.
    #[default]
    Fixed,
    /// Increment halves after every non-converged round, down to 1 µs.
    Halving,
}

/// Search state of one probe session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathEstimate {
    pub source_gap_us: u64,
    pub next_source_gap_us: u64,
    pub step_us: u64,
    pub last_source_gap_sum_us: u64,
    pub increase_ratio: Option<f64>,
    pub converged: bool,
}

/// Converged available-bandwidth estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandwidthEstimate {
    pub bottleneck_capacity_bps: f64,
    pub competing_bps: f64,
    pub available_bps: f64,
    pub increase_ratio: f64,
    pub source_gap_us: u64,
    pub rounds: u32,
}

/// Overall status of a probe session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeStatus {
    Probing,
    Converged,
    RoundCapReached,
}

/// What to send for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainPlan {
    pub round: u32,
    pub packets: u32,
    pub packet_size: u32,
    pub gap_us: u64,
}

/// Result of closing a round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoundOutcome {
    Converged(BandwidthEstimate),
    /// Not converged; the next train uses the wider gap.
    Continue { next_source_gap_us: u64 },
    /// Fewer than two packets arrived; the gap is retried unchanged.
    Inconclusive { received: u32 },
    RoundCapReached,
}

/// Measurements of one finished round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundRecord {
    pub round: u32,
    pub source_gap_us: u64,
    pub offered_rate_bps: f64,
    pub source_gap_sum_us: u64,
    pub destination_gap_sum_us: u64,
    pub increase_ratio: Option<f64>,
    pub expected: u32,
    pub received: u32,
    pub lost: u32,
}

/// One SLoPS measurement between a prober server and client.
#[derive(Debug)]
pub struct ProbeSession {
    config: ProbeConfig,
    estimate: PathEstimate,
    rounds_started: u32,
    train: Option<ProbeTrain>,
    last_train: Option<ProbeTrain>,
    history: Vec<RoundRecord>,
    status: ProbeStatus,
    result: Option<BandwidthEstimate>,
}

impl ProbeSession {
    /// # Errors
    ///
    /// - `ProbeError::InvalidConfiguration` - Zero train size, packet size or gap, or a threshold outside (0, 1)
    pub fn new(config: ProbeConfig) -> Result<Self, ProbeError> {
        config.validate_slops()?;
        let estimate = PathEstimate {
            source_gap_us: config.initial_gap_us,
            next_source_gap_us: config.initial_gap_us,
            step_us: config.step_us,
            last_source_gap_sum_us: 0,
            increase_ratio: None,
            converged: false,
        };
        Ok(Self {
            config,
            estimate,
            rounds_started: 0,
            train: None,
            last_train: None,
            history: Vec::new(),
            status: ProbeStatus::Probing,
            result: None,
        })
    }

    /// Opens the next round at the current source gap.
    ///
    /// # Errors
    ///
    /// - `ProbeError::SessionFinished` - Already converged or capped
    /// - `ProbeError::RoundInProgress` - The previous round was not finished
    pub fn begin_round(&mut self) -> Result<TrainPlan, ProbeError> {
        if self.status != ProbeStatus::Probing {
            return Err(ProbeError::SessionFinished {
                status: self.status,
            });
        }
        if self.train.is_some() {
            return Err(ProbeError::RoundInProgress {
                round: self.rounds_started,
            });
        }

        self.rounds_started += 1;
        self.estimate.source_gap_us = self.estimate.next_source_gap_us;
        self.train = Some(ProbeTrain::new(
            self.config.train_size,
            self.config.packet_size,
        ));

        Ok(TrainPlan {
            round: self.rounds_started,
            packets: self.config.train_size,
            packet_size: self.config.packet_size,
            gap_us: self.estimate.source_gap_us,
        })
    }

    /// Server side: packet `seq` left at `at`.
    pub fn record_departure(&mut self, seq: u32, at: SimTime) -> Result<(), ProbeError> {
        let train = self.train.as_mut().ok_or(ProbeError::NoActiveRound)?;
        if train.record_departure(seq, at) {
            Ok(())
        } else {
            Err(ProbeError::UnknownPacket { seq })
        }
    }

    /// Client side: packet `seq` arrived at `at`.
    pub fn record_arrival(&mut self, seq: u32, at: SimTime) -> Result<(), ProbeError> {
        let train = self.train.as_mut().ok_or(ProbeError::NoActiveRound)?;
        if train.record_arrival(seq, at) {
            Ok(())
        } else {
            Err(ProbeError::UnknownPacket { seq })
        }
    }

    /// Closes the round and applies the convergence test.
    ///
    /// # Errors
    ///
    /// - `ProbeError::NoActiveRound` - No round was open
    pub fn finish_round(&mut self) -> Result<RoundOutcome, ProbeError> {
        let train = self.train.take().ok_or(ProbeError::NoActiveRound)?;
        let round = self.rounds_started;

        let source_sum = train.source_gap_sum_us();
        let destination_sum = train.destination_gap_sum_us();
        self.estimate.last_source_gap_sum_us = source_sum;

        let increase_ratio = (destination_sum > 0).then(|| {
            let ratio = (destination_sum as f64 - source_sum as f64) / destination_sum as f64;
            ratio.max(0.0)
        });
        self.estimate.increase_ratio = increase_ratio;

        self.history.push(RoundRecord {
            round,
            source_gap_us: self.estimate.source_gap_us,
            offered_rate_bps: self.offered_rate_bps(),
            source_gap_sum_us: source_sum,
            destination_gap_sum_us: destination_sum,
            increase_ratio,
            expected: train.expected(),
            received: train.received(),
            lost: train.lost(),
        });

        let received = train.received();
        self.last_train = Some(train);

        let outcome = match increase_ratio {
            Some(ratio) if ratio < self.config.convergence_threshold => {
                let capacity = self.config.bottleneck_capacity_bps as f64;
                let competing = capacity * ratio;
                let estimate = BandwidthEstimate {
                    bottleneck_capacity_bps: capacity,
                    competing_bps: competing,
                    available_bps: capacity - competing,
                    increase_ratio: ratio,
                    source_gap_us: self.estimate.source_gap_us,
                    rounds: round,
                };
                self.estimate.converged = true;
                self.status = ProbeStatus::Converged;
                self.result = Some(estimate);
                tracing::info!(
                    "Probe converged after {} rounds: available {:.0} bps, competing {:.0} bps",
                    round,
                    estimate.available_bps,
                    estimate.competing_bps
                );
                return Ok(RoundOutcome::Converged(estimate));
            }
            Some(ratio) => {
                self.estimate.next_source_gap_us =
                    self.estimate.source_gap_us + self.estimate.step_us;
                if self.config.step_policy == StepPolicy::Halving {
                    self.estimate.step_us = (self.estimate.step_us / 2).max(1);
                }
                tracing::debug!(
                    "Round {}: increase ratio {:.3}, next gap {} us",
                    round,
                    ratio,
                    self.estimate.next_source_gap_us
                );
                RoundOutcome::Continue {
                    next_source_gap_us: self.estimate.next_source_gap_us,
                }
            }
            None => {
                tracing::debug!(
                    "Round {}: only {} packets received, retrying gap {} us",
                    round,
                    received,
                    self.estimate.source_gap_us
                );
                RoundOutcome::Inconclusive { received }
            }
        };

        if round >= self.config.max_rounds {
            self.status = ProbeStatus::RoundCapReached;
            tracing::info!("Probe stopped at round cap of {}", self.config.max_rounds);
            return Ok(RoundOutcome::RoundCapReached);
        }

        Ok(outcome)
    }

    /// Rate of the train at the current source gap,
    /// `train_size * packet_size * 8 / (gap * train_size)`.
    pub fn offered_rate_bps(&self) -> f64 {
        offered_rate_bps(self.config.packet_size, self.estimate.source_gap_us)
    }

    pub fn estimate(&self) -> &PathEstimate {
        &self.estimate
    }

    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    pub fn status(&self) -> ProbeStatus {
        self.status
    }

    pub fn result(&self) -> Option<BandwidthEstimate> {
        self.result
    }

    pub fn rounds(&self) -> u32 {
        self.rounds_started
    }

    /// Train of the most recently finished round.
    pub fn last_train(&self) -> Option<&ProbeTrain> {
        self.last_train.as_ref()
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }
}

/// Bits per second of packets of `packet_size` bytes every `gap_us`.
pub fn offered_rate_bps(packet_size: u32, gap_us: u64) -> f64 {
    if gap_us == 0 {
        return f64::INFINITY;
    }
    f64::from(packet_size) * 8.0 * 1_000_000.0 / gap_us as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProbeConfig {
        ProbeConfig {
            train_size: 10,
            max_rounds: 5,
            ..ProbeConfig::default()
        }
    }

    /// Feeds a train whose packets depart every `plan.gap_us` and arrive every `dst_gap`.
    fn run_round(session: &mut ProbeSession, dst_gap: u64) -> RoundOutcome {
        let plan = session.begin_round().unwrap();
        for seq in 0..plan.packets {
            let seq64 = u64::from(seq);
            session
                .record_departure(seq, SimTime::from_micros(seq64 * plan.gap_us))
                .unwrap();
            session
                .record_arrival(seq, SimTime::from_micros(5_000 + seq64 * dst_gap))
                .unwrap();
        }
        session.finish_round().unwrap()
    }

    #[test]
    fn test_equal_gaps_converge_immediately() {
        let mut session = ProbeSession::new(config()).unwrap();
        let outcome = run_round(&mut session, 300);

        let RoundOutcome::Converged(estimate) = outcome else {
            panic!("expected convergence, got {outcome:?}");
        };
        assert_eq!(estimate.increase_ratio, 0.0);
        assert_eq!(estimate.available_bps, 10_000_000.0);
        assert_eq!(estimate.competing_bps, 0.0);
        assert_eq!(estimate.rounds, 1);
        assert!(session.estimate().converged);
        assert_eq!(session.status(), ProbeStatus::Converged);
    }

    #[test]
    fn test_dispersion_widens_gap_by_fixed_step() {
        let mut session = ProbeSession::new(config()).unwrap();

        // 300 us source gap dispersed to 1000 us: ratio 0.7.
        let outcome = run_round(&mut session, 1_000);
        assert_eq!(
            outcome,
            RoundOutcome::Continue {
                next_source_gap_us: 375
            }
        );
        let ratio = session.estimate().increase_ratio.unwrap();
        assert!((ratio - 0.7).abs() < 1e-9);
        assert_eq!(session.estimate().last_source_gap_sum_us, 9 * 300);

        let plan = session.begin_round().unwrap();
        assert_eq!(plan.gap_us, 375);
        assert_eq!(session.estimate().step_us, 75);
    }

    #[test]
    fn test_converged_estimate_uses_ratio() {
        let mut session = ProbeSession::new(config()).unwrap();
        // src 300, dst 320: ratio 0.0625.
        let RoundOutcome::Converged(estimate) = run_round(&mut session, 320) else {
            panic!("expected convergence");
        };
        assert!((estimate.competing_bps - 625_000.0).abs() < 1e-3);
        assert!((estimate.available_bps - 9_375_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_halving_step() {
        let mut session = ProbeSession::new(ProbeConfig {
            step_policy: StepPolicy::Halving,
            step_us: 80,
            ..config()
        })
        .unwrap();

        run_round(&mut session, 2_000);
        assert_eq!(session.estimate().next_source_gap_us, 380);
        assert_eq!(session.estimate().step_us, 40);
        run_round(&mut session, 2_000);
        assert_eq!(session.estimate().next_source_gap_us, 420);
        assert_eq!(session.estimate().step_us, 20);
    }

    #[test]
    fn test_round_cap() {
        let mut session = ProbeSession::new(ProbeConfig {
            max_rounds: 2,
            ..config()
        })
        .unwrap();

        assert!(matches!(run_round(&mut session, 5_000), RoundOutcome::Continue { .. }));
        assert_eq!(run_round(&mut session, 5_000), RoundOutcome::RoundCapReached);
        assert_eq!(session.status(), ProbeStatus::RoundCapReached);
        assert!(matches!(
            session.begin_round(),
            Err(ProbeError::SessionFinished { .. })
        ));
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn test_total_loss_is_inconclusive() {
        let mut session = ProbeSession::new(config()).unwrap();
        let plan = session.begin_round().unwrap();
        for seq in 0..plan.packets {
            session
                .record_departure(seq, SimTime::from_micros(u64::from(seq) * plan.gap_us))
                .unwrap();
        }
        session.record_arrival(3, SimTime::from_micros(9_000)).unwrap();

        assert_eq!(
            session.finish_round().unwrap(),
            RoundOutcome::Inconclusive { received: 1 }
        );
        let record = &session.history()[0];
        assert_eq!(record.lost, 9);
        assert_eq!(record.increase_ratio, None);
        assert_eq!(session.begin_round().unwrap().gap_us, 300);
    }

    #[test]
    fn test_round_protocol_errors() {
        let mut session = ProbeSession::new(config()).unwrap();
        assert_eq!(session.finish_round(), Err(ProbeError::NoActiveRound));
        assert_eq!(
            session.record_arrival(0, SimTime::ZERO),
            Err(ProbeError::NoActiveRound)
        );

        session.begin_round().unwrap();
        assert_eq!(
            session.begin_round(),
            Err(ProbeError::RoundInProgress { round: 1 })
        );
        assert_eq!(
            session.record_departure(10, SimTime::ZERO),
            Err(ProbeError::UnknownPacket { seq: 10 })
        );
    }

    #[test]
    fn test_offered_rate() {
        let session = ProbeSession::new(config()).unwrap();
        // 750 bytes every 300 us = 20 Mbps.
        assert_eq!(session.offered_rate_bps(), 20_000_000.0);
        assert_eq!(offered_rate_bps(750, 0), f64::INFINITY);
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(ProbeSession::new(ProbeConfig {
            train_size: 0,
            ..config()
        })
        .is_err());
        assert!(ProbeSession::new(ProbeConfig {
            convergence_threshold: 1.5,
            ..config()
        })
        .is_err());
    }
}
