//! SLoPS probe driver: a prober server sending trains to a prober client over a lossy path.

use std::time::Duration;

use dashload_core::config::DashloadConfig;
use dashload_core::probe::trend::{self, TrendReport};
use dashload_core::probe::{
    BandwidthEstimate, ProbeSession, ProbeStatus, RoundOutcome, RoundRecord, TrainPlan,
};
use dashload_core::{DashloadError, SimTime};
use serde::Serialize;

use crate::SimulationError;
use crate::clock::DeterministicRng;
use crate::path::{BottleneckPath, CrossTrafficSchedule};
use crate::scheduler::EventScheduler;
use crate::transport::DatagramTransport;

/// Packets per group for the delay trend tests.
const TREND_GROUP_SIZE: usize = 10;

#[derive(Debug, Clone, Copy)]
enum ProbeEvent {
    BeginRound,
    SendPacket { seq: u32 },
    PacketArrived { seq: u32 },
    EndRound,
}

/// Result of a probe run.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub seed: u64,
    pub status: ProbeStatus,
    pub estimate: Option<BandwidthEstimate>,
    pub rounds: Vec<RoundRecord>,
    /// Delay trend of the last train.
    pub trend: Option<TrendReport>,
    pub final_gap_us: u64,
    pub elapsed_ms: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
    pub events_processed: u64,
}

impl ProbeReport {
    pub fn converged(&self) -> bool {
        self.status == ProbeStatus::Converged
    }

    /// Generates human-readable summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!("Probe Report (seed: {})\n", self.seed));
        summary.push_str(&format!("Status: {:?}\n", self.status));
        summary.push_str(&format!("Rounds: {}\n", self.rounds.len()));
        summary.push_str(&format!("Elapsed: {} ms\n", self.elapsed_ms));
        summary.push_str(&format!(
            "Packets: {} sent, {} dropped\n",
            self.packets_sent, self.packets_dropped
        ));
        summary.push_str(&format!("Final source gap: {} us\n", self.final_gap_us));

        if let Some(estimate) = &self.estimate {
            summary.push_str(&format!(
                "Available bandwidth: {:.2} Mbps\n",
                estimate.available_bps / 1_000_000.0
            ));
            summary.push_str(&format!(
                "Competing traffic: {:.2} Mbps\n",
                estimate.competing_bps / 1_000_000.0
            ));
            summary.push_str(&format!("Increase ratio: {:.3}\n", estimate.increase_ratio));
        }

        if let Some(trend) = &self.trend {
            summary.push_str(&format!(
                "Delay trend: {} of {} groups increasing (PCT), {} (PDT)\n",
                trend.pct_increasing,
                trend.groups.len(),
                trend.pdt_increasing
            ));
        }

        summary.push_str("\nRounds:\n");
        for record in &self.rounds {
            let ratio = record
                .increase_ratio
                .map(|r| format!("{r:.3}"))
                .unwrap_or_else(|| "-".to_string());
            summary.push_str(&format!(
                "  {:>3}  gap {:>5} us  offered {:>6.2} Mbps  ratio {:>6}  recv {}/{}\n",
                record.round,
                record.source_gap_us,
                record.offered_rate_bps / 1_000_000.0,
                ratio,
                record.received,
                record.expected
            ));
        }

        summary
    }

    /// # Errors
    ///
    /// - `serde_json::Error` - Report could not be serialized
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Deterministic run of one SLoPS measurement.
pub struct ProbeSimulation {
    seed: u64,
    stop: SimTime,
    inter_train_idle: Duration,
    scheduler: EventScheduler<ProbeEvent>,
    transport: DatagramTransport,
    rng: DeterministicRng,
    session: ProbeSession,
    plan: Option<TrainPlan>,
}

impl ProbeSimulation {
    /// # Errors
    /// - `SimulationError::Setup` - Probe parameters invalid
    /// - `SimulationError::NoDeterministicSeed` - No seed provided in config
    pub fn new(config: &DashloadConfig) -> Result<Self, SimulationError> {
        let seed = config
            .simulation
            .deterministic_seed
            .ok_or(SimulationError::NoDeterministicSeed)?;
        let session = ProbeSession::new(config.probe.clone()).map_err(DashloadError::from)?;

        let path_config = &config.simulation.probe_path;
        let path = BottleneckPath::from_config(path_config);

        Ok(Self {
            seed,
            stop: SimTime::from_millis(config.probe.stop_ms),
            inter_train_idle: Duration::from_micros(config.probe.inter_train_idle_us),
            scheduler: EventScheduler::new(),
            transport: DatagramTransport::new(path, path_config.loss_rate),
            rng: DeterministicRng::from_seed(seed),
            session,
            plan: None,
        })
    }

    pub fn with_cross_traffic(mut self, schedule: CrossTrafficSchedule) -> Self {
        self.transport.set_cross_traffic(schedule);
        self
    }

    /// Sends trains until the estimate converges, the round cap is hit or the stop time passes.
    ///
    /// # Errors
    /// - `SimulationError::EventQueueOverflow` - Event queue is full
    /// - `SimulationError::Probe` - Round bookkeeping out of order
    pub fn run(mut self) -> Result<ProbeReport, SimulationError> {
        tracing::info!(
            "Probe session: seed={}, capacity={} bps, stop={}",
            self.seed,
            self.transport.path().capacity_bps(),
            self.stop
        );

        self.scheduler.schedule_at(SimTime::ZERO, ProbeEvent::BeginRound)?;

        while let Some((now, event)) = self.scheduler.pop_until(self.stop)? {
            self.handle_event(now, event)?;
            if self.session.status() != ProbeStatus::Probing {
                break;
            }
        }

        if self.session.status() == ProbeStatus::Probing {
            tracing::warn!(
                "Probe stopped at {} after {} rounds without converging",
                self.scheduler.now(),
                self.session.rounds()
            );
        }

        Ok(self.into_report())
    }

    fn handle_event(&mut self, now: SimTime, event: ProbeEvent) -> Result<(), SimulationError> {
        match event {
            ProbeEvent::BeginRound => {
                let plan = self.session.begin_round()?;
                tracing::debug!(
                    "Round {}: {} packets of {} bytes every {} us",
                    plan.round,
                    plan.packets,
                    plan.packet_size,
                    plan.gap_us
                );
                for seq in 0..plan.packets {
                    let offset = Duration::from_micros(u64::from(seq) * plan.gap_us);
                    self.scheduler
                        .schedule_in(offset, ProbeEvent::SendPacket { seq })?;
                }
                self.plan = Some(plan);
            }
            ProbeEvent::SendPacket { seq } => {
                let Some(plan) = self.plan else {
                    return Err(dashload_core::ProbeError::NoActiveRound.into());
                };
                self.session.record_departure(seq, now)?;
                if let Some(arrival) = self.transport.send(now, plan.packet_size, &mut self.rng) {
                    self.scheduler
                        .schedule_at(arrival, ProbeEvent::PacketArrived { seq })?;
                }
                if seq + 1 == plan.packets {
                    let end = self.transport.quiescent_at().max(now) + self.inter_train_idle;
                    self.scheduler.schedule_at(end, ProbeEvent::EndRound)?;
                }
            }
            ProbeEvent::PacketArrived { seq } => self.session.record_arrival(seq, now)?,
            ProbeEvent::EndRound => {
                self.plan = None;
                match self.session.finish_round()? {
                    RoundOutcome::Continue { .. } | RoundOutcome::Inconclusive { .. } => {
                        self.scheduler
                            .schedule_in(Duration::ZERO, ProbeEvent::BeginRound)?;
                    }
                    RoundOutcome::Converged(_) | RoundOutcome::RoundCapReached => {}
                }
            }
        }
        Ok(())
    }

    fn into_report(self) -> ProbeReport {
        ProbeReport {
            seed: self.seed,
            status: self.session.status(),
            estimate: self.session.result(),
            rounds: self.session.history().to_vec(),
            trend: self
                .session
                .last_train()
                .map(|train| trend::analyze(train, TREND_GROUP_SIZE)),
            final_gap_us: self.session.estimate().source_gap_us,
            elapsed_ms: self.scheduler.now().as_millis(),
            packets_sent: self.transport.sent(),
            packets_dropped: self.transport.dropped(),
            events_processed: self.scheduler.events_processed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use dashload_core::probe::StepPolicy;

    use super::*;

    #[test]
    fn test_converges_on_loaded_path() {
        // 4 Mbps competing on 10 Mbps: 750-byte packets leave every 1000 us.
        let report = ProbeSimulation::new(&DashloadConfig::default())
            .unwrap()
            .run()
            .unwrap();

        assert!(report.converged());
        assert_eq!(report.rounds.len(), 10);
        assert_eq!(report.final_gap_us, 975);
        let estimate = report.estimate.unwrap();
        assert!((estimate.increase_ratio - 0.025).abs() < 1e-9);
        assert_eq!(report.packets_dropped, 0);
    }

    #[test]
    fn test_gap_grows_by_step_each_round() {
        let report = ProbeSimulation::new(&DashloadConfig::default())
            .unwrap()
            .run()
            .unwrap();

        for pair in report.rounds.windows(2) {
            assert_eq!(pair[1].source_gap_us, pair[0].source_gap_us + 75);
        }
        // Early trains overload the path and see rising delays.
        let first = &report.rounds[0];
        assert!(first.increase_ratio.unwrap() > 0.5);
    }

    #[test]
    fn test_round_cap_stops_probe() {
        let mut config = DashloadConfig::default();
        config.probe.max_rounds = 3;
        let report = ProbeSimulation::new(&config).unwrap().run().unwrap();

        assert_eq!(report.status, ProbeStatus::RoundCapReached);
        assert_eq!(report.rounds.len(), 3);
        assert!(report.estimate.is_none());
    }

    #[test]
    fn test_halving_step_policy() {
        let mut config = DashloadConfig::default();
        config.probe.step_policy = StepPolicy::Halving;
        config.probe.max_rounds = 4;
        let report = ProbeSimulation::new(&config).unwrap().run().unwrap();

        let gaps: Vec<u64> = report.rounds.iter().map(|r| r.source_gap_us).collect();
        assert_eq!(gaps, vec![300, 375, 412, 430]);
    }

    #[test]
    fn test_idle_path_converges_first_round() {
        let mut config = DashloadConfig::default();
        config.simulation.probe_path.competing_bps = 0;
        config.probe.initial_gap_us = 600;
        let report = ProbeSimulation::new(&config).unwrap().run().unwrap();

        assert!(report.converged());
        assert_eq!(report.rounds.len(), 1);
    }

    #[test]
    fn test_lossy_path_records_losses() {
        let config = DashloadConfig {
            simulation: dashload_core::config::SimulationConfig::lossy_probe(0.2),
            ..Default::default()
        };
        let report = ProbeSimulation::new(&config).unwrap().run().unwrap();

        assert!(report.packets_dropped > 0);
        assert!(report.rounds.iter().any(|r| r.lost > 0));
        for record in &report.rounds {
            assert_eq!(record.lost, record.expected - record.received);
        }
    }
}
