//! TOPP driver: one train per offered rate, measured at the receiver.

use std::time::Duration;

use dashload_core::config::DashloadConfig;
use dashload_core::probe::{
    ProbeTrain, RateSample, RateSweep, TrackingRatioDetector, TurningPoint, TurningPointDetector,
};
use dashload_core::{DashloadError, SimTime};
use serde::Serialize;

use crate::SimulationError;
use crate::clock::DeterministicRng;
use crate::path::{BottleneckPath, CrossTrafficSchedule};
use crate::scheduler::EventScheduler;
use crate::transport::DatagramTransport;

#[derive(Debug, Clone, Copy)]
enum SweepEvent {
    BeginTrain { step: usize },
    SendPacket { seq: u32 },
    PacketArrived { seq: u32 },
    EndTrain { step: usize },
}

/// Result of a rate sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub seed: u64,
    pub samples: Vec<RateSample>,
    /// Only present when a detector was configured.
    pub turning_point: Option<TurningPoint>,
    /// Steps whose train delivered fewer than two packets.
    pub skipped_steps: Vec<usize>,
    pub elapsed_ms: u64,
    pub packets_dropped: u64,
}

impl SweepReport {
    /// Generates human-readable summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!("Rate Sweep Report (seed: {})\n", self.seed));
        summary.push_str(&format!(
            "Trains: {} measured, {} skipped\n",
            self.samples.len(),
            self.skipped_steps.len()
        ));
        summary.push_str(&format!("Packets dropped: {}\n\n", self.packets_dropped));

        summary.push_str("  offered (Mbps)  interval (us)  observed (us)  measured (Mbps)  ratio\n");
        for sample in &self.samples {
            summary.push_str(&format!(
                "  {:>14.2}  {:>13}  {:>13.1}  {:>15.2}  {:>5.2}\n",
                sample.offered_rate_bps as f64 / 1_000_000.0,
                sample.offered_interval_us,
                sample.observed_gap_us,
                sample.measured_bps / 1_000_000.0,
                sample.tracking_ratio()
            ));
        }

        match &self.turning_point {
            Some(point) => summary.push_str(&format!(
                "\nTurning point between {:.2} and {:.2} Mbps\n",
                point.lower_bound_bps as f64 / 1_000_000.0,
                point.upper_bound_bps as f64 / 1_000_000.0
            )),
            None => summary.push_str("\nNo turning point detected\n"),
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

/// Deterministic run of one TOPP sweep.
pub struct SweepSimulation {
    seed: u64,
    sweep: RateSweep,
    detector: Option<Box<dyn TurningPointDetector>>,
    inter_train_idle: Duration,
    stop: SimTime,
    scheduler: EventScheduler<SweepEvent>,
    transport: DatagramTransport,
    rng: DeterministicRng,
    train: Option<ProbeTrain>,
    samples: Vec<RateSample>,
    skipped: Vec<usize>,
}

impl SweepSimulation {
    /// # Errors
    /// - `SimulationError::Setup` - Sweep rates invalid
    /// - `SimulationError::NoDeterministicSeed` - No seed provided in config
    pub fn new(config: &DashloadConfig) -> Result<Self, SimulationError> {
        let seed = config
            .simulation
            .deterministic_seed
            .ok_or(SimulationError::NoDeterministicSeed)?;
        let probe = &config.probe;
        let sweep = RateSweep::new(&probe.sweep_rates_bps, probe.packet_size, probe.sweep_train_size)
            .map_err(DashloadError::from)?;

        let detector = probe
            .turning_point_ratio
            .map(|ratio| Box::new(TrackingRatioDetector::new(ratio)) as Box<dyn TurningPointDetector>);

        let path_config = &config.simulation.probe_path;
        Ok(Self {
            seed,
            sweep,
            detector,
            inter_train_idle: Duration::from_micros(probe.inter_train_idle_us),
            stop: SimTime::from_millis(probe.stop_ms),
            scheduler: EventScheduler::new(),
            transport: DatagramTransport::new(
                BottleneckPath::from_config(path_config),
                path_config.loss_rate,
            ),
            rng: DeterministicRng::from_seed(seed),
            train: None,
            samples: Vec::new(),
            skipped: Vec::new(),
        })
    }

    /// Uses `detector` to locate the turning point after the sweep.
    pub fn with_detector(mut self, detector: Box<dyn TurningPointDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_cross_traffic(mut self, schedule: CrossTrafficSchedule) -> Self {
        self.transport.set_cross_traffic(schedule);
        self
    }

    /// Sends every train of the sweep in order, until the stop time passes.
    ///
    /// # Errors
    /// - `SimulationError::EventQueueOverflow` - Event queue is full
    pub fn run(mut self) -> Result<SweepReport, SimulationError> {
        tracing::info!(
            "Rate sweep: {} steps from {} to {} bps, seed={}, stop={}",
            self.sweep.steps().len(),
            self.sweep.steps().first().map_or(0, |s| s.offered_rate_bps),
            self.sweep.steps().last().map_or(0, |s| s.offered_rate_bps),
            self.seed,
            self.stop
        );

        self.scheduler
            .schedule_at(SimTime::ZERO, SweepEvent::BeginTrain { step: 0 })?;
        while let Some((now, event)) = self.scheduler.pop_until(self.stop)? {
            self.handle_event(now, event)?;
        }
        if self.scheduler.pending_count() > 0 {
            tracing::warn!(
                "Rate sweep stopped at {} after {} of {} steps",
                self.stop,
                self.samples.len() + self.skipped.len(),
                self.sweep.steps().len()
            );
        }

        let turning_point = self
            .detector
            .as_ref()
            .and_then(|detector| detector.detect(&self.samples));
        if let Some(point) = &turning_point {
            tracing::info!(
                "Turning point between {} and {} bps",
                point.lower_bound_bps,
                point.upper_bound_bps
            );
        }

        Ok(SweepReport {
            seed: self.seed,
            samples: self.samples,
            turning_point,
            skipped_steps: self.skipped,
            elapsed_ms: self.scheduler.now().as_millis(),
            packets_dropped: self.transport.dropped(),
        })
    }

    fn handle_event(&mut self, now: SimTime, event: SweepEvent) -> Result<(), SimulationError> {
        match event {
            SweepEvent::BeginTrain { step } => {
                let Some(sweep_step) = self.sweep.steps().get(step).copied() else {
                    return Ok(());
                };
                self.train = Some(ProbeTrain::new(
                    self.sweep.train_size(),
                    self.sweep.packet_size(),
                ));
                for seq in 0..self.sweep.train_size() {
                    let offset = Duration::from_micros(u64::from(seq) * sweep_step.packet_interval_us);
                    self.scheduler
                        .schedule_in(offset, SweepEvent::SendPacket { seq })?;
                }
                // The last departure is scheduled at this offset; it ends the train.
                let last = u64::from(self.sweep.train_size() - 1) * sweep_step.packet_interval_us;
                self.scheduler.schedule_in(
                    Duration::from_micros(last),
                    SweepEvent::EndTrain { step },
                )?;
            }
            SweepEvent::SendPacket { seq } => {
                if let Some(train) = self.train.as_mut() {
                    train.record_departure(seq, now);
                    if let Some(arrival) =
                        self.transport
                            .send(now, self.sweep.packet_size(), &mut self.rng)
                    {
                        self.scheduler
                            .schedule_at(arrival, SweepEvent::PacketArrived { seq })?;
                    }
                }
            }
            SweepEvent::PacketArrived { seq } => {
                if let Some(train) = self.train.as_mut() {
                    train.record_arrival(seq, now);
                }
            }
            SweepEvent::EndTrain { step } => {
                // Wait for the path to drain before measuring.
                let drained = self.transport.quiescent_at();
                if drained > now {
                    self.scheduler
                        .schedule_at(drained, SweepEvent::EndTrain { step })?;
                    return Ok(());
                }
                self.finish_train(step)?;
            }
        }
        Ok(())
    }

    fn finish_train(&mut self, step: usize) -> Result<(), SimulationError> {
        if let Some(train) = self.train.take() {
            match self.sweep.measure(step, &train) {
                Some(sample) => {
                    tracing::debug!(
                        "Step {}: offered {} bps, measured {:.0} bps",
                        step,
                        sample.offered_rate_bps,
                        sample.measured_bps
                    );
                    self.samples.push(sample);
                }
                None => {
                    tracing::warn!(
                        "Step {}: only {} of {} packets arrived, skipping",
                        step,
                        train.received(),
                        train.expected()
                    );
                    self.skipped.push(step);
                }
            }
        }

        if step + 1 < self.sweep.steps().len() {
            self.scheduler
                .schedule_in(self.inter_train_idle, SweepEvent::BeginTrain { step: step + 1 })?;
        }
        Ok(())
    }
}
