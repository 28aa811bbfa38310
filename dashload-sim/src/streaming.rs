//! Streaming session driver: one adaptive client and one chunk server over a bottleneck.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashload_core::adaptation::{AdaptationStrategy, RateAdaptationEngine, ReleasePolicy};
use dashload_core::buffer::{DrainOutcome, FillOutcome, PlaybackBuffer};
use dashload_core::config::{DashloadConfig, StreamingConfig};
use dashload_core::transfer::{
    ChunkReceiver, ChunkRequest, ChunkSender, CompletedChunk, SegmentSink, SendProgress,
    SessionEffect, SessionEvent, SessionState, ThroughputSample, TransferError, transition,
};
use dashload_core::{DashloadError, SimTime};
use serde::Serialize;

use crate::invariants::{Invariant, InvariantViolation, SessionSnapshot, standard_invariants};
use crate::path::{BottleneckPath, CrossTrafficSchedule};
use crate::scheduler::{EventHandle, EventScheduler};
use crate::transport::StreamTransport;
use crate::{MAX_INVARIANT_VIOLATIONS, SimulationError};

#[derive(Debug, Clone)]
enum StreamEvent {
    Start,
    Connected,
    /// Encoded chunk request reaching the server.
    RequestDelivered(Bytes),
    SegmentDeparted { bytes: u32 },
    SendReady,
    SegmentArrived { bytes: u32 },
    DrainTick,
    ReleaseRequest { bitrate_bps: u32 },
    StateDump,
    ConnectionClosed,
    Stop,
}

/// One completed chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRecord {
    pub index: u64,
    pub bitrate_bps: u32,
    pub bytes: u64,
    pub requested_at_ms: u64,
    pub completed_at_ms: u64,
    pub throughput_bps: f64,
    pub buffered_ms: u32,
}

/// Periodic snapshot of the client, mirroring the statistics the client logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateDump {
    pub at_ms: u64,
    pub buffered_ms: u32,
    pub buffer_percent: u32,
    pub last_throughput_bps: Option<f64>,
    pub smoothed_throughput_bps: Option<f64>,
    pub bitrate_bps: u32,
    pub switch_count: u32,
    pub chunk_count: u64,
}

/// Bitrate in effect from `at_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BitratePoint {
    pub at_ms: u64,
    pub bitrate_bps: u32,
}

/// Result of a streaming run.
#[derive(Debug, Clone, Serialize)]
pub struct StreamingReport {
    pub strategy: String,
    /// Seed used for reproduction
    pub seed: u64,
    pub final_state: SessionState,
    pub duration_ms: u64,
    pub chunks: Vec<ChunkRecord>,
    pub switch_count: u32,
    pub stall_count: u64,
    pub final_buffer_ms: u32,
    pub timeline: Vec<BitratePoint>,
    pub dumps: Vec<StateDump>,
    pub failure: Option<String>,
    pub invariant_violations: Vec<InvariantViolation>,
    pub events_processed: u64,
}

impl StreamingReport {
    pub fn chunks_completed(&self) -> usize {
        self.chunks.len()
    }

    /// Mean requested bitrate over completed chunks.
    pub fn mean_bitrate_bps(&self) -> f64 {
        if self.chunks.is_empty() {
            return 0.0;
        }
        let total: f64 = self.chunks.iter().map(|c| f64::from(c.bitrate_bps)).sum();
        total / self.chunks.len() as f64
    }

    /// Mean measured throughput over completed chunks.
    pub fn mean_throughput_bps(&self) -> f64 {
        if self.chunks.is_empty() {
            return 0.0;
        }
        let total: f64 = self.chunks.iter().map(|c| c.throughput_bps).sum();
        total / self.chunks.len() as f64
    }

    /// Generates human-readable summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!(
            "Streaming Report: {} (seed: {})\n",
            self.strategy, self.seed
        ));
        summary.push_str(&format!("Final state: {}\n", self.final_state.name()));
        summary.push_str(&format!("Duration: {:.1}s\n", self.duration_ms as f64 / 1_000.0));
        summary.push_str(&format!("Events processed: {}\n", self.events_processed));
        summary.push_str(&format!("Chunks completed: {}\n", self.chunks_completed()));
        summary.push_str(&format!(
            "Mean bitrate: {:.0} kbps\n",
            self.mean_bitrate_bps() / 1_000.0
        ));
        summary.push_str(&format!(
            "Mean throughput: {:.0} kbps\n",
            self.mean_throughput_bps() / 1_000.0
        ));
        summary.push_str(&format!("Bitrate switches: {}\n", self.switch_count));
        summary.push_str(&format!("Stalls: {}\n", self.stall_count));
        summary.push_str(&format!("Final buffer: {} ms\n", self.final_buffer_ms));

        if let Some(failure) = &self.failure {
            summary.push_str(&format!("Failure: {failure}\n"));
        }

        if !self.invariant_violations.is_empty() {
            summary.push_str("\nInvariant violations:\n");
            for violation in &self.invariant_violations {
                summary.push_str(&format!("  - {violation}\n"));
            }
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

/// Stream transport as seen by the chunk server, scheduling segment events.
struct TransportSink<'a> {
    transport: &'a mut StreamTransport,
    scheduler: &'a mut EventScheduler<StreamEvent>,
    now: SimTime,
    error: Option<SimulationError>,
}

impl SegmentSink for TransportSink<'_> {
    fn send_segment(&mut self, len: u32) -> u32 {
        if self.error.is_some() {
            return 0;
        }
        let Some(delivery) = self.transport.send(self.now, len) else {
            return 0;
        };

        let scheduled = self
            .scheduler
            .schedule_at(
                delivery.departs_at,
                StreamEvent::SegmentDeparted {
                    bytes: delivery.bytes,
                },
            )
            .and_then(|_| {
                self.scheduler.schedule_at(
                    delivery.arrives_at,
                    StreamEvent::SegmentArrived {
                        bytes: delivery.bytes,
                    },
                )
            });
        if let Err(e) = scheduled {
            self.error = Some(e);
        }
        delivery.bytes
    }
}

/// Deterministic run of one adaptive streaming session.
pub struct StreamingSimulation {
    config: StreamingConfig,
    seed: u64,
    scheduler: EventScheduler<StreamEvent>,
    transport: StreamTransport,
    state: SessionState,
    receiver: ChunkReceiver,
    sender: ChunkSender,
    buffer: PlaybackBuffer<EventHandle>,
    engine: RateAdaptationEngine,
    last_sample: Option<ThroughputSample>,
    release_timer: Option<EventHandle>,
    dump_timer: Option<EventHandle>,
    send_ready_pending: bool,
    close_at: Option<SimTime>,
    invariants: Vec<Arc<dyn Invariant>>,
    violations: Vec<InvariantViolation>,
    chunks: Vec<ChunkRecord>,
    dumps: Vec<StateDump>,
    timeline: Vec<BitratePoint>,
    failure: Option<TransferError>,
}

impl StreamingSimulation {
    /// Creates a session using the configured strategy.
    ///
    /// # Errors
    /// - `SimulationError::Setup` - Configuration invalid or strategy unknown
    /// - `SimulationError::NoDeterministicSeed` - No seed provided in config
    pub fn new(config: &DashloadConfig) -> Result<Self, SimulationError> {
        let kind = config
            .streaming
            .strategy_kind()
            .map_err(DashloadError::from)?;
        Self::with_strategy(config, kind.build())
    }

    /// Creates a session driven by a caller-supplied strategy.
    ///
    /// # Errors
    /// - `SimulationError::Setup` - Configuration invalid
    /// - `SimulationError::NoDeterministicSeed` - No seed provided in config
    pub fn with_strategy(
        config: &DashloadConfig,
        strategy: Box<dyn AdaptationStrategy>,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let seed = config
            .simulation
            .deterministic_seed
            .ok_or(SimulationError::NoDeterministicSeed)?;

        let streaming = config.streaming.clone();
        let path = BottleneckPath::from_config(&config.simulation.stream_path);
        let engine = RateAdaptationEngine::with_strategy(
            Arc::new(streaming.ladder.clone()),
            strategy,
            streaming.max_buffer_ms,
            streaming.chunk_duration(),
        );

        Ok(Self {
            seed,
            scheduler: EventScheduler::new(),
            transport: StreamTransport::new(path, config.simulation.tx_buffer_bytes),
            state: SessionState::Idle,
            receiver: ChunkReceiver::new(streaming.chunk_duration()),
            sender: ChunkSender::new(streaming.segment_size),
            buffer: PlaybackBuffer::new(
                streaming.max_buffer_ms,
                streaming.drain_tick_ms,
                streaming.stall_policy,
            ),
            engine,
            last_sample: None,
            release_timer: None,
            dump_timer: None,
            send_ready_pending: false,
            close_at: None,
            invariants: standard_invariants(),
            violations: Vec::new(),
            chunks: Vec::new(),
            dumps: Vec::new(),
            timeline: Vec::new(),
            failure: None,
            config: streaming,
        })
    }

    /// Replaces the path's competing load with a time-varying schedule.
    pub fn with_cross_traffic(mut self, schedule: CrossTrafficSchedule) -> Self {
        self.transport.set_cross_traffic(schedule);
        self
    }

    /// Makes a probe estimate of available bandwidth visible to the strategy.
    pub fn with_probe_estimate(mut self, available_bps: f64) -> Self {
        self.engine.observe_probe_estimate(available_bps);
        self
    }

    /// Adds an invariant to check after every event.
    pub fn add_invariant(&mut self, invariant: Arc<dyn Invariant>) {
        self.invariants.push(invariant);
    }

    /// Closes the connection underneath the session at `at`.
    pub fn close_connection_at(&mut self, at: SimTime) {
        self.close_at = Some(at);
    }

    /// Runs the session from its start time to its stop time.
    ///
    /// # Errors
    /// - `SimulationError::TooManyInvariantViolations` - Too many invariant violations
    /// - `SimulationError::EventQueueOverflow` - Event queue is full
    pub fn run(mut self) -> Result<StreamingReport, SimulationError> {
        let start = SimTime::from_millis(self.config.start_ms);
        let stop = SimTime::from_millis(self.config.stop_ms);

        self.scheduler.schedule_at(start, StreamEvent::Start)?;
        self.scheduler.schedule_at(stop, StreamEvent::Stop)?;
        if let Some(at) = self.close_at {
            self.scheduler.schedule_at(at, StreamEvent::ConnectionClosed)?;
        }

        tracing::info!(
            "Streaming session: strategy={}, seed={}, start={}, stop={}",
            self.engine.strategy_name(),
            self.seed,
            start,
            stop
        );

        while let Some((now, event)) = self.scheduler.pop_until(stop)? {
            self.handle_event(now, event)?;
            self.check_invariants(now)?;
            if self.state.is_terminal() {
                break;
            }
        }

        tracing::info!(
            "Streaming session {} at {}: {} chunks, {} switches, {} stalls",
            self.state.name(),
            self.scheduler.now(),
            self.chunks.len(),
            self.engine.state().switch_count,
            self.buffer.stall_count()
        );

        Ok(self.into_report(start))
    }

    fn handle_event(&mut self, now: SimTime, event: StreamEvent) -> Result<(), SimulationError> {
        match event {
            StreamEvent::Start => {
                self.apply(now, SessionEvent::Start)?;
                self.schedule_dump()?;
            }
            StreamEvent::Connected => self.apply(now, SessionEvent::Connected)?,
            StreamEvent::RequestDelivered(payload) => {
                let request = ChunkRequest::decode(&payload)?;
                self.serve(now, |sender, sink| sender.on_request(request, sink))?;
            }
            StreamEvent::SegmentDeparted { bytes } => {
                self.transport.release(bytes);
                if self.sender.is_blocked() && !self.send_ready_pending {
                    self.send_ready_pending = true;
                    self.scheduler
                        .schedule_in(Duration::ZERO, StreamEvent::SendReady)?;
                }
            }
            StreamEvent::SendReady => {
                self.send_ready_pending = false;
                self.serve(now, |sender, sink| sender.on_send_ready(sink))?;
            }
            StreamEvent::SegmentArrived { bytes } => {
                if self.state == SessionState::Streaming
                    && let Some(done) = self.receiver.on_bytes_received(bytes as usize, now)
                {
                    self.complete_chunk(now, done)?;
                }
            }
            StreamEvent::DrainTick => self.drain_tick()?,
            StreamEvent::ReleaseRequest { bitrate_bps } => {
                self.release_timer = None;
                self.send_request(now, bitrate_bps)?;
            }
            StreamEvent::StateDump => {
                self.record_dump(now);
                self.schedule_dump()?;
            }
            StreamEvent::ConnectionClosed => {
                self.transport.close();
                self.apply(now, SessionEvent::ConnectionClosed)?;
            }
            StreamEvent::Stop => self.apply(now, SessionEvent::Stop)?,
        }
        Ok(())
    }

    /// Runs the session state machine and carries out its effects.
    fn apply(&mut self, now: SimTime, event: SessionEvent) -> Result<(), SimulationError> {
        let (next, effects) = transition(self.state, event);
        if next != self.state {
            tracing::debug!(
                "Session {} -> {} on {:?}",
                self.state.name(),
                next.name(),
                event
            );
        }
        self.state = next;

        for effect in effects {
            match effect {
                SessionEffect::OpenConnection => {
                    let handshake = self.transport.path().propagation_delay() * 2;
                    self.scheduler
                        .schedule_in(handshake, StreamEvent::Connected)?;
                }
                SessionEffect::RequestNextChunk => self.request_next_chunk(now)?,
                SessionEffect::CancelTimers => self.cancel_timers(),
                SessionEffect::CloseConnection => self.transport.close(),
                SessionEffect::ReportFailure => {
                    if let Err(e) = self.receiver.on_connection_closed() {
                        tracing::warn!("Session failed at {}: {}", now, e);
                        self.failure = Some(e);
                    } else {
                        tracing::warn!("Connection closed at {} with no chunk in flight", now);
                    }
                }
            }
        }
        Ok(())
    }

    fn request_next_chunk(&mut self, now: SimTime) -> Result<(), SimulationError> {
        let throughput = self.last_sample.map(|s| s.bits_per_second());
        let decision = self.engine.decide(throughput, self.buffer.buffered_ms());

        if decision.switched || self.timeline.is_empty() {
            self.timeline.push(BitratePoint {
                at_ms: now.as_millis(),
                bitrate_bps: decision.bitrate_bps,
            });
        }

        match decision.release {
            ReleasePolicy::Immediate => self.send_request(now, decision.bitrate_bps),
            ReleasePolicy::Deferred(delay) => {
                tracing::debug!(
                    "Buffer full ({} ms), deferring request by {:?}",
                    self.buffer.buffered_ms(),
                    delay
                );
                let handle = self.scheduler.schedule_in(
                    delay,
                    StreamEvent::ReleaseRequest {
                        bitrate_bps: decision.bitrate_bps,
                    },
                )?;
                self.release_timer = Some(handle);
                Ok(())
            }
        }
    }

    fn send_request(&mut self, now: SimTime, bitrate_bps: u32) -> Result<(), SimulationError> {
        let request = self.receiver.request_chunk(bitrate_bps, now)?;
        let delay = self.transport.path().propagation_delay();
        self.scheduler
            .schedule_in(delay, StreamEvent::RequestDelivered(request.encode()))?;
        Ok(())
    }

    /// Lets the chunk server push segments into the transport.
    fn serve<F>(&mut self, now: SimTime, push: F) -> Result<(), SimulationError>
    where
        F: FnOnce(&mut ChunkSender, &mut TransportSink<'_>) -> SendProgress,
    {
        let mut sink = TransportSink {
            transport: &mut self.transport,
            scheduler: &mut self.scheduler,
            now,
            error: None,
        };
        let progress = push(&mut self.sender, &mut sink);
        if let Some(e) = sink.error {
            return Err(e);
        }
        tracing::trace!("Server progress at {}: {:?}", now, progress);
        Ok(())
    }

    fn complete_chunk(&mut self, now: SimTime, done: CompletedChunk) -> Result<(), SimulationError> {
        let throughput_bps = done.sample.bits_per_second();
        self.last_sample = Some(done.sample);

        if self.buffer.on_chunk_completed(self.config.chunk_duration_ms) == FillOutcome::ArmDrainTimer {
            let tick = Duration::from_millis(u64::from(self.buffer.tick_ms()));
            let handle = self.scheduler.schedule_in(tick, StreamEvent::DrainTick)?;
            self.buffer.attach_drain_timer(handle);
        }

        self.chunks.push(ChunkRecord {
            index: done.chunk.index,
            bitrate_bps: done.chunk.bitrate_bps,
            bytes: done.sample.bytes,
            requested_at_ms: done.chunk.requested_at.as_millis(),
            completed_at_ms: now.as_millis(),
            throughput_bps,
            buffered_ms: self.buffer.buffered_ms(),
        });

        tracing::debug!(
            chunk = done.chunk.index,
            bitrate_bps = done.chunk.bitrate_bps,
            throughput_bps = throughput_bps as u64,
            buffered_ms = self.buffer.buffered_ms(),
            switches = self.engine.state().switch_count,
            "Chunk completed"
        );

        self.apply(now, SessionEvent::ChunkCompleted)
    }

    fn drain_tick(&mut self) -> Result<(), SimulationError> {
        match self.buffer.on_drain_tick() {
            DrainOutcome::Continue => {
                let tick = Duration::from_millis(u64::from(self.buffer.tick_ms()));
                let handle = self.scheduler.schedule_in(tick, StreamEvent::DrainTick)?;
                self.buffer.attach_drain_timer(handle);
            }
            DrainOutcome::Stalled { timer } => {
                if let Some(handle) = timer {
                    self.scheduler.cancel(handle);
                }
                tracing::info!("Rebuffering at {}", self.scheduler.now());
            }
            DrainOutcome::Inactive => {}
        }
        Ok(())
    }

    fn cancel_timers(&mut self) {
        let timers = [
            self.buffer.stop(),
            self.release_timer.take(),
            self.dump_timer.take(),
        ];
        for handle in timers.into_iter().flatten() {
            self.scheduler.cancel(handle);
        }
    }

    fn schedule_dump(&mut self) -> Result<(), SimulationError> {
        if self.state.is_terminal() || self.config.dump_interval_ms == 0 {
            return Ok(());
        }
        let handle = self.scheduler.schedule_in(
            Duration::from_millis(self.config.dump_interval_ms),
            StreamEvent::StateDump,
        )?;
        self.dump_timer = Some(handle);
        Ok(())
    }

    fn record_dump(&mut self, now: SimTime) {
        let adaptation = self.engine.state();
        let dump = StateDump {
            at_ms: now.as_millis(),
            buffered_ms: self.buffer.buffered_ms(),
            buffer_percent: self.buffer.buffer_percent(),
            last_throughput_bps: self.last_sample.map(|s| s.bits_per_second()),
            smoothed_throughput_bps: adaptation.smoothed_throughput_bps,
            bitrate_bps: adaptation.next_bitrate,
            switch_count: adaptation.switch_count,
            chunk_count: self.buffer.chunk_count(),
        };
        tracing::debug!(
            at_ms = dump.at_ms,
            buffered_ms = dump.buffered_ms,
            buffer_percent = dump.buffer_percent,
            bitrate_bps = dump.bitrate_bps,
            switches = dump.switch_count,
            "State dump"
        );
        self.dumps.push(dump);
    }

    fn snapshot(&self, now: SimTime) -> SessionSnapshot {
        let in_flight = u32::from(self.receiver.outstanding().is_some());
        let waiting = u32::from(
            self.release_timer
                .is_some_and(|handle| self.scheduler.is_pending(handle)),
        );
        let adaptation = self.engine.state();
        SessionSnapshot {
            at: now,
            buffered_ms: self.buffer.buffered_ms(),
            max_buffer_ms: self.buffer.max_buffer_ms(),
            outstanding_requests: in_flight + waiting,
            switch_count: adaptation.switch_count,
            decisions: adaptation.decisions,
        }
    }

    fn check_invariants(&mut self, now: SimTime) -> Result<(), SimulationError> {
        let snapshot = self.snapshot(now);
        for invariant in &self.invariants {
            if let Err(violation) = invariant.check(&snapshot) {
                tracing::warn!("{}", violation);
                self.violations.push(violation);

                if self.violations.len() >= MAX_INVARIANT_VIOLATIONS {
                    return Err(SimulationError::TooManyInvariantViolations {
                        count: self.violations.len(),
                    });
                }
            }
        }
        Ok(())
    }

    fn into_report(self, start: SimTime) -> StreamingReport {
        StreamingReport {
            strategy: self.engine.strategy_name().to_string(),
            seed: self.seed,
            final_state: self.state,
            duration_ms: self.scheduler.now().saturating_since(start).as_millis() as u64,
            switch_count: self.engine.state().switch_count,
            stall_count: self.buffer.stall_count(),
            final_buffer_ms: self.buffer.buffered_ms(),
            chunks: self.chunks,
            timeline: self.timeline,
            dumps: self.dumps,
            failure: self.failure.map(|e| e.to_string()),
            invariant_violations: self.violations,
            events_processed: self.scheduler.events_processed(),
        }
    }
}
