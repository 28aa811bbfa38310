//! Playback buffer model filled by chunk completions and drained by a periodic tick.

use serde::{Deserialize, Serialize};

/// What the drain timer does after the buffer runs dry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StallPolicy {
    /// The next chunk completion arms the drain timer again.
    #[default]
    RearmOnNextChunk,
    /// Draining stops for the rest of the session.
    StayStopped,
}

/// Result of adding a completed chunk to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// First chunk since start or stall; the host must arm the drain timer.
    ArmDrainTimer,
    Filled,
    /// The session was stopped; the chunk is ignored.
    Inactive,
}

/// Result of one drain tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome<H> {
    /// Still playing; the host re-arms the tick.
    Continue,
    /// The buffer ran dry. The returned timer handle must be cancelled.
    Stalled { timer: Option<H> },
    /// No drain in progress; the tick is stale.
    Inactive,
}

/// Milliseconds of media held by the client, clamped to `[0, max_buffer_ms]`.
///
/// `H` is the host's timer handle type. The buffer owns the handle of its
/// drain timer so that a stall or stop can hand it back for cancellation.
#[derive(Debug)]
pub struct PlaybackBuffer<H = ()> {
    buffered_ms: u32,
    max_buffer_ms: u32,
    tick_ms: u32,
    stall_policy: StallPolicy,
    chunk_count: u64,
    draining: bool,
    halted: bool,
    active: bool,
    stalls: u64,
    drain_timer: Option<H>,
}

impl<H> PlaybackBuffer<H> {
    pub fn new(max_buffer_ms: u32, tick_ms: u32, stall_policy: StallPolicy) -> Self {
        Self {
            buffered_ms: 0,
            max_buffer_ms,
            tick_ms: tick_ms.max(1),
            stall_policy,
            chunk_count: 0,
            draining: false,
            halted: false,
            active: true,
            stalls: 0,
            drain_timer: None,
        }
    }

    /// Adds one chunk worth of media.
    pub fn on_chunk_completed(&mut self, chunk_duration_ms: u32) -> FillOutcome {
        if !self.active {
            return FillOutcome::Inactive;
        }

        self.chunk_count += 1;
        self.buffered_ms = self
            .buffered_ms
            .saturating_add(chunk_duration_ms)
            .min(self.max_buffer_ms);

        if self.chunk_count == 1 && !self.draining && !self.halted {
            self.draining = true;
            FillOutcome::ArmDrainTimer
        } else {
            FillOutcome::Filled
        }
    }

    /// Plays one tick of media.
    ///
    /// Drops to zero and stalls when less than one tick would remain.
    pub fn on_drain_tick(&mut self) -> DrainOutcome<H> {
        if !self.active || !self.draining {
            return DrainOutcome::Inactive;
        }

        self.buffered_ms = self.buffered_ms.saturating_sub(self.tick_ms);
        if self.buffered_ms >= self.tick_ms {
            return DrainOutcome::Continue;
        }

        self.buffered_ms = 0;
        self.chunk_count = 0;
        self.draining = false;
        self.stalls += 1;
        if self.stall_policy == StallPolicy::StayStopped {
            self.halted = true;
        }
        tracing::info!("Playback stalled (stall #{})", self.stalls);

        DrainOutcome::Stalled {
            timer: self.drain_timer.take(),
        }
    }

    /// Records the handle of the currently armed drain timer.
    pub fn attach_drain_timer(&mut self, timer: H) -> Option<H> {
        self.drain_timer.replace(timer)
    }

    /// Deactivates the buffer and returns the drain timer to cancel.
    pub fn stop(&mut self) -> Option<H> {
        self.active = false;
        self.draining = false;
        self.drain_timer.take()
    }

    pub fn buffered_ms(&self) -> u32 {
        self.buffered_ms
    }

    pub fn max_buffer_ms(&self) -> u32 {
        self.max_buffer_ms
    }

    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }

    pub fn buffer_percent(&self) -> u32 {
        if self.max_buffer_ms == 0 {
            return 0;
        }
        let percent = u64::from(self.buffered_ms) * 100 / u64::from(self.max_buffer_ms);
        percent as u32
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn stall_count(&self) -> u64 {
        self.stalls
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn buffer(policy: StallPolicy) -> PlaybackBuffer<u32> {
        PlaybackBuffer::new(30_000, 100, policy)
    }

    #[test]
    fn test_first_chunk_arms_drain_timer() {
        let mut buffer = buffer(StallPolicy::default());
        assert_eq!(buffer.on_chunk_completed(2_000), FillOutcome::ArmDrainTimer);
        assert_eq!(buffer.on_chunk_completed(2_000), FillOutcome::Filled);
        assert_eq!(buffer.buffered_ms(), 4_000);
        assert_eq!(buffer.buffer_percent(), 13);
        assert!(buffer.is_draining());
    }

    #[test]
    fn test_fill_clamps_at_max() {
        let mut buffer = buffer(StallPolicy::default());
        for _ in 0..20 {
            buffer.on_chunk_completed(2_000);
        }
        assert_eq!(buffer.buffered_ms(), 30_000);
        assert_eq!(buffer.buffer_percent(), 100);
    }

    #[test]
    fn test_drain_until_stall() {
        let mut buffer = buffer(StallPolicy::default());
        buffer.on_chunk_completed(2_000);
        buffer.attach_drain_timer(7);

        let mut ticks = 0;
        let outcome = loop {
            ticks += 1;
            match buffer.on_drain_tick() {
                DrainOutcome::Continue => continue,
                other => break other,
            }
        };

        // 2000 ms drains to 100 after 19 ticks; the 20th leaves less than a tick.
        assert_eq!(ticks, 20);
        assert_eq!(outcome, DrainOutcome::Stalled { timer: Some(7) });
        assert_eq!(buffer.buffered_ms(), 0);
        assert_eq!(buffer.chunk_count(), 0);
        assert_eq!(buffer.stall_count(), 1);
        assert_eq!(buffer.on_drain_tick(), DrainOutcome::Inactive);
    }

    #[test]
    fn test_rearm_after_stall() {
        let mut buffer = buffer(StallPolicy::RearmOnNextChunk);
        buffer.on_chunk_completed(100);
        assert!(matches!(buffer.on_drain_tick(), DrainOutcome::Stalled { .. }));

        assert_eq!(buffer.on_chunk_completed(2_000), FillOutcome::ArmDrainTimer);
        assert_eq!(buffer.buffered_ms(), 2_000);
    }

    #[test]
    fn test_stay_stopped_after_stall() {
        let mut buffer = buffer(StallPolicy::StayStopped);
        buffer.on_chunk_completed(100);
        assert!(matches!(buffer.on_drain_tick(), DrainOutcome::Stalled { .. }));

        assert_eq!(buffer.on_chunk_completed(2_000), FillOutcome::Filled);
        assert!(!buffer.is_draining());
        assert_eq!(buffer.on_drain_tick(), DrainOutcome::Inactive);
    }

    #[test]
    fn test_stop_returns_timer_and_ignores_ticks() {
        let mut buffer = buffer(StallPolicy::default());
        buffer.on_chunk_completed(2_000);
        buffer.attach_drain_timer(3);

        assert_eq!(buffer.stop(), Some(3));
        assert_eq!(buffer.on_drain_tick(), DrainOutcome::Inactive);
        assert_eq!(buffer.on_chunk_completed(2_000), FillOutcome::Inactive);
        assert_eq!(buffer.buffered_ms(), 2_000);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Fill(u32),
        Drain,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0u32..10_000).prop_map(Op::Fill), Just(Op::Drain)]
    }

    proptest! {
        #[test]
        fn test_buffer_stays_within_bounds(
            max in 1u32..60_000,
            tick in 1u32..1_000,
            ops in prop::collection::vec(op(), 0..400),
        ) {
            let mut buffer: PlaybackBuffer = PlaybackBuffer::new(max, tick, StallPolicy::default());
            for op in ops {
                match op {
                    Op::Fill(ms) => {
                        buffer.on_chunk_completed(ms);
                    }
                    Op::Drain => {
                        buffer.on_drain_tick();
                    }
                }
                prop_assert!(buffer.buffered_ms() <= max);
            }
        }
    }
}
