//! Stream and datagram transports over a bottleneck path.

use dashload_core::SimTime;

use crate::clock::DeterministicRng;
use crate::path::{BottleneckPath, CrossTrafficSchedule};

/// Bytes accepted by the stream transport and their timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub bytes: u32,
    /// Leaves the bottleneck; its send-buffer space frees up.
    pub departs_at: SimTime,
    pub arrives_at: SimTime,
}

/// Reliable byte stream with a bounded send buffer.
///
/// Bytes occupy the send buffer until they leave the bottleneck, so a fast
/// sender on a slow path sees partial sends.
#[derive(Debug)]
pub struct StreamTransport {
    path: BottleneckPath,
    tx_capacity: u32,
    queued: u32,
    open: bool,
}

impl StreamTransport {
    pub fn new(path: BottleneckPath, tx_capacity: u32) -> Self {
        Self {
            path,
            tx_capacity,
            queued: 0,
            open: true,
        }
    }

    /// Accepts up to `len` bytes, limited by free send-buffer space.
    ///
    /// Returns `None` when nothing was accepted.
    pub fn send(&mut self, now: SimTime, len: u32) -> Option<Delivery> {
        if !self.open {
            return None;
        }
        let accepted = len.min(self.free_space());
        if accepted == 0 {
            return None;
        }

        self.queued += accepted;
        let transmission = self.path.transmit(now, accepted);
        Some(Delivery {
            bytes: accepted,
            departs_at: transmission.departs_at,
            arrives_at: transmission.arrives_at,
        })
    }

    /// Frees send-buffer space of bytes that left the bottleneck.
    pub fn release(&mut self, bytes: u32) {
        self.queued = self.queued.saturating_sub(bytes);
    }

    pub fn free_space(&self) -> u32 {
        self.tx_capacity.saturating_sub(self.queued)
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn path(&self) -> &BottleneckPath {
        &self.path
    }

    pub fn set_cross_traffic(&mut self, schedule: CrossTrafficSchedule) {
        self.path.set_cross_traffic(schedule);
    }
}

/// Unreliable datagrams subject to random loss.
#[derive(Debug)]
pub struct DatagramTransport {
    path: BottleneckPath,
    loss_rate: f64,
    sent: u64,
    dropped: u64,
}

impl DatagramTransport {
    pub fn new(path: BottleneckPath, loss_rate: f64) -> Self {
        Self {
            path,
            loss_rate: loss_rate.clamp(0.0, 1.0),
            sent: 0,
            dropped: 0,
        }
    }

    /// Sends one datagram; returns its arrival time, or `None` if it was lost.
    pub fn send(&mut self, now: SimTime, size: u32, rng: &mut DeterministicRng) -> Option<SimTime> {
        self.sent += 1;
        if self.loss_rate > 0.0 && rng.random_bool(self.loss_rate) {
            self.dropped += 1;
            return None;
        }
        Some(self.path.transmit(now, size).arrives_at)
    }

    /// Time by which every datagram sent so far has arrived.
    pub fn quiescent_at(&self) -> SimTime {
        self.path.quiescent_at()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn path(&self) -> &BottleneckPath {
        &self.path
    }

    pub fn set_cross_traffic(&mut self, schedule: CrossTrafficSchedule) {
        self.path.set_cross_traffic(schedule);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn path() -> BottleneckPath {
        BottleneckPath::new(8_000_000, Duration::from_millis(10))
    }

    #[test]
    fn test_stream_partial_send_and_release() {
        let mut transport = StreamTransport::new(path(), 1_000);

        let first = transport.send(SimTime::ZERO, 600).unwrap();
        assert_eq!(first.bytes, 600);
        // 600 bytes at 8 Mbps take 600 us.
        assert_eq!(first.departs_at, SimTime::from_micros(600));
        assert_eq!(first.arrives_at, SimTime::from_micros(10_600));

        let second = transport.send(SimTime::ZERO, 600).unwrap();
        assert_eq!(second.bytes, 400);
        assert!(transport.send(SimTime::ZERO, 1).is_none());

        transport.release(600);
        assert_eq!(transport.free_space(), 600);
    }

    #[test]
    fn test_closed_stream_accepts_nothing() {
        let mut transport = StreamTransport::new(path(), 1_000);
        transport.close();
        assert!(!transport.is_open());
        assert!(transport.send(SimTime::ZERO, 10).is_none());
    }

    #[test]
    fn test_datagram_loss_is_seeded() {
        let run = |seed| {
            let mut rng = DeterministicRng::from_seed(seed);
            let mut transport = DatagramTransport::new(path(), 0.3);
            (0..200)
                .map(|i| transport.send(SimTime::from_micros(i * 1_000), 100, &mut rng).is_some())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(9), run(9));

        let mut rng = DeterministicRng::from_seed(9);
        let mut transport = DatagramTransport::new(path(), 0.3);
        for i in 0..200 {
            transport.send(SimTime::from_micros(i * 1_000), 100, &mut rng);
        }
        assert_eq!(transport.sent(), 200);
        assert!(transport.dropped() > 20 && transport.dropped() < 120);
    }

    #[test]
    fn test_lossless_datagrams_all_arrive() {
        let mut rng = DeterministicRng::from_seed(1);
        let mut transport = DatagramTransport::new(path(), 0.0);
        let arrival = transport.send(SimTime::ZERO, 1_000, &mut rng).unwrap();
        assert_eq!(arrival, SimTime::from_micros(11_000));
        assert_eq!(transport.quiescent_at(), arrival);
        assert_eq!(transport.dropped(), 0);
    }
}
