//! Packet trains and their gap sums.

use serde::Serialize;

use crate::time::SimTime;

/// One probe datagram of a train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbePacket {
    pub seq: u32,
    pub size: u32,
    pub departed_at: Option<SimTime>,
    pub arrived_at: Option<SimTime>,
}

/// Timestamps of one train, indexed by sequence number.
///
/// Lost packets simply never get an arrival time, which shortens the
/// destination side of the train.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeTrain {
    packets: Vec<ProbePacket>,
    packet_size: u32,
}

impl ProbeTrain {
    pub fn new(expected: u32, packet_size: u32) -> Self {
        let packets = (0..expected)
            .map(|seq| ProbePacket {
                seq,
                size: packet_size,
                departed_at: None,
                arrived_at: None,
            })
            .collect();
        Self {
            packets,
            packet_size,
        }
    }

    /// Returns false if `seq` is outside the train.
    pub fn record_departure(&mut self, seq: u32, at: SimTime) -> bool {
        match self.packets.get_mut(seq as usize) {
            Some(packet) => {
                packet.departed_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Returns false if `seq` is outside the train.
    pub fn record_arrival(&mut self, seq: u32, at: SimTime) -> bool {
        match self.packets.get_mut(seq as usize) {
            Some(packet) => {
                packet.arrived_at = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn packets(&self) -> &[ProbePacket] {
        &self.packets
    }

    pub fn packet_size(&self) -> u32 {
        self.packet_size
    }

    pub fn expected(&self) -> u32 {
        self.packets.len() as u32
    }

    pub fn sent(&self) -> u32 {
        self.packets.iter().filter(|p| p.departed_at.is_some()).count() as u32
    }

    pub fn received(&self) -> u32 {
        self.packets.iter().filter(|p| p.arrived_at.is_some()).count() as u32
    }

    pub fn lost(&self) -> u32 {
        self.sent().saturating_sub(self.received())
    }

    pub fn bytes_received(&self) -> u64 {
        self.packets
            .iter()
            .filter(|p| p.arrived_at.is_some())
            .map(|p| u64::from(p.size))
            .sum()
    }

    /// Sum of gaps between consecutive departures, in microseconds.
    pub fn source_gap_sum_us(&self) -> u64 {
        let mut departures: Vec<u64> = self
            .packets
            .iter()
            .filter_map(|p| p.departed_at.map(SimTime::as_micros))
            .collect();
        departures.sort_unstable();
        gap_sum(&departures)
    }

    /// Sum of gaps between consecutive received packets, in microseconds.
    pub fn destination_gap_sum_us(&self) -> u64 {
        let mut arrivals: Vec<u64> = self
            .packets
            .iter()
            .filter_map(|p| p.arrived_at.map(SimTime::as_micros))
            .collect();
        arrivals.sort_unstable();
        gap_sum(&arrivals)
    }

    /// One-way delays of packets with both timestamps, in sequence order.
    pub fn one_way_delays_us(&self) -> Vec<i64> {
        self.packets
            .iter()
            .filter_map(|p| match (p.departed_at, p.arrived_at) {
                (Some(sent), Some(received)) => {
                    Some(received.as_micros() as i64 - sent.as_micros() as i64)
                }
                _ => None,
            })
            .collect()
    }
}

fn gap_sum(sorted: &[u64]) -> u64 {
    sorted.windows(2).map(|pair| pair[1] - pair[0]).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paced_train(expected: u32, src_gap: u64, dst_gap: u64, latency: u64) -> ProbeTrain {
        let mut train = ProbeTrain::new(expected, 750);
        for seq in 0..expected {
            let seq64 = u64::from(seq);
            train.record_departure(seq, SimTime::from_micros(seq64 * src_gap));
            train.record_arrival(seq, SimTime::from_micros(latency + seq64 * dst_gap));
        }
        train
    }

    #[test]
    fn test_gap_sums() {
        let train = paced_train(100, 300, 1_000, 5_000);
        assert_eq!(train.source_gap_sum_us(), 99 * 300);
        assert_eq!(train.destination_gap_sum_us(), 99 * 1_000);
        assert_eq!(train.received(), 100);
        assert_eq!(train.lost(), 0);
        assert_eq!(train.bytes_received(), 75_000);
    }

    #[test]
    fn test_loss_shortens_destination_side() {
        let mut train = ProbeTrain::new(5, 750);
        for seq in 0..5 {
            train.record_departure(seq, SimTime::from_micros(u64::from(seq) * 100));
        }
        // Packets 0 and 4 lost.
        for seq in 1..4 {
            train.record_arrival(seq, SimTime::from_micros(1_000 + u64::from(seq) * 200));
        }

        assert_eq!(train.expected(), 5);
        assert_eq!(train.received(), 3);
        assert_eq!(train.lost(), 2);
        assert_eq!(train.source_gap_sum_us(), 400);
        assert_eq!(train.destination_gap_sum_us(), 400);
    }

    #[test]
    fn test_one_way_delays_skip_lost() {
        let mut train = ProbeTrain::new(3, 750);
        train.record_departure(0, SimTime::from_micros(0));
        train.record_departure(1, SimTime::from_micros(100));
        train.record_departure(2, SimTime::from_micros(200));
        train.record_arrival(0, SimTime::from_micros(5_000));
        train.record_arrival(2, SimTime::from_micros(5_400));

        assert_eq!(train.one_way_delays_us(), vec![5_000, 5_200]);
    }

    #[test]
    fn test_out_of_range_sequence() {
        let mut train = ProbeTrain::new(2, 750);
        assert!(!train.record_departure(2, SimTime::ZERO));
        assert!(!train.record_arrival(7, SimTime::ZERO));
    }
}
