//! Worked scenario across ladder, adaptation, transfer and probe components.

use std::sync::Arc;
use std::time::Duration;

use dashload_core::adaptation::{BufferBased, ReleasePolicy};
use dashload_core::config::ProbeConfig;
use dashload_core::probe::{ProbeSession, RoundOutcome};
use dashload_core::{
    BitrateLadder, ChunkReceiver, ChunkSender, RateAdaptationEngine, SimTime, StrategyKind,
};
use dashload_core::transfer::{SegmentSink, SendProgress};
use proptest::prelude::*;

const CHUNK: Duration = Duration::from_secs(2);

fn ladder() -> Arc<BitrateLadder> {
    Arc::new(BitrateLadder::new(vec![700_000, 1_400_000, 2_100_000]).unwrap())
}

/// Transport that accepts everything and remembers segment sizes.
#[derive(Default)]
struct RecordingSink {
    segments: Vec<u32>,
}

impl SegmentSink for RecordingSink {
    fn send_segment(&mut self, len: u32) -> u32 {
        self.segments.push(len);
        len
    }
}

#[test]
fn test_throughput_sample_selects_fitting_rung() {
    let mut engine =
        RateAdaptationEngine::new(ladder(), StrategyKind::ThroughputBased, 30_000, CHUNK);

    let first = engine.decide(None, 0);
    assert_eq!(first.bitrate_bps, 700_000);
    assert!(!first.switched);

    let second = engine.decide(Some(1_600_000.0), 2_000);
    assert_eq!(second.bitrate_bps, 1_400_000);
    assert!(second.switched);
    assert_eq!(second.switch_count, 1);
    assert_eq!(second.release, ReleasePolicy::Immediate);
}

#[test]
fn test_buffer_level_selects_third_rung() {
    let six = BitrateLadder::evenly_spaced(700_000, 6).unwrap();
    assert_eq!(BufferBased::default().rung_index(12_000, six.len()), 2);

    let mut engine = RateAdaptationEngine::new(
        Arc::new(six.clone()),
        StrategyKind::BufferBased,
        30_000,
        CHUNK,
    );
    assert_eq!(engine.decide(None, 12_000).bitrate_bps, six.rung(2).unwrap());
}

#[test]
fn test_fragmented_chunk_completes_once() {
    let mut receiver = ChunkReceiver::new(CHUNK);
    let request = receiver
        .request_chunk(1_400_000, SimTime::ZERO)
        .unwrap();
    assert_eq!(request.byte_size, 350_000);

    // Wire round trip through the server.
    let decoded = dashload_core::ChunkRequest::decode(&request.encode()).unwrap();
    let mut sender = ChunkSender::new(512);
    let mut sink = RecordingSink::default();
    assert_eq!(sender.on_request(decoded, &mut sink), SendProgress::Complete);
    assert_eq!(sink.segments.iter().map(|&s| u64::from(s)).sum::<u64>(), 350_000);
    assert!(sink.segments.iter().all(|&s| s <= 512));

    assert!(receiver
        .on_bytes_received(200_000, SimTime::from_millis(100))
        .is_none());
    let done = receiver
        .on_bytes_received(150_000, SimTime::from_millis(200))
        .unwrap();
    assert_eq!(done.chunk.index, 0);
    assert_eq!(done.sample.bytes, 350_000);
    assert_eq!(done.sample.duration, Duration::from_millis(200));
    assert_eq!(receiver.completed_chunks(), 1);

    // Ready for the next request.
    assert!(receiver.request_chunk(700_000, SimTime::from_millis(200)).is_ok());
}

#[test]
fn test_equal_gap_sums_converge_at_capacity() {
    let config = ProbeConfig {
        train_size: 20,
        initial_gap_us: 1_000,
        ..ProbeConfig::default()
    };
    let mut session = ProbeSession::new(config).unwrap();
    let plan = session.begin_round().unwrap();

    for seq in 0..plan.packets {
        let sent = SimTime::from_micros(u64::from(seq) * plan.gap_us);
        session.record_departure(seq, sent).unwrap();
        session
            .record_arrival(seq, sent + Duration::from_millis(5))
            .unwrap();
    }

    match session.finish_round().unwrap() {
        RoundOutcome::Converged(estimate) => {
            assert_eq!(estimate.increase_ratio, 0.0);
            assert_eq!(estimate.available_bps, 10_000_000.0);
            assert_eq!(estimate.rounds, 1);
        }
        other => panic!("expected convergence, got {other:?}"),
    }
}

proptest! {
    #[test]
    fn test_switches_match_bitrate_changes(samples in prop::collection::vec(0.0f64..5_000_000.0, 1..40)) {
        let mut engine =
            RateAdaptationEngine::new(ladder(), StrategyKind::ThroughputBased, 30_000, CHUNK);
        let mut previous = None;
        let mut expected = 0;
        for sample in samples {
            let decision = engine.decide(Some(sample), 0);
            if previous.is_some_and(|p| p != decision.bitrate_bps) {
                expected += 1;
            }
            previous = Some(decision.bitrate_bps);
            prop_assert_eq!(decision.switch_count, expected);
        }
    }
}
