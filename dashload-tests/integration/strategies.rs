//! Full streaming runs for every adaptation strategy.

use std::io::Write;

use dashload_core::adaptation::{AdaptationInput, AdaptationState, AdaptationStrategy};
use dashload_core::transfer::SessionState;
use dashload_core::{DashloadConfig, SimTime, StrategyKind};
use dashload_sim::{CrossTrafficSchedule, StreamingReport, StreamingSimulation};

/// 5 Mbps path losing 4 Mbps between 40 s and 80 s.
fn capacity_drop() -> CrossTrafficSchedule {
    CrossTrafficSchedule::constant(0)
        .with_change(SimTime::from_secs(40), 4_000_000)
        .with_change(SimTime::from_secs(80), 0)
}

fn config(kind: StrategyKind) -> DashloadConfig {
    let mut config = DashloadConfig::default();
    config.streaming.strategy = kind.as_str().to_string();
    config.streaming.start_ms = 0;
    config.streaming.stop_ms = 120_000;
    config
}

fn run(kind: StrategyKind) -> StreamingReport {
    StreamingSimulation::new(&config(kind))
        .unwrap()
        .with_cross_traffic(capacity_drop())
        .run()
        .unwrap()
}

fn requested_between(report: &StreamingReport, from_ms: u64, to_ms: u64) -> Vec<u32> {
    report
        .chunks
        .iter()
        .filter(|c| c.requested_at_ms >= from_ms && c.completed_at_ms < to_ms)
        .map(|c| c.bitrate_bps)
        .collect()
}

#[test]
fn test_every_strategy_completes_cleanly() {
    for kind in StrategyKind::ALL {
        let report = run(kind);

        assert_eq!(report.strategy, kind.as_str());
        assert_eq!(report.final_state, SessionState::Completed, "{kind}");
        assert!(report.invariant_violations.is_empty(), "{kind}");
        assert!(report.chunks_completed() > 20, "{kind}");
        assert_eq!(report.chunks[0].bitrate_bps, 700_000, "{kind}");
        for (index, chunk) in report.chunks.iter().enumerate() {
            assert_eq!(chunk.index, index as u64);
        }
    }
}

#[test]
fn test_throughput_based_follows_capacity() {
    let report = run(StrategyKind::ThroughputBased);

    let before = requested_between(&report, 10_000, 40_000);
    assert!(before.iter().all(|&b| b == 4_200_000), "{before:?}");

    // 1 Mbps left: only the lowest rung fits.
    let during = requested_between(&report, 50_000, 80_000);
    assert!(during.contains(&700_000), "{during:?}");

    let after = requested_between(&report, 95_000, 120_000);
    assert!(after.contains(&4_200_000), "{after:?}");
    assert!(report.switch_count >= 2);
}

#[test]
fn test_smoothed_reacts_slower_than_throughput() {
    let smoothed = run(StrategyKind::SmoothedThroughputBased);

    let during = requested_between(&smoothed, 45_000, 80_000);
    assert!(during.iter().any(|&b| b < 4_200_000), "{during:?}");
    assert!(smoothed.dumps.iter().any(|d| d.smoothed_throughput_bps.is_some()));
}

#[test]
fn test_buffer_based_follows_occupancy() {
    let report = run(StrategyKind::BufferBased);
    let ladder = config(StrategyKind::BufferBased).streaming.ladder;

    // Each decision reads the buffer level right after the previous completion.
    for pair in report.chunks.windows(2) {
        let band = (pair[0].buffered_ms / 5_000) as usize;
        let expected = ladder.rung(band.min(ladder.len() - 1)).unwrap();
        assert_eq!(pair[1].bitrate_bps, expected, "{:?}", pair[1]);
    }
}

#[test]
fn test_extension_keeps_bitrate() {
    let report = run(StrategyKind::Extension);
    assert!(report.chunks.iter().all(|c| c.bitrate_bps == 700_000));
    assert_eq!(report.switch_count, 0);
    assert_eq!(report.timeline.len(), 1);
}

/// Picks the highest rung under the probe estimate.
#[derive(Debug)]
struct ProbeCapped;

impl AdaptationStrategy for ProbeCapped {
    fn name(&self) -> &'static str {
        "probe-capped"
    }

    fn select(&mut self, input: &AdaptationInput<'_>, state: &mut AdaptationState) -> u32 {
        input
            .probe_estimate_bps
            .and_then(|bps| input.ladder.highest_not_exceeding(bps))
            .unwrap_or(state.next_bitrate)
    }
}

#[test]
fn test_custom_strategy_sees_probe_estimate() {
    let report = StreamingSimulation::with_strategy(
        &config(StrategyKind::Extension),
        Box::new(ProbeCapped),
    )
    .unwrap()
    .with_probe_estimate(2_500_000.0)
    .run()
    .unwrap();

    assert_eq!(report.strategy, "probe-capped");
    assert!(report.chunks.iter().all(|c| c.bitrate_bps == 2_100_000));
    assert_eq!(report.switch_count, 0);
}

#[test]
fn test_configuration_file_selects_strategy() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "streaming": {{ "strategy": "bba", "start_ms": 0, "stop_ms": 20000 }},
            "simulation": {{ "deterministic_seed": 7 }}
        }}"#
    )
    .unwrap();

    let config = DashloadConfig::from_json_file(file.path()).unwrap();
    let report = StreamingSimulation::new(&config).unwrap().run().unwrap();

    assert_eq!(report.strategy, "buffer");
    assert_eq!(report.seed, 7);
    assert_eq!(report.duration_ms, 20_000);

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["strategy"], "buffer");
    assert!(json["chunks"].as_array().is_some_and(|c| !c.is_empty()));
}
