//! Transport closing underneath a streaming session.

use dashload_core::transfer::SessionState;
use dashload_core::{DashloadConfig, SimTime};
use dashload_sim::StreamingSimulation;

fn config() -> DashloadConfig {
    let mut config = DashloadConfig::for_testing();
    config.streaming.start_ms = 0;
    config.streaming.stop_ms = 60_000;
    config
}

#[test]
fn test_close_mid_chunk_fails_session() {
    let mut sim = StreamingSimulation::new(&config()).unwrap();
    sim.close_connection_at(SimTime::from_millis(5_050));
    let report = sim.run().unwrap();

    assert_eq!(report.final_state, SessionState::Failed);
    let failure = report.failure.as_deref().unwrap();
    assert!(failure.contains("Connection closed during chunk"), "{failure}");

    // Nothing completes and no timer fires once the session failed.
    assert!(report.chunks.iter().all(|c| c.completed_at_ms <= 5_050));
    assert!(report.dumps.iter().all(|d| d.at_ms <= 5_050));
    assert_eq!(report.duration_ms, 5_050);
    assert!(report.invariant_violations.is_empty());
}

#[test]
fn test_close_before_start_stalls_until_stop() {
    let mut config = config();
    config.streaming.start_ms = 1_000;
    config.streaming.stop_ms = 10_000;
    let mut sim = StreamingSimulation::new(&config).unwrap();
    sim.close_connection_at(SimTime::from_millis(500));
    let report = sim.run().unwrap();

    // An idle session ignores the close; its request then never gets an
    // answer and only the stop time ends it.
    assert_eq!(report.final_state, SessionState::Completed);
    assert!(report.failure.is_none());
    assert!(report.chunks.is_empty());
    assert_eq!(report.duration_ms, 9_000);
}

#[test]
fn test_failed_runs_are_reproducible() {
    let run = || {
        let mut sim = StreamingSimulation::new(&config()).unwrap();
        sim.close_connection_at(SimTime::from_millis(7_300));
        sim.run().unwrap()
    };
    let a = run();
    let b = run();
    assert_eq!(a.chunks, b.chunks);
    assert_eq!(a.failure, b.failure);
    assert_eq!(a.events_processed, b.events_processed);
}
