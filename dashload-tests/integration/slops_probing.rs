//! SLoPS probing against the bottleneck path model.

use dashload_core::SimTime;
use dashload_core::config::ProbeConfig;
use dashload_core::probe::{ProbeSession, ProbeStatus, RoundOutcome, StepPolicy};
use dashload_sim::{ProbeSimulation, pathload_testbed};

/// Service time of a 750-byte packet on the 10 Mbps testbed, in microseconds.
fn service_us(competing_bps: u64) -> f64 {
    750.0 * 8.0 * 1_000_000.0 / (10_000_000 - competing_bps) as f64
}

#[test]
fn test_converges_where_gap_matches_available_rate() {
    for competing in [2_000_000, 4_000_000, 6_000_000] {
        let report = ProbeSimulation::new(&pathload_testbed(competing))
            .unwrap()
            .run()
            .unwrap();
        assert!(report.converged(), "{}", report.summary());

        let service = service_us(competing);
        let last = report.rounds.last().unwrap();
        assert!(last.source_gap_us as f64 > 0.9 * service);
        if report.rounds.len() > 1 {
            let previous = &report.rounds[report.rounds.len() - 2];
            assert!(previous.source_gap_us as f64 <= 0.9 * service);
        }

        // The train that stopped queueing was sent at about the available rate.
        let available = (10_000_000 - competing) as f64;
        assert!((last.offered_rate_bps - available).abs() / available < 0.12);

        let estimate = report.estimate.unwrap();
        assert!((estimate.available_bps + estimate.competing_bps - 10_000_000.0).abs() < 1e-3);
        assert_eq!(estimate.rounds as usize, report.rounds.len());
    }
}

#[test]
fn test_halving_step_caps_before_convergence() {
    let mut config = pathload_testbed(4_000_000);
    config.probe.step_policy = StepPolicy::Halving;
    config.probe.max_rounds = 10;
    let report = ProbeSimulation::new(&config).unwrap().run().unwrap();

    // 75 + 37 + 18 + ... never reaches the 900 us needed.
    assert_eq!(report.status, ProbeStatus::RoundCapReached);
    assert!(report.final_gap_us < 450);
    assert!(report.rounds.iter().all(|r| r.increase_ratio.unwrap() > 0.1));
}

#[test]
fn test_overloaded_train_shows_increasing_trend() {
    let mut config = pathload_testbed(4_000_000);
    config.probe.max_rounds = 1;
    let report = ProbeSimulation::new(&config).unwrap().run().unwrap();

    let trend = report.trend.unwrap();
    assert_eq!(trend.group_size, 10);
    assert_eq!(trend.groups.len(), 10);
    assert!(trend.is_increasing());
}

#[test]
fn test_idle_path_shows_flat_trend() {
    let mut config = pathload_testbed(0);
    config.probe.initial_gap_us = 600;
    let report = ProbeSimulation::new(&config).unwrap().run().unwrap();

    assert!(report.converged());
    let trend = report.trend.unwrap();
    assert!(!trend.is_increasing());
    assert_eq!(trend.pct_increasing, 0);
}

#[test]
fn test_lost_tail_truncates_train() {
    let config = ProbeConfig {
        train_size: 10,
        initial_gap_us: 100,
        ..ProbeConfig::default()
    };
    let mut session = ProbeSession::new(config).unwrap();
    session.begin_round().unwrap();

    for seq in 0..10 {
        let sent = SimTime::from_micros(u64::from(seq) * 100);
        session.record_departure(seq, sent).unwrap();
        // The last packet never arrives.
        if seq < 9 {
            session
                .record_arrival(seq, SimTime::from_micros(5_000 + u64::from(seq) * 100))
                .unwrap();
        }
    }

    // A shorter destination span reads as no queueing at all.
    let outcome = session.finish_round().unwrap();
    assert!(matches!(outcome, RoundOutcome::Converged(e) if e.increase_ratio == 0.0));

    let record = &session.history()[0];
    assert_eq!(record.expected, 10);
    assert_eq!(record.received, 9);
    assert_eq!(record.lost, 1);
    assert_eq!(record.source_gap_sum_us, 900);
    assert_eq!(record.destination_gap_sum_us, 800);
}

#[test]
fn test_loss_is_counted_per_round() {
    let mut config = pathload_testbed(4_000_000);
    config.simulation.probe_path.loss_rate = 0.1;
    let report = ProbeSimulation::new(&config).unwrap().run().unwrap();

    let lost: u64 = report.rounds.iter().map(|r| u64::from(r.lost)).sum();
    assert_eq!(lost, report.packets_dropped);
    assert!(lost > 0);
}

#[test]
fn test_total_loss_retries_same_gap() {
    let mut config = pathload_testbed(4_000_000);
    config.simulation.probe_path.loss_rate = 1.0;
    config.probe.max_rounds = 5;
    let report = ProbeSimulation::new(&config).unwrap().run().unwrap();

    assert_eq!(report.status, ProbeStatus::RoundCapReached);
    assert_eq!(report.rounds.len(), 5);
    assert!(report.rounds.iter().all(|r| r.source_gap_us == 300));
    assert!(report.rounds.iter().all(|r| r.increase_ratio.is_none()));
}
