//! TOPP sweeps and pluggable turning-point detection.

use dashload_core::probe::{RateSample, TurningPoint, TurningPointDetector};
use dashload_sim::{SweepSimulation, pathload_testbed};

/// Largest drop in tracking ratio between consecutive samples.
struct SteepestDrop;

impl TurningPointDetector for SteepestDrop {
    fn detect(&self, samples: &[RateSample]) -> Option<TurningPoint> {
        let (index, _) = samples
            .windows(2)
            .enumerate()
            .map(|(i, pair)| (i + 1, pair[0].tracking_ratio() - pair[1].tracking_ratio()))
            .max_by(|a, b| a.1.total_cmp(&b.1))?;
        Some(TurningPoint {
            step: samples[index].step,
            lower_bound_bps: samples[index - 1].offered_rate_bps,
            upper_bound_bps: samples[index].offered_rate_bps,
        })
    }
}

#[test]
fn test_raw_samples_without_detector() {
    let report = SweepSimulation::new(&pathload_testbed(4_000_000))
        .unwrap()
        .run()
        .unwrap();

    assert!(report.turning_point.is_none());
    assert_eq!(report.samples.len(), 9);
    let offered: Vec<u64> = report.samples.iter().map(|s| s.offered_rate_bps).collect();
    assert!(offered.windows(2).all(|pair| pair[0] < pair[1]));

    // Realized rate saturates at the 6 Mbps left by the cross traffic.
    let top = report.samples.last().unwrap();
    assert!((top.measured_bps - 6_000_000.0).abs() < 100_000.0);
}

#[test]
fn test_turning_point_brackets_available_rate() {
    for competing in [2_000_000u64, 5_000_000] {
        let mut config = pathload_testbed(competing);
        config.probe.turning_point_ratio = Some(0.95);
        let report = SweepSimulation::new(&config).unwrap().run().unwrap();

        let available = 10_000_000 - competing;
        let point = report.turning_point.unwrap();
        assert!(point.lower_bound_bps <= available, "{point:?}");
        assert!(point.upper_bound_bps > available, "{point:?}");
    }
}

#[test]
fn test_custom_detector_plugs_in() {
    let report = SweepSimulation::new(&pathload_testbed(4_000_000))
        .unwrap()
        .with_detector(Box::new(SteepestDrop))
        .run()
        .unwrap();

    let point = report.turning_point.unwrap();
    assert!(point.upper_bound_bps > 6_000_000);
    assert!(point.lower_bound_bps >= 6_000_000);
}

#[test]
fn test_total_loss_skips_every_step() {
    let mut config = pathload_testbed(0);
    config.simulation.probe_path.loss_rate = 1.0;
    config.probe.turning_point_ratio = Some(0.9);
    let report = SweepSimulation::new(&config).unwrap().run().unwrap();

    assert!(report.samples.is_empty());
    assert_eq!(report.skipped_steps, (0..9).collect::<Vec<_>>());
    assert!(report.turning_point.is_none());
    assert_eq!(report.packets_dropped, 9 * 50);
}

#[test]
fn test_stop_time_cuts_sweep_short() {
    let mut config = pathload_testbed(4_000_000);
    config.probe.stop_ms = 500;
    let report = SweepSimulation::new(&config).unwrap().run().unwrap();

    // The 1 Mbps train alone spans about 300 ms, so the sweep cannot finish.
    assert!(!report.samples.is_empty());
    assert!(report.samples.len() < 9, "{} samples", report.samples.len());
    assert!(report.elapsed_ms <= 500);

    let full = SweepSimulation::new(&pathload_testbed(4_000_000))
        .unwrap()
        .run()
        .unwrap();
    assert!(full.elapsed_ms > 500);
}
