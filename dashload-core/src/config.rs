//! Centralized configuration for dashload.
//!
//! All tunable parameters of the streaming and probing experiments live here.
//! Defaults reproduce the reference streaming and pathload testbeds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adaptation::{AdaptationError, StrategyKind};
use crate::buffer::StallPolicy;
use crate::ladder::BitrateLadder;
use crate::probe::{ProbeError, StepPolicy};
use crate::transfer::ChunkRequest;
use crate::{DashloadError, Result};

/// Central configuration for all dashload components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashloadConfig {
    pub streaming: StreamingConfig,
    pub probe: ProbeConfig,
    pub simulation: SimulationConfig,
}

/// Adaptive streaming session parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Representation bitrates offered by the server
    pub ladder: BitrateLadder,
    /// Adaptation strategy name, see [`StrategyKind`]
    pub strategy: String,
    /// Media duration of one chunk
    pub chunk_duration_ms: u32,
    /// Largest segment the server writes at once
    pub segment_size: u32,
    /// Buffer level at which requests are deferred
    pub max_buffer_ms: u32,
    /// Playback drain period
    pub drain_tick_ms: u32,
    /// Drain timer behavior after a stall
    pub stall_policy: StallPolicy,
    /// Period of buffer state dumps
    pub dump_interval_ms: u64,
    /// Session start time
    pub start_ms: u64,
    /// Session stop time
    pub stop_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            ladder: BitrateLadder::default(),
            strategy: StrategyKind::ThroughputBased.as_str().to_string(),
            chunk_duration_ms: 2_000,
            segment_size: 512,
            max_buffer_ms: 30_000,
            drain_tick_ms: 100,
            stall_policy: StallPolicy::RearmOnNextChunk,
            dump_interval_ms: 1_000,
            start_ms: 1_000,
            stop_ms: 300_000,
        }
    }
}

impl StreamingConfig {
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.chunk_duration_ms))
    }

    /// Parses the configured strategy name.
    ///
    /// # Errors
    ///
    /// - `AdaptationError::UnknownStrategy` - Name matches no built-in strategy
    pub fn strategy_kind(&self) -> std::result::Result<StrategyKind, AdaptationError> {
        self.strategy.parse()
    }
}

/// Bandwidth probe parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Packets per SLoPS train
    pub train_size: u32,
    /// Probe datagram size in bytes
    pub packet_size: u32,
    /// Source gap of the first train
    pub initial_gap_us: u64,
    /// Gap increment after a non-converged round
    pub step_us: u64,
    pub step_policy: StepPolicy,
    /// Increase ratio below which the estimate converges
    pub convergence_threshold: f64,
    /// Capacity assumed for the bottleneck link
    pub bottleneck_capacity_bps: u64,
    /// Rounds before giving up
    pub max_rounds: u32,
    /// Idle time between the end of one train and the next
    pub inter_train_idle_us: u64,
    /// Probe session stop time
    pub stop_ms: u64,
    /// Offered rates of the TOPP sweep
    pub sweep_rates_bps: Vec<u64>,
    /// Packets per TOPP train
    pub sweep_train_size: u32,
    /// Tracking ratio for turning-point detection; no detection when unset
    pub turning_point_ratio: Option<f64>,
}

/// Dispersion unit of the reference testbed, in microseconds.
const REFERENCE_GAP_US: u64 = 600;

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            train_size: 100,
            packet_size: 750,
            initial_gap_us: REFERENCE_GAP_US / 2,
            step_us: REFERENCE_GAP_US / 8,
            step_policy: StepPolicy::Fixed,
            convergence_threshold: 0.1,
            bottleneck_capacity_bps: 10_000_000,
            max_rounds: 50,
            inter_train_idle_us: 10_000,
            stop_ms: 60_000,
            sweep_rates_bps: (1..=9).map(|mbps| mbps * 1_000_000).collect(),
            sweep_train_size: 50,
            turning_point_ratio: None,
        }
    }
}

impl ProbeConfig {
    /// Checks the parameters a SLoPS session needs.
    pub(crate) fn validate_slops(&self) -> std::result::Result<(), ProbeError> {
        let invalid = |reason: &str| {
            Err(ProbeError::InvalidConfiguration {
                reason: reason.to_string(),
            })
        };

        if self.train_size == 0 {
            return invalid("train size must be positive");
        }
        if self.packet_size == 0 {
            return invalid("packet size must be positive");
        }
        if self.initial_gap_us == 0 {
            return invalid("initial source gap must be positive");
        }
        if !(self.convergence_threshold > 0.0 && self.convergence_threshold < 1.0) {
            return invalid("convergence threshold must lie in (0, 1)");
        }
        if self.bottleneck_capacity_bps == 0 {
            return invalid("bottleneck capacity must be positive");
        }
        if self.max_rounds == 0 {
            return invalid("round cap must be positive");
        }
        Ok(())
    }
}

/// One direction of a bottleneck path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Bottleneck link rate
    pub capacity_bps: u64,
    /// One-way propagation delay
    pub propagation_delay_us: u64,
    /// Constant competing load sharing the bottleneck
    pub competing_bps: u64,
    /// Datagram loss probability (0.0 to 1.0)
    pub loss_rate: f64,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            capacity_bps: 5_000_000,
            propagation_delay_us: 10_000,
            competing_bps: 0,
            loss_rate: 0.0,
        }
    }
}

/// Reference simulation host settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Deterministic seed for reproducible runs
    pub deterministic_seed: Option<u64>,
    /// Path carrying the streaming session
    pub stream_path: PathConfig,
    /// Path carrying probe trains
    pub probe_path: PathConfig,
    /// Send buffer of the streaming connection
    pub tx_buffer_bytes: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: Some(42),
            stream_path: PathConfig::default(),
            probe_path: PathConfig {
                capacity_bps: 10_000_000,
                propagation_delay_us: 5_000,
                competing_bps: 4_000_000,
                loss_rate: 0.0,
            },
            tx_buffer_bytes: 131_072,
        }
    }
}

impl SimulationConfig {
    /// Creates a configuration for deterministic testing.
    pub fn deterministic_testing() -> Self {
        Self {
            deterministic_seed: Some(42),
            stream_path: PathConfig {
                capacity_bps: 10_000_000,
                propagation_delay_us: 1_000,
                competing_bps: 0,
                loss_rate: 0.0,
            },
            ..Default::default()
        }
    }

    /// Creates a configuration with random loss on the probe path.
    pub fn lossy_probe(loss_rate: f64) -> Self {
        let mut config = Self::default();
        config.probe_path.loss_rate = loss_rate;
        config
    }
}

impl DashloadConfig {
    /// Loads a configuration file, missing fields taking their defaults.
    ///
    /// # Errors
    ///
    /// - `DashloadError::Io` - File cannot be read
    /// - `DashloadError::Json` - File is not valid configuration JSON
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Creates configuration with environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Applies `DASHLOAD_*` environment overrides on top of `self`.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Applies `DASHLOAD_*` overrides read through `lookup`.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(strategy) = lookup("DASHLOAD_STRATEGY") {
            self.streaming.strategy = strategy;
        }

        if let Some(seed) = lookup("DASHLOAD_SEED") {
            if let Ok(seed_value) = seed.parse::<u64>() {
                self.simulation.deterministic_seed = Some(seed_value);
            }
        }

        if let Some(max_buffer) = lookup("DASHLOAD_MAX_BUFFER_MS") {
            if let Ok(millis) = max_buffer.parse::<u32>() {
                self.streaming.max_buffer_ms = millis;
            }
        }

        if let Some(train_size) = lookup("DASHLOAD_TRAIN_SIZE") {
            if let Ok(count) = train_size.parse::<u32>() {
                self.probe.train_size = count;
            }
        }

        if let Some(max_rounds) = lookup("DASHLOAD_MAX_ROUNDS") {
            if let Ok(count) = max_rounds.parse::<u32>() {
                self.probe.max_rounds = count;
            }
        }
    }

    /// Rejects configurations that cannot start a run.
    ///
    /// # Errors
    ///
    /// - `DashloadError::Configuration` - Zero durations or sizes, empty lowest-rung chunks, stop before start, bad probe parameters
    /// - `DashloadError::Adaptation` - Unknown strategy name
    pub fn validate(&self) -> Result<()> {
        let streaming = &self.streaming;
        streaming.strategy_kind()?;

        if streaming.chunk_duration_ms == 0 {
            return Err(configuration("chunk duration must be positive"));
        }
        // An empty chunk request never completes.
        let smallest = ChunkRequest::for_bitrate(streaming.ladder.lowest(), streaming.chunk_duration());
        if smallest.byte_size == 0 {
            return Err(configuration("lowest rung and chunk duration give an empty chunk"));
        }
        if streaming.drain_tick_ms == 0 {
            return Err(configuration("drain tick period must be positive"));
        }
        if streaming.segment_size == 0 {
            return Err(configuration("segment size must be positive"));
        }
        if streaming.max_buffer_ms == 0 {
            return Err(configuration("max buffer must be positive"));
        }
        if streaming.stop_ms <= streaming.start_ms {
            return Err(configuration("session stop time must follow start time"));
        }

        self.probe.validate_slops()?;

        for (name, path) in [
            ("stream", &self.simulation.stream_path),
            ("probe", &self.simulation.probe_path),
        ] {
            if path.capacity_bps == 0 {
                return Err(configuration(&format!("{name} path capacity must be positive")));
            }
            if !(0.0..=1.0).contains(&path.loss_rate) {
                return Err(configuration(&format!(
                    "{name} path loss rate must lie in [0, 1]"
                )));
            }
        }
        if self.simulation.tx_buffer_bytes == 0 {
            return Err(configuration("send buffer must be positive"));
        }

        Ok(())
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            simulation: SimulationConfig::deterministic_testing(),
            ..Default::default()
        }
    }
}

fn configuration(reason: &str) -> DashloadError {
    DashloadError::Configuration {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = DashloadConfig::default();

        assert_eq!(config.streaming.ladder.rungs()[0], 700_000);
        assert_eq!(config.streaming.chunk_duration(), Duration::from_secs(2));
        assert_eq!(config.streaming.segment_size, 512);
        assert_eq!(config.streaming.max_buffer_ms, 30_000);
        assert_eq!(config.streaming.drain_tick_ms, 100);
        assert_eq!(config.probe.train_size, 100);
        assert_eq!(config.probe.packet_size, 750);
        assert_eq!(config.probe.initial_gap_us, 300);
        assert_eq!(config.probe.step_us, 75);
        assert_eq!(config.probe.convergence_threshold, 0.1);
        assert_eq!(config.probe.bottleneck_capacity_bps, 10_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let mut config = DashloadConfig::default();
        config.streaming.strategy = "festive".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.is_user_error());
        assert!(err.to_string().contains("festive"));
    }

    #[test]
    fn test_validate_rejects_zero_periods() {
        let mut config = DashloadConfig::default();
        config.streaming.drain_tick_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(DashloadError::Configuration { .. })
        ));

        let mut config = DashloadConfig::default();
        config.probe.convergence_threshold = 0.0;
        assert!(matches!(config.validate(), Err(DashloadError::Probe(_))));
    }

    #[test]
    fn test_simulation_presets() {
        let testing = SimulationConfig::deterministic_testing();
        assert_eq!(testing.deterministic_seed, Some(42));
        assert_eq!(testing.stream_path.loss_rate, 0.0);

        let lossy = SimulationConfig::lossy_probe(0.05);
        assert_eq!(lossy.probe_path.loss_rate, 0.05);
        assert_eq!(lossy.probe_path.competing_bps, 4_000_000);
    }

    #[test]
    fn test_load_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "streaming": {{ "strategy": "buffer", "ladder": [500000, 1000000] }},
                "probe": {{ "step_policy": "halving" }}
            }}"#
        )
        .unwrap();

        let config = DashloadConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.streaming.strategy_kind(), Ok(StrategyKind::BufferBased));
        assert_eq!(config.streaming.ladder.rungs(), &[500_000, 1_000_000]);
        assert_eq!(config.streaming.max_buffer_ms, 30_000);
        assert_eq!(config.probe.step_policy, StepPolicy::Halving);
        assert_eq!(config.probe.train_size, 100);
    }

    #[test]
    fn test_load_rejects_bad_ladder() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "streaming": {{ "ladder": [900, 100] }} }}"#).unwrap();

        assert!(matches!(
            DashloadConfig::from_json_file(file.path()),
            Err(DashloadError::Json(_))
        ));
    }

    #[test]
    fn test_env_override() {
        let vars: std::collections::HashMap<&str, &str> = [
            ("DASHLOAD_STRATEGY", "smoothed"),
            ("DASHLOAD_SEED", "12345"),
            ("DASHLOAD_MAX_BUFFER_MS", "20000"),
            ("DASHLOAD_TRAIN_SIZE", "40"),
            ("DASHLOAD_MAX_ROUNDS", "7"),
        ]
        .into_iter()
        .collect();

        let mut config = DashloadConfig::default();
        config.apply_env_with(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.streaming.strategy, "smoothed");
        assert_eq!(config.simulation.deterministic_seed, Some(12345));
        assert_eq!(config.streaming.max_buffer_ms, 20_000);
        assert_eq!(config.probe.train_size, 40);
        assert_eq!(config.probe.max_rounds, 7);
    }

    #[test]
    fn test_env_override_ignores_unparsable_values() {
        let mut config = DashloadConfig::default();
        config.apply_env_with(|key| match key {
            "DASHLOAD_SEED" => Some("not-a-seed".to_string()),
            "DASHLOAD_TRAIN_SIZE" => Some("-3".to_string()),
            _ => None,
        });

        let defaults = DashloadConfig::default();
        assert_eq!(config.simulation.deterministic_seed, defaults.simulation.deterministic_seed);
        assert_eq!(config.probe.train_size, defaults.probe.train_size);
        assert_eq!(config.streaming.strategy, defaults.streaming.strategy);
    }

    #[test]
    fn test_validate_rejects_empty_lowest_chunk() {
        let mut config = DashloadConfig::for_testing();
        // 1 bps for one second is an eighth of a byte.
        config.streaming.ladder = BitrateLadder::new(vec![1, 2]).unwrap();
        config.streaming.chunk_duration_ms = 1_000;
        assert!(matches!(
            config.validate(),
            Err(DashloadError::Configuration { .. })
        ));

        // 8 bps for one second is one byte.
        config.streaming.ladder = BitrateLadder::new(vec![8, 16]).unwrap();
        assert!(config.validate().is_ok());
    }
}
