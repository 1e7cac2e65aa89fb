// =============================================================================
// Runtime Configuration — Pipeline parameters with validation and atomic save
// =============================================================================
//
// Every tunable of the batch and streaming pipelines lives here.  The values
// are fixed for the lifetime of a run or session; nothing is negotiated at
// runtime.
//
// Persistence uses an atomic tmp + rename pattern.  All fields carry
// `#[serde(default)]` so that a partial JSON file still loads with the
// remaining parameters at their defaults.
//
// The online edge parameters (threshold, dwell times, frame count) are
// hand-tuned and carried as plain configuration.
// =============================================================================

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_sample_rate_hz() -> f64 {
    100.0
}

fn default_alpha_primary() -> f64 {
    0.3
}

fn default_alpha_secondary() -> f64 {
    0.2
}

fn default_derivative_window() -> usize {
    50
}

fn default_derivative_alpha() -> f64 {
    0.1
}

fn default_threshold_per_sec() -> f64 {
    120_000.0
}

fn default_pre_event_period_ms() -> f64 {
    400.0
}

fn default_hf_cutoff_hz() -> f64 {
    10.0
}

fn default_stabilize_tolerance() -> f64 {
    0.05
}

fn default_alpha_fast() -> f64 {
    0.25
}

fn default_alpha_slow() -> f64 {
    0.08
}

fn default_edge_threshold() -> f64 {
    12_000.0
}

fn default_frames_required() -> u32 {
    8
}

fn default_min_stable_ms() -> i64 {
    1_500
}

fn default_min_edge_ms() -> i64 {
    1_500
}

fn default_buffer_capacity() -> usize {
    2_000
}

fn default_visible_window_ms() -> i64 {
    20_000
}

fn default_tick_ms() -> u64 {
    50
}

fn default_edge_log_capacity() -> usize {
    1_024
}

fn check_alpha(name: &str, alpha: f64) -> Result<()> {
    ensure!(
        alpha > 0.0 && alpha < 1.0,
        "{name} must lie in (0, 1), got {alpha}"
    );
    Ok(())
}

// =============================================================================
// SignalParams
// =============================================================================

/// Parameters of the batch chain: cascade, differentiator, detector and
/// feature extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalParams {
    /// Native sampling frequency of the sensor (Hz).
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: f64,

    /// Coefficient of the first cascade stage.
    #[serde(default = "default_alpha_primary")]
    pub alpha_primary: f64,

    /// Coefficient of the second cascade stage.
    #[serde(default = "default_alpha_secondary")]
    pub alpha_secondary: f64,

    /// Lag (in samples) of the windowed differentiator.
    #[serde(default = "default_derivative_window")]
    pub derivative_window: usize,

    /// Coefficient of the smoother applied to the windowed derivative.
    #[serde(default = "default_derivative_alpha")]
    pub derivative_alpha: f64,

    /// Human-specified derivative threshold in raw units per second.
    #[serde(default = "default_threshold_per_sec")]
    pub threshold_per_sec: f64,

    /// Pre-roll prepended to every event to compensate filter lag.
    #[serde(default = "default_pre_event_period_ms")]
    pub pre_event_period_ms: f64,

    /// Post-roll marked after every event. Zero disables it.
    #[serde(default)]
    pub post_event_period_ms: f64,

    /// Bins strictly above this frequency count towards `hf_energy`.
    #[serde(default = "default_hf_cutoff_hz")]
    pub hf_cutoff_hz: f64,

    /// Relative tolerance around the final value for `t_stabilize`.
    #[serde(default = "default_stabilize_tolerance")]
    pub stabilize_tolerance: f64,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate_hz(),
            alpha_primary: default_alpha_primary(),
            alpha_secondary: default_alpha_secondary(),
            derivative_window: default_derivative_window(),
            derivative_alpha: default_derivative_alpha(),
            threshold_per_sec: default_threshold_per_sec(),
            pre_event_period_ms: default_pre_event_period_ms(),
            post_event_period_ms: 0.0,
            hf_cutoff_hz: default_hf_cutoff_hz(),
            stabilize_tolerance: default_stabilize_tolerance(),
        }
    }
}

impl SignalParams {
    /// Interval between two samples at the native rate (ms).
    pub fn sample_interval_ms(&self) -> f64 {
        1000.0 / self.sample_rate_hz
    }

    /// Per-sample threshold compared against the smoothed derivative.
    ///
    /// The differentiator averages over `window` samples at the native
    /// interval, so the per-second figure is scaled down by the sample rate.
    pub fn threshold_per_sample(&self) -> f64 {
        self.threshold_per_sec / self.sample_rate_hz
    }

    pub fn pre_event_samples(&self) -> usize {
        periods_to_samples(self.pre_event_period_ms, self.sample_interval_ms())
    }

    pub fn post_event_samples(&self) -> usize {
        periods_to_samples(self.post_event_period_ms, self.sample_interval_ms())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0,
            "sample_rate_hz must be positive, got {}",
            self.sample_rate_hz
        );
        check_alpha("alpha_primary", self.alpha_primary)?;
        check_alpha("alpha_secondary", self.alpha_secondary)?;
        check_alpha("derivative_alpha", self.derivative_alpha)?;
        ensure!(self.derivative_window >= 1, "derivative_window must be >= 1");
        ensure!(
            self.threshold_per_sec >= 0.0,
            "threshold_per_sec must be >= 0, got {}",
            self.threshold_per_sec
        );
        ensure!(
            self.pre_event_period_ms >= 0.0 && self.post_event_period_ms >= 0.0,
            "pre/post event periods must be >= 0"
        );
        ensure!(
            self.hf_cutoff_hz >= 0.0,
            "hf_cutoff_hz must be >= 0, got {}",
            self.hf_cutoff_hz
        );
        ensure!(
            self.stabilize_tolerance >= 0.0,
            "stabilize_tolerance must be >= 0, got {}",
            self.stabilize_tolerance
        );
        Ok(())
    }
}

fn periods_to_samples(period_ms: f64, interval_ms: f64) -> usize {
    if period_ms <= 0.0 {
        return 0;
    }
    (period_ms / interval_ms).ceil() as usize
}

// =============================================================================
// EdgeParams
// =============================================================================

/// Parameters of the streaming session and its edge state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeParams {
    /// Fast filter coefficient; also used for the output while an edge is seen.
    #[serde(default = "default_alpha_fast")]
    pub alpha_fast: f64,

    /// Slow filter coefficient; used for the output while stable.
    #[serde(default = "default_alpha_slow")]
    pub alpha_slow: f64,

    /// Minimum |fast - slow| divergence (raw units) that flags a sample.
    #[serde(default = "default_edge_threshold")]
    pub edge_threshold: f64,

    /// Consecutive samples needed to confirm either transition.
    #[serde(default = "default_frames_required")]
    pub frames_required: u32,

    /// Minimum time after an `end` before a new `start` is accepted.
    #[serde(default = "default_min_stable_ms")]
    pub min_stable_ms: i64,

    /// Minimum time after a `start` before its `end` is accepted.
    #[serde(default = "default_min_edge_ms")]
    pub min_edge_ms: i64,

    /// Capacity of the bounded sample ring.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Span of the visible window the per-tick derivative view covers.
    #[serde(default = "default_visible_window_ms")]
    pub visible_window_ms: i64,

    /// Period of the streaming tick.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Number of edge events retained in the session log.
    #[serde(default = "default_edge_log_capacity")]
    pub edge_log_capacity: usize,
}

impl Default for EdgeParams {
    fn default() -> Self {
        Self {
            alpha_fast: default_alpha_fast(),
            alpha_slow: default_alpha_slow(),
            edge_threshold: default_edge_threshold(),
            frames_required: default_frames_required(),
            min_stable_ms: default_min_stable_ms(),
            min_edge_ms: default_min_edge_ms(),
            buffer_capacity: default_buffer_capacity(),
            visible_window_ms: default_visible_window_ms(),
            tick_ms: default_tick_ms(),
            edge_log_capacity: default_edge_log_capacity(),
        }
    }
}

impl EdgeParams {
    pub fn validate(&self) -> Result<()> {
        check_alpha("alpha_fast", self.alpha_fast)?;
        check_alpha("alpha_slow", self.alpha_slow)?;
        ensure!(
            self.edge_threshold >= 0.0,
            "edge_threshold must be >= 0, got {}",
            self.edge_threshold
        );
        ensure!(self.frames_required >= 1, "frames_required must be >= 1");
        ensure!(
            self.min_stable_ms >= 0 && self.min_edge_ms >= 0,
            "dwell times must be >= 0"
        );
        ensure!(self.buffer_capacity >= 1, "buffer_capacity must be >= 1");
        ensure!(self.visible_window_ms > 0, "visible_window_ms must be > 0");
        ensure!(self.tick_ms > 0, "tick_ms must be > 0");
        ensure!(self.edge_log_capacity >= 1, "edge_log_capacity must be >= 1");
        Ok(())
    }
}

// =============================================================================
// SourceParams
// =============================================================================

/// Sanity gate applied by the source adapters before samples reach the core.
///
/// Both bounds are exclusive; an unset bound is not checked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceParams {
    #[serde(default)]
    pub raw_min: Option<f64>,

    #[serde(default)]
    pub raw_max: Option<f64>,
}

impl SourceParams {
    pub fn accepts(&self, raw: f64) -> bool {
        self.raw_min.map_or(true, |min| raw > min) && self.raw_max.map_or(true, |max| raw < max)
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for batch runs and streaming sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub signal: SignalParams,

    #[serde(default)]
    pub edge: EdgeParams,

    #[serde(default)]
    pub source: SourceParams,
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file is an error so the caller can fall back to defaults
    /// with a warning. The loaded values are not validated here; pipeline
    /// construction does that.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse pipeline config from {}", path.display()))?;

        info!(
            path = %path.display(),
            sample_rate_hz = config.signal.sample_rate_hz,
            derivative_window = config.signal.derivative_window,
            edge_threshold = config.edge.edge_threshold,
            "pipeline config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise pipeline config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "pipeline config saved (atomic)");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.signal.validate().context("invalid signal parameters")?;
        self.edge.validate().context("invalid edge parameters")?;
        if let (Some(min), Some(max)) = (self.source.raw_min, self.source.raw_max) {
            ensure!(min < max, "source raw_min ({min}) must be below raw_max ({max})");
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert!((cfg.signal.sample_rate_hz - 100.0).abs() < f64::EPSILON);
        assert!((cfg.signal.alpha_primary - 0.3).abs() < f64::EPSILON);
        assert!((cfg.signal.alpha_secondary - 0.2).abs() < f64::EPSILON);
        assert_eq!(cfg.signal.derivative_window, 50);
        assert!((cfg.signal.threshold_per_sample() - 1200.0).abs() < 1e-9);
        assert_eq!(cfg.signal.pre_event_samples(), 40);
        assert_eq!(cfg.signal.post_event_samples(), 0);
        assert_eq!(cfg.edge.frames_required, 8);
        assert_eq!(cfg.edge.min_stable_ms, 1_500);
        assert_eq!(cfg.edge.tick_ms, 50);
        assert!(cfg.source.raw_min.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn pre_event_samples_round_up() {
        let signal = SignalParams {
            sample_rate_hz: 30.0,
            pre_event_period_ms: 100.0,
            ..SignalParams::default()
        };
        // 100 ms / 33.3 ms -> 3
        assert_eq!(signal.pre_event_samples(), 3);

        let signal = SignalParams {
            pre_event_period_ms: 405.0,
            ..SignalParams::default()
        };
        assert_eq!(signal.pre_event_samples(), 41);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.signal.derivative_window, 50);
        assert!((cfg.edge.alpha_fast - 0.25).abs() < f64::EPSILON);
        assert_eq!(cfg.edge.buffer_capacity, 2_000);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "signal": { "derivative_window": 10 }, "source": { "raw_min": 10000 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.signal.derivative_window, 10);
        assert!((cfg.signal.alpha_primary - 0.3).abs() < f64::EPSILON);
        assert_eq!(cfg.source.raw_min, Some(10_000.0));
        assert!(cfg.source.raw_max.is_none());
        assert_eq!(cfg.edge.frames_required, 8);
    }

    #[test]
    fn alpha_outside_unit_interval_is_rejected() {
        for alpha in [0.0, 1.0, -0.2, 1.5, f64::NAN] {
            let mut cfg = RuntimeConfig::default();
            cfg.signal.alpha_primary = alpha;
            assert!(cfg.validate().is_err(), "alpha {alpha} accepted");
        }
        let mut cfg = RuntimeConfig::default();
        cfg.edge.alpha_slow = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut cfg = RuntimeConfig::default();
        cfg.signal.derivative_window = 0;
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("derivative_window"));
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let mut cfg = RuntimeConfig::default();
        cfg.signal.threshold_per_sec = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_source_range_is_rejected() {
        let mut cfg = RuntimeConfig::default();
        cfg.source.raw_min = Some(100.0);
        cfg.source.raw_max = Some(10.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn source_gate_bounds_are_exclusive() {
        let gate = SourceParams {
            raw_min: Some(10_000.0),
            raw_max: Some(16_000_000.0),
        };
        assert!(!gate.accepts(10_000.0));
        assert!(gate.accepts(10_001.0));
        assert!(!gate.accepts(16_000_000.0));
        assert!(SourceParams::default().accepts(-5.0));
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("pressure-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pressure_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.signal.threshold_per_sec = 2_000.0;
        cfg.edge.frames_required = 5;
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert!((loaded.signal.threshold_per_sec - 2_000.0).abs() < f64::EPSILON);
        assert_eq!(loaded.edge.frames_required, 5);
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(RuntimeConfig::load("/nonexistent/pressure_config.json").is_err());
    }
}
