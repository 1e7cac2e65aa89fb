// =============================================================================
// Batch Pipeline — recorded series in, characterised events out
// =============================================================================
//
//   raw ─► cascade(α₁, α₂) ─► derive(window) ─► smooth(α_d) ─► detect
//                                                                │
//                     indicators over [pre_start, end] ◄─────────┘
//
// A run allocates every derived series once, owns them for its duration and
// hands them to the caller inside the report.  Nothing persists between runs,
// so one pipeline can be reused for any number of recordings.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::detection::{classify_trend, EventDetector, EventTrend};
use crate::features::{FeatureExtractor, Indicators};
use crate::filters::{cascade, smoothed_derivative};
use crate::runtime_config::RuntimeConfig;
use crate::types::{nan_from_null, nan_vec_from_null, Sample, Segment, SegmentKind};

/// One characterised event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventReport {
    /// The flagged run itself (kind `Event`).
    pub segment: Segment,
    /// First index of the pre-roll the indicators were computed over.
    pub pre_start: usize,
    pub start_ms: i64,
    pub end_ms: i64,
    pub trend: EventTrend,
    pub indicators: Indicators,
}

/// Every intermediate series of a run, aligned by index with the input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesReport {
    pub timestamps: Vec<i64>,
    #[serde(deserialize_with = "nan_vec_from_null")]
    pub primary: Vec<f64>,
    #[serde(deserialize_with = "nan_vec_from_null")]
    pub secondary: Vec<f64>,
    #[serde(deserialize_with = "nan_vec_from_null")]
    pub window_derivative: Vec<f64>,
    #[serde(deserialize_with = "nan_vec_from_null")]
    pub smoothed_derivative: Vec<f64>,
    pub flags: Vec<bool>,
}

/// Statistics of one stable stretch, taken over the filtered signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StableSummary {
    pub segment: Segment,
    pub start_ms: i64,
    pub end_ms: i64,
    #[serde(deserialize_with = "nan_from_null")]
    pub min: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub max: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub mean: f64,
    pub samples: usize,
}

impl StableSummary {
    /// Summarise `filtered[segment]`. The segment must lie inside the series.
    fn of(segment: Segment, samples: &[Sample], filtered: &[f64]) -> Self {
        let values = &filtered[segment.start_index..=segment.end_index];
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Self {
            segment,
            start_ms: samples[segment.start_index].timestamp_ms,
            end_ms: samples[segment.end_index].timestamp_ms,
            min,
            max,
            mean,
            samples: values.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub generated_at: DateTime<Utc>,
    pub sample_count: usize,
    pub threshold_per_sample: f64,
    pub events: Vec<EventReport>,
    /// Run-length encoded classification mask covering the whole input.
    pub segments: Vec<Segment>,
    /// One entry per `Stable` segment, in order.
    pub stable_periods: Vec<StableSummary>,
    pub series: SeriesReport,
}

pub struct BatchPipeline {
    config: RuntimeConfig,
    detector: EventDetector,
    extractor: FeatureExtractor,
}

impl BatchPipeline {
    /// Build a pipeline. Fails on an invalid configuration.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config
            .validate()
            .context("refusing to build batch pipeline")?;

        let signal = &config.signal;
        let detector = EventDetector::new(
            signal.threshold_per_sample(),
            signal.pre_event_samples(),
            signal.post_event_samples(),
        );
        let extractor = FeatureExtractor::new(
            signal.sample_rate_hz,
            signal.hf_cutoff_hz,
            signal.stabilize_tolerance,
        );

        Ok(Self {
            config,
            detector,
            extractor,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn run(&self, samples: &[Sample]) -> BatchReport {
        let signal = &self.config.signal;
        let raw: Vec<f64> = samples.iter().map(|s| s.raw).collect();

        let filtered = cascade(&raw, signal.alpha_primary, signal.alpha_secondary);
        let (window_derivative, smoothed) = smoothed_derivative(
            &filtered.secondary,
            signal.derivative_window,
            signal.derivative_alpha,
        );
        let detection = self.detector.detect(&smoothed);

        let mut events = Vec::with_capacity(detection.events.len());
        for event in &detection.events {
            let Some(indicators) = self.extractor.extract(&samples[event.feature_range()]) else {
                continue;
            };
            let run = &smoothed[event.start..=event.end];
            let mean_derivative = run.iter().sum::<f64>() / run.len() as f64;
            let trend = classify_trend(mean_derivative, indicators.delta_p, self.detector.threshold());

            debug!(
                start = event.start,
                end = event.end,
                pre_start = event.pre_start,
                trend = %trend,
                delta_p = indicators.delta_p,
                "event characterised"
            );

            events.push(EventReport {
                segment: Segment {
                    start_index: event.start,
                    end_index: event.end,
                    kind: SegmentKind::Event,
                },
                pre_start: event.pre_start,
                start_ms: samples[event.start].timestamp_ms,
                end_ms: samples[event.end].timestamp_ms,
                trend,
                indicators,
            });
        }

        let segments = detection.segments();
        let stable_periods: Vec<StableSummary> = segments
            .iter()
            .filter(|seg| seg.kind == SegmentKind::Stable)
            .map(|seg| StableSummary::of(*seg, samples, &filtered.secondary))
            .collect();

        info!(
            samples = samples.len(),
            events = events.len(),
            stable_periods = stable_periods.len(),
            threshold = self.detector.threshold(),
            "batch run complete"
        );

        BatchReport {
            generated_at: Utc::now(),
            sample_count: samples.len(),
            threshold_per_sample: self.detector.threshold(),
            segments,
            stable_periods,
            events,
            series: SeriesReport {
                timestamps: samples.iter().map(|s| s.timestamp_ms).collect(),
                primary: filtered.primary,
                secondary: filtered.secondary,
                window_derivative,
                smoothed_derivative: smoothed,
                flags: detection.flags,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(parts: &[(f64, usize)]) -> Vec<Sample> {
        parts
            .iter()
            .flat_map(|&(level, n)| std::iter::repeat(level).take(n))
            .enumerate()
            .map(|(i, raw)| Sample::new(i as i64 * 10, raw))
            .collect()
    }

    fn pipeline() -> BatchPipeline {
        let mut cfg = RuntimeConfig::default();
        cfg.signal.threshold_per_sec = 2_000.0;
        BatchPipeline::new(cfg).unwrap()
    }

    #[test]
    fn single_step_yields_one_rising_event() {
        let samples = levels(&[(1000.0, 100), (5000.0, 60)]);
        let report = pipeline().run(&samples);

        assert_eq!(report.sample_count, 160);
        assert!((report.threshold_per_sample - 20.0).abs() < 1e-9);
        assert_eq!(report.events.len(), 1);

        let ev = &report.events[0];
        assert!(ev.segment.start_index >= 100);
        assert_eq!(ev.segment.start_index, 108);
        assert_eq!(ev.segment.end_index, 159);
        assert_eq!(ev.pre_start, 68);
        assert_eq!(ev.start_ms, 1080);
        assert_eq!(ev.trend, EventTrend::Rising);
        assert!((ev.indicators.delta_p - 4000.0).abs() < 1e-9);
        assert_eq!(ev.indicators.overshoot, 5000.0);
    }

    #[test]
    fn series_are_aligned_with_input() {
        let samples = levels(&[(1000.0, 100), (5000.0, 60)]);
        let report = pipeline().run(&samples);
        let s = &report.series;
        for len in [
            s.timestamps.len(),
            s.primary.len(),
            s.secondary.len(),
            s.window_derivative.len(),
            s.smoothed_derivative.len(),
            s.flags.len(),
        ] {
            assert_eq!(len, 160);
        }
        assert!(s.window_derivative[..50].iter().all(|&d| d == 0.0));

        let kinds: Vec<SegmentKind> = report.segments.iter().map(|seg| seg.kind).collect();
        assert_eq!(kinds, vec![SegmentKind::Stable, SegmentKind::PreEvent, SegmentKind::Event]);
        assert_eq!(report.segments.last().unwrap().end_index, 159);
    }

    #[test]
    fn pulse_yields_rising_then_falling() {
        let samples = levels(&[(1000.0, 100), (5000.0, 200), (1000.0, 200)]);
        let report = pipeline().run(&samples);
        assert_eq!(report.events.len(), 2);
        assert_eq!(report.events[0].trend, EventTrend::Rising);
        assert_eq!(report.events[1].trend, EventTrend::Falling);
        assert!((report.events[1].indicators.delta_p + 4000.0).abs() < 1e-9);
        assert!(report.events[0].segment.end_index < report.events[1].pre_start);
    }

    #[test]
    fn flat_recording_has_no_events() {
        let samples = levels(&[(1000.0, 300)]);
        let report = pipeline().run(&samples);
        assert!(report.events.is_empty());
        assert_eq!(report.segments.len(), 1);
        assert_eq!(report.segments[0].kind, SegmentKind::Stable);
    }

    #[test]
    fn empty_input_is_empty_report() {
        let report = pipeline().run(&[]);
        assert_eq!(report.sample_count, 0);
        assert!(report.events.is_empty());
        assert!(report.segments.is_empty());
        assert!(report.series.smoothed_derivative.is_empty());
    }

    #[test]
    fn default_threshold_ignores_small_step() {
        let samples = levels(&[(1000.0, 100), (5000.0, 60)]);
        let report = BatchPipeline::new(RuntimeConfig::default()).unwrap().run(&samples);
        assert!(report.events.is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut cfg = RuntimeConfig::default();
        cfg.signal.alpha_primary = 0.0;
        assert!(BatchPipeline::new(cfg).is_err());
    }

    #[test]
    fn stable_periods_summarise_filtered_signal() {
        let samples = levels(&[(1000.0, 100), (5000.0, 60)]);
        let report = pipeline().run(&samples);
        assert_eq!(report.stable_periods.len(), 1);
        let period = &report.stable_periods[0];
        assert_eq!(period.segment.start_index, 0);
        assert_eq!(period.segment.end_index, 67);
        assert_eq!((period.start_ms, period.end_ms), (0, 670));
        assert_eq!(period.samples, 68);
        assert_eq!(period.min, 1000.0);
        assert_eq!(period.max, 1000.0);
        assert_eq!(period.mean, 1000.0);
    }

    #[test]
    fn stable_periods_follow_every_stable_segment() {
        let samples = levels(&[(1000.0, 100), (5000.0, 200), (1000.0, 200)]);
        let report = pipeline().run(&samples);
        let stable: Vec<&Segment> = report
            .segments
            .iter()
            .filter(|seg| seg.kind == SegmentKind::Stable)
            .collect();
        assert_eq!(report.stable_periods.len(), 3);
        assert_eq!(stable.len(), 3);
        for (period, seg) in report.stable_periods.iter().zip(stable) {
            assert_eq!(period.segment, *seg);
            assert_eq!(period.samples, seg.len());
            assert!(period.min <= period.mean && period.mean <= period.max);
        }
        // Plateau between the two steps sits close to the high level.
        let plateau = &report.stable_periods[1];
        assert!(plateau.max <= 5000.0);
        assert!(plateau.min > 4900.0);
    }

    #[test]
    fn report_with_nan_round_trips_through_json() {
        let samples = vec![Sample::new(0, f64::NAN)];
        let mut report = pipeline().run(&samples);
        report.events.push(EventReport {
            segment: Segment {
                start_index: 0,
                end_index: 0,
                kind: SegmentKind::Event,
            },
            pre_start: 0,
            start_ms: 0,
            end_ms: 0,
            trend: EventTrend::Flat,
            indicators: FeatureExtractor::new(100.0, 10.0, 0.05).extract(&samples).unwrap(),
        });
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["events"][0]["indicators"]["t_stabilize"].is_null());
        assert!(json["series"]["primary"][0].is_null());

        let back: BatchReport = serde_json::from_value(json).unwrap();
        assert!(back.events[0].indicators.t_stabilize.is_nan());
        assert!(back.events[0].indicators.overshoot.is_nan());
        assert!(back.series.primary[0].is_nan());
    }
}
