// =============================================================================
// Batch Event Detector — threshold segmentation with pre-roll
// =============================================================================
//
//   flag_i = |smoothed_derivative_i| > threshold
//
// Maximal runs of `true` become events.  A run opens on a false -> true
// transition and closes (inclusive) on the sample before the true -> false
// transition; a run still open at the end of the scan closes at the last
// index.  Adjacent runs are never merged.
//
// Each event is widened backwards by `pre_event_samples` to compensate the
// lag of the cascade + derivative smoothing, clamped at index 0.  An optional
// post-roll marks samples after the run.  Marks are applied event by event,
// so later marks win where rolls overlap an earlier event.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Segment, SegmentKind};

/// One detected event: the flagged run plus its pre-roll start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedEvent {
    /// First index of the pre-roll (`<= start`).
    pub pre_start: usize,
    /// First flagged index.
    pub start: usize,
    /// Last flagged index (inclusive).
    pub end: usize,
}

impl DetectedEvent {
    /// Index range features are computed over: pre-roll plus run.
    pub fn feature_range(&self) -> std::ops::RangeInclusive<usize> {
        self.pre_start..=self.end
    }
}

/// Full output of one detection pass.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub flags: Vec<bool>,
    pub events: Vec<DetectedEvent>,
    pub mask: Vec<SegmentKind>,
}

impl Detection {
    /// Run-length encode the mask into contiguous segments.
    pub fn segments(&self) -> Vec<Segment> {
        mask_segments(&self.mask)
    }
}

/// Batch detector over a smoothed-derivative series.
#[derive(Debug, Clone)]
pub struct EventDetector {
    threshold: f64,
    pre_event_samples: usize,
    post_event_samples: usize,
}

impl EventDetector {
    /// `threshold` is per sample interval, already scaled from the
    /// per-second figure.
    pub fn new(threshold: f64, pre_event_samples: usize, post_event_samples: usize) -> Self {
        Self {
            threshold,
            pre_event_samples,
            post_event_samples,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn detect(&self, smoothed_derivative: &[f64]) -> Detection {
        let flags = flag_samples(smoothed_derivative, self.threshold);
        let runs = extract_runs(&flags);

        let mut mask = vec![SegmentKind::Stable; flags.len()];
        let mut events = Vec::with_capacity(runs.len());

        for (start, end) in runs {
            let pre_start = start.saturating_sub(self.pre_event_samples);
            mask[pre_start..start].fill(SegmentKind::PreEvent);
            mask[start..=end].fill(SegmentKind::Event);

            if self.post_event_samples > 0 && end + 1 < mask.len() {
                let post_end = (end + self.post_event_samples).min(mask.len() - 1);
                mask[end + 1..=post_end].fill(SegmentKind::PostEvent);
            }

            events.push(DetectedEvent {
                pre_start,
                start,
                end,
            });
        }

        debug!(
            samples = flags.len(),
            events = events.len(),
            threshold = self.threshold,
            "event detection complete"
        );

        Detection {
            flags,
            events,
            mask,
        }
    }
}

/// `|value| > threshold` for every element.
pub fn flag_samples(series: &[f64], threshold: f64) -> Vec<bool> {
    series.iter().map(|v| v.abs() > threshold).collect()
}

/// Maximal runs of `true` as inclusive `(start, end)` pairs.
pub fn extract_runs(flags: &[bool]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut open: Option<usize> = None;

    for (i, &flag) in flags.iter().enumerate() {
        match (open, flag) {
            (None, true) => open = Some(i),
            (Some(start), false) => {
                runs.push((start, i - 1));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        runs.push((start, flags.len() - 1));
    }
    runs
}

/// Collapse a per-sample mask into contiguous segments of equal kind.
pub fn mask_segments(mask: &[SegmentKind]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    for (i, &kind) in mask.iter().enumerate() {
        match segments.last_mut() {
            Some(seg) if seg.kind == kind => seg.end_index = i,
            _ => segments.push(Segment {
                start_index: i,
                end_index: i,
                kind,
            }),
        }
    }
    segments
}

// =============================================================================
// Trend classification
// =============================================================================

/// Coarse shape of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTrend {
    Rising,
    Falling,
    Oscillation,
    Flat,
}

impl std::fmt::Display for EventTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rising => write!(f, "RISING"),
            Self::Falling => write!(f, "FALLING"),
            Self::Oscillation => write!(f, "OSCILLATION"),
            Self::Flat => write!(f, "FLAT"),
        }
    }
}

/// Fraction of the detection threshold below which a mean derivative is flat.
const FLAT_FRACTION: f64 = 0.3;

/// Classify an event from its mean smoothed derivative and net change.
pub fn classify_trend(mean_derivative: f64, delta_p: f64, threshold: f64) -> EventTrend {
    if mean_derivative.abs() < threshold * FLAT_FRACTION {
        EventTrend::Flat
    } else if delta_p > 0.0 && mean_derivative > 0.0 {
        EventTrend::Rising
    } else if delta_p < 0.0 && mean_derivative < 0.0 {
        EventTrend::Falling
    } else {
        EventTrend::Oscillation
    }
}
