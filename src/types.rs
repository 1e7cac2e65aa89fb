// =============================================================================
// Shared types used across the pressure event pipeline
// =============================================================================

use serde::{Deserialize, Deserializer, Serialize};

/// One raw reading from the pressure sensor.
///
/// Timestamps are integer milliseconds and are assumed non-decreasing; the
/// core never reorders or deduplicates them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub raw: f64,
}

impl Sample {
    pub fn new(timestamp_ms: i64, raw: f64) -> Self {
        Self { timestamp_ms, raw }
    }
}

/// Classification of a sample range inside a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentKind {
    Stable,
    Event,
    PreEvent,
    PostEvent,
}

impl Default for SegmentKind {
    fn default() -> Self {
        Self::Stable
    }
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Event => write!(f, "event"),
            Self::PreEvent => write!(f, "pre-event"),
            Self::PostEvent => write!(f, "post-event"),
        }
    }
}

/// Inclusive index range into a sample sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start_index: usize,
    pub end_index: usize,
    pub kind: SegmentKind,
}

impl Segment {
    /// Number of samples covered; 0 for an inverted range.
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.end_index - self.start_index + 1
        }
    }

    /// Only an inverted range is empty; a well-formed segment holds at least
    /// one sample.
    pub fn is_empty(&self) -> bool {
        self.end_index < self.start_index
    }
}

/// Which side of a changing period an edge event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Start,
    End,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "START"),
            Self::End => write!(f, "END"),
        }
    }
}

/// A confirmed transition emitted by the streaming edge state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEvent {
    pub kind: EdgeKind,
    pub timestamp_ms: i64,
}

/// Debounced signal state of the streaming detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalState {
    Stable,
    Changing,
}

impl Default for SignalState {
    fn default() -> Self {
        Self::Stable
    }
}

impl std::fmt::Display for SignalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable => write!(f, "STABLE"),
            Self::Changing => write!(f, "CHANGING"),
        }
    }
}

/// Classification of the most recent streaming sample.
///
/// `Edge` is the instantaneous, non-debounced flag; otherwise the debounced
/// state is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleClass {
    Edge,
    Stable,
    Changing,
}

impl SampleClass {
    pub fn of(instant_edge: bool, state: SignalState) -> Self {
        match (instant_edge, state) {
            (true, _) => Self::Edge,
            (false, SignalState::Stable) => Self::Stable,
            (false, SignalState::Changing) => Self::Changing,
        }
    }
}

// =============================================================================
// NaN <-> null
// =============================================================================
//
// serde_json writes non-finite floats as `null` but refuses to read `null`
// back into an `f64`.  Report fields that may carry NaN sentinels use these
// with `#[serde(deserialize_with = "...")]`.

/// Read an `f64`, mapping `null` to NaN.
pub fn nan_from_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Read a `Vec<f64>`, mapping every `null` element to NaN.
pub fn nan_vec_from_null<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Option<f64>>::deserialize(deserializer)?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start_index: usize, end_index: usize) -> Segment {
        Segment {
            start_index,
            end_index,
            kind: SegmentKind::Stable,
        }
    }

    #[test]
    fn segment_len_is_inclusive() {
        assert_eq!(segment(3, 3).len(), 1);
        assert_eq!(segment(0, 9).len(), 10);
        assert!(!segment(3, 3).is_empty());
    }

    #[test]
    fn inverted_segment_is_empty() {
        let seg = segment(5, 2);
        assert!(seg.is_empty());
        assert_eq!(seg.len(), 0);
    }

    #[test]
    fn null_reads_back_as_nan() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "nan_from_null")]
            value: f64,
            #[serde(deserialize_with = "nan_vec_from_null")]
            series: Vec<f64>,
        }
        let p: Row = serde_json::from_str(r#"{"value": null, "series": [1.5, null]}"#).unwrap();
        assert!(p.value.is_nan());
        assert_eq!(p.series[0], 1.5);
        assert!(p.series[1].is_nan());

        let p: Row = serde_json::from_str(r#"{"value": 2.0, "series": []}"#).unwrap();
        assert_eq!(p.value, 2.0);
    }
}
