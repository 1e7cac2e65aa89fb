// =============================================================================
// Event Detection Module
// =============================================================================
//
// Two detectors consume the filtered signal:
//
//   * `event_detector` — batch segmentation of a complete series by
//     thresholding the smoothed derivative.
//   * `edge_state`     — streaming, debounced STABLE / CHANGING machine driven
//     by fast/slow filter divergence.

pub mod edge_state;
pub mod event_detector;

pub use edge_state::{EdgeStateMachine, EdgeUpdate};
pub use event_detector::{classify_trend, DetectedEvent, Detection, EventDetector, EventTrend};
