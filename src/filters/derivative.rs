// =============================================================================
// Windowed Derivative — fixed-lag backward difference
// =============================================================================
//
//   d_t = (x_t - x_{t-window}) / window      for t >= window
//   d_t = 0                                  for t <  window
//
// This is an average rate over `window` samples at the native sample
// interval, in raw units per sample.  Thresholds compared against it are
// expressed per sample interval, not per second.

use super::ema::smooth;

/// Compute the windowed derivative of `series`.
///
/// Output is aligned 1:1 with the input. When `window == 0` or
/// `window >= series.len()` every element is zero.
pub fn derive(series: &[f64], window: usize) -> Vec<f64> {
    let mut result = vec![0.0; series.len()];
    if window == 0 {
        return result;
    }

    let lag = window as f64;
    for i in window..series.len() {
        result[i] = (series[i] - series[i - window]) / lag;
    }
    result
}

/// Windowed derivative followed by the derivative smoother.
pub fn smoothed_derivative(series: &[f64], window: usize, alpha: f64) -> (Vec<f64>, Vec<f64>) {
    let raw = derive(series, window);
    let smoothed = smooth(&raw, alpha);
    (raw, smoothed)
}
