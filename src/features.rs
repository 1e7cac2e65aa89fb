// =============================================================================
// Event Feature Extraction — nine indicators per detected segment
// =============================================================================
//
// Computed over the raw samples of one event (pre-roll included):
//
//   delta_p      last raw - first raw
//   overshoot    max raw
//   t_peak       time of the (first) maximum relative to the segment start
//   max_slope    max of d(raw)/dt   (raw units per ms)
//   min_slope    min of d(raw)/dt
//   t_stabilize  time until raw first sits within tolerance of the final raw
//   dom_freq     largest non-DC bin of the real FFT of the mean-removed raw (Hz)
//   hf_energy    sum of |X_k|^2 over bins above the cutoff frequency
//   area         trapezoidal integral of raw over time (raw * ms)
//
// Every indicator is computed independently and degenerate inputs produce
// sentinels (0 or NaN) instead of errors, so one bad segment never aborts the
// extraction of the others.
// =============================================================================

use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{nan_from_null, Sample};

/// Fixed-shape indicator record for one event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    #[serde(deserialize_with = "nan_from_null")]
    pub delta_p: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub overshoot: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub t_peak: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub max_slope: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub min_slope: f64,
    /// NaN when the segment never settles near its final value.
    #[serde(deserialize_with = "nan_from_null")]
    pub t_stabilize: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub dom_freq: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub hf_energy: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub area: f64,
}

/// Stateless extractor parameterised by the sampling setup.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    sample_rate_hz: f64,
    hf_cutoff_hz: f64,
    stabilize_tolerance: f64,
}

impl FeatureExtractor {
    pub fn new(sample_rate_hz: f64, hf_cutoff_hz: f64, stabilize_tolerance: f64) -> Self {
        Self {
            sample_rate_hz,
            hf_cutoff_hz,
            stabilize_tolerance,
        }
    }

    /// Compute all indicators for `segment`.
    ///
    /// Returns `None` only for an empty slice.
    pub fn extract(&self, segment: &[Sample]) -> Option<Indicators> {
        let first = segment.first()?;
        let last = segment.last()?;

        let raw: Vec<f64> = segment.iter().map(|s| s.raw).collect();
        let times: Vec<f64> = segment.iter().map(|s| s.timestamp_ms as f64).collect();

        let (peak_idx, overshoot) = argmax(&raw);
        let slopes = gradient(&raw, &times);
        let max_slope = slopes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min_slope = slopes.iter().copied().fold(f64::INFINITY, f64::min);

        let t_stabilize = match stabilization_index(&raw, self.stabilize_tolerance) {
            Some(idx) => times[idx] - times[0],
            None => {
                warn!(
                    start_ms = first.timestamp_ms,
                    samples = segment.len(),
                    "segment never stabilises near its final value"
                );
                f64::NAN
            }
        };

        let spectrum = Spectrum::of_mean_removed(&raw, self.sample_rate_hz);

        Some(Indicators {
            delta_p: last.raw - first.raw,
            overshoot,
            t_peak: times[peak_idx] - times[0],
            max_slope,
            min_slope,
            t_stabilize,
            dom_freq: spectrum.dominant_frequency(),
            hf_energy: spectrum.energy_above(self.hf_cutoff_hz),
            area: trapezoid(&raw, &times),
        })
    }
}

// =============================================================================
// Time-domain helpers
// =============================================================================

/// Index and value of the first maximum. `values` must be non-empty.
fn argmax(values: &[f64]) -> (usize, f64) {
    let mut best = (0, values[0]);
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > best.1 {
            best = (i, v);
        }
    }
    best
}

/// Pointwise numerical gradient of `y` with respect to `x`.
///
/// Second-order accurate central differences at interior points (honouring
/// non-uniform spacing), first-order one-sided differences at the ends. A
/// single point has zero gradient; zero spacing yields zero rather than an
/// infinity.
pub fn gradient(y: &[f64], x: &[f64]) -> Vec<f64> {
    let n = y.len();
    if n < 2 {
        return vec![0.0; n];
    }

    let one_sided = |i: usize, j: usize| {
        let dx = x[j] - x[i];
        if dx == 0.0 {
            0.0
        } else {
            (y[j] - y[i]) / dx
        }
    };

    let mut out = Vec::with_capacity(n);
    out.push(one_sided(0, 1));
    for i in 1..n - 1 {
        let hd = x[i] - x[i - 1];
        let hs = x[i + 1] - x[i];
        let denom = hs * hd * (hd + hs);
        if denom == 0.0 {
            out.push(one_sided(i - 1, i + 1));
        } else {
            out.push(
                (hd * hd * y[i + 1] - hs * hs * y[i - 1] + (hs * hs - hd * hd) * y[i]) / denom,
            );
        }
    }
    out.push(one_sided(n - 2, n - 1));
    out
}

/// First index whose value lies strictly within `tolerance` (relative) of
/// the final value. A zero final value leaves an empty band, so a flat zero
/// tail never stabilises.
fn stabilization_index(values: &[f64], tolerance: f64) -> Option<usize> {
    let final_val = *values.last()?;
    let band = tolerance * final_val.abs();
    values.iter().position(|&v| (v - final_val).abs() < band)
}

/// Trapezoidal integral of `y` over `x`.
pub fn trapezoid(y: &[f64], x: &[f64]) -> f64 {
    y.windows(2)
        .zip(x.windows(2))
        .map(|(yw, xw)| 0.5 * (yw[0] + yw[1]) * (xw[1] - xw[0]))
        .sum()
}

// =============================================================================
// Spectrum
// =============================================================================

/// One-sided magnitude spectrum (bins `0..=n/2`) of a real series.
struct Spectrum {
    magnitudes: Vec<f64>,
    bin_hz: f64,
}

impl Spectrum {
    fn of_mean_removed(values: &[f64], sample_rate_hz: f64) -> Self {
        let n = values.len();
        if n < 2 {
            return Self {
                magnitudes: Vec::new(),
                bin_hz: 0.0,
            };
        }

        let mean = values.iter().sum::<f64>() / n as f64;
        let mut buf: Vec<Complex<f64>> = values
            .iter()
            .map(|&v| Complex { re: v - mean, im: 0.0 })
            .collect();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);
        fft.process(&mut buf);

        let magnitudes = buf.iter().take(n / 2 + 1).map(|c| c.norm()).collect();
        Self {
            magnitudes,
            bin_hz: sample_rate_hz / n as f64,
        }
    }

    /// Frequency of the largest non-DC bin (first on ties); 0 when there is
    /// no non-DC bin.
    fn dominant_frequency(&self) -> f64 {
        let mut best: Option<(usize, f64)> = None;
        for (k, &m) in self.magnitudes.iter().enumerate().skip(1) {
            if best.map_or(true, |(_, bm)| m > bm) {
                best = Some((k, m));
            }
        }
        best.map_or(0.0, |(k, _)| k as f64 * self.bin_hz)
    }

    fn energy_above(&self, cutoff_hz: f64) -> f64 {
        self.magnitudes
            .iter()
            .enumerate()
            .filter(|(k, _)| *k as f64 * self.bin_hz > cutoff_hz)
            .map(|(_, m)| m * m)
            .sum()
    }
}
