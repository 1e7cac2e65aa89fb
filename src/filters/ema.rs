// =============================================================================
// Exponential Smoothing (EPA / EMA) and the two-stage cascade
// =============================================================================
//
// Formula:
//   out_0 = in_0
//   out_t = alpha * in_t + (1 - alpha) * out_{t-1}
//
// No warm-up: the first input seeds the recurrence, so the output is
// aligned 1:1 with the input.
//
// The cascade runs two stages in series (primary, then secondary on the
// primary's output).
// =============================================================================

/// Smooth `series` with a first-order exponential filter.
///
/// Returns an empty `Vec` for empty input. `alpha` is expected in `(0, 1)`.
pub fn smooth(series: &[f64], alpha: f64) -> Vec<f64> {
    let mut ema = Ema::new(alpha);
    series.iter().map(|&x| ema.update(x)).collect()
}

/// Primary and secondary outputs of the two-stage cascade.
#[derive(Debug, Clone, Default)]
pub struct Cascade {
    pub primary: Vec<f64>,
    pub secondary: Vec<f64>,
}

/// Run the two-stage cascade over `series`.
pub fn cascade(series: &[f64], alpha_primary: f64, alpha_secondary: f64) -> Cascade {
    let primary = smooth(series, alpha_primary);
    let secondary = smooth(&primary, alpha_secondary);
    Cascade { primary, secondary }
}

/// Incremental form of [`smooth`], seeded by the first value it sees.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    /// Feed one input and return the new output.
    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(prev) => blend(x, prev, self.alpha),
            None => x,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// One step of the recurrence: `alpha * x + (1 - alpha) * prev`.
#[inline]
pub fn blend(x: f64, prev: f64, alpha: f64) -> f64 {
    alpha * x + (1.0 - alpha) * prev
}
