// =============================================================================
// Signal Filters Module
// =============================================================================
//
// Pure, side-effect-free smoothing and differentiation stages shared by the
// batch and streaming pipelines.  Every function is a pure function of its
// input slice and coefficients; configuration is validated upstream.

pub mod derivative;
pub mod ema;

pub use derivative::{derive, smoothed_derivative};
pub use ema::{cascade, smooth, Cascade, Ema};
