// =============================================================================
// Pressure Events — event detection and characterisation for pressure traces
// =============================================================================
//
// Batch:   recorded series ─► BatchPipeline ─► BatchReport
// Stream:  SampleSource ─► run_session(StreamSession) ─► EdgeEvent log
//
// Both paths share the same filter stages and the same RuntimeConfig.
// =============================================================================

pub mod detection;
pub mod features;
pub mod filters;
pub mod pipeline;
pub mod runtime_config;
pub mod source;
pub mod stream;
pub mod types;

pub use pipeline::{BatchPipeline, BatchReport};
pub use runtime_config::RuntimeConfig;
pub use stream::StreamSession;
