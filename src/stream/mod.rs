// =============================================================================
// Streaming Pipeline Module
// =============================================================================
//
// Live-feed counterpart of the batch pipeline: a bounded sample ring, an
// explicit per-session state owner, and the tick loop that drives it.

pub mod runner;
pub mod sample_ring;
pub mod session;

pub use runner::{new_shared_snapshot, run_session, SharedSnapshot, StopReason};
pub use sample_ring::{RingEntry, SampleRing};
pub use session::{StreamSession, StreamSnapshot, TickReport, VisibleWindow};
