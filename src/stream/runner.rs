// =============================================================================
// Stream Runner — fixed-period tick loop over one session
// =============================================================================
//
// Runs as a single Tokio task.  Every tick it:
//   1. Drains all samples currently available from the source (non-blocking).
//   2. Feeds them to the session in arrival order.
//   3. Publishes the latest snapshot and forwards new edge events.
//
// Ticks never overlap: the loop is sequential and missed ticks are skipped
// rather than bursted.  The loop stops between ticks when the shutdown flag
// flips or the source closes; there is no partial state to clean up.
//
//   let status = new_shared_snapshot();
//   tokio::spawn(run_session(session, rx, shutdown_rx, status.clone(), events_tx));
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::source::{SampleSource, SourceState};
use crate::stream::session::{StreamSession, StreamSnapshot};
use crate::types::EdgeEvent;

/// Latest snapshot, readable by other tasks without touching the session.
pub type SharedSnapshot = Arc<RwLock<Option<StreamSnapshot>>>;

pub fn new_shared_snapshot() -> SharedSnapshot {
    Arc::new(RwLock::new(None))
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    SourceClosed,
}

/// Drive `session` from `source` until shutdown or source exhaustion.
///
/// Returns the session so the caller can inspect its log afterwards.
pub async fn run_session<S>(
    mut session: StreamSession,
    mut source: S,
    mut shutdown: watch::Receiver<bool>,
    status: SharedSnapshot,
    events: Option<mpsc::UnboundedSender<EdgeEvent>>,
) -> (StreamSession, StopReason)
where
    S: SampleSource,
{
    let tick_ms = session.config().edge.tick_ms;
    info!(session = %session.id(), tick_ms, "stream session started");

    let mut ticker = interval(Duration::from_millis(tick_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut batch = Vec::new();

    let reason = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break StopReason::Shutdown;
                }
                continue;
            }
        }

        batch.clear();
        let source_state = source.drain_into(&mut batch);
        let report = session.tick(&batch);

        if let Some(snapshot) = report.snapshot {
            *status.write() = Some(snapshot);
        }
        if let Some(tx) = &events {
            for event in &report.new_events {
                if tx.send(*event).is_err() {
                    debug!("edge event receiver dropped");
                    break;
                }
            }
        }

        if source_state == SourceState::Closed {
            break StopReason::SourceClosed;
        }
    };

    info!(
        session = %session.id(),
        reason = ?reason,
        samples = session.samples_seen(),
        edge_events = session.edge_log().count(),
        "stream session stopped"
    );
    (session, reason)
}
