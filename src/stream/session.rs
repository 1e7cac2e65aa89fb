// =============================================================================
// Stream Session — explicit owner of all live-pipeline state
// =============================================================================
//
// One session owns its configuration, the bounded sample ring, the edge state
// machine and the edge log.  Nothing is shared between sessions, so any
// number of independent sessions can run side by side.
//
// Each tick ingests the samples drained since the previous tick, runs the
// edge machine over them in arrival order, then recomputes the derivative
// view over the visible window once.  A session must be driven by a single
// caller at a time; `tick` takes `&mut self` to enforce that.
// =============================================================================

use std::collections::VecDeque;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::detection::EdgeStateMachine;
use crate::filters::smoothed_derivative;
use crate::runtime_config::RuntimeConfig;
use crate::stream::sample_ring::{RingEntry, SampleRing};
use crate::types::{nan_from_null, nan_vec_from_null, EdgeEvent, Sample, SampleClass, SignalState};

/// Status of the most recent sample, published once per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub session_id: String,
    pub timestamp_ms: i64,
    #[serde(deserialize_with = "nan_from_null")]
    pub raw: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub filtered: f64,
    /// Smoothed windowed derivative of the filtered value (per sample).
    #[serde(deserialize_with = "nan_from_null")]
    pub derivative: f64,
    pub class: SampleClass,
    pub state: SignalState,
    pub retained: usize,
    pub evicted: u64,
    pub samples_seen: u64,
    pub edge_events: usize,
}

/// Derived series over the visible window, oldest-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisibleWindow {
    pub timestamps: Vec<i64>,
    #[serde(deserialize_with = "nan_vec_from_null")]
    pub raw: Vec<f64>,
    #[serde(deserialize_with = "nan_vec_from_null")]
    pub filtered: Vec<f64>,
    #[serde(deserialize_with = "nan_vec_from_null")]
    pub derivative: Vec<f64>,
    pub edges: Vec<EdgeEvent>,
}

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub ingested: usize,
    pub new_events: Vec<EdgeEvent>,
    pub snapshot: Option<StreamSnapshot>,
}

pub struct StreamSession {
    id: Uuid,
    config: RuntimeConfig,
    ring: SampleRing,
    machine: EdgeStateMachine,
    log: VecDeque<EdgeEvent>,
    window: VisibleWindow,
    samples_seen: u64,
}

impl StreamSession {
    /// Create a session. Fails on an invalid configuration.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config
            .validate()
            .context("refusing to start stream session")?;

        let id = Uuid::new_v4();
        info!(
            session = %id,
            capacity = config.edge.buffer_capacity,
            edge_threshold = config.edge.edge_threshold,
            frames_required = config.edge.frames_required,
            "stream session created"
        );

        Ok(Self {
            id,
            ring: SampleRing::new(config.edge.buffer_capacity),
            machine: EdgeStateMachine::new(&config.edge),
            log: VecDeque::with_capacity(config.edge.edge_log_capacity.min(1_024)),
            window: VisibleWindow::default(),
            samples_seen: 0,
            config,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Ingest one tick's worth of samples.
    pub fn tick(&mut self, batch: &[Sample]) -> TickReport {
        let mut new_events = Vec::new();

        for &sample in batch {
            let update = self.machine.update(sample);
            self.ring.push(RingEntry {
                sample,
                filtered: update.output,
                instant_edge: update.instant_edge,
            });
            self.samples_seen += 1;

            if let Some(event) = update.event {
                info!(
                    session = %self.id,
                    kind = %event.kind,
                    at_ms = event.timestamp_ms,
                    filtered = update.output,
                    "edge event"
                );
                self.append_event(event);
                new_events.push(event);
            }
        }

        if !batch.is_empty() {
            self.recompute_window();
            debug!(
                session = %self.id,
                ingested = batch.len(),
                retained = self.ring.len(),
                "tick processed"
            );
        }

        TickReport {
            ingested: batch.len(),
            new_events,
            snapshot: self.snapshot(),
        }
    }

    fn append_event(&mut self, event: EdgeEvent) {
        self.log.push_back(event);
        while self.log.len() > self.config.edge.edge_log_capacity {
            self.log.pop_front();
        }
    }

    fn recompute_window(&mut self) {
        let visible = self.ring.visible(self.config.edge.visible_window_ms);
        let filtered: Vec<f64> = visible.iter().map(|e| e.filtered).collect();
        let (_, derivative) = smoothed_derivative(
            &filtered,
            self.config.signal.derivative_window,
            self.config.signal.derivative_alpha,
        );

        let first_ts = visible.first().map_or(i64::MAX, |e| e.sample.timestamp_ms);
        self.window = VisibleWindow {
            timestamps: visible.iter().map(|e| e.sample.timestamp_ms).collect(),
            raw: visible.iter().map(|e| e.sample.raw).collect(),
            filtered,
            derivative,
            edges: self
                .log
                .iter()
                .filter(|e| e.timestamp_ms >= first_ts)
                .copied()
                .collect(),
        };
    }

    /// Status of the most recent sample, `None` before any sample arrived.
    pub fn snapshot(&self) -> Option<StreamSnapshot> {
        let latest = self.ring.latest()?;
        let state = self.machine.state();
        Some(StreamSnapshot {
            session_id: self.id.to_string(),
            timestamp_ms: latest.sample.timestamp_ms,
            raw: latest.sample.raw,
            filtered: latest.filtered,
            derivative: self.window.derivative.last().copied().unwrap_or(0.0),
            class: SampleClass::of(latest.instant_edge, state),
            state,
            retained: self.ring.len(),
            evicted: self.ring.evicted(),
            samples_seen: self.samples_seen,
            edge_events: self.log.len(),
        })
    }

    /// Derived view over the visible window as of the last tick.
    pub fn visible_window(&self) -> &VisibleWindow {
        &self.window
    }

    /// Time-ordered edge log (oldest-first).
    pub fn edge_log(&self) -> impl Iterator<Item = &EdgeEvent> {
        self.log.iter()
    }

    /// Drop all but the `keep_last` most recent edge events.
    pub fn truncate_log(&mut self, keep_last: usize) {
        while self.log.len() > keep_last {
            self.log.pop_front();
        }
    }

    /// Take every logged edge event, leaving the log empty.
    pub fn drain_log(&mut self) -> Vec<EdgeEvent> {
        self.log.drain(..).collect()
    }

    pub fn state(&self) -> SignalState {
        self.machine.state()
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }
}
