// =============================================================================
// Edge State Machine — debounced STABLE / CHANGING detection for live feeds
// =============================================================================
//
// Per sample, two candidate filters are evaluated from the *same* previous
// output:
//
//   fast = a_fast * raw + (1 - a_fast) * prev
//   slow = a_slow * raw + (1 - a_slow) * prev
//   edge = |fast - slow| > edge_threshold
//
// The divergence is (a_fast - a_slow) * |raw - prev|, i.e. how far the new
// sample sits from the current estimate.  The output itself is adaptive: it
// advances with a_fast while `edge` holds and with a_slow otherwise, so it
// tracks transitions with little lag and stays quiet on plateaus.
//
// Transitions need both sustained evidence and a minimum dwell:
//
//   STABLE   -> CHANGING  change_counter >= frames  AND now - last_end   > min_stable
//   CHANGING -> STABLE    stable_counter >= frames  AND now - last_start > min_edge
//
// Both reference times start at 0 ms, so the first `start` also needs
// `now > min_stable` and a stream cannot open on a transition.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::filters::ema::blend;
use crate::runtime_config::EdgeParams;
use crate::types::{EdgeEvent, EdgeKind, Sample, SignalState};

/// Result of feeding one sample to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeUpdate {
    /// Adaptive filter output after this sample.
    pub output: f64,
    /// |fast - slow| for this sample (0 for the seeding sample).
    pub divergence: f64,
    /// Instantaneous, non-debounced edge flag.
    pub instant_edge: bool,
    /// Debounced state after this sample.
    pub state: SignalState,
    /// Transition confirmed on this sample, if any.
    pub event: Option<EdgeEvent>,
}

#[derive(Debug, Clone)]
pub struct EdgeStateMachine {
    alpha_fast: f64,
    alpha_slow: f64,
    edge_threshold: f64,
    frames_required: u32,
    min_stable_ms: i64,
    min_edge_ms: i64,

    output: Option<f64>,
    state: SignalState,
    change_counter: u32,
    stable_counter: u32,
    last_start_ms: i64,
    last_end_ms: i64,
}

impl EdgeStateMachine {
    pub fn new(params: &EdgeParams) -> Self {
        Self {
            alpha_fast: params.alpha_fast,
            alpha_slow: params.alpha_slow,
            edge_threshold: params.edge_threshold,
            frames_required: params.frames_required,
            min_stable_ms: params.min_stable_ms,
            min_edge_ms: params.min_edge_ms,
            output: None,
            state: SignalState::Stable,
            change_counter: 0,
            stable_counter: 0,
            last_start_ms: 0,
            last_end_ms: 0,
        }
    }

    /// Feed one sample.
    pub fn update(&mut self, sample: Sample) -> EdgeUpdate {
        let Some(prev) = self.output else {
            self.output = Some(sample.raw);
            return EdgeUpdate {
                output: sample.raw,
                divergence: 0.0,
                instant_edge: false,
                state: self.state,
                event: None,
            };
        };

        let fast = blend(sample.raw, prev, self.alpha_fast);
        let slow = blend(sample.raw, prev, self.alpha_slow);
        let divergence = (fast - slow).abs();
        let instant_edge = divergence > self.edge_threshold;

        if instant_edge {
            self.change_counter = self.change_counter.saturating_add(1);
            self.stable_counter = 0;
        } else {
            self.stable_counter = self.stable_counter.saturating_add(1);
            self.change_counter = 0;
        }

        let output = if instant_edge { fast } else { slow };
        self.output = Some(output);

        let event = self.transition(sample.timestamp_ms);

        EdgeUpdate {
            output,
            divergence,
            instant_edge,
            state: self.state,
            event,
        }
    }

    fn transition(&mut self, now: i64) -> Option<EdgeEvent> {
        match self.state {
            SignalState::Stable => {
                let dwell_ok = now - self.last_end_ms > self.min_stable_ms;
                if self.change_counter >= self.frames_required && dwell_ok {
                    self.state = SignalState::Changing;
                    self.last_start_ms = now;
                    debug!(at_ms = now, "edge state: STABLE -> CHANGING");
                    return Some(EdgeEvent {
                        kind: EdgeKind::Start,
                        timestamp_ms: now,
                    });
                }
            }
            SignalState::Changing => {
                let dwell_ok = now - self.last_start_ms > self.min_edge_ms;
                if self.stable_counter >= self.frames_required && dwell_ok {
                    self.state = SignalState::Stable;
                    self.last_end_ms = now;
                    debug!(at_ms = now, "edge state: CHANGING -> STABLE");
                    return Some(EdgeEvent {
                        kind: EdgeKind::End,
                        timestamp_ms: now,
                    });
                }
            }
        }
        None
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    /// Current adaptive output, `None` before the first sample.
    pub fn output(&self) -> Option<f64> {
        self.output
    }

    pub fn change_counter(&self) -> u32 {
        self.change_counter
    }

    pub fn stable_counter(&self) -> u32 {
        self.stable_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(edge_threshold: f64, frames_required: u32, min_stable_ms: i64, min_edge_ms: i64) -> EdgeParams {
        EdgeParams {
            edge_threshold,
            frames_required,
            min_stable_ms,
            min_edge_ms,
            ..EdgeParams::default()
        }
    }

    /// 100 samples at 1000 then `high` samples at 5000, 10 ms apart.
    fn step(high: usize) -> Vec<Sample> {
        (0..100 + high)
            .map(|i| Sample::new(i as i64 * 10, if i < 100 { 1000.0 } else { 5000.0 }))
            .collect()
    }

    fn run(machine: &mut EdgeStateMachine, samples: &[Sample]) -> Vec<EdgeEvent> {
        samples.iter().filter_map(|s| machine.update(*s).event).collect()
    }

    #[test]
    fn first_sample_seeds_output() {
        let mut m = EdgeStateMachine::new(&EdgeParams::default());
        assert!(m.output().is_none());
        let u = m.update(Sample::new(0, 1234.0));
        assert_eq!(u.output, 1234.0);
        assert!(!u.instant_edge);
        assert_eq!(u.state, SignalState::Stable);
        assert_eq!(m.change_counter(), 0);
        assert_eq!(m.stable_counter(), 0);
    }

    #[test]
    fn output_uses_fast_alpha_during_edge() {
        let mut m = EdgeStateMachine::new(&params(100.0, 8, 0, 0));
        m.update(Sample::new(0, 1000.0));
        let u = m.update(Sample::new(10, 5000.0));
        assert!(u.instant_edge);
        // 0.25 * 5000 + 0.75 * 1000
        assert!((u.output - 2000.0).abs() < 1e-9);
        assert!((u.divergence - 0.17 * 4000.0).abs() < 1e-6);

        let u = m.update(Sample::new(20, 2000.0));
        assert!(!u.instant_edge);
        assert!((u.output - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn one_frame_short_emits_nothing() {
        // The step is flagged for exactly 7 samples before the adaptive output
        // catches up, one short of the required 8.
        let mut m = EdgeStateMachine::new(&params(100.0, 8, 0, 0));
        assert!(run(&mut m, &step(300)).is_empty());
        assert_eq!(m.state(), SignalState::Stable);
    }

    #[test]
    fn enough_frames_emit_start() {
        let mut m = EdgeStateMachine::new(&params(100.0, 7, 0, 0));
        let events = run(&mut m, &step(300));
        assert_eq!(
            events.first(),
            Some(&EdgeEvent {
                kind: EdgeKind::Start,
                timestamp_ms: 1060
            })
        );
    }

    #[test]
    fn end_waits_for_min_edge_time() {
        let mut m = EdgeStateMachine::new(&params(50.0, 5, 0, 1500));
        let events = run(&mut m, &step(360));
        assert_eq!(
            events,
            vec![
                EdgeEvent {
                    kind: EdgeKind::Start,
                    timestamp_ms: 1040
                },
                EdgeEvent {
                    kind: EdgeKind::End,
                    timestamp_ms: 2550
                },
            ]
        );
    }

    #[test]
    fn start_waits_for_min_stable_time() {
        // Up-step at 2000 ms, down-step at 3000 ms, up-step again at 4000 ms.
        let samples: Vec<Sample> = (0..500)
            .map(|i| {
                let raw = match i {
                    0..=199 => 1000.0,
                    200..=299 => 5000.0,
                    300..=399 => 1000.0,
                    _ => 5000.0,
                };
                Sample::new(i as i64 * 10, raw)
            })
            .collect();

        let mut relaxed = EdgeStateMachine::new(&params(50.0, 5, 0, 100));
        let relaxed_events = run(&mut relaxed, &samples);
        assert_eq!(relaxed_events.len(), 6);

        // The down-step lands 890 ms after the first end and is suppressed;
        // the last up-step is 1890 ms after it and passes.
        let mut strict = EdgeStateMachine::new(&params(50.0, 5, 1_500, 100));
        let strict_events = run(&mut strict, &samples);
        let stamps: Vec<(EdgeKind, i64)> =
            strict_events.iter().map(|e| (e.kind, e.timestamp_ms)).collect();
        assert_eq!(
            stamps,
            vec![
                (EdgeKind::Start, 2040),
                (EdgeKind::End, 2150),
                (EdgeKind::Start, 4040),
                (EdgeKind::End, 4150),
            ]
        );
    }

    #[test]
    fn no_start_before_min_stable_from_stream_origin() {
        // Step at 200 ms: the flagged frames are over long before 1500 ms.
        let samples: Vec<Sample> = (0..420)
            .map(|i| Sample::new(i as i64 * 10, if i < 20 { 1000.0 } else { 5000.0 }))
            .collect();
        let mut m = EdgeStateMachine::new(&params(50.0, 5, 1_500, 100));
        assert!(run(&mut m, &samples).is_empty());
        assert_eq!(m.state(), SignalState::Stable);

        // The same step once the dwell has elapsed is accepted.
        let mut m = EdgeStateMachine::new(&params(50.0, 5, 100, 100));
        let events = run(&mut m, &samples);
        assert_eq!(events[0].kind, EdgeKind::Start);
        assert_eq!(events[0].timestamp_ms, 240);
    }

    #[test]
    fn events_alternate_and_increase_for_noisy_input() {
        // Deterministic LCG noise with occasional large jumps.
        let mut seed: u64 = 0x5eed;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as f64 / (1u64 << 31) as f64
        };
        let mut level = 3_000_000.0;
        let samples: Vec<Sample> = (0..20_000)
            .map(|i| {
                if next() < 0.01 {
                    level = 1_500_000.0 + next() * 2_500_000.0;
                }
                Sample::new(i as i64 * 10, level + (next() - 0.5) * 40_000.0)
            })
            .collect();

        for frames in [1, 3, 8] {
            let mut m = EdgeStateMachine::new(&params(5_000.0, frames, 200, 200));
            let events = run(&mut m, &samples);
            assert!(!events.is_empty());
            assert_eq!(events[0].kind, EdgeKind::Start);
            for pair in events.windows(2) {
                assert_ne!(pair[0].kind, pair[1].kind);
                assert!(pair[1].timestamp_ms > pair[0].timestamp_ms);
            }
        }
    }
}
