// =============================================================================
// Sample Sources — line protocol, recorded tables and the pull interface
// =============================================================================
//
// The core never owns a transport.  Samples reach it through:
//
//   * `parse_recorded`  — a complete two-column table (header + rows) for
//                         batch runs;
//   * `pump_lines`      — an async task that parses the live line protocol
//                         `<timestamp>,<raw>` and forwards samples into a
//                         channel;
//   * `SampleSource`    — the non-blocking pull interface the streaming
//                         runner drains once per tick.
//
// Malformed lines are dropped silently (counted and traced at debug level).
// An optional raw-range gate drops out-of-range readings before they reach
// the core.
// =============================================================================

use std::io::BufRead;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info};

use crate::runtime_config::SourceParams;
use crate::types::Sample;

// =============================================================================
// Parsing
// =============================================================================

/// Parse one live protocol line: `<integer_timestamp>,<integer_raw>`.
///
/// Surrounding whitespace is ignored. Anything else (wrong field count,
/// non-integer fields) yields `None`.
pub fn parse_line(line: &str) -> Option<Sample> {
    let mut fields = line.trim().split(',');
    let ts = fields.next()?.trim().parse::<i64>().ok()?;
    let raw = fields.next()?.trim().parse::<i64>().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(Sample::new(ts, raw as f64))
}

/// Parse one recorded-table row: integer timestamp, real raw value.
pub fn parse_row(line: &str) -> Option<Sample> {
    let mut fields = line.trim().split(',');
    let ts = fields.next()?.trim().parse::<i64>().ok()?;
    let raw = fields.next()?.trim().parse::<f64>().ok()?;
    if fields.next().is_some() || !raw.is_finite() {
        return None;
    }
    Some(Sample::new(ts, raw))
}

/// Counters kept while reading a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub accepted: u64,
    pub malformed: u64,
    pub out_of_range: u64,
}

/// Read a recorded table (header row, then `timestamp_ms,raw` rows).
///
/// Blank and malformed rows are skipped, as are rows rejected by `gate`.
pub fn parse_recorded<R: BufRead>(reader: R, gate: &SourceParams) -> Result<(Vec<Sample>, SourceStats)> {
    let mut samples = Vec::new();
    let mut stats = SourceStats::default();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read recorded row {}", lineno + 1))?;
        if lineno == 0 || line.trim().is_empty() {
            continue;
        }
        match parse_row(&line) {
            Some(s) if gate.accepts(s.raw) => {
                stats.accepted += 1;
                samples.push(s);
            }
            Some(_) => stats.out_of_range += 1,
            None => {
                stats.malformed += 1;
                debug!(row = lineno + 1, "skipping malformed recorded row");
            }
        }
    }

    info!(
        accepted = stats.accepted,
        malformed = stats.malformed,
        out_of_range = stats.out_of_range,
        "recorded series loaded"
    );
    Ok((samples, stats))
}

/// Read live protocol lines from `reader` and forward parsed samples to `tx`.
///
/// Returns when the reader hits EOF or the receiving side is dropped.
pub async fn pump_lines<R>(reader: R, tx: mpsc::Sender<Sample>, gate: SourceParams) -> Result<SourceStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = SourceStats::default();

    while let Some(line) = lines.next_line().await.context("failed to read sample line")? {
        let Some(sample) = parse_line(&line) else {
            stats.malformed += 1;
            debug!(line = %line, "discarding malformed line");
            continue;
        };
        if !gate.accepts(sample.raw) {
            stats.out_of_range += 1;
            continue;
        }
        if tx.send(sample).await.is_err() {
            debug!("sample receiver dropped, stopping line reader");
            break;
        }
        stats.accepted += 1;
    }

    info!(
        accepted = stats.accepted,
        malformed = stats.malformed,
        out_of_range = stats.out_of_range,
        "line reader finished"
    );
    Ok(stats)
}

// =============================================================================
// Pull interface
// =============================================================================

/// Whether a source may still yield samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Open,
    Closed,
}

/// Non-blocking sample supply drained once per streaming tick.
pub trait SampleSource {
    /// Move every currently available sample into `out` without waiting.
    fn drain_into(&mut self, out: &mut Vec<Sample>) -> SourceState;
}

impl SampleSource for mpsc::Receiver<Sample> {
    fn drain_into(&mut self, out: &mut Vec<Sample>) -> SourceState {
        loop {
            match self.try_recv() {
                Ok(sample) => out.push(sample),
                Err(TryRecvError::Empty) => return SourceState::Open,
                Err(TryRecvError::Disconnected) => return SourceState::Closed,
            }
        }
    }
}

/// Replays a recorded series, releasing a fixed number of samples per drain.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    samples: Vec<Sample>,
    cursor: usize,
    per_drain: usize,
}

impl ReplaySource {
    pub fn new(samples: Vec<Sample>, per_drain: usize) -> Self {
        Self {
            samples,
            cursor: 0,
            per_drain: per_drain.max(1),
        }
    }
}

impl SampleSource for ReplaySource {
    fn drain_into(&mut self, out: &mut Vec<Sample>) -> SourceState {
        let end = (self.cursor + self.per_drain).min(self.samples.len());
        out.extend_from_slice(&self.samples[self.cursor..end]);
        self.cursor = end;
        if self.cursor >= self.samples.len() {
            SourceState::Closed
        } else {
            SourceState::Open
        }
    }
}
