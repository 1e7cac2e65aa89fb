use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::Sample;

/// A retained sample together with the streaming filter's view of it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RingEntry {
    pub sample: Sample,
    /// Adaptive filter output after this sample.
    pub filtered: f64,
    /// Instantaneous edge flag for this sample.
    pub instant_edge: bool,
}

/// Fixed-capacity FIFO of the most recent samples.
///
/// Once full, every push evicts the oldest entry. Anything derived from the
/// ring only ever sees the retained entries.
#[derive(Debug, Clone)]
pub struct SampleRing {
    entries: VecDeque<RingEntry>,
    capacity: usize,
    evicted: u64,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Append an entry, returning the evicted oldest entry when full.
    pub fn push(&mut self, entry: RingEntry) -> Option<RingEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.evicted += 1;
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn latest(&self) -> Option<&RingEntry> {
        self.entries.back()
    }

    /// Entries whose timestamp lies within `window_ms` of the latest one
    /// (oldest-first).
    pub fn visible(&self, window_ms: i64) -> Vec<RingEntry> {
        let Some(latest) = self.entries.back() else {
            return Vec::new();
        };
        let cutoff = latest.sample.timestamp_ms - window_ms;
        let first = self
            .entries
            .iter()
            .position(|e| e.sample.timestamp_ms >= cutoff)
            .unwrap_or(self.entries.len());
        self.entries.range(first..).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries evicted since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: i64) -> RingEntry {
        RingEntry {
            sample: Sample::new(ts, ts as f64),
            filtered: ts as f64,
            instant_edge: false,
        }
    }

    #[test]
    fn push_below_capacity_keeps_all() {
        let mut ring = SampleRing::new(3);
        assert!(ring.is_empty());
        assert!(ring.push(entry(0)).is_none());
        assert!(ring.push(entry(10)).is_none());
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.latest().unwrap().sample.timestamp_ms, 10);
    }

    #[test]
    fn push_when_full_evicts_oldest() {
        let mut ring = SampleRing::new(3);
        for ts in [0, 10, 20] {
            ring.push(entry(ts));
        }
        let evicted = ring.push(entry(30)).unwrap();
        assert_eq!(evicted.sample.timestamp_ms, 0);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.evicted(), 1);
        let visible = ring.visible(1_000);
        assert_eq!(visible.first().unwrap().sample.timestamp_ms, 10);
    }

    #[test]
    fn visible_window_cuts_by_time() {
        let mut ring = SampleRing::new(100);
        for ts in (0..50).map(|i| i * 10) {
            ring.push(entry(ts));
        }
        let visible = ring.visible(100);
        // Latest is 490 -> entries 390..=490.
        assert_eq!(visible.len(), 11);
        assert_eq!(visible[0].sample.timestamp_ms, 390);
        assert!(SampleRing::new(4).visible(100).is_empty());
    }
}
