//! Bounded window ring with latest-biased readers.
//!
//! The assembler is the single writer; any number of [`RingReader`]s consume
//! with independent cursors. Writes past capacity overwrite the oldest slot.
//! A reader that falls more than `lag_threshold` windows behind the newest
//! write is snapped straight to the newest window on its next read, dropping
//! the backlog. Staleness is bounded, completeness is not guaranteed.
//!
//! # Sequence numbers
//! ```text
//! written = total windows ever written (monotonic, survives clear)
//! retained = [written - count, written)
//! slot(seq) = seq % capacity
//! ```
//! Reader cursors are sequence numbers, so a cursor never aliases a slot that
//! was overwritten after it was last read.
//!
//! Every operation holds the one state lock for its whole duration, so a read
//! can never observe a half-written slot.

use crate::window::Window;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug)]
struct RingState {
    slots: Vec<Option<Arc<Window>>>,
    count: usize,
    written: u64,
}

impl RingState {
    fn oldest_seq(&self) -> u64 {
        self.written - self.count as u64
    }

    fn slot(&self, seq: u64) -> Option<&Arc<Window>> {
        let capacity = self.slots.len() as u64;
        self.slots[(seq % capacity) as usize].as_ref()
    }
}

/// Fixed-capacity ring of windows.
#[derive(Debug)]
pub struct WindowRing {
    state: Mutex<RingState>,
    capacity: usize,
    lag_threshold: usize,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    /// Slots
    pub capacity: usize,
    /// Windows currently retained
    pub len: usize,
    /// Windows ever written
    pub written: u64,
}

impl WindowRing {
    /// Ring holding `capacity` windows (at least one).
    pub fn new(capacity: usize, lag_threshold: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(RingState {
                slots: vec![None; capacity],
                count: 0,
                written: 0,
            }),
            capacity,
            lag_threshold,
        }
    }

    /// Store a window, overwriting the oldest when full.
    pub fn write(&self, window: Window) {
        self.write_arc(Arc::new(window));
    }

    /// Store an already shared window.
    pub fn write_arc(&self, window: Arc<Window>) {
        let mut state = self.state.lock();
        let slot = (state.written % self.capacity as u64) as usize;
        let evicted = state.count == self.capacity;
        state.slots[slot] = Some(window);
        state.written += 1;
        if !evicted {
            state.count += 1;
        }
        trace!(seq = state.written - 1, evicted, "Window stored");
    }

    /// Next window for `cursor`, or `None` when it has consumed everything.
    ///
    /// A cursor older than the oldest retained window is moved up to it first;
    /// then, if more than `lag_threshold` windows separate it from the newest,
    /// it is snapped to the newest.
    pub fn read_next(&self, cursor: &mut ReadCursor) -> Option<Arc<Window>> {
        let state = self.state.lock();
        if state.count == 0 || cursor.next_seq >= state.written {
            return None;
        }

        let oldest = state.oldest_seq();
        if cursor.next_seq < oldest {
            cursor.next_seq = oldest;
        }

        let newest = state.written - 1;
        let lag = newest - cursor.next_seq;
        if lag > self.lag_threshold as u64 {
            debug!(lag, "Reader fell behind, snapping to newest window");
            cursor.skipped += lag;
            cursor.next_seq = newest;
        }

        let window = state.slot(cursor.next_seq).cloned();
        cursor.next_seq += 1;
        window
    }

    /// Most recently written window.
    pub fn newest(&self) -> Option<Arc<Window>> {
        let state = self.state.lock();
        if state.count == 0 {
            return None;
        }
        state.slot(state.written - 1).cloned()
    }

    /// Every retained window, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Window>> {
        let state = self.state.lock();
        (state.oldest_seq()..state.written)
            .filter_map(|seq| state.slot(seq).cloned())
            .collect()
    }

    /// Drop every retained window. Reader cursors stay valid.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.slots.iter_mut().for_each(|s| *s = None);
        state.count = 0;
    }

    /// Cursor positioned before every window written so far.
    pub fn cursor(&self) -> ReadCursor {
        ReadCursor::default()
    }

    /// Number of retained windows.
    pub fn len(&self) -> usize {
        self.state.lock().count
    }

    /// True when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Catch-up threshold in windows.
    pub fn lag_threshold(&self) -> usize {
        self.lag_threshold
    }

    /// Counters under one lock.
    pub fn stats(&self) -> RingStats {
        let state = self.state.lock();
        RingStats {
            capacity: self.capacity,
            len: state.count,
            written: state.written,
        }
    }
}

/// A reader's position in the ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadCursor {
    next_seq: u64,
    skipped: u64,
}

impl ReadCursor {
    /// Sequence number of the next window this cursor will return.
    pub fn position(&self) -> u64 {
        self.next_seq
    }

    /// Windows dropped by catch-up so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

/// Shared handle to a ring plus one cursor.
#[derive(Debug, Clone)]
pub struct RingReader {
    ring: Arc<WindowRing>,
    cursor: ReadCursor,
}

impl RingReader {
    /// Reader starting before every window written so far.
    pub fn new(ring: Arc<WindowRing>) -> Self {
        let cursor = ring.cursor();
        Self { ring, cursor }
    }

    /// See [`WindowRing::read_next`].
    pub fn read_next(&mut self) -> Option<Arc<Window>> {
        self.ring.read_next(&mut self.cursor)
    }

    /// Cursor state.
    pub fn cursor(&self) -> ReadCursor {
        self.cursor
    }

    /// The shared ring.
    pub fn ring(&self) -> &Arc<WindowRing> {
        &self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::ChannelBlock;

    fn window(n: u64) -> Window {
        Window {
            first_sample: n,
            timestamps: vec![n as f64],
            amplifier: ChannelBlock::empty(1),
            stimulation: ChannelBlock::empty(1),
            stim_flags: ChannelBlock::empty(1),
            digital_input: ChannelBlock::empty(1),
        }
    }

    fn ids(windows: &[Arc<Window>]) -> Vec<u64> {
        windows.iter().map(|w| w.first_sample).collect()
    }

    #[test]
    fn empty_ring_returns_nothing() {
        let ring = WindowRing::new(4, 5);
        let mut cursor = ring.cursor();
        assert!(ring.read_next(&mut cursor).is_none());
        assert!(ring.newest().is_none());
        assert!(ring.is_empty());
    }

    #[test]
    fn reads_in_order_then_reports_no_data() {
        let ring = WindowRing::new(4, 5);
        for n in 1..=3 {
            ring.write(window(n));
        }
        let mut cursor = ring.cursor();
        assert_eq!(ring.read_next(&mut cursor).unwrap().first_sample, 1);
        assert_eq!(ring.read_next(&mut cursor).unwrap().first_sample, 2);
        assert_eq!(ring.read_next(&mut cursor).unwrap().first_sample, 3);
        assert!(ring.read_next(&mut cursor).is_none());

        ring.write(window(4));
        assert_eq!(ring.read_next(&mut cursor).unwrap().first_sample, 4);
    }

    #[test]
    fn overwrite_keeps_most_recent_capacity() {
        let ring = WindowRing::new(5, 5);
        for n in 1..=7 {
            ring.write(window(n));
        }
        assert_eq!(ring.len(), 5);
        assert_eq!(ids(&ring.snapshot()), [3, 4, 5, 6, 7]);
        assert_eq!(ring.newest().unwrap().first_sample, 7);

        // fresh reader starts at the oldest retained window
        let mut cursor = ring.cursor();
        assert_eq!(ring.read_next(&mut cursor).unwrap().first_sample, 3);
    }

    #[test]
    fn lagging_reader_snaps_to_newest() {
        let ring = WindowRing::new(20, 5);
        for n in 1..=10 {
            ring.write(window(n));
        }
        let mut cursor = ring.cursor();
        assert_eq!(ring.read_next(&mut cursor).unwrap().first_sample, 10);
        assert_eq!(cursor.skipped(), 9);
        assert!(ring.read_next(&mut cursor).is_none());
    }

    #[test]
    fn lag_at_threshold_does_not_snap() {
        let ring = WindowRing::new(20, 5);
        for n in 1..=6 {
            ring.write(window(n));
        }
        let mut cursor = ring.cursor();
        assert_eq!(ring.read_next(&mut cursor).unwrap().first_sample, 1);
    }

    #[test]
    fn clear_empties_but_cursors_continue() {
        let ring = WindowRing::new(4, 5);
        ring.write(window(1));
        ring.write(window(2));
        let mut cursor = ring.cursor();
        assert_eq!(ring.read_next(&mut cursor).unwrap().first_sample, 1);

        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.read_next(&mut cursor).is_none());

        ring.write(window(3));
        assert_eq!(ring.read_next(&mut cursor).unwrap().first_sample, 3);
        assert_eq!(ring.stats().written, 3);
    }

    #[test]
    fn readers_are_independent() {
        let ring = Arc::new(WindowRing::new(8, 8));
        let mut a = RingReader::new(ring.clone());
        let mut b = RingReader::new(ring.clone());
        ring.write(window(1));
        ring.write(window(2));

        assert_eq!(a.read_next().unwrap().first_sample, 1);
        assert_eq!(a.read_next().unwrap().first_sample, 2);
        assert_eq!(b.read_next().unwrap().first_sample, 1);
        assert!(a.read_next().is_none());
        assert_eq!(b.cursor().position(), 1);
    }
}
