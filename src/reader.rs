//! Time-span reads over the window ring.
//!
//! A read asks for `duration_ms` of data, which must be a whole number of
//! windows. The span holds exactly that many windows as the assembler cut them,
//! so its length is `windows * samples_per_window` even when the sample rate
//! does not divide evenly into the window duration. Windows are pulled from the ring with the reader's own cursor until
//! enough consecutive ones are collected; the result is either the exact span
//! or [`ReadOutcome::Insufficient`], never a short or ragged array.
//!
//! Collected windows that are not yet enough are kept for the next call. A
//! window that does not continue the collected run (different channel layout,
//! or a gap left by catch-up or a session switch) restarts the collection.

use crate::assembler::AssemblerShared;
use crate::data::ring_buffer::RingReader;
use crate::error::{AppResult, StreamError};
use crate::window::{TimeSpan, Window};
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of [`TimeSpanReader::read`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// Exactly the requested span
    Ready(TimeSpan),
    /// Not enough buffered windows yet
    Insufficient {
        /// Consecutive windows collected so far
        collected: usize,
        /// Windows the request needs
        needed: usize,
    },
}

impl ReadOutcome {
    /// The span, if the read succeeded.
    pub fn into_span(self) -> Option<TimeSpan> {
        match self {
            ReadOutcome::Ready(span) => Some(span),
            ReadOutcome::Insufficient { .. } => None,
        }
    }

    /// Whether the read succeeded.
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadOutcome::Ready(_))
    }
}

/// Consumer-side reader with its own ring cursor.
#[derive(Debug)]
pub struct TimeSpanReader {
    ring: RingReader,
    shared: Arc<AssemblerShared>,
    window_ms: u64,
    pending: Vec<Arc<Window>>,
}

impl TimeSpanReader {
    /// Reader over `ring` for windows of `window_ms`.
    pub fn new(ring: RingReader, shared: Arc<AssemblerShared>, window_ms: u64) -> Self {
        Self {
            ring,
            shared,
            window_ms,
            pending: Vec::new(),
        }
    }

    /// Window duration this reader expects.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Read the next `duration_ms` of data.
    ///
    /// # Errors
    /// [`StreamError::InvalidDuration`] unless `duration_ms` is a positive
    /// multiple of the window duration.
    pub fn read(&mut self, duration_ms: u64) -> AppResult<ReadOutcome> {
        if duration_ms == 0 || self.window_ms == 0 || duration_ms % self.window_ms != 0 {
            return Err(StreamError::InvalidDuration {
                duration_ms,
                window_ms: self.window_ms,
            });
        }
        let needed = (duration_ms / self.window_ms) as usize;

        // spans are whole windows as cut by the assembler
        let samples_per_window = self.shared.layout().samples_per_window;
        if samples_per_window == 0 {
            self.pending.clear();
            return Ok(ReadOutcome::Insufficient {
                collected: 0,
                needed,
            });
        }
        let samples_needed = needed * samples_per_window;

        while self.pending.len() < needed {
            let Some(window) = self.ring.read_next() else {
                break;
            };
            if window.len() != samples_per_window {
                debug!(
                    samples = window.len(),
                    samples_per_window,
                    "Window from a previous session layout, skipping"
                );
                self.pending.clear();
                continue;
            }
            if let Some(last) = self.pending.last() {
                let contiguous = window.first_sample == last.first_sample + last.len() as u64;
                if !contiguous || window.shape() != last.shape() {
                    debug!(
                        dropped = self.pending.len(),
                        first_sample = window.first_sample,
                        "Window run broken, restarting collection"
                    );
                    self.pending.clear();
                }
            }
            self.pending.push(window);
        }

        if self.pending.len() < needed {
            trace!(collected = self.pending.len(), needed, "Insufficient data");
            return Ok(ReadOutcome::Insufficient {
                collected: self.pending.len(),
                needed,
            });
        }

        let windows: Vec<&Window> = self.pending.iter().map(Arc::as_ref).collect();
        let span = TimeSpan::from_windows(&windows, samples_needed);
        let collected = self.pending.len();
        self.pending.clear();
        Ok(match span {
            Some(span) => ReadOutcome::Ready(span),
            None => ReadOutcome::Insufficient { collected, needed },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ring_buffer::WindowRing;
    use crate::decode::DecodedBlock;
    use crate::window::{StagingBuffers, WindowShape};

    /// Ring plus `windows` consecutive windows of `samples_per_window` samples.
    fn fixture_at(
        sample_rate: f64,
        samples_per_window: usize,
        windows: usize,
    ) -> (Arc<WindowRing>, Arc<AssemblerShared>, Vec<Window>) {
        let shared = Arc::new(AssemblerShared::default());
        shared.update_layout(|layout| {
            layout.sample_rate = Some(sample_rate);
            layout.samples_per_window = samples_per_window;
        });
        let ring = Arc::new(WindowRing::new(40, 40));

        let n = windows * samples_per_window;
        let mut staging = StagingBuffers::default();
        staging.reinit(
            WindowShape {
                amplifier: 2,
                stimulation: 0,
                digital_input: 0,
            },
            0,
        );
        staging.append(
            (0..n).map(|i| i as f64 / sample_rate).collect(),
            vec![
                DecodedBlock::Amplifier((0..n).map(|i| i as f64).collect()),
                DecodedBlock::Amplifier((0..n).map(|i| -(i as f64)).collect()),
            ],
        );
        let built = staging.drain_windows(samples_per_window);
        (ring, shared, built)
    }

    /// 3000-sample windows at 30 kHz.
    fn fixture(windows: usize) -> (Arc<WindowRing>, Arc<AssemblerShared>, Vec<Window>) {
        fixture_at(30_000.0, 3000, windows)
    }

    #[test]
    fn rejects_durations_that_are_not_window_multiples() {
        let (ring, shared, _) = fixture(0);
        let mut reader = TimeSpanReader::new(RingReader::new(ring), shared, 100);
        assert!(matches!(
            reader.read(150),
            Err(StreamError::InvalidDuration { .. })
        ));
        assert!(reader.read(0).is_err());
    }

    #[test]
    fn reports_insufficient_then_completes() {
        let (ring, shared, windows) = fixture(3);
        let mut reader = TimeSpanReader::new(RingReader::new(ring.clone()), shared, 100);
        let mut windows = windows.into_iter();

        assert_eq!(
            reader.read(200).unwrap(),
            ReadOutcome::Insufficient {
                collected: 0,
                needed: 2
            }
        );

        ring.write(windows.next().unwrap());
        assert_eq!(
            reader.read(200).unwrap(),
            ReadOutcome::Insufficient {
                collected: 1,
                needed: 2
            }
        );

        ring.write(windows.next().unwrap());
        let span = reader.read(200).unwrap().into_span().unwrap();
        assert_eq!(span.len(), 6000);
        assert_eq!(span.first_sample, 0);
        assert_eq!(span.amplifier.channel_count(), 2);
        assert_eq!(span.amplifier.channel(1).unwrap()[5999], 5999.0);
        assert_eq!(span.amplifier.channel(2).unwrap()[3000], -3000.0);
        assert_eq!(span.timestamps[3000], 0.1);
    }

    #[test]
    fn gap_restarts_collection() {
        let (ring, shared, windows) = fixture(3);
        let mut reader = TimeSpanReader::new(RingReader::new(ring.clone()), shared, 100);
        let mut windows = windows.into_iter();
        ring.write(windows.next().unwrap());
        let _skipped = windows.next();
        ring.write(windows.next().unwrap());

        assert_eq!(
            reader.read(200).unwrap(),
            ReadOutcome::Insufficient {
                collected: 1,
                needed: 2
            }
        );
    }

    #[test]
    fn no_session_means_insufficient() {
        let shared = Arc::new(AssemblerShared::default());
        let ring = Arc::new(WindowRing::new(4, 5));
        let mut reader = TimeSpanReader::new(RingReader::new(ring), shared, 100);
        assert!(!reader.read(100).unwrap().is_ready());
    }

    #[test]
    fn uneven_sample_rate_reads_whole_windows() {
        // 3333 Hz cut into 100 ms windows of 333 samples
        let (ring, shared, windows) = fixture_at(3333.0, 333, 30);
        for window in windows {
            ring.write(window);
        }
        let mut reader = TimeSpanReader::new(RingReader::new(ring), shared, 100);

        for call in 0..3u64 {
            let span = reader.read(1000).unwrap().into_span().unwrap();
            assert_eq!(span.len(), 3330);
            assert_eq!(span.first_sample, call * 3330);
            assert_eq!(span.amplifier.channel(1).unwrap()[3329], (call * 3330 + 3329) as f64);
        }
        assert!(!reader.read(100).unwrap().is_ready());
    }

    #[test]
    fn windows_of_a_stale_layout_are_skipped() {
        let (ring, shared, windows) = fixture(2);
        let mut reader = TimeSpanReader::new(RingReader::new(ring.clone()), shared.clone(), 100);
        let mut windows = windows.into_iter();
        ring.write(windows.next().unwrap());

        shared.update_layout(|layout| layout.samples_per_window = 2000);
        assert_eq!(
            reader.read(100).unwrap(),
            ReadOutcome::Insufficient {
                collected: 0,
                needed: 1
            }
        );
    }
}
