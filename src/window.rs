//! Fixed-duration windows and the staging buffers they are cut from.

use crate::decode::{DecodedBlock, StimDecoded, StimFlags};
use serde::Serialize;
use std::ops::Range;

/// Per-channel samples stored row-major: channel `n` occupies
/// `data[(n-1)*samples .. n*samples]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelBlock<T> {
    channels: usize,
    samples: usize,
    data: Vec<T>,
}

impl<T> Default for ChannelBlock<T> {
    fn default() -> Self {
        Self {
            channels: 0,
            samples: 0,
            data: Vec::new(),
        }
    }
}

impl<T: Clone> ChannelBlock<T> {
    /// Block with zero channels holding `samples` columns.
    pub fn empty(samples: usize) -> Self {
        Self {
            channels: 0,
            samples,
            data: Vec::new(),
        }
    }

    /// Build from one slice per channel. Every slice must hold `samples` values.
    pub fn from_rows<'a, I>(rows: I, samples: usize) -> Option<Self>
    where
        I: IntoIterator<Item = &'a [T]>,
        T: 'a,
    {
        let mut data = Vec::new();
        let mut channels = 0;
        for row in rows {
            if row.len() != samples {
                return None;
            }
            data.extend_from_slice(row);
            channels += 1;
        }
        Some(Self {
            channels,
            samples,
            data,
        })
    }

    /// Concatenate blocks of equal channel count along the sample axis, keeping
    /// the first `take` samples of each channel.
    pub fn concat(blocks: &[&ChannelBlock<T>], take: usize) -> Option<Self> {
        let channels = blocks.first().map_or(0, |b| b.channels);
        if blocks.iter().any(|b| b.channels != channels) {
            return None;
        }
        let total: usize = blocks.iter().map(|b| b.samples).sum();
        if take > total {
            return None;
        }

        let mut data = Vec::with_capacity(channels * take);
        for ch in 1..=channels {
            let mut remaining = take;
            for block in blocks {
                if remaining == 0 {
                    break;
                }
                let row = block.channel(ch).unwrap_or(&[]);
                let n = remaining.min(row.len());
                data.extend_from_slice(&row[..n]);
                remaining -= n;
            }
        }
        Some(Self {
            channels,
            samples: take,
            data,
        })
    }
}

impl<T> ChannelBlock<T> {
    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Samples per channel.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Samples of channel `n` (1-based).
    pub fn channel(&self, n: usize) -> Option<&[T]> {
        if n == 0 || n > self.channels {
            return None;
        }
        let start = (n - 1) * self.samples;
        self.data.get(start..start + self.samples)
    }

    /// Channels in index order.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        (1..=self.channels).filter_map(move |n| self.channel(n))
    }

    /// Flat row-major storage.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

/// Channel counts of a window; windows of different shape cannot be joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WindowShape {
    /// Amplifier channels
    pub amplifier: usize,
    /// Stimulation channels
    pub stimulation: usize,
    /// Digital-input channels
    pub digital_input: usize,
}

/// One fixed-duration block of aligned samples across every channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Window {
    /// Global index of the first sample
    pub first_sample: u64,
    /// Seconds since recording start
    pub timestamps: Vec<f64>,
    /// Microvolts
    pub amplifier: ChannelBlock<f64>,
    /// Stimulation current
    pub stimulation: ChannelBlock<f64>,
    /// Stimulation status bits
    pub stim_flags: ChannelBlock<StimFlags>,
    /// Digital-input bitmasks
    pub digital_input: ChannelBlock<u16>,
}

impl Window {
    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True for a zero-length window.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Channel counts.
    pub fn shape(&self) -> WindowShape {
        WindowShape {
            amplifier: self.amplifier.channel_count(),
            stimulation: self.stimulation.channel_count(),
            digital_input: self.digital_input.channel_count(),
        }
    }
}

/// Assembler-owned per-channel accumulators.
///
/// Decoded blocks are appended after every successful iteration; complete
/// windows are cut from the front and the remainder is kept.
#[derive(Debug, Default)]
pub struct StagingBuffers {
    base_sample: u64,
    timestamps: Vec<f64>,
    amplifier: Vec<Vec<f64>>,
    stimulation: Vec<Vec<f64>>,
    stim_flags: Vec<Vec<StimFlags>>,
    digital_input: Vec<Vec<u16>>,
}

impl StagingBuffers {
    /// Zero-length buffers with the given cardinality; `base_sample` is the
    /// global index of the next sample appended.
    pub fn reinit(&mut self, shape: WindowShape, base_sample: u64) {
        self.base_sample = base_sample;
        self.timestamps.clear();
        self.amplifier = vec![Vec::new(); shape.amplifier];
        self.stimulation = vec![Vec::new(); shape.stimulation];
        self.stim_flags = vec![Vec::new(); shape.stimulation];
        self.digital_input = vec![Vec::new(); shape.digital_input];
    }

    /// Current cardinality.
    pub fn shape(&self) -> WindowShape {
        WindowShape {
            amplifier: self.amplifier.len(),
            stimulation: self.stimulation.len(),
            digital_input: self.digital_input.len(),
        }
    }

    /// Samples staged.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Global index of the first staged sample.
    pub fn base_sample(&self) -> u64 {
        self.base_sample
    }

    /// Append one iteration's timestamps plus per-channel blocks, indexed by
    /// position within each type.
    pub fn append(&mut self, timestamps: Vec<f64>, channels: Vec<DecodedBlock>) {
        self.timestamps.extend(timestamps);
        let (mut amp, mut stim, mut din) = (0, 0, 0);
        for block in channels {
            match block {
                DecodedBlock::Timestamp(_) => {}
                DecodedBlock::Amplifier(v) => {
                    if let Some(buf) = self.amplifier.get_mut(amp) {
                        buf.extend(v);
                    }
                    amp += 1;
                }
                DecodedBlock::Stimulation(StimDecoded { current, flags }) => {
                    if let Some(buf) = self.stimulation.get_mut(stim) {
                        buf.extend(current);
                    }
                    if let Some(buf) = self.stim_flags.get_mut(stim) {
                        buf.extend(flags);
                    }
                    stim += 1;
                }
                DecodedBlock::DigitalInput(v) => {
                    if let Some(buf) = self.digital_input.get_mut(din) {
                        buf.extend(v);
                    }
                    din += 1;
                }
            }
        }
    }

    /// Cut every complete window of `samples_per_window` from the front.
    pub fn drain_windows(&mut self, samples_per_window: usize) -> Vec<Window> {
        if samples_per_window == 0 {
            return Vec::new();
        }
        let complete = self.timestamps.len() / samples_per_window;
        let mut windows = Vec::with_capacity(complete);

        for k in 0..complete {
            let range = k * samples_per_window..(k + 1) * samples_per_window;
            windows.push(Window {
                first_sample: self.base_sample + range.start as u64,
                timestamps: self.timestamps[range.clone()].to_vec(),
                amplifier: cut(&self.amplifier, range.clone()),
                stimulation: cut(&self.stimulation, range.clone()),
                stim_flags: cut(&self.stim_flags, range.clone()),
                digital_input: cut(&self.digital_input, range),
            });
        }

        let consumed = complete * samples_per_window;
        if consumed > 0 {
            self.timestamps.drain(..consumed);
            for buf in &mut self.amplifier {
                buf.drain(..consumed);
            }
            for buf in &mut self.stimulation {
                buf.drain(..consumed);
            }
            for buf in &mut self.stim_flags {
                buf.drain(..consumed);
            }
            for buf in &mut self.digital_input {
                buf.drain(..consumed);
            }
            self.base_sample += consumed as u64;
        }
        windows
    }
}

fn cut<T: Clone>(rows: &[Vec<T>], range: Range<usize>) -> ChannelBlock<T> {
    let samples = range.len();
    ChannelBlock::from_rows(rows.iter().map(|r| &r[range.clone()]), samples)
        .unwrap_or_else(|| ChannelBlock::empty(samples))
}

/// Contiguous multi-window read result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSpan {
    /// Global index of the first sample
    pub first_sample: u64,
    /// Seconds since recording start
    pub timestamps: Vec<f64>,
    /// Microvolts, channels × samples
    pub amplifier: ChannelBlock<f64>,
    /// Stimulation current, channels × samples
    pub stimulation: ChannelBlock<f64>,
    /// Stimulation status bits, channels × samples
    pub stim_flags: ChannelBlock<StimFlags>,
    /// Digital-input bitmasks, channels × samples
    pub digital_input: ChannelBlock<u16>,
}

impl TimeSpan {
    /// Join consecutive windows of one shape, keeping the first `take` samples.
    /// Returns `None` on mismatched shapes or too few samples.
    pub fn from_windows(windows: &[&Window], take: usize) -> Option<Self> {
        let first = windows.first()?;
        let shape = first.shape();
        if windows.iter().any(|w| w.shape() != shape) {
            return None;
        }
        let total: usize = windows.iter().map(|w| w.len()).sum();
        if total < take {
            return None;
        }

        let timestamps = windows
            .iter()
            .flat_map(|w| w.timestamps.iter().copied())
            .take(take)
            .collect();
        let amp: Vec<_> = windows.iter().map(|w| &w.amplifier).collect();
        let stim: Vec<_> = windows.iter().map(|w| &w.stimulation).collect();
        let flags: Vec<_> = windows.iter().map(|w| &w.stim_flags).collect();
        let din: Vec<_> = windows.iter().map(|w| &w.digital_input).collect();

        Some(Self {
            first_sample: first.first_sample,
            timestamps,
            amplifier: ChannelBlock::concat(&amp, take)?,
            stimulation: ChannelBlock::concat(&stim, take)?,
            stim_flags: ChannelBlock::concat(&flags, take)?,
            digital_input: ChannelBlock::concat(&din, take)?,
        })
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True for an empty span.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(amplifier: usize, stimulation: usize, digital_input: usize) -> WindowShape {
        WindowShape {
            amplifier,
            stimulation,
            digital_input,
        }
    }

    #[test]
    fn channel_block_rows_are_one_based() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        let block = ChannelBlock::from_rows([&a[..], &b[..]], 3).unwrap();
        assert_eq!(block.channel_count(), 2);
        assert_eq!(block.channel(1), Some(&a[..]));
        assert_eq!(block.channel(2), Some(&b[..]));
        assert_eq!(block.channel(0), None);
        assert_eq!(block.channel(3), None);
        assert!(ChannelBlock::from_rows([&a[..], &b[..2]], 3).is_none());
    }

    #[test]
    fn staging_cuts_complete_windows_and_keeps_remainder() {
        let mut staging = StagingBuffers::default();
        staging.reinit(shape(2, 1, 0), 0);

        let ts: Vec<f64> = (0..250).map(f64::from).collect();
        let amp0: Vec<f64> = (0..250).map(|i| f64::from(i) * 2.0).collect();
        let amp1: Vec<f64> = (0..250).map(|i| f64::from(i) * 3.0).collect();
        let stim = StimDecoded::from_words(&[0x8001; 250], 10.0);
        staging.append(
            ts,
            vec![
                DecodedBlock::Amplifier(amp0),
                DecodedBlock::Amplifier(amp1),
                DecodedBlock::Stimulation(stim),
            ],
        );

        let windows = staging.drain_windows(100);
        assert_eq!(windows.len(), 2);
        assert_eq!(staging.len(), 50);
        assert_eq!(staging.base_sample(), 200);

        let second = &windows[1];
        assert_eq!(second.first_sample, 100);
        assert_eq!(second.timestamps[0], 100.0);
        assert_eq!(second.amplifier.channel(2).unwrap()[0], 300.0);
        assert_eq!(second.stimulation.channel(1).unwrap()[0], 10.0);
        assert_eq!(
            second.stim_flags.channel(1).unwrap()[0],
            StimFlags::COMPLIANCE_LIMIT
        );
        for w in &windows {
            assert_eq!(w.len(), 100);
            assert_eq!(w.amplifier.samples(), 100);
            assert_eq!(w.digital_input.channel_count(), 0);
        }
    }

    #[test]
    fn time_span_joins_and_truncates() {
        let mut staging = StagingBuffers::default();
        staging.reinit(shape(1, 0, 1), 1000);
        staging.append(
            (0..300).map(f64::from).collect(),
            vec![
                DecodedBlock::Amplifier((0..300).map(f64::from).collect()),
                DecodedBlock::DigitalInput((0..300).map(|i| i as u16).collect()),
            ],
        );
        let windows = staging.drain_windows(100);
        let refs: Vec<&Window> = windows.iter().collect();

        let span = TimeSpan::from_windows(&refs, 250).unwrap();
        assert_eq!(span.first_sample, 1000);
        assert_eq!(span.len(), 250);
        assert_eq!(span.amplifier.channel(1).unwrap()[249], 249.0);
        assert_eq!(span.digital_input.channel(1).unwrap()[120], 120);

        assert!(TimeSpan::from_windows(&refs, 301).is_none());
    }

    #[test]
    fn mismatched_shapes_do_not_join() {
        let mut a = StagingBuffers::default();
        a.reinit(shape(1, 0, 0), 0);
        a.append(vec![0.0; 10], vec![DecodedBlock::Amplifier(vec![0.0; 10])]);
        let mut b = StagingBuffers::default();
        b.reinit(shape(2, 0, 0), 10);
        b.append(
            vec![0.0; 10],
            vec![
                DecodedBlock::Amplifier(vec![0.0; 10]),
                DecodedBlock::Amplifier(vec![0.0; 10]),
            ],
        );
        let wa = a.drain_windows(10);
        let wb = b.drain_windows(10);
        assert!(TimeSpan::from_windows(&[&wa[0], &wb[0]], 20).is_none());
    }
}
