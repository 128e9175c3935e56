//! Incremental decoders for the fixed-width record files.
//!
//! Each decoder owns a [`RecordCursor`] into one file and turns the next `count`
//! records into a typed sequence. Reads are two-phase: [`IncrementalDecoder::peek`]
//! produces values without moving the cursor and [`IncrementalDecoder::commit`]
//! advances it, so the assembler can decode every channel of an iteration and
//! only move the cursors once all of them succeeded.
//!
//! | type          | width | value                          |
//! |---------------|-------|--------------------------------|
//! | Timestamp     | 4     | `i32 / sample_rate` (seconds)  |
//! | Amplifier     | 2     | `i16 * scale` (µV)             |
//! | Stimulation   | 2     | see [`stim`]                   |
//! | DigitalInput  | 2     | raw `u16` bitmask              |
//!
//! All records are little-endian.

pub mod cursor;
pub mod stim;

pub use cursor::RecordCursor;
pub use stim::{StimDecoded, StimFlags, StimWord};

use crate::channel::ChannelType;
use crate::config::{DecodeStrategy, StreamConfig};
use crate::error::{AppResult, StreamError};
use crate::registry::TrackedFile;
use byteorder::{ByteOrder, LittleEndian};

/// Conversion from raw little-endian bytes to typed values.
pub trait RecordCodec {
    /// Decoded sequence type
    type Output;

    /// Bytes per record.
    const RECORD_BYTES: usize;

    /// Convert whole records; a trailing partial record is ignored.
    fn convert(&self, raw: &[u8]) -> Self::Output;
}

/// `time.dat`: sample index over sample rate.
#[derive(Debug, Clone, Copy)]
pub struct TimestampCodec {
    sample_rate: f64,
}

impl TimestampCodec {
    /// Codec for the given sample rate in Hz.
    pub fn new(sample_rate: f64) -> Self {
        Self { sample_rate }
    }
}

impl RecordCodec for TimestampCodec {
    type Output = Vec<f64>;
    const RECORD_BYTES: usize = 4;

    fn convert(&self, raw: &[u8]) -> Vec<f64> {
        let n = raw.len() / Self::RECORD_BYTES;
        let mut ticks = vec![0i32; n];
        LittleEndian::read_i32_into(&raw[..n * Self::RECORD_BYTES], &mut ticks);
        ticks
            .into_iter()
            .map(|t| f64::from(t) / self.sample_rate)
            .collect()
    }
}

/// `amp*.dat`: signed samples times the microvolt scale.
#[derive(Debug, Clone, Copy)]
pub struct AmplifierCodec {
    scale: f64,
}

impl AmplifierCodec {
    /// Codec with `scale` microvolts per LSB.
    pub fn new(scale: f64) -> Self {
        Self { scale }
    }
}

impl RecordCodec for AmplifierCodec {
    type Output = Vec<f64>;
    const RECORD_BYTES: usize = 2;

    fn convert(&self, raw: &[u8]) -> Vec<f64> {
        let n = raw.len() / Self::RECORD_BYTES;
        let mut samples = vec![0i16; n];
        LittleEndian::read_i16_into(&raw[..n * Self::RECORD_BYTES], &mut samples);
        samples
            .into_iter()
            .map(|s| f64::from(s) * self.scale)
            .collect()
    }
}

/// `stim*.dat`: bit-packed current plus status flags.
#[derive(Debug, Clone, Copy)]
pub struct StimulationCodec {
    step_size: f64,
}

impl StimulationCodec {
    /// Codec with the given current step size.
    pub fn new(step_size: f64) -> Self {
        Self { step_size }
    }
}

impl RecordCodec for StimulationCodec {
    type Output = StimDecoded;
    const RECORD_BYTES: usize = 2;

    fn convert(&self, raw: &[u8]) -> StimDecoded {
        let n = raw.len() / Self::RECORD_BYTES;
        let mut words = vec![0u16; n];
        LittleEndian::read_u16_into(&raw[..n * Self::RECORD_BYTES], &mut words);
        StimDecoded::from_words(&words, self.step_size)
    }
}

/// `board-DIGITAL-IN*.dat`: raw bitmasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigitalInputCodec;

impl RecordCodec for DigitalInputCodec {
    type Output = Vec<u16>;
    const RECORD_BYTES: usize = 2;

    fn convert(&self, raw: &[u8]) -> Vec<u16> {
        let n = raw.len() / Self::RECORD_BYTES;
        let mut words = vec![0u16; n];
        LittleEndian::read_u16_into(&raw[..n * Self::RECORD_BYTES], &mut words);
        words
    }
}

/// A codec bound to a cursor in one file.
#[derive(Debug)]
pub struct IncrementalDecoder<C> {
    codec: C,
    cursor: RecordCursor,
}

impl<C: RecordCodec> IncrementalDecoder<C> {
    /// Decoder starting at record 0.
    pub fn new(codec: C, cursor: RecordCursor) -> Self {
        Self { codec, cursor }
    }

    /// Decode the next `count` records without consuming them.
    pub fn peek(&mut self, file: &TrackedFile, count: usize) -> AppResult<C::Output> {
        let raw = self
            .cursor
            .peek(file.handle(), file.path(), count * C::RECORD_BYTES)?;
        Ok(self.codec.convert(&raw))
    }

    /// Consume `count` records.
    pub fn commit(&mut self, count: usize) {
        self.cursor.advance((count * C::RECORD_BYTES) as u64);
    }

    /// Decode and consume the next `count` records.
    pub fn decode(&mut self, file: &TrackedFile, count: usize) -> AppResult<C::Output> {
        let out = self.peek(file, count)?;
        self.commit(count);
        Ok(out)
    }

    /// Records consumed so far.
    pub fn records_consumed(&self) -> u64 {
        self.cursor.position() / C::RECORD_BYTES as u64
    }

    /// Position at an absolute record index.
    pub fn skip_to(&mut self, record: u64) {
        self.cursor.seek_to(record * C::RECORD_BYTES as u64);
    }

    /// Back to record 0, releasing any mapping.
    pub fn reset(&mut self) {
        self.cursor.reset();
    }
}

/// Per-file codec parameters.
#[derive(Debug, Clone, Copy)]
pub struct DecoderParams {
    /// Samples per second, from the metadata header
    pub sample_rate: f64,
    /// Microvolts per amplifier LSB
    pub amplifier_scale: f64,
    /// Stimulation current per magnitude step
    pub stim_step_size: f64,
    /// Byte access strategy
    pub strategy: DecodeStrategy,
    /// Minimum mapped window size
    pub map_window_bytes: u64,
}

impl DecoderParams {
    /// Parameters from configuration plus the session's sample rate.
    pub fn from_config(config: &StreamConfig, sample_rate: f64) -> Self {
        Self {
            sample_rate,
            amplifier_scale: config.acquisition.amplifier_scale,
            stim_step_size: config.acquisition.stim_step_size,
            strategy: config.decoder.strategy,
            map_window_bytes: config.decoder.map_window_bytes,
        }
    }

    fn cursor(&self) -> RecordCursor {
        RecordCursor::new(self.strategy, self.map_window_bytes)
    }
}

/// Output of a [`ChannelDecoder`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBlock {
    /// Seconds
    Timestamp(Vec<f64>),
    /// Microvolts
    Amplifier(Vec<f64>),
    /// Current and flags
    Stimulation(StimDecoded),
    /// Bitmasks
    DigitalInput(Vec<u16>),
}

impl DecodedBlock {
    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            DecodedBlock::Timestamp(v) | DecodedBlock::Amplifier(v) => v.len(),
            DecodedBlock::Stimulation(s) => s.len(),
            DecodedBlock::DigitalInput(v) => v.len(),
        }
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoder for any data channel, dispatched on [`ChannelType`].
#[derive(Debug)]
pub enum ChannelDecoder {
    /// `time.dat`
    Timestamp(IncrementalDecoder<TimestampCodec>),
    /// `amp*.dat`
    Amplifier(IncrementalDecoder<AmplifierCodec>),
    /// `stim*.dat`
    Stimulation(IncrementalDecoder<StimulationCodec>),
    /// `board-DIGITAL-IN*.dat`
    DigitalInput(IncrementalDecoder<DigitalInputCodec>),
}

macro_rules! dispatch {
    ($self:expr, $d:ident => $body:expr) => {
        match $self {
            ChannelDecoder::Timestamp($d) => $body,
            ChannelDecoder::Amplifier($d) => $body,
            ChannelDecoder::Stimulation($d) => $body,
            ChannelDecoder::DigitalInput($d) => $body,
        }
    };
}

impl ChannelDecoder {
    /// Decoder for a channel type; `None` for metadata, which is not a record
    /// stream.
    pub fn for_type(channel_type: ChannelType, params: &DecoderParams) -> Option<Self> {
        let cursor = params.cursor();
        Some(match channel_type {
            ChannelType::Timestamp => ChannelDecoder::Timestamp(IncrementalDecoder::new(
                TimestampCodec::new(params.sample_rate),
                cursor,
            )),
            ChannelType::Amplifier => ChannelDecoder::Amplifier(IncrementalDecoder::new(
                AmplifierCodec::new(params.amplifier_scale),
                cursor,
            )),
            ChannelType::Stimulation => ChannelDecoder::Stimulation(IncrementalDecoder::new(
                StimulationCodec::new(params.stim_step_size),
                cursor,
            )),
            ChannelType::DigitalInput => {
                ChannelDecoder::DigitalInput(IncrementalDecoder::new(DigitalInputCodec, cursor))
            }
            ChannelType::Metadata => return None,
        })
    }

    /// Channel type this decoder reads.
    pub fn channel_type(&self) -> ChannelType {
        match self {
            ChannelDecoder::Timestamp(_) => ChannelType::Timestamp,
            ChannelDecoder::Amplifier(_) => ChannelType::Amplifier,
            ChannelDecoder::Stimulation(_) => ChannelType::Stimulation,
            ChannelDecoder::DigitalInput(_) => ChannelType::DigitalInput,
        }
    }

    /// Decode the next `count` records without consuming them. Fails with
    /// [`StreamError::RecordCount`] if fewer values came back than requested.
    pub fn peek(&mut self, file: &TrackedFile, count: usize) -> AppResult<DecodedBlock> {
        let block = match self {
            ChannelDecoder::Timestamp(d) => DecodedBlock::Timestamp(d.peek(file, count)?),
            ChannelDecoder::Amplifier(d) => DecodedBlock::Amplifier(d.peek(file, count)?),
            ChannelDecoder::Stimulation(d) => DecodedBlock::Stimulation(d.peek(file, count)?),
            ChannelDecoder::DigitalInput(d) => DecodedBlock::DigitalInput(d.peek(file, count)?),
        };
        if block.len() != count {
            return Err(StreamError::RecordCount {
                path: file.path().to_path_buf(),
                expected: count,
                actual: block.len(),
            });
        }
        Ok(block)
    }

    /// Consume `count` records.
    pub fn commit(&mut self, count: usize) {
        dispatch!(self, d => d.commit(count))
    }

    /// Decode and consume the next `count` records.
    pub fn decode(&mut self, file: &TrackedFile, count: usize) -> AppResult<DecodedBlock> {
        let block = self.peek(file, count)?;
        self.commit(count);
        Ok(block)
    }

    /// Records consumed so far.
    pub fn records_consumed(&self) -> u64 {
        dispatch!(self, d => d.records_consumed())
    }

    /// Position at an absolute record index.
    pub fn skip_to(&mut self, record: u64) {
        dispatch!(self, d => d.skip_to(record))
    }

    /// Back to record 0, releasing any mapping.
    pub fn reset(&mut self) {
        dispatch!(self, d => d.reset())
    }
}
