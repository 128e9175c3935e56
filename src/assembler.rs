//! Window assembler: the ingestion state machine.
//!
//! ```text
//! Idle ──directory set──▶ ReadyCheck ──required files + sample rate──▶ Assembling
//!                              ▲                                          │
//!                              └──── new data file / missing decoder ─────┘
//! ```
//!
//! The assembler owns the [`FileRegistry`], every decoder, the staging buffers
//! and `stored_samples`; nothing else touches them. Discovery events arrive as
//! [`AssemblerCommand`]s and are applied at the start of each iteration, so a
//! file is never half-registered while an iteration is decoding.
//!
//! Each `Assembling` iteration:
//! 1. `available` = size oracle sample count minus `stored_samples`
//! 2. below `min_batch_samples`: wait
//! 3. every tracked file must already hold the range, otherwise wait
//! 4. peek `available` records from every decoder; any failure abandons the
//!    iteration with no cursor moved
//! 5. commit every cursor, advance `stored_samples`, stage, and cut complete
//!    windows into the ring

use crate::channel::ChannelType;
use crate::config::{SizeOracle, StreamConfig};
use crate::data::ring_buffer::WindowRing;
use crate::decode::{ChannelDecoder, DecodedBlock, DecoderParams};
use crate::metadata::RecordingInfo;
use crate::registry::{FileRegistry, TrackedFile};
use crate::window::{StagingBuffers, WindowShape};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};
use tracing::{debug, info, warn};

/// How often a stalled readiness check is reported.
const READY_WARN_INTERVAL: Duration = Duration::from_secs(5);

const DATA_TYPES: [ChannelType; 3] = [
    ChannelType::Amplifier,
    ChannelType::Stimulation,
    ChannelType::DigitalInput,
];

/// Assembler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AssemblerState {
    /// No directory assigned
    #[default]
    Idle,
    /// Waiting for the required files and the sample rate
    ReadyCheck,
    /// Producing windows
    Assembling,
}

/// Discovery events, applied by the assembler at a safe point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblerCommand {
    /// Close everything and monitor the path; later files outside it are ignored
    SwitchDirectory(PathBuf),
    /// A file appeared
    NewFile(PathBuf),
}

/// What the assembler published about the current session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionLayout {
    /// State at last publish
    pub state: AssemblerState,
    /// Directory files are read from
    pub directory: Option<PathBuf>,
    /// Samples per second, once known
    pub sample_rate: Option<f64>,
    /// Samples per window, 0 before the first ready transition
    pub samples_per_window: usize,
    /// Channel counts of emitted windows
    pub shape: WindowShape,
}

/// State shared between the assembler thread and its observers.
#[derive(Debug, Default)]
pub struct AssemblerShared {
    ready: AtomicBool,
    stored_samples: AtomicU64,
    windows_emitted: AtomicU64,
    decode_failures: AtomicU64,
    layout: RwLock<SessionLayout>,
}

impl AssemblerShared {
    /// Whether the assembler is currently producing windows.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Clear the readiness flag. Callers do this before any handle may close.
    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Samples consumed this session.
    pub fn stored_samples(&self) -> u64 {
        self.stored_samples.load(Ordering::SeqCst)
    }

    /// Windows written to the ring since start.
    pub fn windows_emitted(&self) -> u64 {
        self.windows_emitted.load(Ordering::SeqCst)
    }

    /// Abandoned iterations since start.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::SeqCst)
    }

    /// Copy of the published layout.
    pub fn layout(&self) -> SessionLayout {
        self.layout.read().clone()
    }

    pub(crate) fn update_layout(&self, update: impl FnOnce(&mut SessionLayout)) {
        update(&mut self.layout.write());
    }
}

/// Result of one [`WindowAssembler::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No directory yet
    Idle,
    /// Required files or sample rate missing
    NotReady,
    /// Just transitioned to assembling
    Ready,
    /// Fewer than the minimum batch of new samples
    Starved,
    /// The oracle reports data some file does not hold yet
    Lagging,
    /// Decode failed; nothing was consumed
    Failed,
    /// Samples consumed; this many windows were emitted
    Progress(usize),
}

/// The ingestion state machine. Drive it with [`WindowAssembler::run`] on a
/// dedicated thread, or call [`WindowAssembler::step`] directly.
pub struct WindowAssembler {
    config: StreamConfig,
    registry: FileRegistry,
    monitored_root: Option<PathBuf>,
    decoders: HashMap<PathBuf, ChannelDecoder>,
    staging: StagingBuffers,
    stored_samples: u64,
    samples_per_window: usize,
    sample_rate: Option<f64>,
    state: AssemblerState,
    ring: Arc<WindowRing>,
    shared: Arc<AssemblerShared>,
    commands: UnboundedReceiver<AssemblerCommand>,
    last_ready_warning: Instant,
}

impl WindowAssembler {
    /// New assembler in `Idle`.
    pub fn new(
        config: StreamConfig,
        ring: Arc<WindowRing>,
        shared: Arc<AssemblerShared>,
        commands: UnboundedReceiver<AssemblerCommand>,
    ) -> Self {
        Self {
            config,
            registry: FileRegistry::default(),
            monitored_root: None,
            decoders: HashMap::new(),
            staging: StagingBuffers::default(),
            stored_samples: 0,
            samples_per_window: 0,
            sample_rate: None,
            state: AssemblerState::Idle,
            ring,
            shared,
            commands,
            last_ready_warning: Instant::now(),
        }
    }

    /// Current state.
    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Samples consumed this session.
    pub fn stored_samples(&self) -> u64 {
        self.stored_samples
    }

    /// Samples staged but not yet part of a window.
    pub fn staged_samples(&self) -> usize {
        self.staging.len()
    }

    /// Read access to the tracked files.
    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    /// Loop until `running` clears, sleeping with bounded backoff when idle.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        let poll = Duration::from_millis(self.config.acquisition.poll_interval_ms);
        let ready_check = Duration::from_millis(self.config.acquisition.ready_check_interval_ms);
        info!("Assembler started");

        while running.load(Ordering::SeqCst) {
            let pause = match self.step() {
                Step::Idle | Step::NotReady => ready_check,
                Step::Starved | Step::Lagging | Step::Failed => poll,
                Step::Ready | Step::Progress(_) => Duration::ZERO,
            };
            if !pause.is_zero() {
                thread::sleep(pause);
            }
        }

        self.shared.mark_not_ready();
        let closed = self.registry.close_all();
        info!(
            closed,
            stored_samples = self.stored_samples,
            "Assembler stopped"
        );
    }

    /// Apply pending commands, then advance the state machine once.
    pub fn step(&mut self) -> Step {
        self.drain_commands();

        match self.state {
            AssemblerState::Idle => {
                if self.registry.current_directory().is_some() {
                    self.enter_ready_check();
                    self.check_ready()
                } else {
                    Step::Idle
                }
            }
            AssemblerState::ReadyCheck => self.check_ready(),
            AssemblerState::Assembling => {
                let step = self.assemble_once();
                if step == Step::NotReady {
                    self.enter_ready_check();
                }
                step
            }
        }
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn handle_command(&mut self, cmd: AssemblerCommand) {
        match cmd {
            AssemblerCommand::SwitchDirectory(dir) => {
                self.monitored_root = Some(dir.clone());
                self.reset_session(dir);
            }
            AssemblerCommand::NewFile(path) => self.add_file(&path),
        }
    }

    fn add_file(&mut self, path: &Path) {
        let Some(parent) = path.parent() else {
            return;
        };
        // a watcher being torn down can still deliver events from the old tree
        if let Some(root) = &self.monitored_root {
            if !path.starts_with(root) {
                debug!(path = %path.display(), root = %root.display(), "Ignoring file outside monitored directory");
                return;
            }
        }
        if self.registry.current_directory() != Some(parent) {
            self.reset_session(parent.to_path_buf());
        }

        let Some(reg) = self.registry.process_new_file(path) else {
            return;
        };
        if !reg.newly_added {
            return;
        }
        let channel_type = reg.file.channel_type();
        let channel_index = reg.channel_index;

        match channel_type {
            ChannelType::Metadata => {
                self.try_read_sample_rate();
            }
            ChannelType::Timestamp if channel_index > 1 => {
                warn!(path = %path.display(), "Additional timestamp file ignored");
            }
            _ if self.state == AssemblerState::Assembling => {
                info!(kind = %channel_type, index = channel_index, "Data file joined, rechecking readiness");
                self.enter_ready_check();
            }
            _ => {}
        }
    }

    /// Close every file and forget the session. The readiness flag is cleared
    /// before any handle is closed.
    fn reset_session(&mut self, directory: PathBuf) {
        self.shared.mark_not_ready();
        self.registry.switch_directory(directory);
        self.decoders.clear();
        self.staging = StagingBuffers::default();
        self.stored_samples = 0;
        self.shared.stored_samples.store(0, Ordering::SeqCst);
        self.sample_rate = None;
        self.samples_per_window = 0;
        self.ring.clear();
        self.enter_ready_check();
    }

    fn enter_ready_check(&mut self) {
        self.shared.mark_not_ready();
        self.state = AssemblerState::ReadyCheck;
        self.last_ready_warning = Instant::now();
        self.publish_layout();
    }

    fn warn_not_ready(&mut self, reason: &str) {
        if self.last_ready_warning.elapsed() >= READY_WARN_INTERVAL {
            warn!(reason, "Still waiting to start assembling");
            self.last_ready_warning = Instant::now();
        } else {
            debug!(reason, "Not ready");
        }
    }

    fn try_read_sample_rate(&mut self) -> bool {
        if self.sample_rate.is_some() {
            return true;
        }
        let Some(meta) = self.registry.get_by_type(ChannelType::Metadata).first() else {
            self.warn_not_ready("no metadata file");
            return false;
        };
        match RecordingInfo::read_from(meta.handle(), meta.path()) {
            Ok(info) => {
                info!(sample_rate = info.sample_rate, "Read sample rate");
                self.sample_rate = Some(info.sample_rate);
                true
            }
            Err(e) => {
                let reason = format!("metadata unreadable: {e}");
                self.warn_not_ready(&reason);
                false
            }
        }
    }

    fn required_shape(&self) -> Result<WindowShape, &'static str> {
        let acq = &self.config.acquisition;
        let count = |ty| self.registry.count_by_type(ty);

        if count(ChannelType::Timestamp) == 0 {
            return Err("no timestamp file");
        }
        if count(ChannelType::Amplifier) < acq.min_amplifier_files {
            return Err("too few amplifier files");
        }
        if acq.require_stimulation && count(ChannelType::Stimulation) == 0 {
            return Err("no stimulation file");
        }
        if acq.require_digital_input && count(ChannelType::DigitalInput) == 0 {
            return Err("no digital-input file");
        }
        Ok(WindowShape {
            amplifier: count(ChannelType::Amplifier),
            stimulation: count(ChannelType::Stimulation),
            digital_input: count(ChannelType::DigitalInput),
        })
    }

    fn check_ready(&mut self) -> Step {
        let shape = match self.required_shape() {
            Ok(shape) => shape,
            Err(reason) => {
                self.warn_not_ready(reason);
                return Step::NotReady;
            }
        };
        if !self.try_read_sample_rate() {
            return Step::NotReady;
        }
        let Some(sample_rate) = self.sample_rate else {
            return Step::NotReady;
        };

        let window_ms = self.config.acquisition.window_ms as f64;
        let samples_per_window = (sample_rate * window_ms / 1000.0).round() as usize;
        if samples_per_window == 0 {
            self.warn_not_ready("window shorter than one sample");
            return Step::NotReady;
        }

        let params = DecoderParams::from_config(&self.config, sample_rate);
        let stored = self.stored_samples;
        let timestamp = self.registry.get_by_type(ChannelType::Timestamp).first();
        let data = DATA_TYPES
            .iter()
            .flat_map(|&ty| self.registry.get_by_type(ty).iter());
        for file in timestamp.into_iter().chain(data) {
            if !self.decoders.contains_key(file.path()) {
                if let Some(mut decoder) = ChannelDecoder::for_type(file.channel_type(), &params) {
                    decoder.skip_to(stored);
                    self.decoders.insert(file.path().to_path_buf(), decoder);
                }
            }
        }

        self.samples_per_window = samples_per_window;
        self.staging.reinit(shape, stored);
        self.state = AssemblerState::Assembling;
        self.publish_layout();
        self.shared.ready.store(true, Ordering::SeqCst);

        info!(
            sample_rate,
            samples_per_window,
            amplifier = shape.amplifier,
            stimulation = shape.stimulation,
            digital_input = shape.digital_input,
            stored_samples = stored,
            "Assembling"
        );
        Step::Ready
    }

    fn available_total(&self, timestamp: &TrackedFile, files: &[&TrackedFile]) -> std::io::Result<u64> {
        match self.config.acquisition.size_oracle {
            SizeOracle::Timestamp => Ok(timestamp.len()? / 4),
            SizeOracle::Minimum => {
                let mut min = u64::MAX;
                for file in files {
                    let width = file.channel_type().record_bytes().unwrap_or(1) as u64;
                    min = min.min(file.len()? / width);
                }
                Ok(min)
            }
        }
    }

    fn assemble_once(&mut self) -> Step {
        let Some(timestamp) = self.registry.get_by_type(ChannelType::Timestamp).first() else {
            return Step::NotReady;
        };
        let files: Vec<&TrackedFile> = std::iter::once(timestamp)
            .chain(
                DATA_TYPES
                    .iter()
                    .flat_map(|&ty| self.registry.get_by_type(ty).iter()),
            )
            .collect();

        let total = match self.available_total(timestamp, &files) {
            Ok(total) => total,
            Err(e) => {
                self.shared.decode_failures.fetch_add(1, Ordering::SeqCst);
                warn!(error = %e, "Failed to stat recording files");
                return Step::Failed;
            }
        };
        let available = total.saturating_sub(self.stored_samples);
        if available < self.config.acquisition.min_batch_samples.max(1) {
            return Step::Starved;
        }
        let end = self.stored_samples + available;

        for file in &files {
            let width = file.channel_type().record_bytes().unwrap_or(1) as u64;
            match file.len() {
                Ok(len) if len / width >= end => {}
                Ok(len) => {
                    debug!(file = file.basename(), records = len / width, needed = end, "File lagging");
                    return Step::Lagging;
                }
                Err(e) => {
                    self.shared.decode_failures.fetch_add(1, Ordering::SeqCst);
                    warn!(file = file.basename(), error = %e, "Failed to stat recording file");
                    return Step::Failed;
                }
            }
        }

        let count = available as usize;
        let mut blocks = Vec::with_capacity(files.len());
        for file in &files {
            let Some(decoder) = self.decoders.get_mut(file.path()) else {
                return Step::NotReady;
            };
            match decoder.peek(file, count) {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    self.shared.decode_failures.fetch_add(1, Ordering::SeqCst);
                    warn!(file = file.basename(), error = %e, "Decode failed, retrying");
                    return Step::Failed;
                }
            }
        }
        for file in &files {
            if let Some(decoder) = self.decoders.get_mut(file.path()) {
                decoder.commit(count);
            }
        }

        let mut blocks = blocks.into_iter();
        let Some(DecodedBlock::Timestamp(timestamps)) = blocks.next() else {
            return Step::Failed;
        };
        self.stored_samples = end;
        self.shared.stored_samples.store(end, Ordering::SeqCst);
        self.staging.append(timestamps, blocks.collect());

        let windows = self.staging.drain_windows(self.samples_per_window);
        let emitted = windows.len();
        for window in windows {
            self.ring.write(window);
        }
        if emitted > 0 {
            self.shared
                .windows_emitted
                .fetch_add(emitted as u64, Ordering::SeqCst);
            debug!(
                windows = emitted,
                stored_samples = self.stored_samples,
                staged = self.staging.len(),
                "Emitted windows"
            );
        }
        Step::Progress(emitted)
    }

    fn publish_layout(&self) {
        self.shared.update_layout(|layout| {
            layout.state = self.state;
            layout.directory = self.registry.current_directory().map(Path::to_path_buf);
            layout.sample_rate = self.sample_rate;
            layout.samples_per_window = self.samples_per_window;
            layout.shape = self.staging.shape();
        });
    }
}
