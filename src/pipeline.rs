//! The running pipeline: assembler thread, directory monitor, ring, readers.
//!
//! ```text
//! notify / initial scan ─┐
//!                        ├─ AssemblerCommand ─▶ [rhx-assembler thread] ─▶ WindowRing ─▶ TimeSpanReader(s)
//! set_monitoring_directory┘
//! ```

use crate::assembler::{AssemblerCommand, AssemblerShared, AssemblerState, SessionLayout, WindowAssembler};
use crate::config::StreamConfig;
use crate::data::ring_buffer::{RingReader, WindowRing};
use crate::error::{AppResult, StreamError};
use crate::monitor::{self, DirectoryMonitor};
use crate::reader::TimeSpanReader;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{error, info};

/// Point-in-time pipeline counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    /// Assembler state
    pub state: AssemblerState,
    /// Samples consumed this session
    pub stored_samples: u64,
    /// Windows written to the ring since start
    pub windows_emitted: u64,
    /// Abandoned assembler iterations
    pub decode_failures: u64,
    /// Windows currently in the ring
    pub buffered_windows: usize,
    /// Samples per second of the current session
    pub sample_rate: Option<f64>,
}

/// Owns the assembler thread and the directory watch.
pub struct StreamPipeline {
    config: StreamConfig,
    ring: Arc<WindowRing>,
    shared: Arc<AssemblerShared>,
    commands: UnboundedSender<AssemblerCommand>,
    running: Arc<AtomicBool>,
    assembler_thread: Mutex<Option<JoinHandle<()>>>,
    monitor: Mutex<Option<DirectoryMonitor>>,
}

impl std::fmt::Debug for StreamPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPipeline")
            .field("running", &self.is_running())
            .field("layout", &self.shared.layout())
            .finish_non_exhaustive()
    }
}

impl StreamPipeline {
    /// Validate `config` and start the assembler thread. Nothing is monitored
    /// until [`StreamPipeline::set_monitoring_directory`] is called.
    pub fn start(config: StreamConfig) -> AppResult<Self> {
        config.validate()?;

        let ring = Arc::new(WindowRing::new(
            config.buffer.capacity,
            config.buffer.lag_threshold,
        ));
        let shared = Arc::new(AssemblerShared::default());
        let (tx, rx) = unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));

        let assembler = WindowAssembler::new(config.clone(), ring.clone(), shared.clone(), rx);
        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("rhx-assembler".to_string())
            .spawn(move || assembler.run(thread_running))?;

        info!(
            window_ms = config.acquisition.window_ms,
            capacity = config.buffer.capacity,
            lag_threshold = config.buffer.lag_threshold,
            "Started stream pipeline"
        );

        Ok(Self {
            config,
            ring,
            shared,
            commands: tx,
            running,
            assembler_thread: Mutex::new(Some(handle)),
            monitor: Mutex::new(None),
        })
    }

    /// Monitor `directory`, dropping the current session.
    ///
    /// The previous watch stops and readiness is cleared before the assembler
    /// closes any handle. Recording files already present are announced.
    ///
    /// # Errors
    /// [`StreamError::DirectoryUnavailable`] if the directory cannot be listed
    /// or watched; the previous watch is left untouched in the first case.
    pub fn set_monitoring_directory(&self, directory: impl AsRef<Path>) -> AppResult<()> {
        let directory = directory.as_ref();
        if !self.is_running() {
            return Err(StreamError::PipelineStopped);
        }
        monitor::ensure_directory(directory)?;

        let mut current = self.monitor.lock();
        current.take();
        self.shared.mark_not_ready();
        self.send(AssemblerCommand::SwitchDirectory(directory.to_path_buf()))?;

        info!(directory = %directory.display(), "Updating monitoring directory");
        let watch = DirectoryMonitor::start(directory, self.commands.clone()).map_err(|e| match e {
            StreamError::Watch(source) => StreamError::DirectoryUnavailable {
                path: directory.to_path_buf(),
                source: std::io::Error::other(source),
            },
            other => other,
        })?;
        *current = Some(watch);
        Ok(())
    }

    /// Hand a file to the assembler as if the watcher had reported it.
    pub fn announce_file(&self, path: impl AsRef<Path>) -> AppResult<()> {
        self.send(AssemblerCommand::NewFile(path.as_ref().to_path_buf()))
    }

    fn send(&self, cmd: AssemblerCommand) -> AppResult<()> {
        self.commands
            .send(cmd)
            .map_err(|_| StreamError::PipelineStopped)
    }

    /// A new time-span reader with its own cursor.
    pub fn reader(&self) -> TimeSpanReader {
        TimeSpanReader::new(
            RingReader::new(self.ring.clone()),
            self.shared.clone(),
            self.config.acquisition.window_ms,
        )
    }

    /// The window ring.
    pub fn ring(&self) -> &Arc<WindowRing> {
        &self.ring
    }

    /// Whether windows are being produced.
    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    /// Whether the assembler thread is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current session layout.
    pub fn layout(&self) -> SessionLayout {
        self.shared.layout()
    }

    /// Effective configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Current counters.
    pub fn stats(&self) -> PipelineStats {
        let layout = self.shared.layout();
        PipelineStats {
            state: layout.state,
            stored_samples: self.shared.stored_samples(),
            windows_emitted: self.shared.windows_emitted(),
            decode_failures: self.shared.decode_failures(),
            buffered_windows: self.ring.len(),
            sample_rate: layout.sample_rate,
        }
    }

    /// Stop watching, stop the assembler and join it. Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.monitor.lock().take();
        self.shared.mark_not_ready();

        if let Some(handle) = self.assembler_thread.lock().take() {
            if let Err(e) = handle.join() {
                error!("Assembler thread panicked: {:?}", e);
            }
        }

        let stats = self.stats();
        info!(
            stored_samples = stats.stored_samples,
            windows = stats.windows_emitted,
            failures = stats.decode_failures,
            "Stopped stream pipeline"
        );
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
