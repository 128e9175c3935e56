//! Configuration System using Figment
//!
//! Configuration is layered, later layers overriding earlier ones:
//! 1. Built-in defaults ([`StreamConfig::default`])
//! 2. A TOML file (`config/rhx_stream.toml` unless a path is given)
//! 3. Environment variables prefixed with `RHX_STREAM_`, nested with `__`
//!    (e.g. `RHX_STREAM_BUFFER__CAPACITY=40`)
//!
//! # Example
//! ```no_run
//! use rhx_stream::config::StreamConfig;
//!
//! let config = StreamConfig::load()?;
//! println!("window: {} ms", config.acquisition.window_ms);
//! # Ok::<(), rhx_stream::error::StreamError>(())
//! ```

use crate::error::{AppResult, StreamError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// OS allocation granularity that mapped windows are aligned to.
pub const MAP_ALIGNMENT: u64 = 64 * 1024;

const DEFAULT_CONFIG_PATH: &str = "config/rhx_stream.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Window assembly and readiness settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Ring buffer settings
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Decoder I/O strategy
    #[serde(default)]
    pub decoder: DecoderConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "rhx-stream".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// How the assembler decides how many new samples are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeOracle {
    /// Timestamp file length alone.
    Timestamp,
    /// Minimum across every tracked data file.
    Minimum,
}

/// Window assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Duration of one window in milliseconds
    pub window_ms: u64,
    /// Fewer new samples than this and the assembler waits
    pub min_batch_samples: u64,
    /// Sleep between assembling iterations with no work
    pub poll_interval_ms: u64,
    /// Sleep while waiting for the required channel set
    pub ready_check_interval_ms: u64,
    /// Microvolts per amplifier LSB
    pub amplifier_scale: f64,
    /// Stimulation current per magnitude step
    pub stim_step_size: f64,
    /// Amplifier files required before assembling starts
    pub min_amplifier_files: usize,
    /// Whether at least one stimulation file is required
    pub require_stimulation: bool,
    /// Whether at least one digital-input file is required
    pub require_digital_input: bool,
    /// Source of the available-sample count
    pub size_oracle: SizeOracle,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            window_ms: 100,
            min_batch_samples: 1000,
            poll_interval_ms: 10,
            ready_check_interval_ms: 100,
            amplifier_scale: 0.195,
            stim_step_size: 10.0,
            min_amplifier_files: 1,
            require_stimulation: false,
            require_digital_input: false,
            size_oracle: SizeOracle::Timestamp,
        }
    }
}

/// Ring buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Number of windows retained
    pub capacity: usize,
    /// Windows a reader may fall behind before it is snapped to the newest
    pub lag_threshold: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            lag_threshold: 5,
        }
    }
}

/// Byte access strategy for the incremental decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeStrategy {
    /// Sliding memory-mapped window
    Mmap,
    /// Plain seek + read
    Seek,
}

/// Decoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Byte access strategy
    pub strategy: DecodeStrategy,
    /// Minimum size of a mapped window in bytes, clipped to the file length;
    /// saves remaps only while the file holds data past the read cursor
    pub map_window_bytes: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            strategy: DecodeStrategy::Mmap,
            map_window_bytes: 64 * 1024 * 1024,
        }
    }
}

impl StreamConfig {
    /// Load configuration from `config/rhx_stream.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RHX_STREAM_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(StreamError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(StreamError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let acq = &self.acquisition;
        if acq.window_ms == 0 {
            return Err(StreamError::Configuration(
                "window_ms must be greater than 0".into(),
            ));
        }
        if acq.poll_interval_ms == 0 || acq.ready_check_interval_ms == 0 {
            return Err(StreamError::Configuration(
                "poll intervals must be greater than 0".into(),
            ));
        }
        if !(acq.amplifier_scale.is_finite() && acq.amplifier_scale > 0.0) {
            return Err(StreamError::Configuration(format!(
                "Invalid amplifier_scale {}",
                acq.amplifier_scale
            )));
        }
        if !(acq.stim_step_size.is_finite() && acq.stim_step_size > 0.0) {
            return Err(StreamError::Configuration(format!(
                "Invalid stim_step_size {}",
                acq.stim_step_size
            )));
        }

        if self.buffer.capacity == 0 {
            return Err(StreamError::Configuration(
                "buffer capacity must be greater than 0".into(),
            ));
        }

        if self.decoder.map_window_bytes < MAP_ALIGNMENT {
            return Err(StreamError::Configuration(format!(
                "map_window_bytes {} is below the {} byte mapping granularity",
                self.decoder.map_window_bytes, MAP_ALIGNMENT
            )));
        }

        Ok(())
    }
}
