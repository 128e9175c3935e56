//! # RHX Stream Library
//!
//! Real-time access to a recording that an acquisition program is still
//! writing to disk in the one-file-per-channel layout: a `time.dat` timestamp
//! file, an `info.rhs` header, and `amp-*`, `stim-*` and `board-DIGITAL-IN-*`
//! data files that all grow together, one record per sample.
//!
//! ## Crate Structure
//!
//! - **`channel`**: Classifies file names into channel types.
//! - **`registry`**: Tracks open files of the current recording directory.
//! - **`decode`**: Incremental per-file decoders (seek or memory-mapped reads),
//!   including the stimulation word format.
//! - **`metadata`**: Reads the sample rate from the recording header.
//! - **`window`**: Window and time-span containers plus the staging buffers.
//! - **`assembler`**: The state machine that turns growing files into aligned,
//!   fixed-duration windows.
//! - **`data`**: The bounded window ring with latest-biased readers.
//! - **`reader`**: Exact time-span reads for consumers.
//! - **`monitor`**: Filesystem discovery of new recording files.
//! - **`pipeline`**: Wires everything together behind [`pipeline::StreamPipeline`].
//! - **`config`**, **`error`**, **`telemetry`**: Ambient configuration, the
//!   crate error type and tracing setup.

pub mod assembler;
pub mod channel;
pub mod config;
pub mod data;
pub mod decode;
pub mod error;
pub mod metadata;
pub mod monitor;
pub mod pipeline;
pub mod reader;
pub mod registry;
pub mod telemetry;
pub mod window;

pub use config::StreamConfig;
pub use error::{AppResult, StreamError};
pub use pipeline::{PipelineStats, StreamPipeline};
pub use reader::{ReadOutcome, TimeSpanReader};
