//! # Audio Buffers
//!
//! Decoded sample buffers and the loader port the coordinator uses to obtain
//! them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dj_analyzer::audio::{BufferLoader, FileBufferLoader};
//!
//! let loader = FileBufferLoader::new();
//! let buffer = loader.load("song.wav")?;
//! println!("{:.1}s at {} Hz", buffer.computed_duration(), buffer.sample_rate);
//! # Ok::<(), dj_analyzer::error::AudioError>(())
//! ```

pub mod loader;
pub mod types;

pub use loader::{BufferLoader, FileBufferLoader, MemoryBufferLoader};
pub use types::{SampleBuffer, MIN_ANALYSIS_DURATION};
