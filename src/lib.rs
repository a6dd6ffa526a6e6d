//! # DJ Analyzer
//!
//! Two-pass audio feature extraction for DJ libraries.
//!
//! A fast pass gives a usable result within a second or two: tempo, key,
//! energy, loudness, cue points and a handful of 0-100 descriptors. A deep
//! pass then refines it in the background with phrase markers, tempo drift,
//! transition difficulty and spectrally informed descriptors.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dj_analyzer::{
//!     AnalysisCoordinator, AnalysisEvent, ConfigStore, CoordinatorConfig, FileBufferLoader, GenreRuleSet,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let coordinator = AnalysisCoordinator::new(
//!     Arc::new(FileBufferLoader::new()),
//!     Arc::new(ConfigStore::in_memory()),
//!     Arc::new(GenreRuleSet::builtin()?),
//!     CoordinatorConfig::default(),
//! );
//!
//! coordinator.subscribe("set/opener.flac", |event| {
//!     if let AnalysisEvent::DeepDone { result, .. } = event {
//!         println!("phrases every {} bars", result.phrase_length);
//!     }
//! });
//! coordinator.submit_fast("set/opener.flac", Some("Deep House")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`coordinator`] - Runs both passes per track and notifies subscribers
//! - [`analysis`] - Fast and deep analyzers and their estimators
//! - [`rules`] - Genre rules, analyzer settings and their persistence
//! - [`audio`] - Sample buffers and loaders
//! - [`dsp`] - Envelopes, spectra and shared statistics
//! - [`config`] - Application configuration
//!
//! ## Custom Loaders
//!
//! Tracks can come from anywhere by implementing [`BufferLoader`]:
//!
//! ```rust
//! use dj_analyzer::{BufferLoader, SampleBuffer};
//! use dj_analyzer::error::AudioError;
//!
//! struct Silence;
//!
//! impl BufferLoader for Silence {
//!     fn load(&self, _track_id: &str) -> Result<SampleBuffer, AudioError> {
//!         Ok(SampleBuffer::mono(44100, vec![0.0; 44100 * 30]))
//!     }
//! }
//! ```

pub mod analysis;
pub mod audio;
pub mod config;
pub mod coordinator;
pub mod dsp;
pub mod error;
pub mod rules;

// Re-export commonly used types for convenience
pub use crate::{
    analysis::{DeepResult, DeepScanAnalyzer, FastResult, FastScanAnalyzer},
    audio::{BufferLoader, FileBufferLoader, MemoryBufferLoader, SampleBuffer},
    config::Config,
    coordinator::{AnalysisCoordinator, AnalysisEvent, AnalysisRequest, CoordinatorConfig, FastOutcome},
    error::{AnalyzerError, Result},
    rules::{AnalyzerSettings, ConfigStore, GenreRuleSet, GenreRules},
};
