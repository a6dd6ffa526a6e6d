//! # Track Analysis
//!
//! The two analysis passes and the estimators they are built from.
//!
//! - [`FastScanAnalyzer`] produces a complete [`FastResult`] from one read
//!   of the buffer: tempo, key, energy, loudness, cue points and the
//!   heuristic descriptors.
//! - [`DeepScanAnalyzer`] refines a fast result with a full-resolution
//!   trajectory, a deeper key scan, spectral heuristics, phrase markers,
//!   tempo drift and transition difficulty.
//!
//! ## Usage
//!
//! ```rust
//! use dj_analyzer::analysis::{DeepScanAnalyzer, FastScanAnalyzer};
//! use dj_analyzer::audio::SampleBuffer;
//! use dj_analyzer::rules::{AnalyzerSettings, GenreRules};
//!
//! let samples: Vec<f32> = (0..22050 * 12)
//!     .map(|i| if i % 11025 < 800 { 0.8 } else { 0.02 })
//!     .collect();
//! let buffer = SampleBuffer::mono(22050, samples);
//! let settings = AnalyzerSettings::default();
//! let rules = GenreRules::default();
//!
//! let fast = FastScanAnalyzer::analyze(&buffer, &settings, &rules);
//! assert!(fast.analyzed);
//!
//! let deep = DeepScanAnalyzer::analyze(&buffer, &fast, &settings, &rules);
//! assert_eq!(deep.base.bpm, fast.bpm);
//! ```

pub mod cue;
pub mod deep;
pub mod energy;
pub mod fast;
pub mod heuristics;
pub mod key;
pub mod phrase;
pub mod result;
pub mod tempo;
pub mod transition;

pub use cue::{CueOptions, CuePoints};
pub use deep::DeepScanAnalyzer;
pub use energy::{TrajectoryProfile, TrajectoryShape};
pub use fast::FastScanAnalyzer;
pub use key::{KeyEstimate, KeyEstimator, ScanMode};
pub use result::{AnalysisStatus, BpmDrift, Candidate, DeepResult, FastResult, PhraseMarker};
pub use tempo::{TempoEstimate, TempoEstimator};
pub use transition::TransitionAssessment;
