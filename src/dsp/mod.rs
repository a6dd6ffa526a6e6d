//! # Numeric Primitives
//!
//! Envelope extraction, peak picking, interval histograms, FFT spectra and
//! the handful of statistics the estimators share.

pub mod envelope;
pub mod format;
pub mod spectrum;
pub mod stats;

pub use envelope::EnvelopeLayout;
pub use format::{format_cue_time, format_time};
pub use spectrum::{SpectralSummary, SpectrumAnalyzer};
