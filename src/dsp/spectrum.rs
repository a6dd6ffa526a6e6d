//! Short-time magnitude spectra on top of `realfft`.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use crate::error::AnalysisError;

/// Hann window coefficients of length `n`
pub fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (n - 1) as f32).cos()))
        .collect()
}

/// Reusable forward FFT of a fixed frame size with a Hann window
///
/// One instance owns its scratch buffers, so give each thread its own.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    output: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(frame_size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(frame_size);
        let input = fft.make_input_vec();
        let output = fft.make_output_vec();
        Self {
            fft,
            window: hann_window(frame_size),
            input,
            output,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.window.len()
    }

    /// Hz covered by one output bin at `sample_rate`
    pub fn bin_width(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 / self.frame_size() as f64
    }

    /// Window `frame` and return its magnitude spectrum (`frame_size / 2 + 1` bins)
    ///
    /// Frames shorter than the FFT size are zero-padded.
    pub fn magnitudes(&mut self, frame: &[f32]) -> Result<Vec<f32>, AnalysisError> {
        for (i, slot) in self.input.iter_mut().enumerate() {
            *slot = frame.get(i).copied().unwrap_or(0.0) * self.window[i];
        }

        self.fft
            .process(&mut self.input, &mut self.output)
            .map_err(|e| AnalysisError::FftFailed { reason: e.to_string() })?;

        Ok(self.output.iter().map(|c| c.norm()).collect())
    }
}

/// Averaged spectral statistics used by the deep heuristics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralSummary {
    /// Mean spectral flatness (0 = tonal, 1 = noise-like)
    pub flatness: f64,

    /// Mean share of energy in the 300-3000 Hz vocal band
    pub vocal_ratio: f64,
}

impl Default for SpectralSummary {
    fn default() -> Self {
        Self {
            flatness: 0.5,
            vocal_ratio: 0.5,
        }
    }
}

const VOCAL_LOW_HZ: f64 = 300.0;
const VOCAL_HIGH_HZ: f64 = 3000.0;

/// Flatness and vocal-band ratio of one magnitude spectrum
fn frame_statistics(magnitudes: &[f32], bin_width: f64) -> (f64, f64) {
    const EPS: f64 = 1e-12;
    // Skip the Nyquist bin to mirror a half-spectrum of frame_size / 2 bins
    let bins = &magnitudes[..magnitudes.len().saturating_sub(1).max(1)];

    let mut log_sum = 0.0;
    let mut arith = 0.0;
    let mut vocal = 0.0;
    let mut total = 0.0;

    for (k, &mag) in bins.iter().enumerate() {
        let mag = mag as f64 + EPS;
        let energy = mag * mag;
        total += energy;
        arith += mag;
        log_sum += mag.ln();
        let freq = k as f64 * bin_width;
        if (VOCAL_LOW_HZ..=VOCAL_HIGH_HZ).contains(&freq) {
            vocal += energy;
        }
    }

    let n = bins.len() as f64;
    let geometric = (log_sum / n).exp();
    let flatness = (geometric / (arith / n + EPS)).clamp(0.0, 1.0);
    let vocal_ratio = if total > 0.0 { (vocal / total).clamp(0.0, 1.0) } else { 0.0 };
    (flatness, vocal_ratio)
}

/// Frame the signal and average flatness and vocal-band ratio across frames
///
/// At most `max_frames` frames are taken, spread evenly over the signal.
pub fn spectral_summary(
    samples: &[f32],
    sample_rate: u32,
    frame_size: usize,
    max_frames: usize,
) -> Result<SpectralSummary, AnalysisError> {
    if samples.is_empty() || sample_rate == 0 {
        return Err(AnalysisError::InsufficientData {
            what: "spectral summary".to_string(),
            details: "empty signal".to_string(),
        });
    }

    let mut analyzer = SpectrumAnalyzer::new(frame_size);
    let bin_width = analyzer.bin_width(sample_rate);

    let available = if samples.len() >= frame_size {
        (samples.len() - frame_size) / (frame_size / 2).max(1) + 1
    } else {
        1
    };
    let frames = available.min(max_frames.max(1));
    let stride = if frames > 1 {
        (samples.len().saturating_sub(frame_size)) / (frames - 1)
    } else {
        0
    };

    let mut flatness_sum = 0.0;
    let mut vocal_sum = 0.0;
    for f in 0..frames {
        let start = f * stride;
        let end = (start + frame_size).min(samples.len());
        let magnitudes = analyzer.magnitudes(&samples[start..end])?;
        let (flatness, vocal) = frame_statistics(&magnitudes, bin_width);
        flatness_sum += flatness;
        vocal_sum += vocal;
    }

    Ok(SpectralSummary {
        flatness: flatness_sum / frames as f64,
        vocal_ratio: vocal_sum / frames as f64,
    })
}
