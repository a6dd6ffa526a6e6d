//! Scalar energy, loudness and energy trajectories.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    dsp::{
        envelope::{self, EnvelopeLayout},
        stats,
    },
    error::AnalysisError,
    rules::{AnalyzerSettings, EnergyRules},
};

const MAX_ENERGY_POINTS: usize = 5000;
/// Contiguous excerpts making up the energy subsample
const ENERGY_EXCERPTS: usize = 10;
/// Level spread (dB) at which the dynamics score reaches zero
const DYNAMIC_RANGE_SPAN_DB: f64 = 30.0;
const MAX_TRAJECTORY_POINTS: usize = 2000;
/// Lowpass cutoff of the bass-share measurement
const BASS_CUTOFF_HZ: f64 = 150.0;
const LUFS_FLOOR: f64 = -30.0;
/// Windows more than 10 dB below the mean power are left out of integrated loudness
const RELATIVE_GATE: f64 = 0.1;
const LUFS_SPAN: f64 = 24.0;

pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Integer 0-100 loudness from whole-signal RMS
pub fn rms_loudness(mono: &[f32]) -> u8 {
    rms_to_level(rms(mono))
}

fn rms_to_level(rms: f64) -> u8 {
    stats::score(rms * 300.0)
}

/// Suggested gain to bring `loudness` to `target`, e.g. `"+2dB"`
pub fn gain_recommendation(loudness: u8, target: f64) -> String {
    if loudness == 0 {
        return "+0dB".to_string();
    }

    let adjustment = ((target - loudness as f64) / 10.0 * 2.0).round() as i64;
    match adjustment {
        a if a > 0 => format!("+{}dB", a),
        a if a < 0 => format!("{}dB", a),
        _ => "0dB".to_string(),
    }
}

/// LUFS-like value from an RMS level, linear over [-30, -6]
pub fn lufs_from_rms(rms: f64) -> f64 {
    let level = rms_to_level(rms) as f64;
    ((LUFS_FLOOR + LUFS_SPAN * level / 100.0) * 10.0).round() / 10.0
}

/// LUFS-like integrated loudness of an RMS envelope
///
/// Averages window power after dropping windows 10 dB below the mean, so
/// silent intros and breaks do not pull the value down. `None` when the
/// envelope is empty or silent.
pub fn integrated_lufs(envelope: &[f32]) -> Option<f64> {
    if envelope.is_empty() {
        return None;
    }
    let powers: Vec<f64> = envelope.iter().map(|&v| (v as f64) * (v as f64)).collect();
    let mean_power = powers.iter().sum::<f64>() / powers.len() as f64;
    if mean_power <= 0.0 {
        return None;
    }

    let gate = mean_power * RELATIVE_GATE;
    let (sum, count) = powers
        .iter()
        .filter(|&&p| p >= gate)
        .fold((0.0, 0usize), |(sum, count), &p| (sum + p, count + 1));
    if count == 0 {
        return None;
    }
    Some(lufs_from_rms((sum / count as f64).sqrt()))
}

/// Spread of the LUFS-mapped envelope (max - min), one decimal
pub fn loudness_range(envelope: &[f32]) -> f64 {
    if envelope.is_empty() {
        return 0.0;
    }

    let (min, max) = envelope
        .iter()
        .map(|&v| lufs_from_rms(v as f64))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    ((max - min) * 10.0).round() / 10.0
}

/// Overall energy score, 0-100
///
/// A weighted blend of loudness, onset density, brightness, bass share and
/// dynamic range, scaled and capped by settings and genre rules. Brightness
/// and bass are measured on a subsample of at most 5000 points.
pub fn scalar_energy(
    mono: &[f32],
    sample_rate: u32,
    settings: &AnalyzerSettings,
    rules: &EnergyRules,
) -> u8 {
    if mono.is_empty() || sample_rate == 0 {
        return 0;
    }

    let block = mono.len().div_ceil(MAX_ENERGY_POINTS).max(1);
    let blocks: Vec<f32> = mono.chunks(block).map(|chunk| rms(chunk) as f32).collect();

    let rms_score = (rms(mono) * 3.0).min(1.0);
    let onset_score = onset_density(&blocks, settings.onset_sensitivity);
    let excerpts = subsample(mono);
    let brightness_score = mean_over(&excerpts, brightness);
    let bass_score = mean_over(&excerpts, |excerpt| bass_ratio(excerpt, sample_rate));
    let dynamics_score = dynamics(&blocks);

    let blended = rules.rms_weight * rms_score
        + rules.onset_weight * onset_score
        + rules.brightness_weight * brightness_score
        + rules.bass_weight * bass_score
        + rules.dynamics_weight * dynamics_score;

    let cap = settings.energy_max_cap.min(rules.cap);
    let energy = (blended * 100.0 * settings.energy_scaling_factor * rules.scale).min(cap);

    tracing::debug!(
        rms = rms_score,
        onsets = onset_score,
        brightness = brightness_score,
        bass = bass_score,
        dynamics = dynamics_score,
        energy,
        "Scalar energy"
    );
    stats::score(energy)
}

/// Share of block-to-block rises larger than a fraction of the mean level
fn onset_density(blocks: &[f32], sensitivity: f64) -> f64 {
    if blocks.len() < 2 {
        return 0.0;
    }
    let mean = stats::mean(blocks);
    if mean <= 0.0 {
        return 0.0;
    }

    let jump = mean * sensitivity.max(0.01);
    let rises = blocks
        .windows(2)
        .filter(|pair| (pair[1] - pair[0]) as f64 > jump)
        .count();
    // A rise in a quarter of the blocks already counts as dense
    (rises as f64 / (blocks.len() - 1) as f64 * 4.0).min(1.0)
}

/// Evenly spread contiguous excerpts, at most `MAX_ENERGY_POINTS` samples in total
fn subsample(mono: &[f32]) -> Vec<&[f32]> {
    if mono.len() <= MAX_ENERGY_POINTS {
        return vec![mono];
    }

    let len = MAX_ENERGY_POINTS / ENERGY_EXCERPTS;
    let stride = (mono.len() - len) / (ENERGY_EXCERPTS - 1);
    (0..ENERGY_EXCERPTS)
        .map(|i| &mono[i * stride..i * stride + len])
        .collect()
}

fn mean_over(excerpts: &[&[f32]], measure: impl Fn(&[f32]) -> f64) -> f64 {
    if excerpts.is_empty() {
        return 0.0;
    }
    excerpts.iter().map(|excerpt| measure(excerpt)).sum::<f64>() / excerpts.len() as f64
}

/// Mean absolute first difference relative to the mean absolute level
fn brightness(mono: &[f32]) -> f64 {
    let level: f64 = mono.iter().map(|&s| s.abs() as f64).sum::<f64>() / mono.len() as f64;
    if level <= 0.0 || mono.len() < 2 {
        return 0.0;
    }
    let diff: f64 = mono
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).abs() as f64)
        .sum::<f64>()
        / (mono.len() - 1) as f64;
    (diff / (2.0 * level)).clamp(0.0, 1.0)
}

/// Energy share below the bass cutoff, via a moving-average lowpass
fn bass_ratio(mono: &[f32], sample_rate: u32) -> f64 {
    let width = ((sample_rate as f64 / BASS_CUTOFF_HZ).round() as usize).max(1);
    let mut running = 0.0f64;
    let mut low_energy = 0.0f64;
    let mut total_energy = 0.0f64;

    for (i, &sample) in mono.iter().enumerate() {
        running += sample as f64;
        if i >= width {
            running -= mono[i - width] as f64;
        }
        let low = running / width.min(i + 1) as f64;
        low_energy += low * low;
        total_energy += (sample as f64) * (sample as f64);
    }

    if total_energy <= 0.0 {
        return 0.0;
    }
    (low_energy / total_energy).clamp(0.0, 1.0)
}

/// Level spread between loud (95th percentile) and quiet (10th) blocks, in dB
///
/// Infinite when the quiet blocks are silent; zero for silence throughout.
pub fn dynamic_range_db(blocks: &[f32]) -> f64 {
    let loud = stats::percentile(blocks, 95.0);
    if loud <= 0.0 {
        return 0.0;
    }
    let quiet = stats::percentile(blocks, 10.0);
    if quiet <= 0.0 {
        return f64::INFINITY;
    }
    20.0 * (loud / quiet).log10()
}

/// High when the level is sustained, low when it swings widely
fn dynamics(blocks: &[f32]) -> f64 {
    if stats::percentile(blocks, 95.0) <= 0.0 {
        return 0.0;
    }
    (1.0 - dynamic_range_db(blocks) / DYNAMIC_RANGE_SPAN_DB).clamp(0.0, 1.0)
}

/// Coarse whole-track envelope used by the fast pass
///
/// Returns the raw RMS envelope (100 ms window, 25% hop, at most 2000
/// points) and its peak-normalized copy.
pub fn coarse_trajectory(mono: &[f32], sample_rate: u32) -> (Vec<f32>, Vec<f32>) {
    let layout = EnvelopeLayout::new(sample_rate, 100.0, 0.25);
    let raw = envelope::downsample(&envelope::rms_envelope(mono, layout), MAX_TRAJECTORY_POINTS);
    let normalized = envelope::peak_normalize(&raw);
    (raw, normalized)
}

/// Overall shape of a trajectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrajectoryShape {
    Steady,
    FadeOut,
}

impl fmt::Display for TrajectoryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Steady => write!(f, "steady"),
            Self::FadeOut => write!(f, "fade-out"),
        }
    }
}

/// Statistics of a peak-normalized energy trajectory
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryProfile {
    pub points: Vec<f32>,
    pub mean: f64,
    pub p75: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub shape: TrajectoryShape,
}

impl TrajectoryProfile {
    /// Profile of points that are already normalized
    pub fn from_points(points: Vec<f32>, fade_threshold: f64) -> Self {
        let edge = (points.len() / 10).max(1).min(points.len());
        let start = stats::mean(&points[..edge]);
        let end = stats::mean(&points[points.len() - edge..]);
        let shape = if !points.is_empty() && start > fade_threshold && end < fade_threshold / 1.5 {
            TrajectoryShape::FadeOut
        } else {
            TrajectoryShape::Steady
        };

        Self {
            mean: stats::mean(&points),
            p75: stats::percentile(&points, 75.0),
            variance: stats::variance(&points),
            std_dev: stats::std_dev(&points),
            shape,
            points,
        }
    }
}

/// Full-resolution RMS envelope for the deep pass (200 ms window, 50% hop,
/// at most 2000 points), not normalized
pub fn full_envelope(mono: &[f32], sample_rate: u32) -> Vec<f32> {
    let layout = EnvelopeLayout::new(sample_rate, 200.0, 0.5);
    envelope::downsample(&envelope::rms_envelope(mono, layout), MAX_TRAJECTORY_POINTS)
}

/// Profile a raw envelope after peak normalization
pub fn trajectory_from_envelope(envelope: &[f32], fade_threshold: f64) -> Result<TrajectoryProfile, AnalysisError> {
    if envelope.is_empty() {
        return Err(AnalysisError::InsufficientData {
            what: "energy trajectory".to_string(),
            details: "empty envelope".to_string(),
        });
    }
    Ok(TrajectoryProfile::from_points(envelope::peak_normalize(envelope), fade_threshold))
}

/// Deep-pass trajectory of a mono signal
pub fn analyze_trajectory(
    mono: &[f32],
    sample_rate: u32,
    fade_threshold: f64,
) -> Result<TrajectoryProfile, AnalysisError> {
    trajectory_from_envelope(&full_envelope(mono, sample_rate), fade_threshold)
}
