use rayon::prelude::*;

use crate::{
    analysis::result::Candidate,
    dsp::SpectrumAnalyzer,
    error::AnalysisError,
    rules::AnalyzerSettings,
};

/// Krumhansl-Kessler major profile, tonic first
const KK_MAJOR: [f64; 12] = [6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88];

/// Krumhansl-Kessler minor profile, tonic first
const KK_MINOR: [f64; 12] = [6.33, 2.68, 3.52, 5.38, 2.6, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17];

pub const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Roots whose candidates get the common-key boost (G, D, A, E)
const COMMON_ROOTS: [usize; 4] = [7, 2, 9, 4];
/// Score shift for a full relative-minor bias of 1.0
const BIAS_WEIGHT: f64 = 0.5;

const BAND_LOW_HZ: f64 = 80.0;
const BAND_HIGH_HZ: f64 = 5000.0;
const FAST_MAX_FRAMES: usize = 50;
const REPORTED_CANDIDATES: usize = 6;

pub type ChromaProfile = [f64; 12];

/// Frame layout of a key scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// 1024/512 frames, at most 50 spread over the track
    Fast,
    /// 2048/1024 frames over the whole track
    Deep,
}

impl ScanMode {
    fn frame_size(self) -> usize {
        match self {
            Self::Fast => 1024,
            Self::Deep => 2048,
        }
    }

    fn hop(self) -> usize {
        self.frame_size() / 2
    }

    fn default_smoothing(self) -> usize {
        match self {
            Self::Fast => 4,
            Self::Deep => 8,
        }
    }
}

/// One scored key hypothesis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyScore {
    pub root: usize,
    pub minor: bool,
    pub score: f64,
}

impl KeyScore {
    pub fn name(&self) -> String {
        let mut name = NOTE_NAMES[self.root % 12].to_string();
        if self.minor {
            name.push('m');
        }
        name
    }

    fn template(&self) -> ChromaProfile {
        rotate_template(if self.minor { &KK_MINOR } else { &KK_MAJOR }, self.root)
    }
}

/// Outcome of key detection
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEstimate {
    pub primary: String,
    /// Correlation of the chroma profile with the winning template, in [0, 1]
    pub confidence: f64,
    pub candidates: Vec<Candidate<String>>,
    /// Semitone shift chosen by the capo check
    pub shift: usize,
}

/// Pitch class (C = 0) of the semitone nearest to `freq`, relative to A4 = 440 Hz
pub fn pitch_class(freq: f64) -> usize {
    let semitones = (12.0 * (freq / 440.0).log2()).round() as i64;
    (semitones + 9).rem_euclid(12) as usize
}

/// `template` transposed so its tonic sits on `root`
fn rotate_template(template: &[f64; 12], root: usize) -> ChromaProfile {
    let mut rotated = [0.0; 12];
    for (i, slot) in rotated.iter_mut().enumerate() {
        *slot = template[(i + 12 - root % 12) % 12];
    }
    rotated
}

/// Pearson correlation of two profiles; zero when either is flat
pub fn correlate(a: &ChromaProfile, b: &ChromaProfile) -> f64 {
    let mean_a = a.iter().sum::<f64>() / 12.0;
    let mean_b = b.iter().sum::<f64>() / 12.0;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..12 {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    cov / denom
}

/// Move every bin up by `shift` semitones
pub fn shift_profile(profile: &ChromaProfile, shift: usize) -> ChromaProfile {
    let mut shifted = [0.0; 12];
    for (i, &value) in profile.iter().enumerate() {
        shifted[(i + shift) % 12] = value;
    }
    shifted
}

fn normalize_to_max(profile: &mut ChromaProfile) {
    let max = profile.iter().copied().fold(0.0f64, f64::max).max(1e-9);
    for value in profile.iter_mut() {
        *value /= max;
    }
}

/// Circular moving average over `window` bins, renormalized to its max
pub fn smooth_profile(profile: &ChromaProfile, window: usize) -> ChromaProfile {
    if window <= 1 {
        return *profile;
    }

    let half = (window / 2) as isize;
    let mut smoothed = [0.0; 12];
    for (i, slot) in smoothed.iter_mut().enumerate() {
        let mut sum = 0.0;
        let mut count = 0.0;
        for offset in -half..=half {
            let idx = (i as isize + offset).rem_euclid(12) as usize;
            sum += profile[idx];
            count += 1.0;
        }
        *slot = sum / count;
    }
    normalize_to_max(&mut smoothed);
    smoothed
}

pub struct KeyEstimator;

impl KeyEstimator {
    /// Detect the musical key of a mono signal
    pub fn detect(
        mono: &[f32],
        sample_rate: u32,
        mode: ScanMode,
        settings: &AnalyzerSettings,
    ) -> Result<KeyEstimate, AnalysisError> {
        let profile = Self::chroma_profile(mono, sample_rate, mode)?;
        let window = settings
            .chroma_smooth_window
            .unwrap_or_else(|| mode.default_smoothing())
            .max(1);
        let profile = smooth_profile(&profile, window);

        let estimate = Self::estimate_from_profile(&profile, settings);
        tracing::debug!(
            key = %estimate.primary,
            confidence = estimate.confidence,
            shift = estimate.shift,
            ?mode,
            "Key estimated"
        );
        Ok(estimate)
    }

    /// Max-normalized 12-bin chroma profile of the 80-5000 Hz band
    pub fn chroma_profile(
        mono: &[f32],
        sample_rate: u32,
        mode: ScanMode,
    ) -> Result<ChromaProfile, AnalysisError> {
        let frame_size = mode.frame_size();
        if mono.len() < frame_size || sample_rate == 0 {
            return Err(AnalysisError::InsufficientData {
                what: "chroma profile".to_string(),
                details: format!("{} samples, need {}", mono.len(), frame_size),
            });
        }

        let starts = frame_starts(mono.len(), frame_size, mode.hop(), match mode {
            ScanMode::Fast => Some(FAST_MAX_FRAMES),
            ScanMode::Deep => None,
        });

        // Precompute the pitch class of every in-band bin
        let bin_width = sample_rate as f64 / frame_size as f64;
        let bin_classes: Vec<Option<usize>> = (0..=frame_size / 2)
            .map(|k| {
                let freq = k as f64 * bin_width;
                (k > 0 && (BAND_LOW_HZ..=BAND_HIGH_HZ).contains(&freq)).then(|| pitch_class(freq))
            })
            .collect();

        let mut chroma = starts
            .par_iter()
            .map_init(
                || SpectrumAnalyzer::new(frame_size),
                |analyzer, &start| -> Result<ChromaProfile, AnalysisError> {
                    let magnitudes = analyzer.magnitudes(&mono[start..start + frame_size])?;
                    let mut frame_chroma = [0.0; 12];
                    for (mag, class) in magnitudes.iter().zip(&bin_classes) {
                        if let Some(class) = class {
                            frame_chroma[*class] += *mag as f64;
                        }
                    }
                    Ok(frame_chroma)
                },
            )
            .try_reduce(
                || [0.0; 12],
                |mut acc, frame| {
                    for (total, value) in acc.iter_mut().zip(frame.iter()) {
                        *total += value;
                    }
                    Ok(acc)
                },
            )?;

        normalize_to_max(&mut chroma);
        Ok(chroma)
    }

    /// All 24 key hypotheses for a profile, best first
    ///
    /// Scores are template correlations shifted by the relative-minor bias
    /// (positive favors major) and the common-key boost. Both are added, so
    /// their direction holds for negative correlations too.
    pub fn match_profile(profile: &ChromaProfile, settings: &AnalyzerSettings) -> Vec<KeyScore> {
        let bias = settings.relative_minor_bias.clamp(-1.0, 1.0);
        let boost = settings.common_key_preference_boost;

        let mut scores: Vec<KeyScore> = (0..12)
            .flat_map(|root| [false, true].map(|minor| (root, minor)))
            .map(|(root, minor)| {
                let template = if minor { &KK_MINOR } else { &KK_MAJOR };
                let mut score = correlate(profile, &rotate_template(template, root));
                score += (if minor { -bias } else { bias }) * BIAS_WEIGHT;
                if boost > 0.0 && COMMON_ROOTS.contains(&root) {
                    score += boost;
                }
                KeyScore { root, minor, score }
            })
            .collect();

        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        scores
    }

    /// Match a profile, trying capo shifts of 0-2 semitones when enabled
    pub fn estimate_from_profile(profile: &ChromaProfile, settings: &AnalyzerSettings) -> KeyEstimate {
        let max_shift = if settings.capo_transposition_check { 2 } else { 0 };

        let mut best: Option<(usize, Vec<KeyScore>)> = None;
        for shift in 0..=max_shift {
            let scores = Self::match_profile(&shift_profile(profile, shift), settings);
            let top = scores.first().map_or(f64::NEG_INFINITY, |s| s.score);
            let better = best
                .as_ref()
                .and_then(|(_, current)| current.first())
                .map_or(true, |current| top > current.score);
            if better {
                best = Some((shift, scores));
            }
        }

        let (shift, scores) = best.unwrap_or_default();
        let scores: Vec<KeyScore> = scores
            .into_iter()
            .map(|s| KeyScore {
                root: (s.root + 12 - shift) % 12,
                ..s
            })
            .collect();

        let Some(winner) = scores.first().copied() else {
            return KeyEstimate {
                primary: NOTE_NAMES[0].to_string(),
                confidence: 0.0,
                candidates: Vec::new(),
                shift: 0,
            };
        };

        let confidence = correlate(profile, &winner.template()).clamp(0.0, 1.0);
        KeyEstimate {
            primary: winner.name(),
            confidence,
            candidates: scores
                .iter()
                .take(REPORTED_CANDIDATES)
                .map(|s| Candidate::new(s.name(), s.score))
                .collect(),
            shift,
        }
    }
}

/// Frame start offsets; with `max_frames`, that many spread evenly
fn frame_starts(len: usize, frame_size: usize, hop: usize, max_frames: Option<usize>) -> Vec<usize> {
    let available: Vec<usize> = (0..=len - frame_size).step_by(hop.max(1)).collect();
    match max_frames {
        Some(max) if available.len() > max && max > 1 => {
            let last = available.len() - 1;
            (0..max).map(|i| available[i * last / (max - 1)]).collect()
        }
        _ => available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_settings() -> AnalyzerSettings {
        AnalyzerSettings {
            chroma_smooth_window: Some(1),
            relative_minor_bias: 0.0,
            common_key_preference_boost: 0.0,
            capo_transposition_check: false,
            ..AnalyzerSettings::default()
        }
    }

    #[test]
    fn test_pitch_class_is_c_based() {
        assert_eq!(pitch_class(440.0), 9);
        assert_eq!(pitch_class(261.63), 0);
        assert_eq!(pitch_class(392.0), 7);
        assert_eq!(pitch_class(110.0), 9);
        assert_eq!(NOTE_NAMES[pitch_class(329.63)], "E");
    }

    #[test]
    fn test_template_profile_matches_its_key() {
        let settings = plain_settings();
        let d_major = rotate_template(&KK_MAJOR, 2);
        let estimate = KeyEstimator::estimate_from_profile(&d_major, &settings);
        assert_eq!(estimate.primary, "D");
        assert!((estimate.confidence - 1.0).abs() < 1e-9);

        let f_sharp_minor = rotate_template(&KK_MINOR, 6);
        let estimate = KeyEstimator::estimate_from_profile(&f_sharp_minor, &settings);
        assert_eq!(estimate.primary, "F#m");
    }

    #[test]
    fn test_shift_equivariance() {
        let settings = plain_settings();
        let profile: ChromaProfile = [1.0, 0.1, 0.5, 0.2, 0.8, 0.45, 0.15, 0.9, 0.1, 0.55, 0.2, 0.4];
        let base = KeyEstimator::match_profile(&profile, &settings);

        for k in 1..12 {
            let shifted = KeyEstimator::match_profile(&shift_profile(&profile, k), &settings);
            for original in &base {
                let moved = shifted
                    .iter()
                    .find(|s| s.root == (original.root + k) % 12 && s.minor == original.minor)
                    .unwrap();
                assert!((moved.score - original.score).abs() < 1e-9);
            }
            assert_eq!(shifted[0].root, (base[0].root + k) % 12);
        }
    }

    #[test]
    fn test_bias_direction() {
        // Between C major and A minor the profile is nearly ambiguous
        let profile: ChromaProfile = [1.0, 0.0, 0.6, 0.0, 0.8, 0.6, 0.0, 0.8, 0.0, 0.9, 0.0, 0.5];

        let major = AnalyzerSettings {
            relative_minor_bias: 0.5,
            ..plain_settings()
        };
        let scores = KeyEstimator::match_profile(&profile, &major);
        assert!(!scores[0].minor);

        let minor = AnalyzerSettings {
            relative_minor_bias: -0.5,
            ..plain_settings()
        };
        let scores = KeyEstimator::match_profile(&profile, &minor);
        assert!(scores[0].minor);
    }

    fn score_of(scores: &[KeyScore], root: usize, minor: bool) -> f64 {
        scores
            .iter()
            .find(|s| s.root == root && s.minor == minor)
            .unwrap()
            .score
    }

    #[test]
    fn test_common_key_boost_applies_to_g_d_a_e() {
        let profile = rotate_template(&KK_MAJOR, 7);
        let settings = AnalyzerSettings {
            common_key_preference_boost: 0.5,
            ..plain_settings()
        };
        let boosted = KeyEstimator::match_profile(&profile, &settings);
        let plain = KeyEstimator::match_profile(&profile, &plain_settings());

        let g_plain = score_of(&plain, 7, false);
        assert!((g_plain - 1.0).abs() < 1e-9);
        assert!((score_of(&boosted, 7, false) - 1.5).abs() < 1e-9);
        assert!((score_of(&boosted, 0, false) - score_of(&plain, 0, false)).abs() < 1e-9);
        assert_eq!(boosted[0].root, 7);
    }

    #[test]
    fn test_adjustments_keep_direction_on_negative_scores() {
        // Exact inverse of the C major template
        let profile: ChromaProfile = std::array::from_fn(|i| 7.0 - KK_MAJOR[i]);
        let plain = KeyEstimator::match_profile(&profile, &plain_settings());
        let c_major = score_of(&plain, 0, false);
        let c_minor = score_of(&plain, 0, true);
        assert!((c_major + 1.0).abs() < 1e-9);

        let toward_major = AnalyzerSettings {
            relative_minor_bias: 0.5,
            ..plain_settings()
        };
        let biased = KeyEstimator::match_profile(&profile, &toward_major);
        assert!(score_of(&biased, 0, false) > c_major);
        assert!(score_of(&biased, 0, true) < c_minor);
        assert!(score_of(&biased, 0, false) - score_of(&biased, 0, true) > c_major - c_minor);

        let boosted = KeyEstimator::match_profile(
            &profile,
            &AnalyzerSettings {
                common_key_preference_boost: 0.2,
                ..plain_settings()
            },
        );
        for root in COMMON_ROOTS {
            assert!(score_of(&boosted, root, false) > score_of(&plain, root, false));
        }
    }

    #[test]
    fn test_smoothing_keeps_max_at_one() {
        let profile: ChromaProfile = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let smoothed = smooth_profile(&profile, 4);
        assert!((smoothed[0] - 1.0).abs() < 1e-9);
        assert!((smoothed[2] - 1.0).abs() < 1e-9);
        assert_eq!(smoothed[3], 0.0);
        assert_eq!(smooth_profile(&profile, 1), profile);
    }

    #[test]
    fn test_detect_c_major_chord_progression() {
        let sample_rate = 22050u32;
        // Scale tones with the tonic triad emphasized
        let tones = [
            (261.63, 1.0),
            (293.66, 0.35),
            (329.63, 0.8),
            (349.23, 0.35),
            (392.00, 0.9),
            (440.00, 0.35),
            (493.88, 0.35),
        ];
        let samples: Vec<f32> = (0..sample_rate as usize * 12)
            .map(|n| {
                let t = n as f64 / sample_rate as f64;
                tones
                    .iter()
                    .map(|(freq, amp)| amp * (2.0 * std::f64::consts::PI * freq * t).sin())
                    .sum::<f64>() as f32
                    * 0.1
            })
            .collect();

        let estimate = KeyEstimator::detect(&samples, sample_rate, ScanMode::Deep, &plain_settings()).unwrap();
        // Relative keys share the pitch set
        assert!(estimate.primary == "C" || estimate.primary == "Am", "got {}", estimate.primary);
        assert!((0.0..=1.0).contains(&estimate.confidence));
        assert!(estimate.candidates.len() <= 6);
    }

    #[test]
    fn test_too_short_for_a_frame() {
        let result = KeyEstimator::detect(&[0.0; 100], 44100, ScanMode::Fast, &AnalyzerSettings::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_fast_frames_are_spread() {
        let starts = frame_starts(100_000, 1024, 512, Some(50));
        assert_eq!(starts.len(), 50);
        assert_eq!(starts[0], 0);
        assert!(*starts.last().unwrap() + 1024 <= 100_000);
        assert!(*starts.last().unwrap() > 90_000);
    }
}
