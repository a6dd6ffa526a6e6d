use std::collections::HashMap;

use crate::{
    analysis::result::{BpmDrift, Candidate},
    dsp::envelope::{self, EnvelopeLayout},
    error::AnalysisError,
    rules::{AnalyzerSettings, TempoRules},
};

/// Tempo assumed when no beat structure is found
pub const FALLBACK_BPM: f64 = 120.0;

const FALLBACK_CONFIDENCE: f64 = 0.4;
const MIN_CANDIDATE_CONFIDENCE: f64 = 0.05;
const DRIFT_SEGMENT_SECS: f64 = 30.0;

/// Outcome of tempo detection
#[derive(Debug, Clone, PartialEq)]
pub struct TempoEstimate {
    /// Tempo folded into the genre's range
    pub primary: f64,
    /// Most common interval tempo before folding
    pub raw: f64,
    /// Ranked alternatives, never empty
    pub candidates: Vec<Candidate<f64>>,
}

impl TempoEstimate {
    fn fallback() -> Self {
        Self {
            primary: FALLBACK_BPM,
            raw: FALLBACK_BPM,
            candidates: vec![Candidate::new(FALLBACK_BPM, FALLBACK_CONFIDENCE)],
        }
    }

    /// Confidence of the candidate matching the primary tempo, if any
    pub fn primary_confidence(&self) -> f64 {
        let rounded = self.primary.round();
        self.candidates
            .iter()
            .find(|c| c.value.round() == rounded)
            .map_or(0.0, |c| c.confidence)
    }
}

/// Halve or double until `bpm` lies in `[min, max]`
///
/// Non-positive or non-finite input yields the 120 fallback. When the range
/// is narrower than an octave and no octave of `bpm` fits, the octave closest
/// to the range wins and is clamped onto its nearest bound.
pub fn fold_bpm(bpm: f64, min: f64, max: f64) -> f64 {
    if !bpm.is_finite() || bpm <= 0.0 || min <= 0.0 || max < min {
        return FALLBACK_BPM;
    }

    let mut folded = bpm;
    while folded < min {
        folded *= 2.0;
    }
    while folded > max {
        folded *= 0.5;
    }
    if folded >= min {
        return folded;
    }

    // Straddles the range: `folded` is below it, one octave up is above it
    let above = folded * 2.0;
    if min - folded <= above - max {
        min
    } else {
        max
    }
}

/// Envelope-peak tempo detector
pub struct TempoEstimator;

impl TempoEstimator {
    /// Detect tempo and ranked candidates from a mono signal
    pub fn detect(
        mono: &[f32],
        sample_rate: u32,
        settings: &AnalyzerSettings,
        rules: &TempoRules,
    ) -> TempoEstimate {
        let layout = EnvelopeLayout::new(sample_rate, settings.hop_ms, 0.25);
        let Some(intervals) = Self::peak_intervals(mono, layout, settings) else {
            tracing::debug!("Fewer than two onset peaks, using fallback tempo");
            return TempoEstimate::fallback();
        };

        let hop_seconds = layout.hop_seconds();
        let raw = envelope::intervals_to_tempo(&intervals, hop_seconds);
        let primary = fold_bpm(raw, rules.bpm_min, rules.bpm_max);

        // Support per rounded BPM across all intervals
        let bpms = envelope::intervals_to_bpms(&intervals, hop_seconds);
        let mut histogram: HashMap<i64, usize> = HashMap::new();
        for bpm in &bpms {
            *histogram.entry(bpm.round() as i64).or_insert(0) += 1;
        }
        let total = intervals.len().max(1) as f64;
        let support = |bpm: f64| histogram.get(&(bpm.round() as i64)).copied().unwrap_or(0) as f64 / total;

        let mut candidates: Vec<Candidate<f64>> = [(0.5, 0.6), (1.0, 1.0), (1.5, 0.4), (2.0, 0.8)]
            .iter()
            .map(|&(ratio, weight)| {
                let value = primary * ratio;
                Candidate::new(value, support(value) * weight)
            })
            .filter(|c| c.confidence > MIN_CANDIDATE_CONFIDENCE)
            .collect();
        candidates = dedupe_rounded(candidates);
        sort_by_confidence(&mut candidates);

        if let Some(threshold) = settings.double_time_raw_min.filter(|t| *t > 0.0) {
            if raw > threshold {
                let doubled = raw * 2.0;
                let confidence = match support(doubled) * 0.9 {
                    c if c > 0.0 => c,
                    _ => FALLBACK_CONFIDENCE,
                };
                candidates.insert(0, Candidate::new(doubled, confidence));
                candidates = dedupe_rounded(candidates);
                sort_by_confidence(&mut candidates);
            }
        }

        if let Some(floor) = settings.bpm_candidate_prune_threshold.filter(|p| *p > 0.0) {
            candidates.retain(|c| c.confidence >= floor);
        }
        if candidates.is_empty() {
            candidates.push(Candidate::new(primary.round(), 0.8));
        }

        tracing::debug!(raw, primary, candidates = candidates.len(), "Tempo estimated");

        TempoEstimate {
            primary,
            raw,
            candidates,
        }
    }

    /// Compare the tempo of the first and last 30 seconds
    ///
    /// A segment without beat structure reports `fallback_bpm`.
    pub fn detect_drift(
        mono: &[f32],
        sample_rate: u32,
        fallback_bpm: f64,
        settings: &AnalyzerSettings,
        rules: &TempoRules,
    ) -> Result<BpmDrift, AnalysisError> {
        if mono.is_empty() || sample_rate == 0 {
            return Err(AnalysisError::InsufficientData {
                what: "tempo drift".to_string(),
                details: "empty signal".to_string(),
            });
        }

        let segment = ((sample_rate as f64 * DRIFT_SEGMENT_SECS) as usize).min(mono.len());
        let first = &mono[..segment];
        let last = &mono[mono.len() - segment..];

        let layout = EnvelopeLayout::new(sample_rate, settings.hop_ms, 0.25);
        let segment_tempo = |samples: &[f32]| {
            let raw = match Self::peak_intervals(samples, layout, settings) {
                Some(intervals) => envelope::intervals_to_tempo(&intervals, layout.hop_seconds()),
                None => fallback_bpm,
            };
            fold_bpm(raw, rules.bpm_min, rules.bpm_max)
        };

        let (start_bpm, end_bpm) = rayon::join(|| segment_tempo(first), || segment_tempo(last));
        Ok(BpmDrift {
            start_bpm,
            end_bpm,
            drift: ((end_bpm - start_bpm) * 100.0).round() / 100.0,
        })
    }

    /// Intervals between onset peaks, or `None` with fewer than two peaks
    fn peak_intervals(
        mono: &[f32],
        layout: EnvelopeLayout,
        settings: &AnalyzerSettings,
    ) -> Option<Vec<usize>> {
        let env = envelope::rms_envelope(mono, layout);
        let min_distance = layout.frames_for_ms(settings.min_peak_distance_ms);
        let peaks = envelope::find_peaks(&env, min_distance, settings.onset_sensitivity);
        if peaks.len() < 2 {
            return None;
        }
        Some(envelope::peak_intervals(&peaks))
    }
}

/// Keep the first candidate per rounded value, storing the rounded value
fn dedupe_rounded(candidates: Vec<Candidate<f64>>) -> Vec<Candidate<f64>> {
    let mut seen = Vec::new();
    candidates
        .into_iter()
        .filter_map(|c| {
            let rounded = c.value.round();
            if seen.contains(&(rounded as i64)) {
                return None;
            }
            seen.push(rounded as i64);
            Some(Candidate::new(rounded, c.confidence))
        })
        .collect()
}

fn sort_by_confidence(candidates: &mut [Candidate<f64>]) {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::GenreRules;

    fn impulse_train(sample_rate: u32, seconds: f64, spacing_secs: f64) -> Vec<f32> {
        let len = (sample_rate as f64 * seconds) as usize;
        let step = (sample_rate as f64 * spacing_secs) as usize;
        let mut samples = vec![0.0f32; len];
        for i in (0..len).step_by(step) {
            samples[i] = 1.0;
        }
        samples
    }

    #[test]
    fn test_fold_bpm_stays_in_range() {
        for raw in [10.0, 45.0, 79.9, 80.0, 123.0, 180.0, 181.0, 350.0, 1000.0] {
            let folded = fold_bpm(raw, 80.0, 180.0);
            assert!((80.0..=180.0).contains(&folded), "{} folded to {}", raw, folded);
        }
        assert_eq!(fold_bpm(0.0, 80.0, 180.0), FALLBACK_BPM);
        assert_eq!(fold_bpm(f64::NAN, 80.0, 180.0), FALLBACK_BPM);
        assert_eq!(fold_bpm(70.0, 80.0, 180.0), 140.0);
        // Narrow ranges snap to the bound nearest the closest octave
        assert_eq!(fold_bpm(100.0, 120.0, 130.0), 120.0);
        assert_eq!(fold_bpm(240.0, 100.0, 110.0), 110.0);
        assert_eq!(fold_bpm(125.0, 120.0, 130.0), 125.0);
    }

    #[test]
    fn test_impulse_train_at_120_bpm() {
        let samples = impulse_train(44100, 30.0, 0.5);
        let estimate = TempoEstimator::detect(
            &samples,
            44100,
            &AnalyzerSettings::default(),
            &GenreRules::default().tempo,
        );

        assert!((estimate.primary.round() - 120.0).abs() <= 3.0, "primary {}", estimate.primary);
        assert!(estimate.primary_confidence() > 0.5);
        assert!(!estimate.candidates.is_empty());
    }

    #[test]
    fn test_silence_falls_back_to_120() {
        let samples = vec![0.0f32; 44100 * 12];
        let estimate = TempoEstimator::detect(
            &samples,
            44100,
            &AnalyzerSettings::default(),
            &GenreRules::default().tempo,
        );
        assert_eq!(estimate.primary, 120.0);
        assert_eq!(estimate.candidates, vec![Candidate::new(120.0, 0.4)]);
    }

    #[test]
    fn test_half_and_double_candidates_with_support() {
        // Alternate 1s and 0.5s gaps so both 60 and 120 have interval support
        let sample_rate = 44100;
        let mut samples = vec![0.0f32; sample_rate * 30];
        let mut position = 0usize;
        let mut long_gap = true;
        while position < samples.len() {
            samples[position] = 1.0;
            position += if long_gap { sample_rate } else { sample_rate / 2 };
            long_gap = !long_gap;
        }

        let settings = AnalyzerSettings {
            bpm_candidate_prune_threshold: None,
            ..AnalyzerSettings::default()
        };
        let rules = TempoRules {
            bpm_min: 50.0,
            bpm_max: 200.0,
        };
        let estimate = TempoEstimator::detect(&samples, sample_rate as u32, &settings, &rules);

        let near = |target: f64| {
            estimate
                .candidates
                .iter()
                .any(|c| (c.value - target).abs() <= 3.0)
        };
        assert!(near(estimate.primary));
        assert!(near(estimate.primary / 2.0) || near(estimate.primary * 2.0));
    }

    #[test]
    fn test_double_time_injection() {
        // Raw tempo around 171 BPM, above the double-time threshold
        let samples = impulse_train(44100, 30.0, 0.35);
        let settings = AnalyzerSettings {
            double_time_raw_min: Some(150.0),
            bpm_candidate_prune_threshold: None,
            ..AnalyzerSettings::default()
        };
        let rules = TempoRules {
            bpm_min: 80.0,
            bpm_max: 400.0,
        };
        let estimate = TempoEstimator::detect(&samples, 44100, &settings, &rules);
        assert!(estimate.raw > 150.0);
        assert!(estimate
            .candidates
            .iter()
            .any(|c| (c.value - estimate.raw * 2.0).abs() <= 1.0));
    }

    #[test]
    fn test_drift_of_steady_train_is_zero() {
        let samples = impulse_train(44100, 70.0, 0.5);
        let drift = TempoEstimator::detect_drift(
            &samples,
            44100,
            120.0,
            &AnalyzerSettings::default(),
            &GenreRules::default().tempo,
        )
        .unwrap();
        assert!(drift.drift.abs() <= 3.0);
        assert!((drift.start_bpm - 120.0).abs() <= 3.0);
    }
}
