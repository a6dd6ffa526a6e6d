use crate::{
    analysis::{
        energy::{self, TrajectoryProfile, TrajectoryShape},
        heuristics::{self, DeepInput},
        key::{KeyEstimator, ScanMode},
        phrase::{detect_phrases, PhraseAnalysis},
        result::{AnalysisStatus, BpmDrift, DeepResult, FastResult},
        tempo::{TempoEstimator, FALLBACK_BPM},
        transition::{assess_transition, TransitionAssessment},
    },
    audio::SampleBuffer,
    dsp::{spectrum, SpectralSummary},
    rules::{AnalyzerSettings, GenreRules},
};

const SPECTRAL_FRAME_SIZE: usize = 2048;
const SPECTRAL_MAX_FRAMES: usize = 400;

/// Background refinement pass
///
/// Independent measurements run in parallel. A failing measurement is
/// logged and replaced by a neutral value; the pass itself never fails.
pub struct DeepScanAnalyzer;

impl DeepScanAnalyzer {
    pub fn analyze(
        buffer: &SampleBuffer,
        fast: &FastResult,
        settings: &AnalyzerSettings,
        rules: &GenreRules,
    ) -> DeepResult {
        let duration = buffer.computed_duration();
        if !buffer.is_analyzable() {
            tracing::warn!(duration, "Buffer too short for deep analysis");
            return DeepResult::unanalyzed(duration, rules.phrase.default_bars);
        }

        let mono = buffer.mono_samples();
        let sample_rate = buffer.sample_rate;
        let fast_bpm = fast.bpm.unwrap_or(FALLBACK_BPM);

        let ((envelope, drift), (spectral, key)) = rayon::join(
            || {
                rayon::join(
                    || energy::full_envelope(&mono, sample_rate),
                    || TempoEstimator::detect_drift(&mono, sample_rate, fast_bpm, settings, &rules.tempo),
                )
            },
            || {
                rayon::join(
                    || spectrum::spectral_summary(&mono, sample_rate, SPECTRAL_FRAME_SIZE, SPECTRAL_MAX_FRAMES),
                    || KeyEstimator::detect(&mono, sample_rate, ScanMode::Deep, settings),
                )
            },
        );

        let trajectory = energy::trajectory_from_envelope(&envelope, rules.trajectory.fade_threshold)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Trajectory analysis failed, keeping the fast envelope");
                let mut fallback =
                    TrajectoryProfile::from_points(fast.energy_trajectory.clone(), rules.trajectory.fade_threshold);
                fallback.shape = TrajectoryShape::Steady;
                fallback
            });

        let drift = drift.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Tempo drift failed");
            BpmDrift::steady(fast_bpm)
        });

        let spectral = spectral.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Spectral summary failed");
            SpectralSummary::default()
        });

        let (phrases, transition) = rayon::join(
            || detect_phrases(&trajectory.points, duration, fast_bpm, fast.cue_in, &rules.phrase),
            || assess_transition(&trajectory.points, duration, settings, &rules.transition),
        );

        let phrases = phrases.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Phrase detection failed");
            PhraseAnalysis {
                markers: Vec::new(),
                phrase_length: rules.phrase.default_bars,
            }
        });

        let transition = transition.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Transition analysis failed");
            TransitionAssessment::default()
        });

        let mut base = fast.clone();
        match key {
            Ok(key) => {
                base.key = key.primary;
                base.key_confidence = key.confidence;
                base.key_candidates = key.candidates;
            }
            Err(e) => tracing::warn!(error = %e, "Deep key detection failed, keeping the fast key"),
        }

        let input = DeepInput {
            fast_energy: fast.energy,
            trajectory: &trajectory,
            spectral,
        };
        base.danceability = heuristics::danceability_deep(&input, settings, rules);
        base.acousticness = heuristics::acousticness_deep(&input, settings, rules);
        base.instrumentalness = heuristics::instrumentalness_deep(&input, settings, rules);
        base.liveness = heuristics::liveness_deep(&input, settings, rules);

        base.loudness_lufs = energy::integrated_lufs(&envelope).unwrap_or(fast.loudness_lufs);
        if !envelope.is_empty() {
            base.loudness_range = energy::loudness_range(&envelope);
        }
        base.energy_trajectory_desc = trajectory.shape.to_string();
        base.energy_trajectory = trajectory.points;
        base.status = AnalysisStatus::Deep;
        base.analyzed = true;

        tracing::debug!(
            phrases = phrases.markers.len(),
            drift = drift.drift,
            difficulty = transition.difficulty,
            "Deep scan finished"
        );

        DeepResult {
            base,
            phrases: phrases.markers,
            phrase_length: phrases.phrase_length,
            bpm_drift: Some(drift),
            transition_difficulty: Some(transition.difficulty),
            transition_description: transition.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fast::FastScanAnalyzer;

    fn pulse_track(seconds: f64, sample_rate: u32) -> SampleBuffer {
        let len = (seconds * sample_rate as f64) as usize;
        let beat = sample_rate as usize / 2;
        let samples = (0..len)
            .map(|i| if i % beat < 1500 { 0.7 } else { 0.05 })
            .collect();
        SampleBuffer::mono(sample_rate, samples)
    }

    #[test]
    fn test_short_buffer_yields_deep_neutral_record() {
        let buffer = SampleBuffer::mono(22050, vec![0.2; 22050 * 4]);
        let fast = FastScanAnalyzer::analyze(&buffer, &AnalyzerSettings::default(), &GenreRules::default());
        let deep = DeepScanAnalyzer::analyze(&buffer, &fast, &AnalyzerSettings::default(), &GenreRules::default());

        assert!(!deep.base.analyzed);
        assert_eq!(deep.base.status, AnalysisStatus::Deep);
        assert!(deep.phrases.is_empty());
        assert_eq!(deep.phrase_length, 8);
        assert_eq!(deep.bpm_drift, None);
    }

    #[test]
    fn test_deep_refines_fast_result() {
        let settings = AnalyzerSettings::default();
        let rules = GenreRules::default();
        let buffer = pulse_track(70.0, 11025);

        let fast = FastScanAnalyzer::analyze(&buffer, &settings, &rules);
        let deep = DeepScanAnalyzer::analyze(&buffer, &fast, &settings, &rules);

        assert!(deep.base.analyzed);
        assert_eq!(deep.base.status, AnalysisStatus::Deep);
        assert_eq!(deep.base.bpm, fast.bpm);
        assert_eq!(deep.base.cue_in, fast.cue_in);
        assert!(deep.base.energy_trajectory.len() <= 2000);
        assert!(deep.base.energy_trajectory.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(deep.base.energy_trajectory_desc, "steady");

        let drift = deep.bpm_drift.clone().unwrap();
        assert!(drift.drift.abs() <= 3.0);
        assert!(deep.transition_difficulty.unwrap() <= 100);
        assert!(!deep.transition_description.is_empty());
        assert!([4, 8, 16].contains(&deep.phrase_length));
        assert!(deep.phrases.windows(2).all(|w| w[0].time < w[1].time));
        for score in [
            deep.base.danceability,
            deep.base.acousticness,
            deep.base.instrumentalness,
            deep.base.liveness,
        ] {
            assert!(score <= 100);
        }
    }

    #[test]
    fn test_deep_loudness_skips_quiet_intro() {
        let settings = AnalyzerSettings::default();
        let rules = GenreRules::default();
        let sample_rate = 8000usize;
        let mut samples = vec![0.01f32; sample_rate * 20];
        samples.extend(vec![0.1f32; sample_rate * 20]);
        let buffer = SampleBuffer::mono(sample_rate as u32, samples);

        let fast = FastScanAnalyzer::analyze(&buffer, &settings, &rules);
        let deep = DeepScanAnalyzer::analyze(&buffer, &fast, &settings, &rules);

        assert_eq!(fast.loudness_lufs, -25.0);
        assert!(deep.base.loudness_lufs > fast.loudness_lufs);
        assert!((deep.base.loudness_lufs + 22.8).abs() <= 0.3, "lufs {}", deep.base.loudness_lufs);
    }

    #[test]
    fn test_deep_json_flattens_base() {
        let settings = AnalyzerSettings::default();
        let rules = GenreRules::default();
        let buffer = pulse_track(12.0, 8000);
        let fast = FastScanAnalyzer::analyze(&buffer, &settings, &rules);
        let deep = DeepScanAnalyzer::analyze(&buffer, &fast, &settings, &rules);

        let json = serde_json::to_value(&deep).unwrap();
        assert_eq!(json["status"], "deep");
        assert!(json["bpmDrift"]["startBpm"].is_number());
        assert!(json["transitionDifficulty"].is_number());
        assert!(json["phrases"].is_array());
    }
}
