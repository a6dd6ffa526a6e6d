use crate::{
    analysis::{
        cue::{detect_cue_points, generate_cue_description, CueOptions},
        energy,
        heuristics,
        key::{KeyEstimator, ScanMode},
        result::{AnalysisStatus, Candidate, FastResult},
        tempo::TempoEstimator,
    },
    audio::SampleBuffer,
    dsp::format_time,
    rules::{AnalyzerSettings, GenreRules},
};

/// First, cheap pass over a track
///
/// Produces every descriptor from a single read of the buffer. Tempo and key
/// run side by side on the rayon pool; everything else is linear in the
/// number of samples.
pub struct FastScanAnalyzer;

impl FastScanAnalyzer {
    pub fn analyze(buffer: &SampleBuffer, settings: &AnalyzerSettings, rules: &GenreRules) -> FastResult {
        let duration = buffer.computed_duration();
        if !buffer.is_analyzable() {
            tracing::warn!(duration, "Buffer too short or invalid for analysis");
            return FastResult::unanalyzed(duration, AnalysisStatus::Fast);
        }

        let mono = buffer.mono_samples();
        let sample_rate = buffer.sample_rate;
        tracing::debug!(duration, sample_rate, samples = mono.len(), "Fast scan started");

        let (tempo, key) = rayon::join(
            || TempoEstimator::detect(&mono, sample_rate, settings, &rules.tempo),
            || KeyEstimator::detect(&mono, sample_rate, ScanMode::Fast, settings),
        );

        let (key_name, key_confidence, key_candidates) = match key {
            Ok(key) => (key.primary, key.confidence, key.candidates),
            Err(e) => {
                tracing::warn!(error = %e, "Key detection failed");
                (String::new(), 0.0, Vec::<Candidate<String>>::new())
            }
        };

        let energy_score = energy::scalar_energy(&mono, sample_rate, settings, &rules.energy);
        let loudness = energy::rms_loudness(&mono);
        let gain_recommendation = energy::gain_recommendation(loudness, settings.target_loudness);

        let (envelope, trajectory) = energy::coarse_trajectory(&mono, sample_rate);
        let loudness_lufs = energy::lufs_from_rms(energy::rms(&mono));
        let loudness_range = energy::loudness_range(&envelope);

        let cue_options = CueOptions::from_settings(settings, &rules.cue);
        let cues = detect_cue_points(&mono, sample_rate, duration, &cue_options);
        let cue_description = generate_cue_description(&cues, duration, &mono, sample_rate);

        let energy = Some(energy_score);
        FastResult {
            bpm: Some(tempo.primary),
            raw_bpm: Some(tempo.raw),
            key: key_name,
            key_confidence,
            energy,
            loudness,
            gain_recommendation,
            loudness_lufs,
            loudness_range,
            danceability: heuristics::danceability_fast(energy, settings, rules),
            acousticness: heuristics::acousticness_fast(energy, None, settings, rules),
            instrumentalness: heuristics::instrumentalness_fast(energy, settings, rules),
            liveness: heuristics::liveness_fast(energy, settings, rules),
            cue_in: cues.cue_in,
            cue_out: cues.cue_out,
            cue_in_formatted: format_time(cues.cue_in),
            cue_out_formatted: format_time(cues.cue_out),
            cue_description,
            energy_trajectory: trajectory,
            energy_trajectory_desc: "coarse envelope".to_string(),
            bpm_candidates: tempo.candidates,
            key_candidates,
            status: AnalysisStatus::Fast,
            analyzed: true,
        }
    }
}
