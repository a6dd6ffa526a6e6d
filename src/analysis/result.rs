//! Result records produced by the fast and deep passes.

use serde::{Deserialize, Serialize};

use crate::dsp::format_time;

/// Which pass produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Fast,
    Deep,
}

/// One ranked alternative of an estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate<T> {
    pub value: T,
    pub confidence: f64,
}

impl<T> Candidate<T> {
    pub fn new(value: T, confidence: f64) -> Self {
        Self { value, confidence }
    }
}

/// Track descriptors from a fast pass; also the base of [`DeepResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FastResult {
    pub bpm: Option<f64>,
    pub raw_bpm: Option<f64>,
    pub key: String,
    pub key_confidence: f64,
    pub energy: Option<u8>,
    pub loudness: u8,
    pub gain_recommendation: String,
    #[serde(rename = "loudnessLUFS")]
    pub loudness_lufs: f64,
    pub loudness_range: f64,
    pub danceability: u8,
    pub acousticness: u8,
    pub instrumentalness: u8,
    pub liveness: u8,
    pub cue_in: f64,
    pub cue_out: f64,
    pub cue_in_formatted: String,
    pub cue_out_formatted: String,
    pub cue_description: String,
    pub energy_trajectory: Vec<f32>,
    pub energy_trajectory_desc: String,
    #[serde(default)]
    pub bpm_candidates: Vec<Candidate<f64>>,
    #[serde(default)]
    pub key_candidates: Vec<Candidate<String>>,
    pub status: AnalysisStatus,
    pub analyzed: bool,
}

impl FastResult {
    /// Record for a buffer too short to analyze
    pub fn unanalyzed(duration: f64, status: AnalysisStatus) -> Self {
        let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        Self {
            bpm: None,
            raw_bpm: None,
            key: String::new(),
            key_confidence: 0.0,
            energy: None,
            loudness: 0,
            gain_recommendation: "+0dB".to_string(),
            loudness_lufs: -14.0,
            loudness_range: 4.0,
            danceability: 0,
            acousticness: 50,
            instrumentalness: 0,
            liveness: 10,
            cue_in: 0.0,
            cue_out: duration,
            cue_in_formatted: format_time(0.0),
            cue_out_formatted: format_time(duration),
            cue_description: String::new(),
            energy_trajectory: Vec::new(),
            energy_trajectory_desc: String::new(),
            bpm_candidates: Vec::new(),
            key_candidates: Vec::new(),
            status,
            analyzed: false,
        }
    }
}

/// A detected phrase boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseMarker {
    /// Seconds from the start of the track
    pub time: f64,
    /// Normalized energy of the phrase starting here
    pub energy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BpmDrift {
    pub start_bpm: f64,
    pub end_bpm: f64,
    pub drift: f64,
}

impl BpmDrift {
    /// No measurable drift around `bpm`
    pub fn steady(bpm: f64) -> Self {
        Self {
            start_bpm: bpm,
            end_bpm: bpm,
            drift: 0.0,
        }
    }
}

/// Deep-pass record: the refined fast fields plus structural analyses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepResult {
    #[serde(flatten)]
    pub base: FastResult,
    pub phrases: Vec<PhraseMarker>,
    pub phrase_length: u32,
    pub bpm_drift: Option<BpmDrift>,
    pub transition_difficulty: Option<u8>,
    pub transition_description: String,
}

impl DeepResult {
    /// Deep record for a buffer too short to analyze
    pub fn unanalyzed(duration: f64, phrase_length: u32) -> Self {
        Self {
            base: FastResult::unanalyzed(duration, AnalysisStatus::Deep),
            phrases: Vec::new(),
            phrase_length,
            bpm_drift: None,
            transition_difficulty: None,
            transition_description: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unanalyzed_defaults() {
        let result = FastResult::unanalyzed(5.0, AnalysisStatus::Fast);
        assert!(!result.analyzed);
        assert_eq!(result.bpm, None);
        assert_eq!(result.acousticness, 50);
        assert_eq!(result.liveness, 10);
        assert_eq!(result.loudness_lufs, -14.0);
        assert_eq!(result.cue_out, 5.0);
        assert_eq!(result.cue_out_formatted, "0:05");
        assert_eq!(result.gain_recommendation, "+0dB");
    }

    #[test]
    fn test_json_field_names() {
        let result = DeepResult::unanalyzed(3.0, 8);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "deep");
        assert_eq!(json["loudnessLUFS"], -14.0);
        assert_eq!(json["phraseLength"], 8);
        assert!(json["rawBpm"].is_null());
        assert!(json.get("cueInFormatted").is_some());
        assert!(json.get("base").is_none());
    }
}
