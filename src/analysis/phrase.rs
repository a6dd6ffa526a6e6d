//! Phrase boundaries on a bar grid derived from the detected tempo.

use crate::{
    analysis::result::PhraseMarker,
    dsp::stats,
    error::AnalysisError,
    rules::PhraseRules,
};

const BEATS_PER_BAR: f64 = 4.0;
const CANDIDATE_BARS: [u32; 3] = [4, 8, 16];

#[derive(Debug, Clone, PartialEq)]
pub struct PhraseAnalysis {
    pub markers: Vec<PhraseMarker>,
    /// Chosen phrase length in bars
    pub phrase_length: u32,
}

/// Mean of the trajectory points covering `[start, end)` seconds
fn segment_energy(points: &[f32], duration: f64, start: f64, end: f64) -> f64 {
    let per_second = points.len() as f64 / duration;
    let first = ((start * per_second).floor() as usize).min(points.len());
    let last = ((end * per_second).ceil() as usize).clamp(first, points.len());
    if first == last {
        return points.get(first.min(points.len().saturating_sub(1))).map_or(0.0, |&v| v as f64);
    }
    stats::mean(&points[first..last])
}

/// Per-phrase energies for a phrase length, or `None` if fewer than two fit
fn phrase_energies(points: &[f32], duration: f64, anchor: f64, phrase_secs: f64) -> Option<Vec<(f64, f64)>> {
    let span = duration - anchor;
    if phrase_secs <= 0.0 || span < 2.0 * phrase_secs {
        return None;
    }

    let count = (span / phrase_secs).floor() as usize;
    Some(
        (0..count)
            .map(|k| {
                let start = anchor + k as f64 * phrase_secs;
                (start, segment_energy(points, duration, start, start + phrase_secs))
            })
            .collect(),
    )
}

fn mean_contrast(energies: &[(f64, f64)]) -> f64 {
    let contrasts: Vec<f32> = energies
        .windows(2)
        .map(|pair| (pair[1].1 - pair[0].1).abs() as f32)
        .collect();
    stats::mean(&contrasts)
}

/// Detect phrase boundaries
///
/// `points` is a peak-normalized trajectory spanning `duration` seconds. The
/// bar grid starts at `anchor` (the cue in). Of 4, 8 and 16 bar phrases the
/// length with the strongest mean energy contrast between neighbours wins;
/// boundaries whose contrast reaches the novelty threshold are reported along
/// with the anchor.
pub fn detect_phrases(
    points: &[f32],
    duration: f64,
    bpm: f64,
    anchor: f64,
    rules: &PhraseRules,
) -> Result<PhraseAnalysis, AnalysisError> {
    if points.is_empty() || duration <= 0.0 || !bpm.is_finite() || bpm <= 0.0 {
        return Err(AnalysisError::InsufficientData {
            what: "phrases".to_string(),
            details: format!("{} trajectory points, bpm {}", points.len(), bpm),
        });
    }

    let bar_secs = BEATS_PER_BAR * 60.0 / bpm;
    let anchor = anchor.clamp(0.0, duration);

    let best = CANDIDATE_BARS
        .iter()
        .filter_map(|&bars| {
            phrase_energies(points, duration, anchor, bars as f64 * bar_secs)
                .map(|energies| (bars, mean_contrast(&energies), energies))
        })
        .fold(None, |best: Option<(u32, f64, Vec<(f64, f64)>)>, candidate| match best {
            Some(current) if current.1 >= candidate.1 => Some(current),
            _ => Some(candidate),
        });

    let Some((phrase_length, contrast, energies)) = best else {
        return Err(AnalysisError::InsufficientData {
            what: "phrases".to_string(),
            details: format!("fewer than two 4-bar phrases fit in {:.1}s at {:.1} BPM", duration - anchor, bpm),
        });
    };

    let mut markers = vec![PhraseMarker {
        time: round2(energies[0].0),
        energy: energies[0].1,
    }];
    markers.extend(energies.windows(2).filter_map(|pair| {
        let novelty = (pair[1].1 - pair[0].1).abs();
        (novelty >= rules.novelty_threshold).then(|| PhraseMarker {
            time: round2(pair[1].0),
            energy: pair[1].1,
        })
    }));

    tracing::debug!(phrase_length, contrast, markers = markers.len(), "Phrases detected");
    Ok(PhraseAnalysis {
        markers,
        phrase_length,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
