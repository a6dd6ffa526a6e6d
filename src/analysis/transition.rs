//! How hard a track is to mix in and out of, from the spread of its energy.

use crate::{
    dsp::stats,
    error::AnalysisError,
    rules::{AnalyzerSettings, TransitionRules},
};

pub const DEFAULT_DIFFICULTY: u8 = 50;

/// Difficulty score and its description
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionAssessment {
    pub difficulty: u8,
    pub description: String,
}

impl Default for TransitionAssessment {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            description: describe(DEFAULT_DIFFICULTY),
        }
    }
}

pub fn describe(difficulty: u8) -> String {
    match difficulty {
        d if d < 35 => "Easy transition",
        d if d < 65 => "Moderate transition",
        _ => "Challenging transition",
    }
    .to_string()
}

/// Mean standard deviation over consecutive windows of `window` points
fn windowed_spread(points: &[f32], window: usize) -> f64 {
    let spreads: Vec<f32> = points
        .chunks(window.max(2))
        .filter(|chunk| chunk.len() >= 2)
        .map(|chunk| stats::std_dev(chunk) as f32)
        .collect();
    if spreads.is_empty() {
        return stats::std_dev(points);
    }
    stats::mean(&spreads)
}

/// Score transition difficulty from a peak-normalized trajectory
///
/// Energy that swings within the intro and outro regions, or across the
/// whole track, makes beatmatched blending harder. The spread is scaled to
/// 0-100 and reduced by the user's softener.
pub fn assess_transition(
    points: &[f32],
    duration: f64,
    settings: &AnalyzerSettings,
    rules: &TransitionRules,
) -> Result<TransitionAssessment, AnalysisError> {
    if points.len() < 2 || duration <= 0.0 {
        return Err(AnalysisError::InsufficientData {
            what: "transition difficulty".to_string(),
            details: format!("{} trajectory points", points.len()),
        });
    }

    let per_second = points.len() as f64 / duration;
    let window = ((rules.window_sec * per_second).round() as usize).max(2);
    let region = ((rules.region_sec * per_second).round() as usize).clamp(2, points.len());

    let intro = windowed_spread(&points[..region], window);
    let outro = windowed_spread(&points[points.len() - region..], window);
    let whole = windowed_spread(points, window);

    // The std-dev of values in [0, 1] is at most 0.5
    let spread = (intro + outro + whole) / 3.0;
    let difficulty = stats::score(spread * 200.0 - settings.transition_softener);

    tracing::debug!(intro, outro, whole, difficulty, "Transition difficulty");
    Ok(TransitionAssessment {
        difficulty,
        description: describe(difficulty),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::GenreRules;

    #[test]
    fn test_steady_track_is_easy() {
        let points = vec![0.8f32; 1000];
        let result = assess_transition(
            &points,
            200.0,
            &AnalyzerSettings::default(),
            &GenreRules::default().transition,
        )
        .unwrap();
        assert_eq!(result.difficulty, 0);
        assert_eq!(result.description, "Easy transition");
    }

    #[test]
    fn test_erratic_track_is_challenging() {
        let points: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        let result = assess_transition(
            &points,
            200.0,
            &AnalyzerSettings::default(),
            &GenreRules::default().transition,
        )
        .unwrap();
        assert!(result.difficulty >= 65);
        assert_eq!(result.description, "Challenging transition");
    }

    #[test]
    fn test_bands_and_default() {
        assert_eq!(describe(34), "Easy transition");
        assert_eq!(describe(35), "Moderate transition");
        assert_eq!(describe(65), "Challenging transition");
        let default = TransitionAssessment::default();
        assert_eq!(default.difficulty, 50);
        assert_eq!(default.description, "Moderate transition");
    }

    #[test]
    fn test_too_few_points() {
        assert!(assess_transition(&[0.5], 10.0, &AnalyzerSettings::default(), &GenreRules::default().transition).is_err());
    }
}
