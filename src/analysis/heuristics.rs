//! Derived 0-100 descriptors: danceability, acousticness, instrumentalness
//! and liveness.
//!
//! Each feature has a fast form, fed only by the scalar energy, and a deep
//! form that also uses the energy trajectory and spectral summary. Both add
//! the genre boost from [`GenreRules`] and the user boost from
//! [`AnalyzerSettings`]. The weights live in the genre rules.

use crate::{
    analysis::energy::TrajectoryProfile,
    dsp::{stats, SpectralSummary},
    rules::{AnalyzerSettings, FeatureRules, GenreRules},
};

/// Stand-in for measurements the fast pass does not take
const FAST_PROXY: f64 = 0.5;

/// Measurements feeding the heuristics, all but `energy` in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicInputs {
    /// Energy, 0-100
    pub energy: f64,
    /// 1 for a perfectly even trajectory, 0 for a wildly varying one
    pub regularity: f64,
    pub flatness: f64,
    pub vocal_ratio: f64,
}

impl HeuristicInputs {
    pub fn fast(energy: Option<u8>, flatness: Option<f64>) -> Self {
        Self {
            energy: energy.map_or(0.0, f64::from),
            regularity: FAST_PROXY,
            flatness: flatness.unwrap_or(FAST_PROXY),
            vocal_ratio: FAST_PROXY,
        }
    }

    /// Inputs from deep measurements; `None` when the trajectory is empty
    pub fn deep(fast_energy: Option<u8>, trajectory: &TrajectoryProfile, spectral: SpectralSummary) -> Option<Self> {
        if trajectory.points.is_empty() {
            return None;
        }

        let scalar = fast_energy.map_or(trajectory.mean, |e| f64::from(e) / 100.0);
        Some(Self {
            energy: ((scalar + trajectory.p75) / 2.0 * 100.0).clamp(0.0, 100.0),
            regularity: 1.0 - (2.0 * trajectory.std_dev).min(1.0),
            flatness: spectral.flatness.clamp(0.0, 1.0),
            vocal_ratio: spectral.vocal_ratio.clamp(0.0, 1.0),
        })
    }
}

/// Deep-pass measurements, borrowed from the deep analyzer
#[derive(Debug, Clone, Copy)]
pub struct DeepInput<'a> {
    pub fast_energy: Option<u8>,
    pub trajectory: &'a TrajectoryProfile,
    pub spectral: SpectralSummary,
}

impl DeepInput<'_> {
    fn inputs(&self) -> Option<HeuristicInputs> {
        HeuristicInputs::deep(self.fast_energy, self.trajectory, self.spectral)
    }
}

fn finish(raw: f64, rules: &FeatureRules, user_boost: f64) -> u8 {
    stats::score(raw + rules.boost + user_boost)
}

fn danceability(inputs: &HeuristicInputs, settings: &AnalyzerSettings, rules: &GenreRules) -> u8 {
    let r = &rules.danceability;
    let raw = r.base
        + r.energy_weight * inputs.energy
        + r.regularity_weight * inputs.regularity * 100.0
        + r.spectral_weight * (1.0 - inputs.flatness) * 100.0;
    finish(raw, r, settings.danceability_boost)
}

fn acousticness(inputs: &HeuristicInputs, settings: &AnalyzerSettings, rules: &GenreRules) -> u8 {
    let r = &rules.acousticness;
    let raw = r.base
        + r.energy_weight * (100.0 - inputs.energy)
        + r.spectral_weight * (1.0 - inputs.flatness) * 100.0
        + r.regularity_weight * inputs.regularity * 100.0;
    finish(raw, r, settings.acousticness_boost)
}

fn instrumentalness(inputs: &HeuristicInputs, settings: &AnalyzerSettings, rules: &GenreRules) -> u8 {
    let r = &rules.instrumentalness;
    let raw = r.base
        + r.spectral_weight * (1.0 - inputs.vocal_ratio) * 100.0
        + r.energy_weight * inputs.energy
        + r.regularity_weight * inputs.regularity * 100.0;
    finish(raw, r, settings.instrumentalness_boost)
}

fn liveness(inputs: &HeuristicInputs, settings: &AnalyzerSettings, rules: &GenreRules) -> u8 {
    let r = &rules.liveness;
    let raw = r.base
        + r.regularity_weight * (1.0 - inputs.regularity) * 100.0
        + r.spectral_weight * inputs.flatness * 100.0
        + r.energy_weight * inputs.energy;
    finish(raw, r, settings.liveness_boost)
}

pub fn danceability_fast(energy: Option<u8>, settings: &AnalyzerSettings, rules: &GenreRules) -> u8 {
    danceability(&HeuristicInputs::fast(energy, None), settings, rules)
}

pub fn danceability_deep(input: &DeepInput<'_>, settings: &AnalyzerSettings, rules: &GenreRules) -> u8 {
    match input.inputs() {
        Some(inputs) => danceability(&inputs, settings, rules),
        None => danceability_fast(input.fast_energy, settings, rules),
    }
}

pub fn acousticness_fast(
    energy: Option<u8>,
    flatness: Option<f64>,
    settings: &AnalyzerSettings,
    rules: &GenreRules,
) -> u8 {
    acousticness(&HeuristicInputs::fast(energy, flatness), settings, rules)
}

pub fn acousticness_deep(input: &DeepInput<'_>, settings: &AnalyzerSettings, rules: &GenreRules) -> u8 {
    match input.inputs() {
        Some(inputs) => acousticness(&inputs, settings, rules),
        None => acousticness_fast(input.fast_energy, None, settings, rules),
    }
}

pub fn instrumentalness_fast(energy: Option<u8>, settings: &AnalyzerSettings, rules: &GenreRules) -> u8 {
    instrumentalness(&HeuristicInputs::fast(energy, None), settings, rules)
}

pub fn instrumentalness_deep(input: &DeepInput<'_>, settings: &AnalyzerSettings, rules: &GenreRules) -> u8 {
    match input.inputs() {
        Some(inputs) => instrumentalness(&inputs, settings, rules),
        None => instrumentalness_fast(input.fast_energy, settings, rules),
    }
}

pub fn liveness_fast(energy: Option<u8>, settings: &AnalyzerSettings, rules: &GenreRules) -> u8 {
    liveness(&HeuristicInputs::fast(energy, None), settings, rules)
}

pub fn liveness_deep(input: &DeepInput<'_>, settings: &AnalyzerSettings, rules: &GenreRules) -> u8 {
    match input.inputs() {
        Some(inputs) => liveness(&inputs, settings, rules),
        None => liveness_fast(input.fast_energy, settings, rules),
    }
}
