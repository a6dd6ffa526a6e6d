//! Mix-in / mix-out cue points from intro and outro silence, and a readable
//! description of how a track starts and ends.

use serde::{Deserialize, Serialize};

use crate::{
    analysis::energy::rms,
    dsp::format_cue_time,
    rules::{AnalyzerSettings, CueRules},
};

/// Samples at the very start checked when no intro silence was found
const START_PROBE_SAMPLES: usize = 1000;
const START_MARGIN_SECS: f64 = 0.1;
const END_MARGIN_SECS: f64 = 1.0;
const MIN_CUE_GAP_SECS: f64 = 1.0;
const TAIL_GUARD_SECS: f64 = 0.1;

const FADE_SCAN_SECS: f64 = 15.0;
const FADE_WINDOW_SECS: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct CueOptions {
    pub silence_threshold_db: f64,
    pub min_silence_sec: f64,
    pub max_intro_scan_sec: f64,
    pub max_outro_scan_sec: f64,
}

impl Default for CueOptions {
    fn default() -> Self {
        Self {
            silence_threshold_db: -40.0,
            min_silence_sec: 0.3,
            max_intro_scan_sec: 10.0,
            max_outro_scan_sec: 10.0,
        }
    }
}

impl CueOptions {
    pub fn from_settings(settings: &AnalyzerSettings, rules: &CueRules) -> Self {
        Self {
            silence_threshold_db: settings.silence_threshold_db,
            min_silence_sec: rules.min_silence_sec,
            max_intro_scan_sec: rules.max_intro_scan_sec,
            max_outro_scan_sec: rules.max_outro_scan_sec,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CuePoints {
    pub cue_in: f64,
    pub cue_out: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Find where the music starts and stops
///
/// The intro scan takes the end of the first silence run of at least
/// `min_silence_sec`; the outro scan mirrors it from the end. Without intro
/// silence a 0.1 s margin is used unless the track starts silent, and without
/// outro silence the cue out sits 1 s before the end.
pub fn detect_cue_points(mono: &[f32], sample_rate: u32, duration: f64, options: &CueOptions) -> CuePoints {
    if mono.is_empty() || sample_rate == 0 {
        return CuePoints {
            cue_in: 0.0,
            cue_out: duration.max(0.0),
        };
    }

    let sr = sample_rate as f64;
    let threshold = 10f64.powf(options.silence_threshold_db / 20.0);
    let silent = |sample: f32| (sample.abs() as f64) < threshold;
    let min_silence = (options.min_silence_sec * sr).floor() as usize;

    let intro_scan = ((options.max_intro_scan_sec * sr).floor() as usize).min(mono.len());
    let mut cue_in = None;
    let mut run = 0usize;
    for (i, &sample) in mono[..intro_scan].iter().enumerate() {
        if silent(sample) {
            run += 1;
        } else {
            if run >= min_silence && run > 0 {
                cue_in = Some(i as f64 / sr);
                break;
            }
            run = 0;
        }
    }

    let outro_start = mono.len().saturating_sub((options.max_outro_scan_sec * sr).floor() as usize);
    let mut cue_out = None;
    run = 0;
    for i in (outro_start..mono.len()).rev() {
        if silent(mono[i]) {
            run += 1;
        } else {
            if run >= min_silence && run > 0 {
                cue_out = Some((i + 1) as f64 / sr);
                break;
            }
            run = 0;
        }
    }

    let cue_in = cue_in.unwrap_or_else(|| {
        let probe = &mono[..START_PROBE_SAMPLES.min(mono.len())];
        if probe.iter().any(|&s| (s.abs() as f64) > threshold) {
            START_MARGIN_SECS
        } else {
            0.0
        }
    });
    let cue_out = cue_out.unwrap_or_else(|| (duration - END_MARGIN_SECS).max(0.0));

    let cue_in = round2(cue_in).min((duration - MIN_CUE_GAP_SECS - TAIL_GUARD_SECS).max(0.0));
    let cue_out = round2(cue_out)
        .min(duration - TAIL_GUARD_SECS)
        .max(cue_in + MIN_CUE_GAP_SECS);

    CuePoints { cue_in, cue_out }
}

/// Start time of a fade-out in the 15 s before `cue_out`, if any
///
/// Non-overlapping 0.5 s windows are scanned for one above half the segment
/// peak followed by three strictly decreasing windows. The fade starts at
/// the first decreasing window.
pub fn detect_fade_start(mono: &[f32], sample_rate: u32, cue_out: f64) -> Option<f64> {
    if sample_rate == 0 || cue_out <= 0.0 {
        return None;
    }

    let sr = sample_rate as f64;
    let scan_start = ((cue_out - FADE_SCAN_SECS.min(cue_out)) * sr).floor() as usize;
    let scan_end = ((cue_out * sr).floor() as usize).min(mono.len());
    let window = ((FADE_WINDOW_SECS * sr).floor() as usize).max(1);

    let (times, energies): (Vec<f64>, Vec<f64>) = (scan_start..scan_end)
        .step_by(window)
        .map(|start| {
            let end = (start + window).min(mono.len());
            (start as f64 / sr, rms(&mono[start..end]))
        })
        .unzip();

    if energies.len() < 4 {
        return None;
    }

    let peak = energies.iter().copied().fold(0.0f64, f64::max);
    energies
        .windows(4)
        .position(|w| w[0] > peak * 0.5 && w[0] > w[1] && w[1] > w[2] && w[2] > w[3])
        .map(|i| times[i + 1])
}

/// Human-readable summary of the intro and outro, e.g.
/// `"brief intro, full entry at 0:01.5, ends at 3:20.0, brief outro"`
pub fn generate_cue_description(cues: &CuePoints, duration: f64, mono: &[f32], sample_rate: u32) -> String {
    let mut parts = Vec::new();

    let cue_in = cues.cue_in;
    parts.push(if cue_in < 0.5 {
        "immediate entry".to_string()
    } else if cue_in < 2.0 {
        format!("brief intro, full entry at {}", format_cue_time(cue_in))
    } else if cue_in < 5.0 {
        format!("full entry at {} but mixable", format_cue_time(cue_in))
    } else {
        format!("extended intro, full entry at {}", format_cue_time(cue_in))
    });

    let until_end = duration - cues.cue_out;
    let fade = detect_fade_start(mono, sample_rate, cues.cue_out).filter(|&start| start < cues.cue_out);

    match fade {
        Some(fade_start) => {
            parts.push(format!("song begins fade out at {}", format_cue_time(fade_start)));
            parts.push(format!("ends at {}", format_cue_time(cues.cue_out)));
            parts.push(
                if until_end > 5.0 {
                    "easy mix on fade out"
                } else if until_end > 2.0 {
                    "mixable fade out"
                } else {
                    "quick fade"
                }
                .to_string(),
            );
        }
        None => parts.push(if until_end < 1.0 {
            "plays to end".to_string()
        } else if until_end < 3.0 {
            format!("ends at {}, brief outro", format_cue_time(cues.cue_out))
        } else {
            format!("ends at {}, extended outro", format_cue_time(cues.cue_out))
        }),
    }

    parts.join(", ")
}
