// Runs both analysis passes over generated signals and prints what they report

use std::f32::consts::PI;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use dj_analyzer::{
    analysis::{DeepScanAnalyzer, FastScanAnalyzer},
    rules::{AnalyzerSettings, GenreRuleSet},
    SampleBuffer,
};

const SAMPLE_RATE: u32 = 22050;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("🎵 dj-analyzer synthetic probe");

    let rules = GenreRuleSet::builtin()?;
    let settings = AnalyzerSettings::default();
    let mut rng = SmallRng::seed_from_u64(7);

    let probes = [
        ("128 BPM kick over A minor pad", "House", kick_track(&mut rng, 128.0, 60.0)),
        ("90 BPM kick with 2s silent intro", "Hip-Hop", with_silent_intro(kick_track(&mut rng, 90.0, 45.0), 2.0)),
        ("Sustained tone with linear fade", "Jazz", fading_tone(40.0)),
        ("Short jingle", "Pop", kick_track(&mut rng, 120.0, 6.0)),
    ];

    for (name, genre, samples) in probes {
        println!("\n▶ {} ({})", name, genre);
        let buffer = SampleBuffer::mono(SAMPLE_RATE, samples);
        let genre_rules = rules.rules_for_genre(Some(genre));

        let fast = FastScanAnalyzer::analyze(&buffer, &settings, &genre_rules);
        if !fast.analyzed {
            println!("   ⚠️  Not analyzed: {:.1}s is too short", buffer.computed_duration());
            continue;
        }

        println!("   BPM: {:?} (raw {:?})", fast.bpm, fast.raw_bpm);
        println!("   Key: {} (confidence {:.2})", fast.key, fast.key_confidence);
        println!(
            "   Energy {:?}, loudness {} ({}), {:.1} LUFS",
            fast.energy, fast.loudness, fast.gain_recommendation, fast.loudness_lufs
        );
        println!(
            "   Cues: {} → {} ({})",
            fast.cue_in_formatted, fast.cue_out_formatted, fast.cue_description
        );

        let deep = DeepScanAnalyzer::analyze(&buffer, &fast, &settings, &genre_rules);
        println!(
            "   Deep: {} phrase markers every {} bars, {}",
            deep.phrases.len(),
            deep.phrase_length,
            deep.transition_description
        );
        if let Some(drift) = &deep.bpm_drift {
            println!("   Drift: {:.1} → {:.1} BPM", drift.start_bpm, drift.end_bpm);
        }
        println!(
            "   Danceability {}, acousticness {}, instrumentalness {}, liveness {} ({})",
            deep.base.danceability,
            deep.base.acousticness,
            deep.base.instrumentalness,
            deep.base.liveness,
            deep.base.energy_trajectory_desc
        );
    }

    Ok(())
}

/// Decaying low kick on every beat over an A minor triad and a little noise
fn kick_track(rng: &mut SmallRng, bpm: f64, seconds: f64) -> Vec<f32> {
    let beat_interval = 60.0 / bpm;
    let num_samples = (SAMPLE_RATE as f64 * seconds) as usize;

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let pad = [220.0f32, 261.63, 329.63]
                .iter()
                .map(|&freq| (2.0 * PI * freq * t).sin() * 0.08)
                .sum::<f32>();

            let beat_phase = (t as f64 % beat_interval) / beat_interval;
            let kick = if beat_phase < 0.1 {
                let envelope = 1.0 - beat_phase as f32 * 10.0;
                (2.0 * PI * 60.0 * t).sin() * 0.7 * envelope
            } else {
                0.0
            };

            let noise = (rng.gen::<f32>() - 0.5) * 0.02;
            (pad + kick + noise).clamp(-1.0, 1.0)
        })
        .collect()
}

fn with_silent_intro(samples: Vec<f32>, seconds: f64) -> Vec<f32> {
    let silence = (SAMPLE_RATE as f64 * seconds) as usize;
    let mut padded = vec![0.0; silence];
    padded.extend(samples);
    padded
}

/// Full-scale 440 Hz tone for half the track, then a linear fade to silence
fn fading_tone(seconds: f64) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f64 * seconds) as usize;
    let fade_start = num_samples / 2;

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let gain = if i < fade_start {
                1.0
            } else {
                1.0 - (i - fade_start) as f32 / (num_samples - fade_start) as f32
            };
            (2.0 * PI * 440.0 * t).sin() * 0.8 * gain
        })
        .collect()
}
