// End-to-end scenarios through the public API

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;
use tokio::sync::mpsc;

use dj_analyzer::{
    analysis::AnalysisStatus,
    error::AudioError,
    rules::{JsonFilePersistence, SettingsOverride},
    AnalysisCoordinator, AnalysisEvent, AnalyzerSettings, BufferLoader, ConfigStore, CoordinatorConfig,
    FastOutcome, FastScanAnalyzer, FileBufferLoader, GenreRuleSet, GenreRules, MemoryBufferLoader, SampleBuffer,
};

const SR: u32 = 44100;

fn seconds(s: f64) -> usize {
    (s * SR as f64) as usize
}

fn fast(buffer: &SampleBuffer) -> dj_analyzer::FastResult {
    FastScanAnalyzer::analyze(buffer, &AnalyzerSettings::default(), &GenreRules::default())
}

fn assert_invariants(result: &dj_analyzer::FastResult, duration: f64) {
    for score in [
        result.loudness,
        result.danceability,
        result.acousticness,
        result.instrumentalness,
        result.liveness,
    ] {
        assert!(score <= 100);
    }
    if let Some(energy) = result.energy {
        assert!(energy <= 100);
    }
    assert!((0.0..=1.0).contains(&result.key_confidence));
    assert!(result.energy_trajectory.iter().all(|&v| (0.0..=1.0).contains(&v)));
    assert!(result.cue_in >= 0.0);
    assert!(result.cue_out - result.cue_in >= 1.0 - 1e-9);
    assert!(result.cue_out <= duration - 0.1 + 1e-9);
}

#[test]
fn impulse_train_reads_as_120_bpm() {
    let mut samples = vec![0.0f32; seconds(30.0)];
    for i in (0..samples.len()).step_by(seconds(0.5)) {
        samples[i] = 1.0;
    }

    let result = fast(&SampleBuffer::mono(SR, samples));
    assert!(result.analyzed);
    let bpm = result.bpm.unwrap();
    assert!((bpm.round() - 120.0).abs() <= 3.0, "bpm {}", bpm);
    assert_invariants(&result, 30.0);
}

#[test]
fn two_seconds_of_silence_before_the_music() {
    let mut samples = vec![0.0f32; seconds(30.0)];
    for sample in &mut samples[seconds(2.0)..] {
        *sample = 0.5;
    }

    let result = fast(&SampleBuffer::mono(SR, samples));
    assert!((result.cue_in - 2.0).abs() <= 0.1);
    assert_eq!(
        result.cue_description,
        "full entry at 0:02.0 but mixable, ends at 0:29.0, brief outro"
    );
    assert_invariants(&result, 30.0);
}

#[test]
fn linear_decay_is_reported_as_a_fade() {
    let total = seconds(30.0);
    let decay_start = seconds(24.0);
    let samples: Vec<f32> = (0..total)
        .map(|i| {
            if i < decay_start {
                0.5
            } else {
                0.5 * (1.0 - (i - decay_start) as f32 / (total - decay_start) as f32)
            }
        })
        .collect();

    let result = fast(&SampleBuffer::mono(SR, samples));
    assert!(result
        .cue_description
        .starts_with("immediate entry, song begins fade out at 0:24.0"));
    assert_invariants(&result, 30.0);
}

#[test]
fn short_buffers_get_neutral_defaults() {
    let result = fast(&SampleBuffer::mono(SR, vec![0.4; seconds(9.0)]));

    assert!(!result.analyzed);
    assert_eq!(result.status, AnalysisStatus::Fast);
    assert_eq!(result.bpm, None);
    assert_eq!(result.raw_bpm, None);
    assert_eq!(result.key, "");
    assert_eq!(result.energy, None);
    assert_eq!(result.gain_recommendation, "+0dB");
    assert_eq!(result.loudness_lufs, -14.0);
    assert_eq!(result.loudness_range, 4.0);
    assert_eq!((result.danceability, result.acousticness), (0, 50));
    assert_eq!((result.instrumentalness, result.liveness), (0, 10));
    assert_eq!(result.cue_in, 0.0);
    assert_eq!(result.cue_out, 9.0);
    assert_eq!(result.cue_out_formatted, "0:09");
    assert!(result.energy_trajectory.is_empty());

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["bpm"], serde_json::Value::Null);
    assert_eq!(json["loudnessLUFS"], -14.0);
}

#[test]
fn config_survives_export_factory_reset_and_import() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("analyzer.json");
    let store = ConfigStore::open(Arc::new(JsonFilePersistence::new(&path)));

    let mut techno = SettingsOverride::new();
    techno.insert("energyScalingFactor".to_string(), json!(1.1));
    techno.insert("danceabilityBoost".to_string(), json!(14));
    store.set_override("Techno", techno).unwrap();

    let before = store.get_config_for_genre(Some("Minimal Techno"), None);
    assert_eq!(before.energy_scaling_factor, 1.1);
    let exported = store.export_config().unwrap();

    store.reset_to_factory_defaults(true).unwrap();
    assert_eq!(
        store.get_config_for_genre(Some("Minimal Techno"), None),
        AnalyzerSettings::default()
    );

    store.import_config(&exported).unwrap();
    assert_eq!(store.get_config_for_genre(Some("Minimal Techno"), None), before);

    // Everything was persisted along the way
    let reopened = ConfigStore::open(Arc::new(JsonFilePersistence::new(&path)));
    assert_eq!(reopened.get_config_for_genre(Some("Minimal Techno"), None), before);
    assert!(reopened.history().len() >= 3);
}

/// Loader that blocks before delegating
struct SlowLoader {
    delay: Duration,
    inner: MemoryBufferLoader,
}

impl BufferLoader for SlowLoader {
    fn load(&self, track_id: &str) -> Result<SampleBuffer, AudioError> {
        std::thread::sleep(self.delay);
        self.inner.load(track_id)
    }
}

fn pulses(sample_rate: u32, seconds: f64) -> Vec<f32> {
    let len = (sample_rate as f64 * seconds) as usize;
    let beat = sample_rate as usize / 2;
    (0..len).map(|i| if i % beat < 400 { 0.8 } else { 0.05 }).collect()
}

#[tokio::test]
async fn resubmitting_a_running_track_is_refused() {
    let inner = MemoryBufferLoader::new();
    inner.insert("track", SampleBuffer::mono(8000, pulses(8000, 12.0)));
    let coordinator = AnalysisCoordinator::new(
        Arc::new(SlowLoader {
            delay: Duration::from_millis(200),
            inner,
        }),
        Arc::new(ConfigStore::in_memory()),
        Arc::new(GenreRuleSet::builtin().unwrap()),
        CoordinatorConfig {
            load_timeout: Duration::from_secs(5),
            deep_task_delay: Duration::from_millis(1),
        },
    );

    let (first, second) = tokio::join!(
        coordinator.submit_fast("track", Some("Techno")),
        coordinator.submit_fast("track", Some("Techno"))
    );
    assert!(matches!(first.unwrap(), FastOutcome::Completed(_)));
    assert_eq!(second.unwrap(), FastOutcome::AlreadyRunning);
    assert!(matches!(
        coordinator.submit_fast("track", Some("Techno")).await.unwrap(),
        FastOutcome::Completed(_)
    ));
}

#[tokio::test]
async fn wav_file_goes_through_both_passes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pulses.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for sample in pulses(8000, 12.0) {
        let value = (sample * i16::MAX as f32) as i16;
        writer.write_sample(value).unwrap();
        writer.write_sample(value).unwrap();
    }
    writer.finalize().unwrap();

    let coordinator = AnalysisCoordinator::new(
        Arc::new(FileBufferLoader::with_root(dir.path())),
        Arc::new(ConfigStore::in_memory()),
        Arc::new(GenreRuleSet::builtin().unwrap()),
        CoordinatorConfig {
            load_timeout: Duration::from_secs(10),
            deep_task_delay: Duration::from_millis(1),
        },
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    coordinator.subscribe("pulses.wav", move |event| {
        let _ = tx.send(event.clone());
    });

    let outcome = coordinator.submit_fast("pulses.wav", None).await.unwrap();
    let FastOutcome::Completed(result) = outcome else {
        panic!("expected a completed fast pass");
    };
    assert!(result.analyzed);
    assert_invariants(&result, 12.0);

    let mut kinds = Vec::new();
    while kinds.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if let AnalysisEvent::DeepDone { result, .. } = &event {
            assert_eq!(result.base.status, AnalysisStatus::Deep);
            assert!(result.transition_difficulty.unwrap() <= 100);
        }
        kinds.push(event.kind());
    }
    assert_eq!(kinds, vec!["FAST_DONE", "DEEP_DONE"]);
}
