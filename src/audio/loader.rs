use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::types::SampleBuffer;
use crate::error::AudioError;

/// Port that turns a track identifier into decoded samples
///
/// Implementations are called from a blocking thread. An `Err` means the
/// track could not be decoded; silent audio is a valid `Ok` buffer.
pub trait BufferLoader: Send + Sync + 'static {
    fn load(&self, track_id: &str) -> Result<SampleBuffer, AudioError>;
}

/// Loader that treats track ids as file paths (optionally under a library root)
#[derive(Debug, Clone, Default)]
pub struct FileBufferLoader {
    root: Option<PathBuf>,
}

impl FileBufferLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative track ids against `root`
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, track_id: &str) -> PathBuf {
        let path = Path::new(track_id);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Detect audio format from file extension
    pub fn detect_format<P: AsRef<Path>>(path: P) -> Option<String> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    /// Check if a file format is supported
    pub fn is_format_supported(extension: &str) -> bool {
        matches!(
            extension.to_lowercase().as_str(),
            "wav" | "mp3" | "flac" | "ogg" | "m4a" | "aac"
        )
    }

    /// Load WAV files using the hound crate (most reliable for WAV)
    fn load_wav(path: &Path, track_id: &str) -> Result<SampleBuffer, AudioError> {
        let failed = |reason: String| AudioError::LoadFailed {
            track_id: track_id.to_string(),
            reason,
        };

        let reader = hound::WavReader::open(path).map_err(|e| failed(e.to_string()))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| failed(e.to_string()))?,
            hound::SampleFormat::Int => {
                let bit_depth = spec.bits_per_sample;
                reader
                    .into_samples::<i32>()
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| failed(e.to_string()))?
                    .into_iter()
                    .map(|sample| Self::int_to_float(sample, bit_depth))
                    .collect()
            }
        };

        let buffer = SampleBuffer::from_interleaved(&samples, spec.sample_rate, spec.channels as usize);
        let duration = buffer.computed_duration();
        Ok(buffer.with_duration(duration))
    }

    /// Load compressed formats using Symphonia
    fn load_with_symphonia(path: &Path, track_id: &str) -> Result<SampleBuffer, AudioError> {
        let failed = |reason: String| AudioError::LoadFailed {
            track_id: track_id.to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| failed(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(|e| failed(e.to_string()))?;

        let mut format = probed.format;

        // Find the first audio track with a known (decodable) codec
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| failed("no decodable audio track".to_string()))?;

        let track_id_num = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params.sample_rate.ok_or_else(|| AudioError::InvalidParameters {
            details: "No sample rate found".to_string(),
        })?;
        let channels = codec_params
            .channels
            .ok_or_else(|| AudioError::InvalidParameters {
                details: "No channel information found".to_string(),
            })?
            .count();

        let dec_opts: DecoderOptions = Default::default();
        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &dec_opts)
            .map_err(|e| failed(e.to_string()))?;

        let mut planar: Vec<Vec<f32>> = vec![Vec::new(); channels];

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                // End of stream surfaces as an IO error
                Err(_) => break,
            };

            while !format.metadata().is_latest() {
                format.metadata().pop();
            }

            if packet.track_id() != track_id_num {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => Self::append_planar(&decoded, &mut planar),
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(_) => break,
            }
        }

        let buffer = SampleBuffer::new(sample_rate, planar);
        let duration = buffer.computed_duration();
        Ok(buffer.with_duration(duration))
    }

    /// Convert integer sample to float (-1.0 to 1.0)
    fn int_to_float(sample: i32, bit_depth: u16) -> f32 {
        match bit_depth {
            8 => (sample as f32 - 128.0) / 128.0,
            16 => sample as f32 / 32768.0,
            24 => sample as f32 / 8388608.0,
            32 => sample as f32 / 2147483648.0,
            _ => sample as f32 / 32768.0, // Default to 16-bit
        }
    }

    /// Append a decoded Symphonia buffer to per-channel vectors
    fn append_planar(buffer: &AudioBufferRef, output: &mut [Vec<f32>]) {
        match buffer {
            AudioBufferRef::F32(buf) => {
                for (ch, out) in output.iter_mut().enumerate().take(buf.spec().channels.count()) {
                    out.extend_from_slice(buf.chan(ch));
                }
            }
            AudioBufferRef::F64(buf) => {
                for (ch, out) in output.iter_mut().enumerate().take(buf.spec().channels.count()) {
                    out.extend(buf.chan(ch).iter().map(|&s| s as f32));
                }
            }
            AudioBufferRef::S32(buf) => {
                for (ch, out) in output.iter_mut().enumerate().take(buf.spec().channels.count()) {
                    out.extend(buf.chan(ch).iter().map(|&s| s as f32 / 2147483648.0));
                }
            }
            AudioBufferRef::S16(buf) => {
                for (ch, out) in output.iter_mut().enumerate().take(buf.spec().channels.count()) {
                    out.extend(buf.chan(ch).iter().map(|&s| s as f32 / 32768.0));
                }
            }
            _ => {
                tracing::warn!("Unsupported sample format in decoded packet, skipping");
            }
        }
    }
}

impl BufferLoader for FileBufferLoader {
    fn load(&self, track_id: &str) -> Result<SampleBuffer, AudioError> {
        let path = self.resolve(track_id);
        let extension = Self::detect_format(&path).unwrap_or_default();

        tracing::debug!(track_id, path = %path.display(), "Decoding audio file");

        match extension.as_str() {
            "wav" => Self::load_wav(&path, track_id),
            "mp3" | "flac" | "ogg" | "m4a" | "aac" => Self::load_with_symphonia(&path, track_id),
            _ => Err(AudioError::UnsupportedFormat { format: extension }),
        }
    }
}

/// Loader backed by pre-decoded buffers, keyed by track id
#[derive(Default)]
pub struct MemoryBufferLoader {
    buffers: RwLock<HashMap<String, SampleBuffer>>,
}

impl MemoryBufferLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&self, track_id: S, buffer: SampleBuffer) {
        if let Ok(mut buffers) = self.buffers.write() {
            buffers.insert(track_id.into(), buffer);
        }
    }
}

impl BufferLoader for MemoryBufferLoader {
    fn load(&self, track_id: &str) -> Result<SampleBuffer, AudioError> {
        let buffers = self.buffers.read().map_err(|_| AudioError::LoadFailed {
            track_id: track_id.to_string(),
            reason: "buffer map poisoned".to_string(),
        })?;

        buffers.get(track_id).cloned().ok_or_else(|| AudioError::LoadFailed {
            track_id: track_id.to_string(),
            reason: "unknown track".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_format_detection() {
        assert_eq!(FileBufferLoader::detect_format("test.wav"), Some("wav".to_string()));
        assert_eq!(FileBufferLoader::detect_format("test.MP3"), Some("mp3".to_string()));
        assert_eq!(FileBufferLoader::detect_format("test"), None);
    }

    #[test]
    fn test_format_support() {
        assert!(FileBufferLoader::is_format_supported("wav"));
        assert!(FileBufferLoader::is_format_supported("FLAC"));
        assert!(!FileBufferLoader::is_format_supported("xyz"));
    }

    #[test]
    fn test_int_to_float_conversion() {
        assert_eq!(FileBufferLoader::int_to_float(0, 16), 0.0);
        assert_eq!(FileBufferLoader::int_to_float(-32768, 16), -1.0);
        assert_eq!(FileBufferLoader::int_to_float(128, 8), 0.0);
        assert_eq!(FileBufferLoader::int_to_float(0, 8), -1.0);
    }

    #[test]
    fn test_unsupported_format() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("test.xyz");
        let mut file = File::create(&file_path).unwrap();
        file.write_all(b"dummy content").unwrap();

        let loader = FileBufferLoader::new();
        match loader.load(file_path.to_str().unwrap()) {
            Err(AudioError::UnsupportedFormat { format }) => assert_eq!(format, "xyz"),
            other => panic!("Expected UnsupportedFormat error, got {:?}", other.map(|b| b.length())),
        }
    }

    #[test]
    fn test_wav_roundtrip_through_root() {
        let temp_dir = tempdir().unwrap();
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(temp_dir.path().join("tone.wav"), spec).unwrap();
        for i in 0..8000 {
            let value = if i % 2 == 0 { 16384i16 } else { -16384i16 };
            writer.write_sample(value).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let loader = FileBufferLoader::with_root(temp_dir.path());
        let buffer = loader.load("tone.wav").unwrap();

        assert_eq!(buffer.number_of_channels(), 2);
        assert_eq!(buffer.length(), 8000);
        assert!((buffer.computed_duration() - 1.0).abs() < 1e-9);
        assert_eq!(buffer.channel_data(0).unwrap()[0], 0.5);
    }

    #[test]
    fn test_memory_loader_distinguishes_missing_tracks() {
        let loader = MemoryBufferLoader::new();
        loader.insert("silent", SampleBuffer::mono(44100, vec![0.0; 44100]));

        assert!(loader.load("silent").is_ok());
        assert!(matches!(loader.load("missing"), Err(AudioError::LoadFailed { .. })));
    }
}
