use crate::error::AudioError;

/// Minimum duration (seconds) a buffer needs before it is analyzed at all
pub const MIN_ANALYSIS_DURATION: f64 = 10.0;

/// Decoded audio handed to the analyzers
///
/// Samples are stored planar (one `Vec<f32>` per channel). The buffer is
/// read-only once constructed; analyzers only borrow it.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    /// Duration in seconds as reported by the decoder, if any
    pub duration: Option<f64>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Per-channel sample data
    channels: Vec<Vec<f32>>,
}

impl SampleBuffer {
    /// Build a buffer from planar channel data
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            duration: None,
            sample_rate,
            channels,
        }
    }

    /// Build a single-channel buffer
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::new(sample_rate, vec![samples])
    }

    /// De-interleave samples (L, R, L, R, ...) into a planar buffer
    pub fn from_interleaved(samples: &[f32], sample_rate: u32, channels: usize) -> Self {
        let channels = channels.max(1);
        let frames = samples.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];

        for frame in samples.chunks_exact(channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                planar[ch].push(sample);
            }
        }

        Self::new(sample_rate, planar)
    }

    /// Attach an explicit duration reported by the decoder
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Number of sample frames (length of the longest channel)
    pub fn length(&self) -> usize {
        self.channels.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Borrow the samples of one channel
    pub fn channel_data(&self, index: usize) -> std::result::Result<&[f32], AudioError> {
        self.channels
            .get(index)
            .map(Vec::as_slice)
            .ok_or(AudioError::InvalidChannel {
                index,
                channels: self.channels.len(),
            })
    }

    /// Duration in seconds: the explicit value if present, else length / sample rate
    pub fn computed_duration(&self) -> f64 {
        if let Some(duration) = self.duration {
            return duration;
        }
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.length() as f64 / self.sample_rate as f64
    }

    /// True when the buffer is long enough to be analyzed
    pub fn is_analyzable(&self) -> bool {
        self.sample_rate > 0 && self.computed_duration() >= MIN_ANALYSIS_DURATION
    }

    /// Get mono mix of all channels
    pub fn mono_samples(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            count => {
                let length = self.length();
                let scale = 1.0 / count as f32;
                (0..length)
                    .map(|i| {
                        let sum: f32 = self
                            .channels
                            .iter()
                            .map(|ch| ch.get(i).copied().unwrap_or(0.0))
                            .sum();
                        sum * scale
                    })
                    .collect()
            }
        }
    }
}
