//! Windowed RMS envelopes, peak picking and interval histograms.

use std::collections::BTreeMap;

/// Layout of a windowed envelope: window length and hop, both in samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeLayout {
    pub window: usize,
    pub hop: usize,
    pub sample_rate: u32,
}

impl EnvelopeLayout {
    /// Window of `window_ms` with a hop of `hop_ratio` × window
    pub fn new(sample_rate: u32, window_ms: f64, hop_ratio: f64) -> Self {
        let window = ((sample_rate as f64 * window_ms) / 1000.0).floor().max(1.0) as usize;
        let hop = ((window as f64) * hop_ratio).floor().max(1.0) as usize;
        Self {
            window,
            hop,
            sample_rate,
        }
    }

    /// Seconds between consecutive envelope points
    pub fn hop_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.hop as f64 / self.sample_rate as f64
    }

    /// Envelope frames covering `ms` milliseconds (at least one)
    pub fn frames_for_ms(&self, ms: f64) -> usize {
        let hop_ms = self.hop_seconds() * 1000.0;
        if hop_ms <= 0.0 {
            return 1;
        }
        ((ms / hop_ms).floor() as usize).max(1)
    }
}

/// RMS of each full window; trailing partial windows are dropped
pub fn rms_envelope(samples: &[f32], layout: EnvelopeLayout) -> Vec<f32> {
    if samples.len() < layout.window {
        return Vec::new();
    }

    samples
        .windows(layout.window)
        .step_by(layout.hop)
        .map(|window| {
            let sum: f64 = window.iter().map(|&s| (s as f64) * (s as f64)).sum();
            (sum / window.len() as f64).sqrt() as f32
        })
        .collect()
}

/// Reduce an envelope to at most `max_points` by averaging equal-sized groups
pub fn downsample(envelope: &[f32], max_points: usize) -> Vec<f32> {
    if max_points == 0 || envelope.len() <= max_points {
        return envelope.to_vec();
    }

    let group = envelope.len().div_ceil(max_points);
    envelope
        .chunks(group)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect()
}

/// Divide by the envelope's own peak; an all-zero envelope stays zero
pub fn peak_normalize(envelope: &[f32]) -> Vec<f32> {
    let peak = envelope.iter().copied().fold(0.0f32, f32::max).max(1e-9);
    envelope.iter().map(|&v| v / peak).collect()
}

/// Indices of local maxima above `mean × (1 + sensitivity)`
///
/// After a peak is accepted the scan jumps ahead by `min_distance` frames, so
/// accepted peaks are always at least that far apart.
pub fn find_peaks(envelope: &[f32], min_distance: usize, sensitivity: f64) -> Vec<usize> {
    let len = envelope.len();
    if len < 3 {
        return Vec::new();
    }

    let min_distance = min_distance.max(1);
    let mean = envelope.iter().map(|&v| v as f64).sum::<f64>() / len as f64;
    let threshold = mean * (1.0 + sensitivity);

    let mut peaks: Vec<usize> = Vec::new();
    let mut i = 1;
    while i < len - 1 {
        let value = envelope[i] as f64;
        if value > threshold && envelope[i] > envelope[i - 1] && envelope[i] >= envelope[i + 1] {
            let far_enough = peaks.last().map_or(true, |&last| i - last >= min_distance);
            if far_enough {
                peaks.push(i);
                i += min_distance;
                continue;
            }
        }
        i += 1;
    }

    peaks
}

/// Distances between consecutive peak indices
pub fn peak_intervals(peaks: &[usize]) -> Vec<usize> {
    peaks.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

/// Convert frame intervals to BPM values using the envelope hop
pub fn intervals_to_bpms(intervals: &[usize], hop_seconds: f64) -> Vec<f64> {
    intervals
        .iter()
        .filter(|&&iv| iv > 0)
        .map(|&iv| 60.0 / (iv as f64 * hop_seconds))
        .filter(|bpm| bpm.is_finite())
        .collect()
}

/// Most frequent value after bucketing to multiples of `tolerance`
///
/// Returns the rounded mean of the winning bucket. Ties go to the bucket
/// closest to 120. Empty input yields 120.
pub fn most_common(values: &[f64], tolerance: f64) -> f64 {
    if values.is_empty() {
        return 120.0;
    }

    let tolerance = if tolerance > 0.0 { tolerance } else { 1.0 };
    let mut buckets: BTreeMap<i64, (usize, f64)> = BTreeMap::new();
    for &value in values {
        let key = (value / tolerance).round() as i64;
        let bucket = buckets.entry(key).or_insert((0, 0.0));
        bucket.0 += 1;
        bucket.1 += value;
    }

    let mut best: f64 = 120.0;
    let mut best_count = 0;
    for &(count, sum) in buckets.values() {
        let center = sum / count as f64;
        if count > best_count || (count == best_count && (center - 120.0).abs() < (best - 120.0).abs()) {
            best_count = count;
            best = center;
        }
    }

    best.round()
}

/// Tempo from envelope peak intervals: the bucketed mode of interval BPMs
pub fn intervals_to_tempo(intervals: &[usize], hop_seconds: f64) -> f64 {
    let bpms = intervals_to_bpms(intervals, hop_seconds);
    most_common(&bpms, 3.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_window_and_hop() {
        let layout = EnvelopeLayout::new(44100, 100.0, 0.25);
        assert_eq!(layout.window, 4410);
        assert_eq!(layout.hop, 1102);
        assert_eq!(layout.frames_for_ms(200.0), 8);
    }

    #[test]
    fn test_rms_envelope_of_constant_signal() {
        let layout = EnvelopeLayout::new(1000, 100.0, 0.5);
        let envelope = rms_envelope(&vec![0.5; 1000], layout);
        assert_eq!(envelope.len(), 19);
        assert!(envelope.iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_find_peaks_respects_spacing() {
        let mut envelope = vec![0.0f32; 40];
        for i in [5, 7, 20, 30] {
            envelope[i] = 1.0;
        }
        let peaks = find_peaks(&envelope, 4, 0.3);
        assert_eq!(peaks, vec![5, 20, 30]);
    }

    #[test]
    fn test_find_peaks_too_short() {
        assert!(find_peaks(&[1.0, 2.0], 1, 0.3).is_empty());
    }

    #[test]
    fn test_most_common_prefers_120_on_ties() {
        assert_eq!(most_common(&[90.0, 120.0], 3.0), 120.0);
        assert_eq!(most_common(&[], 3.0), 120.0);
        assert_eq!(most_common(&[128.2, 127.9, 100.0], 3.0), 128.0);
    }

    #[test]
    fn test_downsample_bounds_length() {
        let envelope: Vec<f32> = (0..5000).map(|i| i as f32).collect();
        let reduced = downsample(&envelope, 2000);
        assert!(reduced.len() <= 2000);
        assert_eq!(downsample(&envelope[..10], 2000).len(), 10);
    }
}
