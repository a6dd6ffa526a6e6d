//! Small descriptive statistics over envelope values.

pub fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

/// Population variance
pub fn variance(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|&v| (v as f64 - m).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f32]) -> f64 {
    variance(values).sqrt()
}

/// Percentile by nearest rank on a sorted copy (`p` in 0..=100)
pub fn percentile(values: &[f32], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = ((p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)] as f64
}

/// Clamp to [0, 100] and round to an integer score
pub fn score(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.clamp(0.0, 100.0).round() as u8
}
