//! Time formatting for cue points and durations.

/// Format seconds as `M:SS` or `H:MM:SS`; negative or non-finite input gives `0:00`
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }

    let total = seconds.floor() as u64;
    let s = total % 60;
    let m = total / 60;
    let h = m / 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m % 60, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Format seconds with tenths, `M:SS.T` or `H:MM:SS.T`
pub fn format_cue_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00.0".to_string();
    }

    let total = seconds.floor();
    let tenths = ((seconds - total) * 10.0).floor() as u64;
    let base = format_time(total);
    format!("{}.{}", base, tenths.min(9))
}
