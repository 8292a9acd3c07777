//! Progress, speed and ETA estimation for uploads

use serde::{Deserialize, Serialize};

/// Speed label used when throughput is zero or unknown
pub const SPEED_ZERO: &str = "0 B/s";

/// ETA label used when no finite estimate exists
pub const ETA_CALCULATING: &str = "calculating…";

const SPEED_UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];

/// A `(timestamp, bytes loaded)` observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSample {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Cumulative bytes acknowledged
    pub bytes_loaded: u64,
}

impl ProgressSample {
    pub fn new(timestamp_ms: i64, bytes_loaded: u64) -> Self {
        Self {
            timestamp_ms,
            bytes_loaded,
        }
    }

    /// Sample taken now
    pub fn now(bytes_loaded: u64) -> Self {
        Self::new(chrono::Utc::now().timestamp_millis(), bytes_loaded)
    }
}

/// Estimate derived from two consecutive samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEstimate {
    /// Progress percentage (0 - 100)
    pub percent: u8,
    /// Bytes per second, when it could be computed
    pub throughput: Option<f64>,
    pub speed_label: String,
    pub eta_label: String,
}

impl ProgressEstimate {
    /// Estimate with no rate information, e.g. right after (re)starting
    pub fn idle(bytes_loaded: u64, total: u64) -> Self {
        Self {
            percent: percent(bytes_loaded, total),
            throughput: None,
            speed_label: SPEED_ZERO.to_string(),
            eta_label: ETA_CALCULATING.to_string(),
        }
    }
}

/// Turn the previous and current samples into percent, speed and ETA
pub fn estimate(previous: ProgressSample, current: ProgressSample, total: u64) -> ProgressEstimate {
    let rate = throughput(previous, current);
    let remaining = total.saturating_sub(current.bytes_loaded);

    ProgressEstimate {
        percent: percent(current.bytes_loaded, total),
        throughput: rate,
        speed_label: format_speed(rate),
        eta_label: format_eta(remaining, rate),
    }
}

/// `round(100 * loaded / total)` clamped to `[0, 100]`. An empty total counts as done.
pub fn percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (100.0 * loaded as f64 / total as f64).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Bytes per second between two samples; `None` unless time moved forward
pub fn throughput(previous: ProgressSample, current: ProgressSample) -> Option<f64> {
    if current.timestamp_ms <= previous.timestamp_ms {
        return None;
    }
    let elapsed_secs = (current.timestamp_ms - previous.timestamp_ms) as f64 / 1000.0;
    let delta = current.bytes_loaded as f64 - previous.bytes_loaded as f64;
    Some(delta / elapsed_secs)
}

/// Format bytes/sec in the largest unit that keeps the value at or above 1
pub fn format_speed(throughput: Option<f64>) -> String {
    let Some(mut speed) = throughput.filter(|s| s.is_finite() && *s > 0.0) else {
        return SPEED_ZERO.to_string();
    };

    let mut unit = 0;
    while speed >= 1024.0 && unit < SPEED_UNITS.len() - 1 {
        speed /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", speed, SPEED_UNITS[unit])
}

/// Time left for `remaining_bytes` at `throughput`, or the calculating sentinel
pub fn format_eta(remaining_bytes: u64, throughput: Option<f64>) -> String {
    let Some(rate) = throughput.filter(|r| r.is_finite() && *r > 0.0) else {
        return ETA_CALCULATING.to_string();
    };
    let seconds = remaining_bytes as f64 / rate;
    if !seconds.is_finite() || seconds < 0.0 {
        return ETA_CALCULATING.to_string();
    }
    format_duration(seconds)
}

/// `Ns`, `Mm Ss` or `Hh Mm` depending on magnitude
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.ceil() as u64;
    if total < 60 {
        format!("{}s", total)
    } else if total < 3600 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}
