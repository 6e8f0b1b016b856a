use chrono::{DateTime, Local};
use std::time::Duration;

/// Date format used for dated remote subfolders, e.g. `20261016`.
pub const SUBFOLDER_DATE_FORMAT: &str = "%Y%m%d";

/// Source of "now" for date-sensitive decisions (subfolder names, retention age).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    fn today(&self) -> String {
        self.now().format(SUBFOLDER_DATE_FORMAT).to_string()
    }

    fn unix_now(&self) -> i64 {
        self.now().timestamp()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock pinned to one instant. Used by tests and by dry runs against fixtures.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// Renders an elapsed duration as `1d2h3m4s`, dropping zero leading units.
/// Seconds are always present.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs_f64().round() as u64;
    let seconds = total % 60;
    let minutes = (total / 60) % 60;
    let hours = (total / 3600) % 24;
    let days = total / 86_400;

    let mut out = String::new();
    if days != 0 {
        out.push_str(&format!("{}d", days));
    }
    if hours != 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes != 0 {
        out.push_str(&format!("{}m", minutes));
    }
    out.push_str(&format!("{}s", seconds));
    out
}

/// Size in decimal megabytes with two decimals.
pub fn format_mb(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / 1_000_000.0)
}

/// Unix seconds rendered as a UTC timestamp for log lines.
pub fn format_unix(ts: i64) -> String {
    match DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}
