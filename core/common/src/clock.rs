//! `HH:MM:SS` formatting for run summaries.

use std::time::Duration;

/// Format a number of seconds as zero-padded `HH:MM:SS`.
///
/// Hours are not capped; past 99 they simply grow more digits.
pub fn format_clock(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Format an elapsed duration, rounded to the nearest second.
pub fn format_elapsed(elapsed: Duration) -> String {
    let rounded = (elapsed.as_millis() + 500) / 1000;
    format_clock(rounded as u64)
}
