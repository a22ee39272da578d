//! Timecode parsing and formatting for transcripts and frame captions.

use std::sync::LazyLock;

use regex::Regex;

/// A clock value: `HH:MM:SS`, `MM:SS` or either with `.mmm` / `,mmm`.
pub const CLOCK: &str = r"\d{1,2}:\d{2}(?::\d{2})?(?:[.,]\d{1,3})?";

static CLOCK_PARTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2}):(\d{2})(?::(\d{2}))?(?:[.,](\d{1,3}))?$")
        .expect("static regex")
});

/// Parse a clock value into milliseconds.
///
/// Returns `None` for values that match the shape but not the ranges, like
/// `00:75:00`.
///
/// # Examples
///
/// ```
/// use docsift::chunking::timecode::parse_clock;
///
/// assert_eq!(parse_clock("00:01:05"), Some(65_000));
/// assert_eq!(parse_clock("01:05"), Some(65_000));
/// assert_eq!(parse_clock("00:00:01,250"), Some(1_250));
/// assert_eq!(parse_clock("00:61:00"), None);
/// ```
pub fn parse_clock(raw: &str) -> Option<u64> {
    let caps = CLOCK_PARTS.captures(raw.trim())?;
    let first: u64 = caps[1].parse().ok()?;
    let second: u64 = caps[2].parse().ok()?;

    let (hours, minutes, seconds) = match caps.get(3) {
        Some(s) => (first, second, s.as_str().parse::<u64>().ok()?),
        None => (0, first, second),
    };
    if seconds >= 60 || (caps.get(3).is_some() && minutes >= 60) {
        return None;
    }

    let millis = match caps.get(4) {
        // ".5" means 500 ms, ".05" means 50 ms.
        Some(frac) => {
            let digits = frac.as_str();
            let value: u64 = digits.parse().ok()?;
            value * 10u64.pow(3 - digits.len() as u32)
        }
        None => 0,
    };

    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

/// Parse a seconds value such as `72`, `72.5` or `72.5s`.
pub fn parse_seconds(raw: &str) -> Option<u64> {
    let trimmed = raw.trim().trim_end_matches('s');
    let secs: f64 = trimmed.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some((secs * 1000.0).round() as u64)
}

/// Format milliseconds as `HH:MM:SS` (sub-second part dropped).
pub fn format_hms(ms: u64) -> String {
    let total = ms / 1000;
    format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}
