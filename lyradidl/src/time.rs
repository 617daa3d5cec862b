//! Track duration strings
//!
//! UPnP AV expresses durations as `H:MM:SS` with an optional fractional
//! part, e.g. `0:04:05.000`.

use std::time::Duration;

/// Parse an `H:MM:SS[.F]` duration string.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut parts = raw.split(':');
    let hours: u64 = parts.next()?.trim().parse().ok()?;
    let minutes: u64 = parts.next()?.trim().parse().ok()?;
    let seconds_part = parts.next()?.trim();
    if parts.next().is_some() || minutes >= 60 {
        return None;
    }

    let (whole, frac) = match seconds_part.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (seconds_part, None),
    };
    let seconds: u64 = whole.parse().ok()?;
    if seconds >= 60 {
        return None;
    }

    let millis = match frac {
        Some(f) if !f.is_empty() => {
            // Interpret up to three fractional digits as milliseconds
            let digits: String = f.chars().take(3).collect();
            if !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let scale = 10u64.pow(3 - digits.len() as u32);
            digits.parse::<u64>().ok()? * scale
        }
        _ => 0,
    };

    Some(Duration::from_millis(
        ((hours * 60 + minutes) * 60 + seconds) * 1000 + millis,
    ))
}

/// Format a duration as `H:MM:SS` (fractional part omitted).
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain() {
        assert_eq!(parse_duration("0:04:05"), Some(Duration::from_secs(245)));
        assert_eq!(parse_duration("1:00:00"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("12:34:56"), Some(Duration::from_secs(45296)));
    }

    #[test]
    fn parse_fractional() {
        assert_eq!(
            parse_duration("0:00:01.500"),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_duration("0:00:00.2"), Some(Duration::from_millis(200)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("4:05"), None);
        assert_eq!(parse_duration("0:61:00"), None);
        assert_eq!(parse_duration("0:00:75"), None);
        assert_eq!(parse_duration("abc"), None);
    }

    #[test]
    fn format_round_trip_whole_seconds() {
        for secs in [0u64, 59, 60, 245, 3600, 45296] {
            let formatted = format_duration(Duration::from_secs(secs));
            assert_eq!(
                parse_duration(&formatted),
                Some(Duration::from_secs(secs)),
                "round trip failed for {formatted}"
            );
        }
    }
}
