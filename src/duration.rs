//! Duration arguments such as `10s`, `5m`, `1h30m` or `2d`.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

static FULL_INPUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+[smhd])+$").expect("static duration pattern"));
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)([smhd])").expect("static duration token pattern"));

/// Errors produced while validating a duration argument
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    /// The input does not follow the `<n><unit>` grammar
    #[error("Invalid duration format. Use: 10s, 5m, 2h, 1d")]
    Malformed,

    /// The input parsed but falls outside the accepted range
    #[error("Duration must be between {min} and {max}")]
    OutOfRange { min: String, max: String },
}

/// Inclusive range a parsed duration must fall in
#[derive(Debug, Clone, Copy)]
pub struct DurationBounds {
    pub min: Duration,
    pub max: Duration,
}

/// Discord caps member timeouts at 28 days.
pub const TIMEOUT_BOUNDS: DurationBounds = DurationBounds {
    min: Duration::from_secs(1),
    max: Duration::from_secs(28 * 86_400),
};

pub const TEMPROLE_BOUNDS: DurationBounds = DurationBounds {
    min: Duration::from_secs(1),
    max: Duration::from_secs(365 * 86_400),
};

impl DurationBounds {
    /// Check that `duration` lies within the bounds
    ///
    /// # Errors
    /// Returns `DurationError::OutOfRange` when it does not.
    pub fn check(&self, duration: Duration) -> Result<Duration, DurationError> {
        if duration < self.min || duration > self.max {
            return Err(DurationError::OutOfRange {
                min: humanize(self.min),
                max: humanize(self.max),
            });
        }
        Ok(duration)
    }
}

fn unit_seconds(unit: &str) -> u64 {
    match unit {
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => 1,
    }
}

/// Parse a duration made of one or more `<integer><unit>` tokens.
///
/// Units are `s`, `m`, `h` and `d`; token values are summed. Whitespace is
/// ignored, anything else makes the whole input invalid.
///
/// # Errors
/// Returns `DurationError::Malformed` for empty or malformed input and when
/// the sum does not fit in a `u64` number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if !FULL_INPUT.is_match(&compact) {
        return Err(DurationError::Malformed);
    }

    let mut total: u64 = 0;
    for cap in TOKEN.captures_iter(&compact) {
        let value: u64 = cap[1].parse().map_err(|_| DurationError::Malformed)?;
        let seconds = value
            .checked_mul(unit_seconds(&cap[2]))
            .ok_or(DurationError::Malformed)?;
        total = total.checked_add(seconds).ok_or(DurationError::Malformed)?;
    }

    Ok(Duration::from_secs(total))
}

/// Parse and range-check in one step
///
/// # Errors
/// See [`parse_duration`] and [`DurationBounds::check`].
pub fn parse_bounded(input: &str, bounds: DurationBounds) -> Result<Duration, DurationError> {
    bounds.check(parse_duration(input)?)
}

/// Render a duration as its largest whole units, e.g. `1d 2h 5s`
#[must_use]
pub fn humanize(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return "0 seconds".to_string();
    }

    let mut parts = Vec::new();
    for (unit, label) in [(86_400, "d"), (3_600, "h"), (60, "m"), (1, "s")] {
        if secs >= unit {
            parts.push(format!("{}{label}", secs / unit));
            secs %= unit;
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_tokens() {
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7_200)));
        assert_eq!(parse_duration("1d"), Ok(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_tokens_are_summed() {
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5_400)));
        assert_eq!(parse_duration("1d 2h 3m 4s"), Ok(Duration::from_secs(93_784)));
        // repeated units still add up
        assert_eq!(parse_duration("10s10s"), Ok(Duration::from_secs(20)));
    }

    #[test]
    fn test_malformed_input_never_yields_partial_sum() {
        assert_eq!(parse_duration(""), Err(DurationError::Malformed));
        assert_eq!(parse_duration("abc"), Err(DurationError::Malformed));
        assert_eq!(parse_duration("10"), Err(DurationError::Malformed));
        assert_eq!(parse_duration("5m abc"), Err(DurationError::Malformed));
        assert_eq!(parse_duration("10x"), Err(DurationError::Malformed));
        assert_eq!(parse_duration("-5m"), Err(DurationError::Malformed));
    }

    #[test]
    fn test_overflow_is_malformed() {
        assert_eq!(
            parse_duration("99999999999999999999d"),
            Err(DurationError::Malformed)
        );
        assert_eq!(
            parse_duration("18446744073709551615d"),
            Err(DurationError::Malformed)
        );
    }

    #[test]
    fn test_timeout_bounds() {
        assert!(parse_bounded("1s", TIMEOUT_BOUNDS).is_ok());
        assert!(parse_bounded("28d", TIMEOUT_BOUNDS).is_ok());
        assert!(matches!(
            parse_bounded("0s", TIMEOUT_BOUNDS),
            Err(DurationError::OutOfRange { .. })
        ));
        assert!(matches!(
            parse_bounded("28d1s", TIMEOUT_BOUNDS),
            Err(DurationError::OutOfRange { .. })
        ));
        // a parse failure is reported as such, not as a range failure
        assert_eq!(
            parse_bounded("soon", TIMEOUT_BOUNDS),
            Err(DurationError::Malformed)
        );
    }

    #[test]
    fn test_out_of_range_message() {
        let err = TIMEOUT_BOUNDS.check(Duration::ZERO).unwrap_err();
        assert_eq!(err.to_string(), "Duration must be between 1s and 28d");
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize(Duration::ZERO), "0 seconds");
        assert_eq!(humanize(Duration::from_secs(93_784)), "1d 2h 3m 4s");
        assert_eq!(humanize(Duration::from_secs(3_600)), "1h");
    }
}
