//! Duration parsing and formatting for authoring values.
//!
//! Workflow authors write durations either as bare integers (whole seconds)
//! or as compound strings such as `250ms`, `10s`, `2m30s`, `1h`. Formatting
//! goes the other way: the report and the step `rt` field render durations in
//! the shortest human-readable unit.

use std::time::Duration;

use probe_types::WaitSpec;

/// Parse a duration string: one or more `<number><unit>` segments where the
/// unit is `ms`, `s`, `m`, or `h`. A bare number (no unit) means seconds and
/// may carry a fractional part.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }

    // Bare numeric form: whole or fractional seconds.
    if trimmed.chars().all(|c| c.is_ascii_digit() || c == '.') {
        let seconds: f64 = trimmed.parse().map_err(|_| format!("invalid duration '{trimmed}'"))?;
        if seconds < 0.0 || !seconds.is_finite() {
            return Err(format!("invalid duration '{trimmed}'"));
        }
        return Ok(Duration::from_secs_f64(seconds));
    }

    let mut total = Duration::ZERO;
    let mut remainder = trimmed;
    while !remainder.is_empty() {
        let digits_end = remainder
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("missing unit in duration '{trimmed}'"))?;
        if digits_end == 0 {
            return Err(format!("invalid duration '{trimmed}'"));
        }
        let value: f64 = remainder[..digits_end]
            .parse()
            .map_err(|_| format!("invalid duration '{trimmed}'"))?;

        let unit_end = remainder[digits_end..]
            .find(|c: char| c.is_ascii_digit())
            .map(|offset| digits_end + offset)
            .unwrap_or(remainder.len());
        let unit = &remainder[digits_end..unit_end];
        let segment = match unit {
            "ms" => Duration::from_secs_f64(value / 1000.0),
            "s" => Duration::from_secs_f64(value),
            "m" => Duration::from_secs_f64(value * 60.0),
            "h" => Duration::from_secs_f64(value * 3600.0),
            other => return Err(format!("unknown duration unit '{other}' in '{trimmed}'")),
        };
        total += segment;
        remainder = &remainder[unit_end..];
    }

    Ok(total)
}

/// Resolve an authored wait specification to a concrete duration.
pub fn wait_duration(spec: &WaitSpec) -> Result<Duration, String> {
    match spec {
        WaitSpec::Seconds(seconds) => Ok(Duration::from_secs(*seconds)),
        WaitSpec::Text(text) => parse_duration(text),
    }
}

/// Render a duration in the shortest readable unit: `250ms` below one
/// second, `1.23s` below one minute, `2m30s` beyond.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 1.0 {
        return format!("{}ms", duration.as_millis());
    }
    if secs < 60.0 {
        return format!("{}s", trim_zeros(secs));
    }
    let minutes = (secs / 60.0).floor() as u64;
    let rest = secs - (minutes as f64) * 60.0;
    if rest < 0.005 {
        format!("{minutes}m")
    } else {
        format!("{minutes}m{}s", trim_zeros(rest))
    }
}

/// Render seconds with two decimals for report lines (`1.23s`).
pub fn format_secs(secs: f64) -> String {
    format!("{secs:.2}s")
}

fn trim_zeros(value: f64) -> String {
    let rendered = format!("{value:.2}");
    rendered.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_seconds() {
        assert_eq!(parse_duration("2").expect("parse"), Duration::from_secs(2));
        assert_eq!(parse_duration("1.5").expect("parse"), Duration::from_millis(1500));
    }

    #[test]
    fn parses_units_and_compounds() {
        assert_eq!(parse_duration("250ms").expect("parse"), Duration::from_millis(250));
        assert_eq!(parse_duration("2m30s").expect("parse"), Duration::from_secs(150));
        assert_eq!(parse_duration("1h").expect("parse"), Duration::from_secs(3600));
    }

    #[test]
    fn rejects_unknown_units_and_garbage() {
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn wait_spec_resolves_both_forms() {
        assert_eq!(
            wait_duration(&WaitSpec::Seconds(3)).expect("parse"),
            Duration::from_secs(3)
        );
        assert_eq!(
            wait_duration(&WaitSpec::Text("250ms".into())).expect("parse"),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn formats_by_magnitude() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1230)), "1.23s");
        assert_eq!(format_duration(Duration::from_secs(150)), "2m30s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
    }

    #[test]
    fn format_secs_uses_two_decimals() {
        assert_eq!(format_secs(0.0), "0.00s");
        assert_eq!(format_secs(12.345), "12.35s");
    }
}
