//! Parser for the `hh:mm:ss` duration columns of the raw session export.

/// Converts an `H:MM:SS` string into minutes.
///
/// Missing, malformed, negative or non-finite input yields `0.0`. This is a
/// known precision loss: a session with a garbled duration is treated as if
/// the duration were absent, and the caller falls back to the other duration
/// column or to the fixed fallback.
pub fn parse_duration_minutes(value: Option<&str>) -> f64 {
    try_parse_duration_minutes(value).unwrap_or(0.0)
}

/// Same as [`parse_duration_minutes`] but tells apart "missing" and "malformed".
///
/// Returns `None` for malformed input, `Some(0.0)` for missing input.
pub fn try_parse_duration_minutes(value: Option<&str>) -> Option<f64> {
    let Some(raw) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return Some(0.0);
    };

    let parts: Vec<&str> = raw.split(':').collect();
    let [h, m, s] = parts.as_slice() else {
        return None;
    };

    let h: f64 = h.trim().parse().ok()?;
    let m: f64 = m.trim().parse().ok()?;
    let s: f64 = s.trim().parse().ok()?;

    let minutes = h * 60.0 + m + s / 60.0;
    (minutes.is_finite() && minutes >= 0.0).then_some(minutes)
}
