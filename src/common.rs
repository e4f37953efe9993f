//! Shared canonical-formatting primitives.
//!
//! Every number the normalizer emits, whether a property-list real, a
//! point coordinate or a color channel, goes through [`format_float`] /
//! [`format_int`] so that identical values always produce identical bytes.

/// Render a float with at most 10 fractional digits, trimming trailing
/// zeros. Values with no fractional part render as integers; negative
/// zero collapses to `0`.
pub fn format_float(value: f64) -> String {
    let mut s = format!("{value:.10}");
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
        if s.is_empty() || s == "-" || s == "-0" {
            return "0".to_string();
        }
        return s;
    }
    s
}

/// Render an integer in plain decimal.
pub fn format_int(value: i64) -> String {
    value.to_string()
}

/// Parse a float the way the GLIF spec expects attribute values to be
/// read: surrounding whitespace is tolerated, anything else is not.
pub fn parse_float(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok()
}

/// Canonicalize a `r,g,b,a` color string.
///
/// The string must contain exactly four comma-separated values, each
/// parsing as a float within `[0, 1]`. Anything else yields `None` and the
/// caller drops the color rather than failing the glyph.
pub fn normalize_color_string(value: &str) -> Option<String> {
    if value.matches(',').count() != 3 {
        return None;
    }
    let mut channels = [0.0f64; 4];
    for (slot, field) in channels.iter_mut().zip(value.split(',')) {
        let channel = parse_float(field)?;
        if !(0.0..=1.0).contains(&channel) {
            return None;
        }
        *slot = channel;
    }
    let formatted: Vec<String> = channels.iter().map(|c| format_float(*c)).collect();
    Some(formatted.join(","))
}
