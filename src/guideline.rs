//! The shared guideline rule, used both for `<guideline>` elements in
//! glyph records and for guideline dicts in fontinfo.
//!
//! Presence is judged by truthiness, not by key existence: the attribute
//! string `"0"` counts as present while the plist integer `0` does not.
//! Both call sites funnel through [`normalize_guideline`] so the two
//! behave identically for identical values.

use crate::common::{normalize_color_string, parse_float};
use crate::plist::Value;

#[derive(Debug, Default, Clone)]
pub(crate) struct GuidelineFields {
    pub x: Option<Value>,
    pub y: Option<Value>,
    pub angle: Option<Value>,
    pub name: Option<Value>,
    pub color: Option<Value>,
    pub identifier: Option<Value>,
}

#[derive(Debug, Clone)]
pub(crate) struct Guideline {
    pub x: Option<Value>,
    pub y: Option<Value>,
    pub angle: Option<Value>,
    pub name: Option<Value>,
    pub color: Option<String>,
    pub identifier: Option<Value>,
}

/// Validate and canonicalize one guideline. `None` means the whole
/// guideline is dropped.
pub(crate) fn normalize_guideline(fields: GuidelineFields) -> Option<Guideline> {
    let truthy = |v: &Option<Value>| v.as_ref().is_some_and(Value::is_truthy);
    let (has_x, has_y, has_angle) = (
        truthy(&fields.x),
        truthy(&fields.y),
        truthy(&fields.angle),
    );
    // either x or y must be given
    if !has_x && !has_y {
        return None;
    }
    // an angle requires both x and y
    if (!has_x || !has_y) && has_angle {
        return None;
    }
    // x together with y requires an angle
    if has_x && has_y && !has_angle {
        return None;
    }
    let x = to_real(fields.x)?;
    let y = to_real(fields.y)?;
    let angle = to_real(fields.angle)?;
    let color = match fields.color {
        // a non-string color is invalid, and invalid colors are dropped
        Some(Value::String(s)) => normalize_color_string(&s),
        _ => None,
    };
    Some(Guideline {
        x,
        y,
        angle,
        name: fields.name,
        color,
        identifier: fields.identifier,
    })
}

/// Convert a truthy field to a real; a falsy field passes through
/// untouched. An unconvertible truthy field invalidates the guideline.
fn to_real(value: Option<Value>) -> Option<Option<Value>> {
    match value {
        Some(v) if v.is_truthy() => value_as_float(&v).map(|f| Some(Value::Real(f))),
        other => Some(other),
    }
}

fn value_as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Real(f) => Some(*f),
        Value::Integer(i) => Some(*i as f64),
        Value::String(s) => parse_float(s),
        Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
