//! The property-list value model.
//!
//! All structured metadata in a UFO (fontinfo, groups, kerning, libs,
//! layer contents) is parsed into [`Value`] trees. Mappings are held in a
//! `BTreeMap`, which makes the canonical key-sorted output order a
//! property of the type rather than of the serializer.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::error::NormalizerError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Data(Vec<u8>),
    Date(NaiveDateTime),
    Array(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

/// Progressive-prefix plist date: everything after the year is optional,
/// but each field requires the one before it.
#[allow(clippy::unwrap_used)] // the pattern is a literal and always compiles
static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})(?:-(\d{2})(?:-(\d{2})(?:T(\d{2})(?::(\d{2})(?::(\d{2}))?)?)?)?)?Z")
        .unwrap()
});

/// Parse an XML document, tolerating the DOCTYPE that property lists
/// carry (roxmltree refuses DTDs by default).
pub(crate) fn parse_xml(text: &str) -> Result<roxmltree::Document, roxmltree::Error> {
    roxmltree::Document::parse_with_options(
        text,
        roxmltree::ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        },
    )
}

impl Value {
    /// Parse a property-list document: an XML `<plist>` wrapper around a
    /// single value element.
    pub fn parse_document(text: &str) -> Result<Value, NormalizerError> {
        let doc = parse_xml(text)?;
        let root = doc.root_element();
        let value = if root.tag_name().name() == "plist" {
            root.children()
                .find(|n| n.is_element())
                .ok_or_else(|| NormalizerError::Plist("empty property list".to_string()))?
        } else {
            root
        };
        Value::from_element(value)
    }

    /// Convert a single plist XML element into a value.
    pub fn from_element(element: roxmltree::Node) -> Result<Value, NormalizerError> {
        let tag = element.tag_name().name();
        match tag {
            "array" => {
                let mut items = Vec::new();
                for child in element.children().filter(|n| n.is_element()) {
                    items.push(Value::from_element(child)?);
                }
                Ok(Value::Array(items))
            }
            "dict" => {
                let mut map = BTreeMap::new();
                let mut key: Option<String> = None;
                for child in element.children().filter(|n| n.is_element()) {
                    if child.tag_name().name() == "key" {
                        key = Some(child.text().unwrap_or("").to_string());
                    } else if let Some(key) = key.take() {
                        map.insert(key, Value::from_element(child)?);
                    }
                    // a value with no preceding key is dropped
                }
                Ok(Value::Dict(map))
            }
            "string" => Ok(Value::String(element.text().unwrap_or("").to_string())),
            "integer" => {
                let text = element.text().unwrap_or("");
                text.trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| NormalizerError::Plist(format!("bad integer: {:?}", text)))
            }
            "real" => {
                let text = element.text().unwrap_or("");
                crate::common::parse_float(text)
                    .map(Value::Real)
                    .ok_or_else(|| NormalizerError::Plist(format!("bad real: {:?}", text)))
            }
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            "data" => {
                let text = element.text().unwrap_or("");
                let condensed: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                STANDARD
                    .decode(condensed.as_bytes())
                    .map(Value::Data)
                    .map_err(|e| NormalizerError::Plist(format!("bad data: {}", e)))
            }
            "date" => parse_date(element.text().unwrap_or("")).map(Value::Date),
            other => Err(NormalizerError::Plist(format!(
                "unknown data type in property list: <{}>",
                other
            ))),
        }
    }

    /// Truthiness as the normalization rules use it: a field holding a
    /// zero number, an empty string or an empty container counts as not
    /// really being there.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::String(s) => !s.is_empty(),
            Value::Integer(i) => *i != 0,
            Value::Real(f) => *f != 0.0,
            Value::Boolean(b) => *b,
            Value::Data(d) => !d.is_empty(),
            Value::Date(_) => true,
            Value::Array(a) => !a.is_empty(),
            Value::Dict(d) => !d.is_empty(),
        }
    }

    /// Coerce a metainfo `formatVersion` value to an integer. Strings
    /// must be integral; reals are truncated.
    pub fn as_format_version(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(f) => Some(*f as i64),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }
}

fn parse_date(text: &str) -> Result<NaiveDateTime, NormalizerError> {
    let captures = DATE_PATTERN
        .captures(text)
        .ok_or_else(|| NormalizerError::Plist(format!("bad date: {:?}", text)))?;
    let mut fields: [Option<u32>; 6] = [None; 6];
    for (slot, capture) in fields.iter_mut().zip(captures.iter().skip(1)) {
        match capture {
            // the pattern guarantees digits
            Some(m) => *slot = m.as_str().parse::<u32>().ok(),
            None => break,
        }
    }
    let [year, month, day, hour, minute, second] = fields;
    // absent fields fall back to the earliest instant; present-but-zero
    // month or day is still invalid
    NaiveDate::from_ymd_opt(
        year.unwrap_or(0) as i32,
        month.unwrap_or(1),
        day.unwrap_or(1),
    )
    .and_then(|d| {
        d.and_hms_opt(
            hour.unwrap_or(0),
            minute.unwrap_or(0),
            second.unwrap_or(0),
        )
    })
    .ok_or_else(|| NormalizerError::Plist(format!("bad date: {:?}", text)))
}
