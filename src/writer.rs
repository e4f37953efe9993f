//! The canonical XML writer.
//!
//! Output is line-oriented: every element, key and wrapped text fragment
//! is its own line, indented one tab per open container element. The
//! writer is the only place bytes are produced, so attribute ordering,
//! escaping and numeric formatting are decided here once.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::common::{format_float, format_int};
use crate::plist::Value;

pub(crate) const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";
const PLIST_DOCTYPE: &str = "<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">";
const MAX_TEXT_LINE_LENGTH: usize = 70;
const INDENT: &str = "\t";

/// Known attributes are written in this order; anything else follows,
/// sorted alphabetically.
static ATTRIBUTE_ORDER: [&str; 17] = [
    "name", "base", "format", "fileName", "x", "y", "angle", "xScale", "xyScale", "yxScale",
    "yScale", "xOffset", "yOffset", "type", "smooth", "color", "identifier",
];

fn attribute_priority(name: &str) -> usize {
    ATTRIBUTE_ORDER
        .iter()
        .position(|a| *a == name)
        .unwrap_or(ATTRIBUTE_ORDER.len() + 100)
}

/// An attribute value. Numbers are kept as numbers until the last moment
/// so that they all pass through the shared canonical formatter.
#[derive(Debug, Clone)]
pub enum Attr {
    Str(String),
    Float(f64),
    Int(i64),
}

impl Attr {
    fn render(&self) -> String {
        match self {
            Attr::Str(s) => escape_attribute(s),
            Attr::Float(f) => format_float(*f),
            Attr::Int(i) => format_int(*i),
        }
    }
}

impl From<&str> for Attr {
    fn from(s: &str) -> Self {
        Attr::Str(s.to_string())
    }
}

impl From<String> for Attr {
    fn from(s: String) -> Self {
        Attr::Str(s)
    }
}

impl From<f64> for Attr {
    fn from(f: f64) -> Self {
        Attr::Float(f)
    }
}

impl From<i64> for Attr {
    fn from(i: i64) -> Self {
        Attr::Int(i)
    }
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attribute(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}

pub struct XmlWriter {
    lines: Vec<String>,
    indent_level: usize,
    stack: Vec<String>,
}

impl XmlWriter {
    /// A writer for a GLIF document (XML declaration only).
    pub fn new_glif() -> Self {
        XmlWriter {
            lines: vec![XML_DECLARATION.to_string()],
            indent_level: 0,
            stack: Vec::new(),
        }
    }

    /// A writer for a property-list document (declaration plus DOCTYPE).
    pub fn new_property_list() -> Self {
        XmlWriter {
            lines: vec![XML_DECLARATION.to_string(), PLIST_DOCTYPE.to_string()],
            indent_level: 0,
            stack: Vec::new(),
        }
    }

    /// A writer with no document prologue, for emitting fragments.
    pub(crate) fn bare() -> Self {
        XmlWriter {
            lines: Vec::new(),
            indent_level: 0,
            stack: Vec::new(),
        }
    }

    /// The document text. Lines are joined with `\n` and there is no
    /// trailing newline.
    pub fn get_text(self) -> String {
        debug_assert!(self.stack.is_empty(), "unclosed element");
        self.lines.join("\n")
    }

    fn raw(&mut self, line: &str) {
        if self.indent_level > 0 {
            let mut indented = INDENT.repeat(self.indent_level);
            indented.push_str(line);
            self.lines.push(indented);
        } else {
            self.lines.push(line.to_string());
        }
    }

    /// Write `<tag .../>`, or `<tag ...>text</tag>` when text is given.
    pub fn simple_element(&mut self, tag: &str, attrs: Vec<(&str, Attr)>, text: Option<&str>) {
        let mut line = if attrs.is_empty() {
            format!("<{}", tag)
        } else {
            format!("<{} {}", tag, attributes_to_string(attrs))
        };
        match text {
            Some(text) => {
                line.push('>');
                line.push_str(&escape_text(text));
                line.push_str(&format!("</{}>", tag));
            }
            None => line.push_str("/>"),
        }
        self.raw(&line);
    }

    pub fn begin_element(&mut self, tag: &str, attrs: Vec<(&str, Attr)>) {
        let line = if attrs.is_empty() {
            format!("<{}>", tag)
        } else {
            format!("<{} {}>", tag, attributes_to_string(attrs))
        };
        self.raw(&line);
        self.stack.push(tag.to_string());
        self.indent_level += 1;
    }

    pub fn end_element(&mut self, tag: &str) {
        let top = self.stack.pop();
        debug_assert_eq!(top.as_deref(), Some(tag), "mismatched element nesting");
        self.indent_level -= 1;
        self.raw(&format!("</{}>", tag));
    }

    /// Free-text content (e.g. a glyph note): stripped, escaped and
    /// word-wrapped at the line limit without breaking words.
    ///
    /// The element's own indentation reads back as leading tabs when the
    /// output is parsed again, so leading tabs are stripped, trailing
    /// whitespace is dropped and blank lines stay bare. Without that,
    /// repeated normalization would keep shifting the text.
    pub fn text_block(&mut self, text: &str) {
        let text = escape_text(text.trim());
        for paragraph in text.split('\n') {
            let paragraph = paragraph.trim_start_matches('\t').trim_end();
            if paragraph.is_empty() {
                self.lines.push(String::new());
            } else {
                for line in wrap(paragraph, MAX_TEXT_LINE_LENGTH) {
                    self.raw(line.trim_end());
                }
            }
        }
    }

    /// Emit a value in canonical property-list form.
    pub fn property_list_value(&mut self, value: &Value) {
        match value {
            Value::Array(items) => {
                self.begin_element("array", vec![]);
                for item in items {
                    self.property_list_value(item);
                }
                self.end_element("array");
            }
            Value::Dict(map) => {
                self.begin_element("dict", vec![]);
                for (key, value) in map {
                    self.simple_element("key", vec![], Some(key));
                    self.property_list_value(value);
                }
                self.end_element("dict");
            }
            Value::String(s) => self.simple_element("string", vec![], Some(s)),
            Value::Boolean(true) => self.simple_element("true", vec![], None),
            Value::Boolean(false) => self.simple_element("false", vec![], None),
            Value::Real(f) => self.simple_element("real", vec![], Some(&format_float(*f))),
            Value::Integer(i) => self.simple_element("integer", vec![], Some(&format_int(*i))),
            Value::Date(d) => self.simple_element(
                "date",
                vec![],
                Some(&d.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            ),
            Value::Data(bytes) => {
                self.begin_element("data", vec![]);
                // the plist line limit in input bytes: 4 output characters
                // per 3 input bytes
                const BYTES_PER_LINE: usize = MAX_TEXT_LINE_LENGTH / 4 * 3;
                for chunk in bytes.chunks(BYTES_PER_LINE) {
                    let line = STANDARD.encode(chunk);
                    self.raw(&line);
                }
                self.end_element("data");
            }
        }
    }
}

/// Serialize a full property-list document for a value.
pub fn normalize_property_list(value: &Value) -> String {
    let mut writer = XmlWriter::new_property_list();
    writer.begin_element("plist", vec![("version", Attr::from("1.0"))]);
    writer.property_list_value(value);
    writer.end_element("plist");
    writer.get_text()
}

fn attributes_to_string(attrs: Vec<(&str, Attr)>) -> String {
    let mut sorter: Vec<(usize, &str, Attr)> = attrs
        .into_iter()
        .map(|(name, value)| (attribute_priority(name), name, value))
        .collect();
    sorter.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    let pairs: Vec<String> = sorter
        .into_iter()
        .map(|(_, name, value)| format!("{}=\"{}\"", escape_attribute(name), value.render()))
        .collect();
    pairs.join(" ")
}

/// Greedy fill at `width` columns. Chunks are words and whitespace runs;
/// neither is ever broken, so an overlong word overflows its own line.
fn wrap(paragraph: &str, width: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for chunk in chunks(paragraph) {
        let chunk_len = chunk.chars().count();
        if !current.is_empty() && current_len + chunk_len > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(chunk);
        current_len += chunk_len;
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Split into alternating runs of whitespace and non-whitespace.
fn chunks(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_space: Option<bool> = None;
    for (index, c) in text.char_indices() {
        let is_space = c.is_whitespace();
        if in_space.is_some_and(|s| s != is_space) {
            out.push(&text[start..index]);
            start = index;
        }
        in_space = Some(is_space);
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}
