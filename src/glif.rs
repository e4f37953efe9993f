//! Glyph record (GLIF) normalization.
//!
//! A parsed GLIF tree is re-emitted element by element in a fixed order,
//! with each element validated against the rules of its declared format
//! version. Malformed fragments are dropped, never repaired: a point
//! without coordinates takes its whole contour with it, an unparsable
//! color simply disappears. Only a missing or malformed format version
//! aborts the glyph.

use std::path::Path;

use roxmltree::Node;
use smol_str::SmolStr;

use crate::common::{normalize_color_string, parse_float};
use crate::error::NormalizerError;
use crate::guideline::{normalize_guideline, GuidelineFields};
use crate::plist::Value;
use crate::writer::{Attr, XmlWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointType {
    Move,
    Line,
    Curve,
    QCurve,
    OffCurve,
}

impl PointType {
    fn parse(text: &str) -> Option<PointType> {
        match text {
            "move" => Some(PointType::Move),
            "line" => Some(PointType::Line),
            "curve" => Some(PointType::Curve),
            "qcurve" => Some(PointType::QCurve),
            "offcurve" => Some(PointType::OffCurve),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            PointType::Move => "move",
            PointType::Line => "line",
            PointType::Curve => "curve",
            PointType::QCurve => "qcurve",
            PointType::OffCurve => "offcurve",
        }
    }
}

#[derive(Debug, Clone)]
struct Point {
    x: f64,
    y: f64,
    typ: PointType,
    smooth: bool,
    name: Option<String>,
    identifier: Option<String>,
}

#[derive(Debug, Clone)]
struct Contour {
    identifier: Option<String>,
    points: Vec<Point>,
}

#[derive(Debug, Clone)]
struct Component {
    base: SmolStr,
    transform: Vec<(&'static str, f64)>,
    identifier: Option<String>,
}

/// The closed set of things an outline may contain.
#[derive(Debug, Clone)]
enum OutlineChild {
    Contour(Contour),
    Component(Component),
}

/// A format 1 contour of exactly one `move` point is not a contour but an
/// anchor, and is re-emitted after the real outline entries.
#[derive(Debug, Clone)]
struct ImpliedAnchor {
    x: f64,
    y: f64,
    name: Option<String>,
}

const TRANSFORMATION_DEFAULTS: [(&str, f64); 6] = [
    ("xScale", 1.0),
    ("xyScale", 0.0),
    ("yxScale", 0.0),
    ("yScale", 1.0),
    ("xOffset", 0.0),
    ("yOffset", 0.0),
];

/// Normalize one glyph record. Returns the canonical text and the image
/// file name the glyph references, if any.
pub fn normalize_glif(
    text: &str,
    path: &Path,
) -> Result<(String, Option<String>), NormalizerError> {
    let doc = crate::plist::parse_xml(text)?;
    let root = doc.root_element();
    let version_text = root
        .attribute("format")
        .ok_or_else(|| NormalizerError::UndefinedGlifFormat {
            path: path.to_path_buf(),
        })?;
    let version: i64 =
        version_text
            .trim()
            .parse()
            .map_err(|_| NormalizerError::BadGlifFormat {
                path: path.to_path_buf(),
            })?;
    let name = root.attribute("name").unwrap_or("");

    // bucket the children; repeated singleton elements keep the last one
    let mut advance = None;
    let mut unicodes = Vec::new();
    let mut note = None;
    let mut image = None;
    let mut guidelines = Vec::new();
    let mut anchors = Vec::new();
    let mut outline = None;
    let mut lib = None;
    for element in root.children().filter(|n| n.is_element()) {
        match element.tag_name().name() {
            "advance" => advance = Some(element),
            "unicode" => unicodes.push(element),
            "note" => note = Some(element),
            "image" => image = Some(element),
            "guideline" => guidelines.push(element),
            "anchor" => anchors.push(element),
            "outline" => outline = Some(element),
            "lib" => lib = Some(element),
            _ => {}
        }
    }

    let mut writer = XmlWriter::new_glif();
    writer.begin_element(
        "glyph",
        vec![("name", Attr::from(name)), ("format", Attr::Int(version))],
    );
    for unicode in &unicodes {
        write_unicode(*unicode, &mut writer);
    }
    if let Some(advance) = advance {
        write_advance(advance, &mut writer);
    }
    let mut image_file_name = None;
    if version >= 2 {
        if let Some(image) = image {
            image_file_name = write_image(image, &mut writer);
        }
    }
    if let Some(outline) = outline {
        if version == 1 {
            write_outline_format1(outline, &mut writer);
        } else {
            write_outline_format2(outline, &mut writer);
        }
    }
    if version >= 2 {
        for anchor in &anchors {
            write_anchor(*anchor, &mut writer);
        }
        for guideline in &guidelines {
            write_guideline(*guideline, &mut writer);
        }
    }
    if let Some(lib) = lib {
        write_lib(lib, &mut writer)?;
    }
    if let Some(note) = note {
        write_note(note, &mut writer);
    }
    writer.end_element("glyph");
    Ok((writer.get_text(), image_file_name))
}

/// Uppercase, zero-padded to at least four digits; anything that does not
/// parse as hex is dropped.
fn write_unicode(element: Node, writer: &mut XmlWriter) {
    let Some(hex) = element.attribute("hex").filter(|v| !v.is_empty()) else {
        return;
    };
    let Ok(value) = u64::from_str_radix(hex.trim(), 16) else {
        return;
    };
    writer.simple_element("unicode", vec![("hex", Attr::Str(format!("{:04X}", value)))], None);
}

/// Width and height default to zero and only non-zero values are written;
/// if either fails to parse the whole element is dropped.
fn write_advance(element: Node, writer: &mut XmlWriter) {
    let (Some(width), Some(height)) = (
        parse_float(element.attribute("width").unwrap_or("0")),
        parse_float(element.attribute("height").unwrap_or("0")),
    ) else {
        return;
    };
    let mut attrs = Vec::new();
    if width != 0.0 {
        attrs.push(("width", Attr::Float(width)));
    }
    if height != 0.0 {
        attrs.push(("height", Attr::Float(height)));
    }
    if attrs.is_empty() {
        return;
    }
    writer.simple_element("advance", attrs, None);
}

fn write_image(element: Node, writer: &mut XmlWriter) -> Option<String> {
    let file_name = element.attribute("fileName").unwrap_or("");
    if file_name.is_empty() {
        return None;
    }
    let mut attrs = vec![("fileName", Attr::from(file_name))];
    for (name, value) in transform_attributes(element) {
        attrs.push((name, Attr::Float(value)));
    }
    if let Some(color) = element.attribute("color").and_then(normalize_color_string) {
        attrs.push(("color", Attr::Str(color)));
    }
    writer.simple_element("image", attrs, None);
    Some(file_name.to_string())
}

fn write_anchor(element: Node, writer: &mut XmlWriter) {
    let x = element.attribute("x").unwrap_or("");
    let y = element.attribute("y").unwrap_or("");
    if x.is_empty() || y.is_empty() {
        return;
    }
    let (Some(x), Some(y)) = (parse_float(x), parse_float(y)) else {
        return;
    };
    let mut attrs = vec![("x", Attr::Float(x)), ("y", Attr::Float(y))];
    if let Some(name) = element.attribute("name") {
        attrs.push(("name", Attr::from(name)));
    }
    if let Some(color) = element.attribute("color").and_then(normalize_color_string) {
        attrs.push(("color", Attr::Str(color)));
    }
    if let Some(identifier) = element.attribute("identifier") {
        attrs.push(("identifier", Attr::from(identifier)));
    }
    writer.simple_element("anchor", attrs, None);
}

fn write_guideline(element: Node, writer: &mut XmlWriter) {
    let field = |name: &str| {
        element
            .attribute(name)
            .map(|v| Value::String(v.to_string()))
    };
    let fields = GuidelineFields {
        x: field("x"),
        y: field("y"),
        angle: field("angle"),
        name: field("name"),
        color: field("color"),
        identifier: field("identifier"),
    };
    let Some(guideline) = normalize_guideline(fields) else {
        return;
    };
    let mut attrs = Vec::new();
    push_value_attr(&mut attrs, "x", guideline.x);
    push_value_attr(&mut attrs, "y", guideline.y);
    push_value_attr(&mut attrs, "angle", guideline.angle);
    push_value_attr(&mut attrs, "name", guideline.name);
    if let Some(color) = guideline.color {
        attrs.push(("color", Attr::Str(color)));
    }
    push_value_attr(&mut attrs, "identifier", guideline.identifier);
    writer.simple_element("guideline", attrs, None);
}

fn push_value_attr(attrs: &mut Vec<(&str, Attr)>, name: &'static str, value: Option<Value>) {
    match value {
        Some(Value::Real(f)) => attrs.push((name, Attr::Float(f))),
        Some(Value::Integer(i)) => attrs.push((name, Attr::Int(i))),
        Some(Value::String(s)) => attrs.push((name, Attr::Str(s))),
        _ => {}
    }
}

fn write_outline_format1(element: Node, writer: &mut XmlWriter) {
    let mut outline: Vec<OutlineChild> = Vec::new();
    let mut implied_anchors: Vec<ImpliedAnchor> = Vec::new();
    for child in element.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "contour" => {
                if let Some(contour) = normalize_contour(child, false) {
                    match implied_anchor(&contour) {
                        Some(anchor) => implied_anchors.push(anchor),
                        None => outline.push(OutlineChild::Contour(contour)),
                    }
                }
            }
            "component" => {
                if let Some(component) = normalize_component(child, false) {
                    outline.push(OutlineChild::Component(component));
                }
            }
            _ => {}
        }
    }
    if outline.is_empty() && implied_anchors.is_empty() {
        return;
    }
    writer.begin_element("outline", vec![]);
    for child in outline {
        write_outline_child(child, writer);
    }
    for anchor in implied_anchors {
        writer.begin_element("contour", vec![]);
        let mut attrs = vec![
            ("type", Attr::from("move")),
            ("x", Attr::Float(anchor.x)),
            ("y", Attr::Float(anchor.y)),
        ];
        if let Some(name) = anchor.name {
            attrs.push(("name", Attr::Str(name)));
        }
        writer.simple_element("point", attrs, None);
        writer.end_element("contour");
    }
    writer.end_element("outline");
}

fn write_outline_format2(element: Node, writer: &mut XmlWriter) {
    let mut outline: Vec<OutlineChild> = Vec::new();
    for child in element.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "contour" => {
                if let Some(contour) = normalize_contour(child, true) {
                    outline.push(OutlineChild::Contour(contour));
                }
            }
            "component" => {
                if let Some(component) = normalize_component(child, true) {
                    outline.push(OutlineChild::Component(component));
                }
            }
            _ => {}
        }
    }
    if outline.is_empty() {
        return;
    }
    writer.begin_element("outline", vec![]);
    for child in outline {
        write_outline_child(child, writer);
    }
    writer.end_element("outline");
}

fn write_outline_child(child: OutlineChild, writer: &mut XmlWriter) {
    match child {
        OutlineChild::Contour(contour) => {
            let mut attrs = Vec::new();
            if let Some(identifier) = contour.identifier {
                attrs.push(("identifier", Attr::Str(identifier)));
            }
            writer.begin_element("contour", attrs);
            for point in contour.points {
                write_point(point, writer);
            }
            writer.end_element("contour");
        }
        OutlineChild::Component(component) => {
            let mut attrs = vec![("base", Attr::Str(component.base.to_string()))];
            for (name, value) in component.transform {
                attrs.push((name, Attr::Float(value)));
            }
            if let Some(identifier) = component.identifier {
                attrs.push(("identifier", Attr::Str(identifier)));
            }
            writer.simple_element("component", attrs, None);
        }
    }
}

fn write_point(point: Point, writer: &mut XmlWriter) {
    let mut attrs = vec![("x", Attr::Float(point.x)), ("y", Attr::Float(point.y))];
    if point.typ != PointType::OffCurve {
        attrs.push(("type", Attr::from(point.typ.as_str())));
        if point.smooth {
            attrs.push(("smooth", Attr::from("yes")));
        }
    }
    if let Some(name) = point.name {
        attrs.push(("name", Attr::Str(name)));
    }
    if let Some(identifier) = point.identifier {
        attrs.push(("identifier", Attr::Str(identifier)));
    }
    writer.simple_element("point", attrs, None);
}

fn implied_anchor(contour: &Contour) -> Option<ImpliedAnchor> {
    match contour.points.as_slice() {
        [point] if point.typ == PointType::Move => Some(ImpliedAnchor {
            x: point.x,
            y: point.y,
            name: point.name.clone(),
        }),
        _ => None,
    }
}

/// One bad point drops the whole contour; unknown child tags are skipped.
fn normalize_contour(element: Node, format2: bool) -> Option<Contour> {
    let mut points = Vec::new();
    for child in element.children().filter(|n| n.is_element()) {
        if child.tag_name().name() != "point" {
            continue;
        }
        points.push(normalize_point(child, format2)?);
    }
    if points.is_empty() {
        return None;
    }
    let identifier = if format2 {
        element.attribute("identifier").map(str::to_string)
    } else {
        None
    };
    Some(Contour { identifier, points })
}

fn normalize_point(element: Node, format2: bool) -> Option<Point> {
    let x = element.attribute("x").unwrap_or("");
    let y = element.attribute("y").unwrap_or("");
    if x.is_empty() || y.is_empty() {
        return None;
    }
    let x = parse_float(x)?;
    let y = parse_float(y)?;
    let typ = PointType::parse(element.attribute("type").unwrap_or("offcurve"))?;
    // smooth is only meaningful off the default point type, and only the
    // literal "yes" counts
    let smooth = typ != PointType::OffCurve && element.attribute("smooth") == Some("yes");
    let identifier = if format2 {
        element.attribute("identifier").map(str::to_string)
    } else {
        None
    };
    Some(Point {
        x,
        y,
        typ,
        smooth,
        name: element.attribute("name").map(str::to_string),
        identifier,
    })
}

fn normalize_component(element: Node, format2: bool) -> Option<Component> {
    let base = element.attribute("base").unwrap_or("");
    if base.is_empty() {
        return None;
    }
    let identifier = if format2 {
        element.attribute("identifier").map(str::to_string)
    } else {
        None
    };
    Some(Component {
        base: SmolStr::from(base),
        transform: transform_attributes(element),
        identifier,
    })
}

/// The six affine fields, filtered down to those differing from identity.
/// Fields that fail to parse are skipped, not fatal.
fn transform_attributes(element: Node) -> Vec<(&'static str, f64)> {
    let mut attrs = Vec::new();
    for (name, default) in TRANSFORMATION_DEFAULTS {
        let value = match element.attribute(name) {
            Some(text) => match parse_float(text) {
                Some(value) => value,
                None => continue,
            },
            None => default,
        };
        if value != default {
            attrs.push((name, value));
        }
    }
    attrs
}

fn write_lib(element: Node, writer: &mut XmlWriter) -> Result<(), NormalizerError> {
    let Some(child) = element.children().find(|n| n.is_element()) else {
        return Ok(());
    };
    let mut value = Value::from_element(child)?;
    if !value.is_truthy() {
        return Ok(());
    }
    if let Some(dict) = value.as_dict_mut() {
        if let Some(color_value) = dict.remove("public.markColor") {
            if let Value::String(color) = color_value {
                if let Some(color) = normalize_color_string(&color) {
                    dict.insert("public.markColor".to_string(), Value::String(color));
                }
            }
        }
    }
    // dropping an invalid mark color may have emptied the lib
    if !value.is_truthy() {
        return Ok(());
    }
    writer.begin_element("lib", vec![]);
    writer.property_list_value(&value);
    writer.end_element("lib");
    Ok(())
}

fn write_note(element: Node, writer: &mut XmlWriter) {
    let text = element.text().unwrap_or("");
    if text.trim().is_empty() {
        return;
    }
    writer.begin_element("note", vec![]);
    writer.text_block(text);
    writer.end_element("note");
}
