//! Best-effort normalization of near-valid SVG through a real tokenizer.
//!
//! The reader runs in a forgiving mode (HTML-style attributes, unchecked end
//! names) and the writer re-emits every token in canonical form. Unclosed
//! elements are closed at the end of input and stray end tags are dropped.

use std::{borrow::Cow, collections::HashSet};

use once_cell::sync::Lazy;
use quick_xml::{
    Reader, Writer,
    events::{BytesEnd, BytesStart, BytesText, Event, attributes::Attribute},
    name::QName,
};
use regex::Regex;

use super::structure::VOID_ELEMENTS;

const SVG_NS: &str = "http://www.w3.org/2000/svg";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

static DOUBLE_SLASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:/\s*){2,}>").expect("BUG: invalid DOUBLE_SLASH regex literal"));
static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^&(?:#[0-9]+|#x[0-9A-Fa-f]+|[A-Za-z][A-Za-z0-9]*);")
        .expect("BUG: invalid ENTITY regex literal")
});

const ELEMENT_CASE: &[&str] = &[
    "altGlyph",
    "animateMotion",
    "animateTransform",
    "clipPath",
    "feBlend",
    "feColorMatrix",
    "feComposite",
    "feDropShadow",
    "feFlood",
    "feGaussianBlur",
    "feMerge",
    "feMergeNode",
    "feOffset",
    "foreignObject",
    "linearGradient",
    "radialGradient",
    "textPath",
];

const ATTRIBUTE_CASE: &[&str] = &[
    "attributeName",
    "baseFrequency",
    "clipPathUnits",
    "gradientTransform",
    "gradientUnits",
    "lengthAdjust",
    "markerHeight",
    "markerUnits",
    "markerWidth",
    "pathLength",
    "patternTransform",
    "patternUnits",
    "preserveAspectRatio",
    "refX",
    "refY",
    "stdDeviation",
    "textLength",
    "viewBox",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    pub markup: String,
    /// One entry per kind of fix applied.
    pub fixes: Vec<String>,
}

/// Normalizes `markup`. Never fails: when the tokenizer gives up, the text
/// pre-pass result is returned with a note.
pub fn repair(markup: &str) -> RepairOutcome {
    let mut fixes = Fixes::default();
    let prepared = prepass(markup, &mut fixes);

    match rewrite(&prepared, &mut fixes) {
        Ok(markup) => RepairOutcome {
            markup,
            fixes: fixes.into_vec(),
        },
        Err(reason) => {
            fixes.note(format!("tokenizer stopped early ({reason}); kept text-level fixes only"));
            RepairOutcome {
                markup: prepared,
                fixes: fixes.into_vec(),
            }
        }
    }
}

#[derive(Default)]
struct Fixes {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl Fixes {
    fn note(&mut self, fix: impl Into<String>) {
        let fix = fix.into();
        if self.seen.insert(fix.clone()) {
            self.ordered.push(fix);
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

fn prepass(markup: &str, fixes: &mut Fixes) -> String {
    let mut text = markup.to_string();
    if DOUBLE_SLASH.is_match(&text) {
        text = DOUBLE_SLASH.replace_all(&text, "/>").into_owned();
        fixes.note("collapsed duplicated self-closing slashes");
    }
    if text.contains("&nbsp;") {
        text = text.replace("&nbsp;", "&#160;");
        fixes.note("replaced &nbsp; with a numeric reference");
    }
    text
}

fn rewrite(markup: &str, fixes: &mut Fixes) -> Result<String, String> {
    let mut reader = Reader::from_str(markup);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let uses_xlink = markup.contains("xlink:");
    let mut writer = Writer::new(Vec::with_capacity(markup.len()));
    let mut open: Vec<String> = Vec::new();
    let mut root_seen = false;

    loop {
        let event = reader.read_event().map_err(|err| err.to_string())?;
        match event {
            Event::Start(start) => {
                let (element, name) = rebuild_start(&start, &mut root_seen, uses_xlink, fixes);
                if VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str()) {
                    fixes.note("self-closed void elements");
                    emit(&mut writer, Event::Empty(element))?;
                } else {
                    emit(&mut writer, Event::Start(element))?;
                    open.push(name);
                }
            }
            Event::Empty(start) => {
                let (element, _) = rebuild_start(&start, &mut root_seen, uses_xlink, fixes);
                emit(&mut writer, Event::Empty(element))?;
            }
            Event::End(end) => {
                let name = canonical_element(&String::from_utf8_lossy(end.name().as_ref()));
                if VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str()) {
                    continue;
                }
                match open.iter().rposition(|candidate| candidate.eq_ignore_ascii_case(&name)) {
                    Some(position) => {
                        if position + 1 != open.len() {
                            fixes.note("closed elements left open before a parent end tag");
                        }
                        for pending in open.drain(position..).rev() {
                            emit(&mut writer, Event::End(BytesEnd::new(pending)))?;
                        }
                    }
                    None => fixes.note("dropped end tags without a matching start"),
                }
            }
            Event::Text(text) => {
                let raw = String::from_utf8_lossy(&text);
                let escaped = escape_text(&raw);
                if escaped != raw {
                    fixes.note("escaped stray characters in text");
                }
                emit(&mut writer, Event::Text(BytesText::from_escaped(escaped)))?;
            }
            Event::Eof => break,
            other => emit(&mut writer, other)?,
        }
    }

    if !open.is_empty() {
        fixes.note("closed elements left open at end of input");
        for pending in open.drain(..).rev() {
            emit(&mut writer, Event::End(BytesEnd::new(pending)))?;
        }
    }

    String::from_utf8(writer.into_inner()).map_err(|err| err.to_string())
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), String> {
    writer.write_event(event).map_err(|err| err.to_string())
}

fn rebuild_start(
    start: &BytesStart<'_>,
    root_seen: &mut bool,
    uses_xlink: bool,
    fixes: &mut Fixes,
) -> (BytesStart<'static>, String) {
    let original = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let name = canonical_element(&original);
    if name != original {
        fixes.note("normalized SVG element name case");
    }

    let mut element = BytesStart::new(name.clone());
    let mut keys: HashSet<String> = HashSet::new();
    for attribute in start.html_attributes().with_checks(false) {
        let Ok(attribute) = attribute else {
            fixes.note("dropped attributes that could not be read");
            continue;
        };
        let raw_key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let key = canonical_attribute(&raw_key);
        if key != raw_key {
            fixes.note("normalized SVG attribute name case");
        }
        if !keys.insert(key.clone()) {
            fixes.note("dropped duplicated attributes");
            continue;
        }
        let raw_value = String::from_utf8_lossy(&attribute.value);
        let value = escape_attribute(&raw_value);
        if value != raw_value {
            fixes.note("escaped stray characters in attribute values");
        }
        push_raw(&mut element, &key, value.into_owned());
    }
    if start_was_unquoted(start) {
        fixes.note("quoted unquoted attribute values");
    }

    let is_root = !*root_seen && name.eq_ignore_ascii_case("svg");
    if is_root {
        *root_seen = true;
        if !keys.contains("xmlns") {
            fixes.note("added the SVG namespace declaration");
            push_raw(&mut element, "xmlns", SVG_NS.to_string());
        }
        if uses_xlink && !keys.contains("xmlns:xlink") {
            fixes.note("added the xlink namespace declaration");
            push_raw(&mut element, "xmlns:xlink", XLINK_NS.to_string());
        }
    }
    (element, name)
}

fn push_raw(element: &mut BytesStart<'static>, key: &str, value: String) {
    element.push_attribute(Attribute {
        key: QName(key.as_bytes()),
        value: Cow::Owned(value.into_bytes()),
    });
}

/// True when any attribute value in the raw tag lacks quotes.
fn start_was_unquoted(start: &BytesStart<'_>) -> bool {
    let raw = String::from_utf8_lossy(start.attributes_raw());
    let mut quote: Option<char> = None;
    let mut after_equals = false;
    for ch in raw.chars() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                after_equals = false;
            }
            None if ch == '=' => after_equals = true,
            None if after_equals && !ch.is_whitespace() => return true,
            None => {}
        }
    }
    false
}

fn canonical_element(name: &str) -> String {
    canonical(ELEMENT_CASE, name)
}

fn canonical_attribute(name: &str) -> String {
    canonical(ATTRIBUTE_CASE, name)
}

fn canonical(table: &[&str], name: &str) -> String {
    table
        .iter()
        .find(|canonical| canonical.eq_ignore_ascii_case(name))
        .map_or_else(|| name.to_string(), |canonical| (*canonical).to_string())
}

/// Escapes `<`, `>` and `"` plus any `&` that does not start a reference.
fn escape_attribute(value: &str) -> Cow<'_, str> {
    if !value.contains(['<', '>', '"', '&']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for (index, ch) in value.char_indices() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '&' if !ENTITY.is_match(&value[index..]) => out.push_str("&amp;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Escapes any `&` in text that does not start a reference.
fn escape_text(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for (index, ch) in value.char_indices() {
        if ch == '&' && !ENTITY.is_match(&value[index..]) {
            out.push_str("&amp;");
        } else {
            out.push(ch);
        }
    }
    Cow::Owned(out)
}
