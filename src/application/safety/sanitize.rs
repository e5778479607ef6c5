use std::{borrow::Cow, collections::HashSet};

use ammonia::Builder as AmmoniaBuilder;
use lol_html::{RewriteStrSettings, element, html_content::Element, rewrite_str};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const URL_ATTRIBUTES: &[&str] = &["href", "xlink:href", "src", "action", "formaction"];
const ANIMATION_ELEMENTS: &[&str] = &["animate", "set"];
const ANIMATION_VALUES: &[&str] = &["values", "to", "from", "by"];
const STRICT_REMOVED: &[&str] = &["iframe", "object", "embed", "style", "foreignobject"];

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Streams `markup` through the cleaning rules; strict mode also drops whole
/// embedding elements.
pub(crate) fn strip_dangerous(
    markup: &str,
    strict: bool,
) -> Result<String, lol_html::errors::RewritingError> {
    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("*", move |el| {
                let tag = el.tag_name();
                let removed = tag.eq_ignore_ascii_case("script")
                    || (strict && STRICT_REMOVED.iter().any(|name| tag.eq_ignore_ascii_case(name)));
                if removed {
                    el.remove();
                    return Ok(());
                }
                let animates_link = ANIMATION_ELEMENTS
                    .iter()
                    .any(|name| tag.eq_ignore_ascii_case(name));
                clean_attributes(el, animates_link)
            })],
            ..RewriteStrSettings::default()
        },
    )
}

fn clean_attributes(el: &mut Element<'_, '_>, animation: bool) -> HandlerResult {
    let attributes: Vec<(String, String)> = el
        .attributes()
        .iter()
        .map(|attr| (attr.name(), attr.value()))
        .collect();

    // `<animate attributeName="href" values="...">` swaps the link target at runtime.
    let animates_link = animation
        && attributes.iter().any(|(name, value)| {
            name == "attributename"
                && matches!(normalize_url(value).as_str(), "href" | "xlink:href")
        });

    for (name, value) in attributes {
        if name.starts_with("on") {
            el.remove_attribute(&name);
        } else if URL_ATTRIBUTES.contains(&name.as_str()) && is_unsafe_url(&normalize_url(&value)) {
            el.remove_attribute(&name);
        } else if animates_link
            && ANIMATION_VALUES.contains(&name.as_str())
            && normalize_url(&value).split(';').any(is_unsafe_url)
        {
            el.remove_attribute(&name);
        } else if name == "style" {
            match sanitize_style_attribute(&value) {
                Some(clean) if clean != value => el.set_attribute(&name, &clean)?,
                Some(_) => {}
                None => el.remove_attribute(&name),
            }
        }
    }
    Ok(())
}

/// SVG allow-list applied after the streaming pass in strict mode.
pub(crate) fn svg_allow_list() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    let tags: HashSet<&'static str> = HashSet::from([
        "svg",
        "g",
        "defs",
        "symbol",
        "use",
        "path",
        "rect",
        "circle",
        "ellipse",
        "line",
        "polygon",
        "polyline",
        "text",
        "tspan",
        "textPath",
        "title",
        "desc",
        "marker",
        "linearGradient",
        "radialGradient",
        "stop",
        "clipPath",
        "mask",
        "pattern",
        "filter",
        "feGaussianBlur",
        "feOffset",
        "feBlend",
        "feFlood",
        "feComposite",
        "feMerge",
        "feMergeNode",
        "image",
        "switch",
    ]);
    builder.tags(tags);
    builder.clean_content_tags(HashSet::from(["script", "style"]));

    let presentation: HashSet<&'static str> = HashSet::from([
        "id",
        "class",
        "style",
        "transform",
        "fill",
        "fill-opacity",
        "fill-rule",
        "stroke",
        "stroke-width",
        "stroke-dasharray",
        "stroke-linecap",
        "stroke-linejoin",
        "stroke-opacity",
        "opacity",
        "font-family",
        "font-size",
        "font-weight",
        "text-anchor",
        "dominant-baseline",
        "alignment-baseline",
        "clip-path",
        "mask",
        "filter",
        "marker-start",
        "marker-mid",
        "marker-end",
        "x",
        "y",
        "dx",
        "dy",
        "width",
        "height",
        "role",
        "aria-label",
        "aria-roledescription",
        "data-id",
        "data-node",
        "data-et",
    ]);
    builder.generic_attributes(presentation);

    builder.add_tag_attributes(
        "svg",
        &["viewBox", "xmlns", "preserveAspectRatio", "version"],
    );
    builder.add_tag_attributes("path", &["d", "pathLength"]);
    builder.add_tag_attributes("rect", &["rx", "ry"]);
    builder.add_tag_attributes("circle", &["cx", "cy", "r"]);
    builder.add_tag_attributes("ellipse", &["cx", "cy", "rx", "ry"]);
    builder.add_tag_attributes("line", &["x1", "x2", "y1", "y2"]);
    builder.add_tag_attributes("polygon", &["points"]);
    builder.add_tag_attributes("polyline", &["points"]);
    builder.add_tag_attributes("tspan", &["rotate", "textLength"]);
    builder.add_tag_attributes("text", &["textLength", "lengthAdjust"]);
    builder.add_tag_attributes(
        "marker",
        &["refX", "refY", "orient", "markerWidth", "markerHeight", "markerUnits", "viewBox"],
    );
    builder.add_tag_attributes(
        "linearGradient",
        &["gradientUnits", "gradientTransform", "x1", "x2", "y1", "y2"],
    );
    builder.add_tag_attributes(
        "radialGradient",
        &["gradientUnits", "gradientTransform", "cx", "cy", "r", "fx", "fy"],
    );
    builder.add_tag_attributes("stop", &["offset", "stop-color", "stop-opacity"]);
    builder.add_tag_attributes("use", &["href"]);
    builder.add_tag_attributes("image", &["href", "preserveAspectRatio"]);
    builder.add_tag_attributes("clipPath", &["clipPathUnits"]);
    builder.add_tag_attributes("pattern", &["patternUnits", "patternTransform", "viewBox"]);
    builder.add_tag_attributes("feGaussianBlur", &["in", "stdDeviation", "result"]);
    builder.add_tag_attributes("feOffset", &["in", "dx", "dy", "result"]);
    builder.add_tag_attributes("feBlend", &["in", "in2", "mode"]);
    builder.add_tag_attributes("feMergeNode", &["in"]);

    builder.add_url_schemes(["http", "https", "data"].iter().copied());
    builder.attribute_filter(|_element, attribute, value| match attribute {
        "style" => sanitize_style_attribute(value).map(Cow::Owned),
        "href" if is_unsafe_url(&normalize_url(value)) => None,
        _ => Some(Cow::Borrowed(value)),
    });

    builder
}

static CHARACTER_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:#[xX]([0-9a-fA-F]+)|#([0-9]+)|([a-zA-Z][a-zA-Z0-9]*));?")
        .expect("BUG: invalid character reference regex literal")
});

/// Decodes numeric character references (with or without the trailing `;`)
/// and the named ones that can spell out a URL scheme. Unknown names are
/// left as written.
pub(crate) fn decode_references(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }
    CHARACTER_REFERENCE.replace_all(value, |caps: &Captures<'_>| {
        let numeric = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => Some(u32::from_str_radix(hex.as_str(), 16).ok()),
            (None, Some(decimal)) => Some(decimal.as_str().parse::<u32>().ok()),
            (None, None) => None,
        };
        if let Some(code) = numeric {
            return code
                .and_then(char::from_u32)
                .filter(|c| *c != '\0')
                .unwrap_or(char::REPLACEMENT_CHARACTER)
                .to_string();
        }
        let name = caps.get(3).map_or("", |name| name.as_str());
        match named_reference(name) {
            Some(decoded) if caps[0].ends_with(';') => decoded.to_string(),
            _ => caps[0].to_string(),
        }
    })
}

fn named_reference(name: &str) -> Option<char> {
    let decoded = match name.to_ascii_lowercase().as_str() {
        "colon" => ':',
        "sol" => '/',
        "bsol" => '\\',
        "period" => '.',
        "comma" => ',',
        "semi" => ';',
        "lpar" => '(',
        "rpar" => ')',
        "tab" => '\t',
        "newline" => '\n',
        "nbsp" => '\u{a0}',
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        _ => return None,
    };
    Some(decoded)
}

/// Decodes character references, lower-cases the URL and drops the
/// whitespace and control characters browsers ignore inside a scheme.
fn normalize_url(value: &str) -> String {
    decode_references(value)
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase()
}

pub(crate) fn sanitize_style_attribute(value: &str) -> Option<String> {
    let kept: Vec<&str> = split_declarations(value)
        .into_iter()
        .map(str::trim)
        .filter(|decl| !decl.is_empty() && is_safe_style_declaration(decl))
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept.join("; "))
    }
}

/// Splits on `;` outside parentheses and quotes.
fn split_declarations(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (index, ch) in value.char_indices() {
        match (quote, ch) {
            (Some(open), _) if ch == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ';') if depth == 0 => {
                parts.push(&value[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

fn is_safe_style_declaration(decl: &str) -> bool {
    const FORBIDDEN_SUBSTRINGS: [&str; 7] = [
        "expression(",
        "javascript:",
        "vbscript:",
        "-moz-binding",
        "behavior:",
        "behaviour:",
        "@import",
    ];

    let lower = decl.to_ascii_lowercase();
    !FORBIDDEN_SUBSTRINGS
        .iter()
        .any(|needle| lower.contains(needle))
        && !contains_unsafe_url(&lower)
}

fn contains_unsafe_url(lower_decl: &str) -> bool {
    let mut rest = lower_decl;
    while let Some(start) = rest.find("url(") {
        let after = &rest[start + 4..];
        let Some(close) = after.find(')') else {
            return true;
        };
        let target =
            after[..close].trim_matches(|c: char| c.is_whitespace() || c == '\'' || c == '"');
        if is_unsafe_url(target) {
            return true;
        }
        rest = &after[close + 1..];
    }
    false
}

fn is_unsafe_url(url: &str) -> bool {
    if url.starts_with("data:image/") && !url.starts_with("data:image/svg") {
        return false;
    }
    url.starts_with("data:")
        || url.starts_with("file:")
        || url.contains("javascript:")
        || url.contains("vbscript:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_scripts_and_handlers_in_any_quoting() {
        let markup = concat!(
            "<svg><script>alert(1)</script>",
            r#"<rect onclick='a()' onmouseover="b()" onload=c() width="2"/></svg>"#,
        );
        let cleaned = strip_dangerous(markup, false).unwrap();
        assert!(!cleaned.contains("<script"));
        assert!(!cleaned.contains("onclick"));
        assert!(!cleaned.contains("onmouseover"));
        assert!(!cleaned.contains("onload"));
        assert!(cleaned.contains(r#"width="2""#));
    }

    #[test]
    fn drops_script_urls_but_keeps_fragments() {
        let markup = concat!(
            r##"<svg><a xlink:href="javascript&#x3a;x()"><use href="#node-1"/></a>"##,
            r#"<a href=" JavaScript:go()">t</a></svg>"#,
        );
        let cleaned = strip_dangerous(markup, false).unwrap();
        assert!(!cleaned.to_ascii_lowercase().contains("script:"));
        assert!(cleaned.contains(r##"href="#node-1""##));
    }

    #[test]
    fn decodes_numeric_and_named_references() {
        assert_eq!(decode_references("&#106;avascript&colon;x"), "javascript:x");
        assert_eq!(decode_references("&#x6A;ava&#0000115cript:x"), "javascript:x");
        assert_eq!(decode_references("a &unknown; b &amp c"), "a &unknown; b &amp c");
        assert_eq!(decode_references("&#0;"), "\u{fffd}");
        assert!(matches!(decode_references("plain"), Cow::Borrowed("plain")));
    }

    #[test]
    fn drops_entity_encoded_script_urls() {
        let markup = concat!(
            r#"<svg><a href="&#106;avascript:alert(1)"><text>x</text></a>"#,
            r#"<a xlink:href="&#x6A;&#x61;vascript&colon;go()">y</a></svg>"#,
        );
        let cleaned = strip_dangerous(markup, false).unwrap();
        assert!(!cleaned.contains("href="), "{cleaned}");
        assert!(cleaned.contains("<text>x</text>"));
    }

    #[test]
    fn drops_script_targets_from_link_animations() {
        let markup = concat!(
            r#"<svg><a href="/ok">"#,
            r#"<animate attributeName="href" values="&#x6A;avascript:alert(1)"/>"#,
            r#"<set attributeName="xlink:href" to="javascript:x()"/>"#,
            r#"<animate attributeName="href" to="/next"/>"#,
            r#"<animate attributeName="opacity" values="0;1"/>"#,
            "t</a></svg>",
        );
        let cleaned = strip_dangerous(markup, false).unwrap();
        assert!(!cleaned.contains("values=\"&#x6A;"), "{cleaned}");
        assert!(!cleaned.contains("javascript"), "{cleaned}");
        assert!(cleaned.contains(r#"to="/next""#));
        assert!(cleaned.contains(r#"values="0;1""#));
    }

    #[test]
    fn lenient_mode_keeps_foreign_object() {
        let markup =
            "<svg><foreignObject><div>label</div></foreignObject><style>.a{}</style></svg>";
        let lenient = strip_dangerous(markup, false).unwrap();
        assert!(lenient.contains("<foreignObject>"));
        assert!(lenient.contains("<style>"));

        let strict = strip_dangerous(markup, true).unwrap();
        assert!(!strict.to_ascii_lowercase().contains("foreignobject"));
        assert!(!strict.contains("<style"));
    }

    #[test]
    fn strict_removes_embedding_elements() {
        let markup = concat!(
            r#"<svg><iframe src="x"></iframe><object data="y"></object>"#,
            r#"<embed src="z"><rect/></svg>"#,
        );
        let cleaned = strip_dangerous(markup, true).unwrap();
        for tag in ["<iframe", "<object", "<embed"] {
            assert!(!cleaned.contains(tag), "{tag} survived: {cleaned}");
        }
        assert!(cleaned.contains("<rect/>"));
    }

    #[test]
    fn style_attribute_keeps_safe_rules() {
        assert_eq!(
            sanitize_style_attribute("fill: red; stroke: url('javascript:x'); expression(1);")
                .as_deref(),
            Some("fill: red")
        );
        assert!(sanitize_style_attribute("background: url(data:text/html,x)").is_none());
        assert_eq!(
            sanitize_style_attribute("background: url('data:image/png;base64,AAAA')").as_deref(),
            Some("background: url('data:image/png;base64,AAAA')")
        );
    }

    #[test]
    fn allow_list_keeps_shapes_and_drops_unknown_markup() {
        let cleaned = svg_allow_list()
            .clean(concat!(
                r#"<svg viewBox="0 0 4 4"><rect width="4" height="4" fill="red"></rect>"#,
                "<blink>x</blink></svg>",
            ))
            .to_string();
        assert!(cleaned.contains("<rect"));
        assert!(cleaned.contains(r#"fill="red""#));
        assert!(!cleaned.contains("<blink"));
    }
}
