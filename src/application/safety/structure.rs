use once_cell::sync::Lazy;
use regex::Regex;
use roxmltree::{Document, ParsingOptions};
use serde::Serialize;

pub(crate) const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

static HIDDEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<!--.*?-->|<!\[CDATA\[.*?\]\]>|<\?.*?\?>|<!DOCTYPE[^>]*>")
        .expect("BUG: invalid HIDDEN regex literal")
});
static SVG_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<svg\b").expect("BUG: invalid SVG_OPEN regex literal"));
static SVG_CLOSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</svg\s*>|<svg\b[^>]*/>\s*$").expect("BUG: invalid SVG_CLOSE regex literal")
});
static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<(/?)([A-Za-z][\w:.-]*)(?:[\s/](?:[^>"']|"[^"]*"|'[^']*')*)?>"#)
        .expect("BUG: invalid TAG regex literal")
});
static XMLNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<svg\b[^>]*\sxmlns\s*=\s*["']http://www\.w3\.org/2000/svg["']"#)
        .expect("BUG: invalid XMLNS regex literal")
});

/// Structural facts about a piece of SVG markup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructureReport {
    /// An opening `<svg` is present.
    pub has_root: bool,
    pub well_formed: bool,
    pub has_namespace: bool,
    pub element_count: usize,
    pub max_depth: usize,
    /// Problems that make the markup unusable as delivered.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl StructureReport {
    pub fn is_usable(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Lexical checks backed by a real XML parse when the markup allows it.
pub fn inspect(markup: &str) -> StructureReport {
    let visible = HIDDEN.replace_all(markup, "");
    let mut report = StructureReport {
        has_root: SVG_OPEN.is_match(&visible),
        ..StructureReport::default()
    };

    if !report.has_root {
        report.errors.push("no <svg> root element".to_string());
        return report;
    }
    if !SVG_CLOSE.is_match(&visible) {
        report.errors.push("<svg> root element is never closed".to_string());
    }

    let lexical = count_tags(&visible);
    if lexical.opened != lexical.closed {
        report.warnings.push(format!(
            "tag count mismatch: {} opening vs {} closing tags",
            lexical.opened, lexical.closed
        ));
    }
    report.element_count = lexical.elements;
    report.max_depth = lexical.max_depth;

    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    match Document::parse_with_options(markup, options) {
        Ok(document) => {
            report.well_formed = true;
            let elements = document.descendants().filter(|node| node.is_element());
            report.element_count = 0;
            report.max_depth = 0;
            for node in elements {
                report.element_count += 1;
                let depth = node.ancestors().filter(|a| a.is_element()).count();
                report.max_depth = report.max_depth.max(depth);
            }
            report.has_namespace = document.root_element().tag_name().namespace().is_some();
        }
        Err(err) => {
            report.has_namespace = XMLNS.is_match(&visible);
            report.warnings.push(format!("markup is not well-formed XML: {err}"));
        }
    }

    if !report.has_namespace {
        report
            .warnings
            .push("root element lacks the SVG namespace declaration".to_string());
    }
    report
}

struct TagCounts {
    opened: usize,
    closed: usize,
    elements: usize,
    max_depth: usize,
}

fn count_tags(visible: &str) -> TagCounts {
    let mut counts = TagCounts {
        opened: 0,
        closed: 0,
        elements: 0,
        max_depth: 0,
    };
    let mut depth: usize = 0;
    for caps in TAG.captures_iter(visible) {
        let closing = !caps[1].is_empty();
        let self_closing = caps[0].trim_end_matches('>').trim_end().ends_with('/');
        let name = caps[2].to_ascii_lowercase();
        let void = VOID_ELEMENTS.contains(&name.as_str());

        if closing {
            if !void {
                counts.closed += 1;
                depth = depth.saturating_sub(1);
            }
            continue;
        }
        counts.elements += 1;
        counts.max_depth = counts.max_depth.max(depth + 1);
        if !self_closing && !void {
            counts.opened += 1;
            depth += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = concat!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10">"#,
        r#"<g><rect width="1" height="1"/><text>a &lt; b</text></g></svg>"#,
    );

    #[test]
    fn well_formed_svg_reports_statistics() {
        let report = inspect(GOOD);
        assert!(report.is_usable());
        assert!(report.well_formed);
        assert!(report.has_namespace);
        assert_eq!(report.element_count, 4);
        assert_eq!(report.max_depth, 3);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn missing_root_is_fatal() {
        let report = inspect("<html><body>502 Bad Gateway</body></html>");
        assert!(!report.has_root);
        assert!(!report.is_usable());
    }

    #[test]
    fn unclosed_root_is_an_error() {
        let report = inspect(r#"<svg xmlns="http://www.w3.org/2000/svg"><g></g>"#);
        assert!(report.has_root);
        assert_eq!(report.errors, vec!["<svg> root element is never closed"]);
    }

    #[test]
    fn lexical_problems_are_warnings() {
        let report = inspect("<svg><g><rect></svg>");
        assert!(report.is_usable());
        assert!(!report.well_formed);
        assert!(report.warnings.iter().any(|w| w.starts_with("tag count mismatch")));
        assert!(report.warnings.iter().any(|w| w.contains("namespace")));
    }

    #[test]
    fn comments_and_void_elements_do_not_skew_counts() {
        let markup = concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><!-- <g> -->"#,
            r#"<foreignObject><br><img src="a.png"></foreignObject></svg>"#,
        );
        let report = inspect(markup);
        assert!(!report.warnings.iter().any(|w| w.starts_with("tag count mismatch")));
    }
}
