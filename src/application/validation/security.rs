use once_cell::sync::Lazy;
use regex::Regex;

/// A dangerous construct found in diagram source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFinding {
    pub rule: &'static str,
    pub description: &'static str,
    pub excerpt: String,
}

struct Rule {
    name: &'static str,
    description: &'static str,
    detect: Regex,
    strip: Regex,
}

fn rule(name: &'static str, description: &'static str, detect: &str, strip: &str) -> Rule {
    Rule {
        name,
        description,
        detect: Regex::new(detect).expect("BUG: invalid source detection regex literal"),
        strip: Regex::new(strip).expect("BUG: invalid source strip regex literal"),
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    [
        rule(
            "script-block",
            "embedded script element",
            r"(?i)<\s*script\b",
            r"(?is)<\s*script\b[^>]*>.*?<\s*/\s*script\s*>|<\s*/?\s*script\b[^>]*>?",
        ),
        rule(
            "script-url",
            "script URL scheme",
            r"(?i)\b(?:javascript|vbscript)\s*:|\bdata\s*:\s*text/html",
            r"(?i)\b(?:javascript|vbscript)\s*:|\bdata\s*:\s*text/html[^\s'\x22>]*",
        ),
        rule(
            "event-handler",
            "inline event handler attribute",
            r#"(?i)<[^>]*?[\s/"']on[a-z]+\s*="#,
            r#"(?i)(<[^>]*?[\s/"'])on[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]*)"#,
        ),
        rule(
            "embedded-object",
            "iframe, object or embed element",
            r"(?i)<\s*(?:iframe|object|embed)\b",
            concat!(
                r"(?is)<\s*(?:iframe|object|embed)\b[^>]*",
                r"(?:>(?:.*?<\s*/\s*(?:iframe|object|embed)\s*>)?)?",
                r"|<\s*/\s*(?:iframe|object|embed)\s*>",
            ),
        ),
        rule(
            "click-callback",
            "click directive invoking a callback",
            r"(?im)^\s*click\s+\S+\s+call\s+",
            r"(?im)^\s*click\s+\S+\s+call\s+.*$",
        ),
    ]
    .into_iter()
    .collect()
});

/// Returns every dangerous construct in `source`.
pub fn scan(source: &str) -> Vec<SourceFinding> {
    RULES
        .iter()
        .flat_map(|rule| {
            rule.detect.find_iter(source).map(|found| SourceFinding {
                rule: rule.name,
                description: rule.description,
                excerpt: excerpt(source, found.start()),
            })
        })
        .collect()
}

/// Cleaning passes before nested constructs count as unremovable.
pub const MAX_STRIP_PASSES: usize = 8;

/// Removes every construct the scan detects, repeating while removals
/// reassemble new ones. `None` when the source is still dirty after
/// [`MAX_STRIP_PASSES`].
pub fn strip(source: &str) -> Option<String> {
    let mut text = source.to_string();
    for _ in 0..MAX_STRIP_PASSES {
        if scan(&text).is_empty() {
            return Some(text);
        }
        let next = strip_once(&text);
        if next == text {
            return None;
        }
        text = next;
    }
    scan(&text).is_empty().then_some(text)
}

fn strip_once(source: &str) -> String {
    RULES.iter().fold(source.to_string(), |text, rule| {
        rule.strip.replace_all(&text, "${1}").into_owned()
    })
}

fn excerpt(source: &str, start: usize) -> String {
    source[start..].chars().take(40).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_each_rule() {
        let source = concat!(
            "flowchart TD\n A[<script>alert(1)</script>] --> B[<a href=\"javascript:x\">]\n",
            " B --> C[<img onerror='x'>]\n C --> D[<iframe src=x>]\n click A call evil()",
        );
        let rules: Vec<&str> = scan(source).iter().map(|f| f.rule).collect();
        for expected in [
            "script-block",
            "script-url",
            "event-handler",
            "embedded-object",
            "click-callback",
        ] {
            assert!(rules.contains(&expected), "missing {expected}: {rules:?}");
        }
    }

    #[test]
    fn any_handler_name_inside_a_tag_is_found() {
        for handler in ["onfocusin", "onpaste", "onauxclick", "onselect", "oncopy"] {
            let source = format!("flowchart TD\n A[\"<b {handler}=x>t</b>\"]");
            let rules: Vec<&str> = scan(&source).iter().map(|f| f.rule).collect();
            assert_eq!(rules, vec!["event-handler"], "{source}");
        }
    }

    #[test]
    fn stripped_source_scans_clean() {
        let source = concat!(
            "flowchart TD\n A[<script>alert(1)</script>x] --> B[<b onclick = 'go()'>hi</b>]\n",
            " click B call go()\n B --> C[<object data=x></object>]",
        );
        let stripped = strip(source).expect("removable");
        assert!(scan(&stripped).is_empty(), "still dirty: {stripped}");
        assert!(stripped.contains("A[x]"));
        assert!(stripped.contains("<b >hi</b>"));
    }

    #[test]
    fn nested_constructs_do_not_reassemble() {
        for source in [
            "flowchart TD\n A[\"<scr<script></script>ipt>alert</script>\"] --> B",
            "flowchart TD\n A[\"<b onmouseover=a() onfocusin=b()>t</b>\"]",
            "flowchart TD\n A[\"<iframe src=x\"]",
        ] {
            let stripped = strip(source).expect("removable");
            assert!(scan(&stripped).is_empty(), "still dirty: {stripped}");
        }
    }

    #[test]
    fn deeply_nested_constructs_are_unremovable() {
        let depth = MAX_STRIP_PASSES + 4;
        let source = format!(
            "flowchart TD\n A[\"{}<script>{}\"]",
            "<scr".repeat(depth),
            "ipt>".repeat(depth)
        );
        assert_eq!(strip(&source), None);
    }

    #[test]
    fn plain_words_are_not_handlers() {
        assert!(scan("flowchart TD\n online --> onboarding\n A[onset = 3]").is_empty());
    }
}
