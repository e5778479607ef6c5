use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::sanitize::decode_references;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl Risk {
    pub fn as_str(self) -> &'static str {
        match self {
            Risk::Low => "low",
            Risk::Medium => "medium",
            Risk::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub pattern: &'static str,
    pub risk: Risk,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub risk: Risk,
    pub safe_to_use: bool,
    pub findings: Vec<Finding>,
}

impl ScanReport {
    pub fn patterns_at(&self, risk: Risk) -> Vec<&'static str> {
        let mut patterns: Vec<&'static str> = self
            .findings
            .iter()
            .filter(|finding| finding.risk == risk)
            .map(|finding| finding.pattern)
            .collect();
        patterns.dedup();
        patterns
    }
}

/// How a pattern reads the markup.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Reading {
    Raw,
    /// Character references decoded first, so `&#106;avascript:` still matches.
    Decoded,
}

static PATTERNS: Lazy<Vec<(&'static str, Risk, Reading, Regex)>> = Lazy::new(|| {
    [
        ("script-element", Risk::High, Reading::Raw, r"(?i)<\s*script\b"),
        (
            "event-handler",
            Risk::High,
            Reading::Raw,
            r#"(?i)<[^>]*?[\s/"']on[a-z]+\s*="#,
        ),
        (
            "script-url",
            Risk::High,
            Reading::Decoded,
            concat!(
                r"(?i)(?:j[\t\n\r]*a[\t\n\r]*v[\t\n\r]*a|v[\t\n\r]*b)",
                r"[\t\n\r]*s[\t\n\r]*c[\t\n\r]*r[\t\n\r]*i[\t\n\r]*p[\t\n\r]*t\s*:",
            ),
        ),
        (
            "html-data-url",
            Risk::High,
            Reading::Decoded,
            r"(?i)data\s*:\s*text/html",
        ),
        (
            "embedded-frame",
            Risk::Medium,
            Reading::Raw,
            r"(?i)<\s*(?:iframe|object|embed)\b",
        ),
        ("foreign-object", Risk::Medium, Reading::Raw, r"(?i)<\s*foreignObject\b"),
        (
            "external-reference",
            Risk::Medium,
            Reading::Raw,
            r#"(?i)\b(?:xlink:href|href|src)\s*=\s*["']?\s*https?://"#,
        ),
        ("css-import", Risk::Medium, Reading::Raw, r"(?i)@import\b"),
        (
            "css-remote-url",
            Risk::Medium,
            Reading::Raw,
            r#"(?i)url\(\s*["']?\s*https?:"#,
        ),
        ("style-element", Risk::Low, Reading::Raw, r"(?i)<\s*style\b"),
        ("hyperlink", Risk::Low, Reading::Raw, r"(?i)<\s*a\b"),
    ]
    .into_iter()
    .map(|(name, risk, reading, pattern)| {
        (
            name,
            risk,
            reading,
            Regex::new(pattern).expect("BUG: invalid output scan regex literal"),
        )
    })
    .collect()
});

/// Rates `markup` by the riskiest construct it contains.
pub fn scan(markup: &str) -> ScanReport {
    let decoded = decode_references(markup);
    let findings: Vec<Finding> = PATTERNS
        .iter()
        .filter_map(|(name, risk, reading, pattern)| {
            let text: &str = match reading {
                Reading::Raw => markup,
                Reading::Decoded => &*decoded,
            };
            pattern.find(text).map(|found| Finding {
                pattern: name,
                risk: *risk,
                excerpt: text[found.start()..].chars().take(48).collect(),
            })
        })
        .collect();

    let risk = findings
        .iter()
        .map(|finding| finding.risk)
        .max()
        .unwrap_or(Risk::Low);

    ScanReport {
        risk,
        safe_to_use: risk < Risk::High,
        findings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_svg_is_low_risk() {
        let report = scan(r#"<svg xmlns="http://www.w3.org/2000/svg"><rect fill="red"/></svg>"#);
        assert_eq!(report.risk, Risk::Low);
        assert!(report.safe_to_use);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn scripts_and_handlers_are_high_risk() {
        for markup in [
            "<svg><script>alert(1)</script></svg>",
            "<svg><rect onclick='x()'/></svg>",
            "<svg><rect onload=x/></svg>",
            r#"<svg><a href="javascript:alert(1)">x</a></svg>"#,
            r#"<svg><image href="data:text/html;base64,AAAA"/></svg>"#,
        ] {
            let report = scan(markup);
            assert_eq!(report.risk, Risk::High, "{markup}");
            assert!(!report.safe_to_use);
        }
    }

    #[test]
    fn encoded_script_urls_are_high_risk() {
        for markup in [
            r#"<svg><a href="&#106;avascript:alert(1)">x</a></svg>"#,
            r#"<svg><animate attributeName="href" values="&#x6A;avascript:alert(1)"/></svg>"#,
            r#"<svg><a href="java&#x09;script&colon;go()">x</a></svg>"#,
            r#"<svg><image href="data&#58;text/html,x"/></svg>"#,
        ] {
            let report = scan(markup);
            assert_eq!(report.risk, Risk::High, "{markup}");
            assert!(!report.safe_to_use);
        }
    }

    #[test]
    fn escaped_markup_in_text_is_not_an_element() {
        let report = scan("<svg><text>&lt;script&gt;</text></svg>");
        assert!(report.findings.is_empty(), "{:?}", report.findings);
    }

    #[test]
    fn external_resources_are_medium_risk() {
        let report = scan(concat!(
            r#"<svg><image href="https://cdn.example.com/a.png"/>"#,
            "<style>@import url(x.css);</style></svg>",
        ));
        assert_eq!(report.risk, Risk::Medium);
        assert!(report.safe_to_use);
        assert_eq!(
            report.patterns_at(Risk::Medium),
            vec!["external-reference", "css-import"]
        );
        assert_eq!(report.patterns_at(Risk::Low), vec!["style-element"]);
    }

    #[test]
    fn handler_words_in_text_are_ignored() {
        let report = scan("<svg><text>someone = everyone</text></svg>");
        assert!(report.findings.is_empty());
    }
}
