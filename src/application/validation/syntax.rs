use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

static ASYMMETRIC_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\w)>[^\]\n]*\]").expect("BUG: invalid ASYMMETRIC_SHAPE regex literal")
});
static ARROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<?(?:-\.+-|={2,}|-{2,})(?:>|o|x)?(?:\|[^|]*\|)?|->>|-\)")
        .expect("BUG: invalid ARROW regex literal")
});
static TRAILING_CONNECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:-\.+->?|={2,}>?|-{2,}[>ox]?)\s*(?:\|[^|]*\|)?\s*$")
        .expect("BUG: invalid TRAILING_CONNECTOR regex literal")
});
static LEADING_CONNECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:<?-{2,}>|<?={2,}>|-\.+->)")
        .expect("BUG: invalid LEADING_CONNECTOR regex literal")
});
static NODE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_]\w*)").expect("BUG: invalid NODE_ID regex literal")
});
static LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\[([^\]]*)\]|\(([^)]*)\)|\{([^}]*)\}|"([^"]*)""#)
        .expect("BUG: invalid LABEL regex literal")
});

const FLOWCHART_KEYWORDS: &[&str] = &[
    "flowchart",
    "graph",
    "subgraph",
    "end",
    "classDef",
    "class",
    "style",
    "linkStyle",
    "click",
    "direction",
];

/// Lines carrying statements, with comments and blank lines removed.
fn statement_lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with("%%"))
}

fn without_quoted(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_quotes = false;
    for ch in line.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if !in_quotes {
            out.push(ch);
        }
    }
    out
}

/// Reports the first unbalanced bracket, ignoring quoted text and comments.
pub fn check_brackets(source: &str) -> Option<String> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    for (line_no, line) in statement_lines(source) {
        let line = ASYMMETRIC_SHAPE.replace_all(&without_quoted(line), "$1").into_owned();
        for ch in line.chars() {
            match ch {
                '(' | '[' | '{' => stack.push((ch, line_no)),
                ')' | ']' | '}' => {
                    let expected = match ch {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, open_line)) => {
                            return Some(format!(
                                "line {line_no}: `{ch}` closes `{open}` opened on line {open_line}"
                            ));
                        }
                        None => return Some(format!("line {line_no}: unmatched `{ch}`")),
                    }
                }
                _ => {}
            }
        }
    }
    stack
        .last()
        .map(|(open, line_no)| format!("line {line_no}: `{open}` is never closed"))
}

/// Flowchart lines that start or end on a connector with nothing attached.
pub fn dangling_connectors(source: &str) -> Vec<String> {
    statement_lines(source)
        .filter_map(|(line_no, line)| {
            let line = without_quoted(line);
            let line = line.trim_end_matches(';').trim();
            if let Some(found) = TRAILING_CONNECTOR.find(line) {
                return Some(format!(
                    "line {line_no}: connector `{}` has no target",
                    found.as_str().trim()
                ));
            }
            LEADING_CONNECTOR
                .find(line)
                .map(|found| {
                    format!("line {line_no}: connector `{}` has no source", found.as_str())
                })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Complexity {
    pub nodes: usize,
    pub edges: usize,
    pub longest_label: usize,
}

/// Rough node/edge/label statistics; only feeds warnings.
pub fn measure(source: &str, count_nodes: bool) -> Complexity {
    let mut nodes = BTreeSet::new();
    let mut edges = 0;
    let mut longest_label = 0;

    for (index, line) in statement_lines(source) {
        if index == 1 || line.starts_with("%%") {
            continue;
        }
        edges += ARROW.find_iter(line).count();

        for caps in LABEL.captures_iter(line) {
            let label = (1..=4)
                .find_map(|group| caps.get(group))
                .map(|m| m.as_str().chars().count())
                .unwrap_or(0);
            longest_label = longest_label.max(label);
        }

        if count_nodes {
            let first_word = line.split_whitespace().next().unwrap_or("");
            if FLOWCHART_KEYWORDS.contains(&first_word) {
                continue;
            }
            for segment in ARROW.split(line) {
                for part in segment.split('&') {
                    if let Some(caps) = NODE_ID.captures(part)
                        && let Some(id) = caps.get(1)
                    {
                        nodes.insert(id.as_str().to_string());
                    }
                }
            }
        }
    }

    Complexity {
        nodes: nodes.len(),
        edges,
        longest_label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_shapes_pass() {
        let source = concat!(
            "flowchart TD\n A[Start] --> B{Is it?}\n B -->|Yes| C((Done))\n",
            " B --> D>Asymmetric]\n E[\"label with ( paren\"]",
        );
        assert_eq!(check_brackets(source), None);
    }

    #[test]
    fn reports_unclosed_and_mismatched_brackets() {
        assert_eq!(
            check_brackets("flowchart TD\n A[Start --> B"),
            Some("line 2: `[` is never closed".to_string())
        );
        assert!(
            check_brackets("flowchart TD\n A(Start] --> B")
                .is_some_and(|msg| msg.contains("closes `(`"))
        );
        assert!(check_brackets("flowchart TD\n A --> B)").is_some());
    }

    #[test]
    fn comments_are_ignored_for_brackets() {
        assert_eq!(check_brackets("flowchart TD\n %% A[unclosed\n A --> B"), None);
    }

    #[test]
    fn finds_dangling_connectors() {
        let issues = dangling_connectors("flowchart TD\n A -->\n --> B\n C --> D");
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("line 2"));
        assert!(issues[1].contains("no source"));
    }

    #[test]
    fn measures_nodes_edges_and_labels() {
        let stats = measure(
            "flowchart LR\n A[Alpha] --> B[Beta]\n B --> C & D\n classDef hot fill:#f00",
            true,
        );
        assert_eq!(stats.nodes, 4);
        assert_eq!(stats.edges, 2);
        assert_eq!(stats.longest_label, 5);
    }
}
