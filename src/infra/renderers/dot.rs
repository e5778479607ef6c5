//! Translation of Mermaid flowchart statements into Graphviz DOT.
//!
//! Covers node shapes, chained and `&`-grouped edges, edge labels in both
//! `-->|text|` and `-- text -->` form, and subgraphs as clusters. Styling
//! statements (`classDef`, `style`, `click`, ...) are ignored.

use std::{collections::HashMap, fmt::Write as _};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    application::renderer::RendererError,
    domain::{DiagramType, diagram},
};

const INDENT: &str = "    ";

static HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:flowchart|graph)\b(?:\s+(TB|TD|BT|LR|RL))?\s*$")
        .expect("BUG: invalid flowchart header regex literal")
});

static NODE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+").expect("BUG: invalid node id regex literal"));

static CLASS_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^:::[\w-]+").expect("BUG: invalid class suffix regex literal")
});

static LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(<?)(-{2,}|={2,}|-\.+-)(>|o|x)?(?:\|([^|]*)\|)?\s*")
        .expect("BUG: invalid link regex literal")
});

/// `A -- text --> B` rewritten to `A -->|text| B`.
static TEXT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(^|[^-=.<])(?:--|==|-\.)\s+",
        r"([^-=.|>\s][^|>]*?)\s+(-->|---|==>|===|\.->|\.-)",
    ))
    .expect("BUG: invalid text link regex literal")
});

const IGNORED: &[&str] = &["classDef", "class", "style", "linkStyle", "click", "direction"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Box,
    Rounded,
    Stadium,
    Subroutine,
    Cylinder,
    Circle,
    DoubleCircle,
    Asymmetric,
    Diamond,
    Hexagon,
    Parallelogram,
}

impl Shape {
    fn attrs(self) -> &'static str {
        match self {
            Shape::Box => "",
            Shape::Rounded | Shape::Stadium => "style=rounded",
            Shape::Subroutine => "peripheries=2",
            Shape::Cylinder => "shape=cylinder",
            Shape::Circle => "shape=circle",
            Shape::DoubleCircle => "shape=doublecircle",
            Shape::Asymmetric => "shape=cds",
            Shape::Diamond => "shape=diamond",
            Shape::Hexagon => "shape=hexagon",
            Shape::Parallelogram => "shape=parallelogram",
        }
    }
}

/// Openers are tried in order, longest first.
const SHAPES: &[(&str, &str, Shape)] = &[
    ("(((", ")))", Shape::DoubleCircle),
    ("((", "))", Shape::Circle),
    ("([", "])", Shape::Stadium),
    ("[(", ")]", Shape::Cylinder),
    ("[[", "]]", Shape::Subroutine),
    ("[/", "]", Shape::Parallelogram),
    ("[\\", "]", Shape::Parallelogram),
    ("{{", "}}", Shape::Hexagon),
    ("(", ")", Shape::Rounded),
    ("[", "]", Shape::Box),
    ("{", "}", Shape::Diamond),
    (">", "]", Shape::Asymmetric),
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    id: String,
    label: Option<String>,
    shape: Shape,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Link {
    label: Option<String>,
    attrs: Vec<&'static str>,
}

/// Converts flowchart source into a DOT digraph.
pub fn to_dot(source: &str, background: Option<&str>) -> Result<String, RendererError> {
    let Some(first) = diagram::first_significant_line(source) else {
        return Err(RendererError::syntax("empty flowchart"));
    };
    let (header, inline) = first.split_once(';').unwrap_or((first, ""));
    let Some(caps) = HEADER.captures(header.trim()) else {
        let diagram = diagram::detect(source).unwrap_or(DiagramType::Flowchart);
        return Err(RendererError::UnsupportedDiagram {
            renderer: "graphviz".to_string(),
            diagram,
        });
    };
    let rankdir = match caps.get(1).map(|m| m.as_str()) {
        Some("LR") => "LR",
        Some("RL") => "RL",
        Some("BT") => "BT",
        _ => "TB",
    };

    let mut writer = DotWriter::new(rankdir, background);
    let body = source
        .lines()
        .skip_while(|line| line.trim() != first)
        .skip(1);
    let statements = std::iter::once((1, inline.to_string()))
        .chain(body.enumerate().map(|(index, line)| (index + 2, line.to_string())));

    for (line_number, line) in statements {
        for statement in split_statements(&line) {
            writer.statement(statement.trim(), line_number)?;
        }
    }
    Ok(writer.finish())
}

struct DotWriter {
    out: String,
    depth: usize,
    clusters: usize,
    declared: HashMap<String, (Option<String>, Shape)>,
}

impl DotWriter {
    fn new(rankdir: &str, background: Option<&str>) -> Self {
        let mut out = String::from("digraph G {\n");
        let _ = writeln!(out, "{INDENT}rankdir={rankdir};");
        if let Some(color) = background.filter(|color| !color.trim().is_empty()) {
            let _ = writeln!(out, "{INDENT}bgcolor=\"{}\";", escape(color.trim()));
        }
        let _ = writeln!(out, "{INDENT}node [shape=box, fontname=\"Helvetica\"];");
        let _ = writeln!(out, "{INDENT}edge [fontname=\"Helvetica\"];");
        Self {
            out,
            depth: 1,
            clusters: 0,
            declared: HashMap::new(),
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn statement(&mut self, statement: &str, line_number: usize) -> Result<(), RendererError> {
        if statement.is_empty() || statement.starts_with("%%") {
            return Ok(());
        }
        let keyword = statement.split_whitespace().next().unwrap_or_default();
        if IGNORED.contains(&keyword) {
            return Ok(());
        }
        if keyword == "subgraph" {
            self.open_cluster(statement["subgraph".len()..].trim());
            return Ok(());
        }
        if statement == "end" {
            if self.depth <= 1 {
                return Err(RendererError::syntax(format!(
                    "line {line_number}: `end` without subgraph"
                )));
            }
            self.depth -= 1;
            self.line("}");
            return Ok(());
        }

        let rewritten = TEXT_LINK.replace_all(statement, |caps: &regex::Captures<'_>| {
            let close = match &caps[3] {
                ".->" => "-.->",
                ".-" => "-.-",
                other => other,
            };
            format!("{}{close}|{}|", &caps[1], &caps[2])
        });
        let chain = parse_chain(&rewritten).ok_or_else(|| {
            RendererError::syntax(format!("line {line_number}: cannot read `{statement}`"))
        })?;
        self.emit_chain(chain);
        Ok(())
    }

    fn open_cluster(&mut self, title: &str) {
        let label = match title.split_once('[') {
            Some((_, rest)) => unquote(rest.trim_end_matches(']')),
            None => unquote(title),
        };
        self.clusters += 1;
        let header = format!("subgraph cluster_{} {{", self.clusters);
        self.line(&header);
        self.depth += 1;
        self.line(&format!("label=\"{}\";", escape(&label)));
    }

    fn emit_chain(&mut self, chain: Vec<(Vec<Node>, Option<Link>)>) {
        for (group, _) in &chain {
            for node in group {
                self.declare(node);
            }
        }
        for pair in chain.windows(2) {
            let (left, Some(link)) = (&pair[0].0, &pair[0].1) else {
                continue;
            };
            let right = &pair[1].0;
            for from in left {
                for to in right {
                    let mut attrs: Vec<String> = Vec::new();
                    if let Some(label) = &link.label {
                        attrs.push(format!("label=\"{}\"", escape(label)));
                    }
                    attrs.extend(link.attrs.iter().map(|attr| attr.to_string()));
                    let suffix = if attrs.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", attrs.join(", "))
                    };
                    self.line(&format!(
                        "\"{}\" -> \"{}\"{suffix};",
                        escape(&from.id),
                        escape(&to.id)
                    ));
                }
            }
        }
    }

    fn declare(&mut self, node: &Node) {
        let state = (node.label.clone(), node.shape);
        match self.declared.get(&node.id) {
            Some(_) if node.label.is_none() => return,
            Some(existing) if *existing == state => return,
            _ => {}
        }
        let label = node.label.as_deref().unwrap_or(&node.id);
        let mut attrs = vec![format!("label=\"{}\"", escape(label))];
        if !node.shape.attrs().is_empty() {
            attrs.push(node.shape.attrs().to_string());
        }
        self.line(&format!("\"{}\" [{}];", escape(&node.id), attrs.join(", ")));
        self.declared.insert(node.id.clone(), state);
    }

    fn finish(mut self) -> String {
        while self.depth > 1 {
            self.depth -= 1;
            self.line("}");
        }
        self.out.push_str("}\n");
        self.out
    }
}

/// Parses `group (link group)*` where a group is `node (& node)*`.
fn parse_chain(statement: &str) -> Option<Vec<(Vec<Node>, Option<Link>)>> {
    let mut rest = statement.trim();
    let mut chain = Vec::new();
    loop {
        let (group, after) = parse_group(rest)?;
        rest = after;
        if rest.trim().is_empty() {
            chain.push((group, None));
            return Some(chain);
        }
        let (link, after) = parse_link(rest)?;
        chain.push((group, Some(link)));
        rest = after;
    }
}

fn parse_group(input: &str) -> Option<(Vec<Node>, &str)> {
    let mut nodes = Vec::new();
    let mut rest = input;
    loop {
        let (node, after) = parse_node(rest.trim_start())?;
        nodes.push(node);
        let trimmed = after.trim_start();
        match trimmed.strip_prefix('&') {
            Some(next) => rest = next,
            None => return Some((nodes, after)),
        }
    }
}

fn parse_node(input: &str) -> Option<(Node, &str)> {
    let id = NODE_ID.find(input)?.as_str();
    let mut rest = &input[id.len()..];

    let mut label = None;
    let mut shape = Shape::Box;
    if let Some((opener, closer, kind)) = SHAPES
        .iter()
        .find(|(opener, _, _)| rest.starts_with(opener))
    {
        let inner = &rest[opener.len()..];
        let end = find_closer(inner, closer)?;
        let mut text = inner[..end].trim();
        if *kind == Shape::Parallelogram {
            text = text.trim_end_matches(['/', '\\']);
        }
        label = Some(unquote(text));
        shape = *kind;
        rest = &inner[end + closer.len()..];
    }
    if let Some(class) = CLASS_SUFFIX.find(rest) {
        rest = &rest[class.end()..];
    }

    Some((
        Node {
            id: id.to_string(),
            label,
            shape,
        },
        rest,
    ))
}

/// Byte offset of `closer` in `text`, skipping a leading quoted label.
fn find_closer(text: &str, closer: &str) -> Option<usize> {
    let search_from = if let Some(quoted) = text.strip_prefix('"') {
        quoted.find('"').map(|end| end + 2)?
    } else {
        0
    };
    text[search_from..].find(closer).map(|offset| offset + search_from)
}

fn parse_link(input: &str) -> Option<(Link, &str)> {
    let caps = LINK.captures(input)?;
    let whole = caps.get(0)?;
    let both_ends = !caps[1].is_empty();
    let body = &caps[2];
    let head = caps.get(3).map(|m| m.as_str());

    let mut attrs = Vec::new();
    if body.starts_with('=') {
        attrs.push("penwidth=2");
    } else if body.contains('.') {
        attrs.push("style=dotted");
    }
    match head {
        None => attrs.push("arrowhead=none"),
        Some("o") => attrs.push("arrowhead=odot"),
        Some("x") => attrs.push("arrowhead=tee"),
        _ => {}
    }
    if both_ends && head.is_some() {
        attrs.push("dir=both");
    }

    let label = caps
        .get(4)
        .map(|m| unquote(m.as_str().trim()))
        .filter(|label| !label.is_empty());
    Some((Link { label, attrs }, &input[whole.end()..]))
}

/// Splits a line on `;` outside brackets and quotes.
fn split_statements(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '[' | '(' | '{' if !quoted => depth += 1,
            ']' | ')' | '}' if !quoted => depth -= 1,
            ';' if !quoted && depth <= 0 => {
                parts.push(&line[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&line[start..]);
    parts
}

fn unquote(text: &str) -> String {
    let trimmed = text.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
