//! Diagram-type detection from the leading keyword of the source.

use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagramType {
    Flowchart,
    Sequence,
    Class,
    State,
    EntityRelationship,
    Gantt,
    Pie,
    Journey,
    GitGraph,
    Mindmap,
    Timeline,
    QuadrantChart,
    Requirement,
    C4,
    Sankey,
    XyChart,
    Block,
}

impl DiagramType {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagramType::Flowchart => "flowchart",
            DiagramType::Sequence => "sequence",
            DiagramType::Class => "class",
            DiagramType::State => "state",
            DiagramType::EntityRelationship => "entity-relationship",
            DiagramType::Gantt => "gantt",
            DiagramType::Pie => "pie",
            DiagramType::Journey => "journey",
            DiagramType::GitGraph => "git-graph",
            DiagramType::Mindmap => "mindmap",
            DiagramType::Timeline => "timeline",
            DiagramType::QuadrantChart => "quadrant-chart",
            DiagramType::Requirement => "requirement",
            DiagramType::C4 => "c4",
            DiagramType::Sankey => "sankey",
            DiagramType::XyChart => "xy-chart",
            DiagramType::Block => "block",
        }
    }

    /// Types whose node syntax uses paired brackets for shapes.
    pub fn uses_bracket_shapes(self) -> bool {
        matches!(self, DiagramType::Flowchart | DiagramType::Class)
    }
}

impl fmt::Display for DiagramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiagramType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        KEYWORDS
            .iter()
            .map(|(_, kind)| *kind)
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| DomainError::unknown_variant("diagram type", value))
    }
}

static KEYWORDS: Lazy<Vec<(Regex, DiagramType)>> = Lazy::new(|| {
    [
        (r"^(?:flowchart|graph)\b", DiagramType::Flowchart),
        (r"^sequenceDiagram\b", DiagramType::Sequence),
        (r"^classDiagram(?:-v2)?\b", DiagramType::Class),
        (r"^stateDiagram(?:-v2)?\b", DiagramType::State),
        (r"^erDiagram\b", DiagramType::EntityRelationship),
        (r"^gantt\b", DiagramType::Gantt),
        (r"^pie\b", DiagramType::Pie),
        (r"^journey\b", DiagramType::Journey),
        (r"^gitGraph\b", DiagramType::GitGraph),
        (r"^mindmap\b", DiagramType::Mindmap),
        (r"^timeline\b", DiagramType::Timeline),
        (r"^quadrantChart\b", DiagramType::QuadrantChart),
        (r"^requirementDiagram\b", DiagramType::Requirement),
        (
            r"^C4(?:Context|Container|Component|Dynamic|Deployment)\b",
            DiagramType::C4,
        ),
        (r"^sankey(?:-beta)?\b", DiagramType::Sankey),
        (r"^xychart(?:-beta)?\b", DiagramType::XyChart),
        (r"^block(?:-beta)?\b", DiagramType::Block),
    ]
    .into_iter()
    .map(|(pattern, kind)| {
        (
            Regex::new(pattern).expect("BUG: invalid diagram keyword regex literal"),
            kind,
        )
    })
    .collect()
});

/// Detects the diagram type from the first significant line.
///
/// Blank lines, `%%` comments and init directives, and a leading `---` front
/// matter block are skipped.
pub fn detect(source: &str) -> Option<DiagramType> {
    let line = first_significant_line(source)?;
    KEYWORDS
        .iter()
        .find(|(pattern, _)| pattern.is_match(line))
        .map(|(_, kind)| *kind)
}

/// Returns the first line that carries diagram content.
pub fn first_significant_line(source: &str) -> Option<&str> {
    let mut lines = source.lines().map(str::trim).peekable();

    while lines.peek().is_some_and(|line| line.is_empty()) {
        lines.next();
    }
    if lines.peek() == Some(&"---") {
        lines.next();
        for line in lines.by_ref() {
            if line == "---" {
                break;
            }
        }
    }

    lines.find(|line| !line.is_empty() && !line.starts_with("%%"))
}
