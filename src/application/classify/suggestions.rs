use super::ErrorCategory;

fn category_suggestions(category: ErrorCategory) -> &'static [&'static str] {
    match category {
        ErrorCategory::Configuration => &[
            "Check the renderer section of the configuration file for typos",
            "Compare the renderer settings against its published config schema",
        ],
        ErrorCategory::Dependency => &[
            "Install the missing tool or make sure it is on PATH",
            "Point the renderer's `cli_path` setting at the installed binary",
        ],
        ErrorCategory::Network => &[
            "Check network connectivity to the rendering service",
            "Retry later or configure a local renderer as fallback",
        ],
        ErrorCategory::Syntax => &[
            "Check the diagram source for typos in keywords and arrows",
            "Make sure every bracket and quote is closed",
        ],
        ErrorCategory::Rendering => &[
            "Simplify the diagram and retry",
            "Try a different renderer with --renderer",
        ],
        ErrorCategory::System => &[
            "Check file permissions and free disk space",
            "Inspect the logs with --log-level debug",
        ],
        ErrorCategory::Timeout => &[
            "Increase render.attempt_timeout_seconds",
            "Reduce diagram size or complexity",
        ],
        ErrorCategory::Validation => &[
            "Fix the reported validation errors before rendering",
            "Remove script, iframe, and event-handler constructs from labels",
        ],
    }
}

fn renderer_suggestions(renderer: &str, category: ErrorCategory) -> &'static [&'static str] {
    match (renderer, category) {
        ("mermaid-cli", ErrorCategory::Dependency) => &[
            "Install the Mermaid CLI: npm install -g @mermaid-js/mermaid-cli",
        ],
        ("mermaid-cli", ErrorCategory::Timeout) => &[
            "The first mmdc run downloads a headless browser; warm it up once by hand",
        ],
        ("graphviz", ErrorCategory::Dependency) => &[
            "Install Graphviz so that the `dot` binary is available",
        ],
        ("graphviz", ErrorCategory::Syntax) => &[
            "The graphviz backend only understands flowchart nodes and edges",
        ],
        ("mermaid-ink", ErrorCategory::Network | ErrorCategory::Timeout) => &[
            "Check that https://mermaid.ink is reachable or set `server` to a self-hosted instance",
        ],
        ("kroki", ErrorCategory::Network | ErrorCategory::Timeout) => &[
            "Check that the Kroki server is reachable or run the yuzutech/kroki image",
        ],
        _ => &[],
    }
}

/// Advisory text for a failure; renderer-specific entries come first.
pub fn suggestions_for(category: ErrorCategory, renderer: Option<&str>) -> Vec<String> {
    let specific = renderer
        .map(|name| renderer_suggestions(name, category))
        .unwrap_or(&[]);

    specific
        .iter()
        .chain(category_suggestions(category))
        .map(|line| line.to_string())
        .collect()
}
