mod common;

use std::sync::Arc;

use common::{Behavior, flowchart, register, svg_descriptor, working};
use diagram_relay::{
    application::{
        classify::ErrorCategory,
        orchestrator::{RenderOrchestrator, RenderPolicy},
        registry::RendererRegistry,
        safety::{
            SafetyPipeline,
            scan::{Risk, scan},
        },
    },
    domain::{OutputFormat, RenderContent},
};

const HOSTILE: &str = concat!(
    r#"<svg xmlns="http://www.w3.org/2000/svg" onload="steal()"><script>alert(1)</script>"#,
    r#"<a href="javascript:alert(2)"><rect width="4" height="4" ONCLICK='y()'/></a>"#,
    "<text>kept</text></svg>",
);

fn assert_clean(markup: &str) {
    let lower = markup.to_lowercase();
    for needle in ["<script", "onclick=", "onload=", "javascript:"] {
        assert!(!lower.contains(needle), "`{needle}` survived in {markup}");
    }
}

#[test]
fn strict_sanitization_strips_scripts_and_handlers() {
    let markup = "<svg><script>x</script><rect onclick='y'/></svg>";
    let cleaned = SafetyPipeline::new(true).sanitize(markup).expect("sanitize");
    assert!(!cleaned.contains("<script"), "{cleaned}");
    assert!(!cleaned.contains("onclick="), "{cleaned}");
}

#[test]
fn lenient_sanitization_strips_active_content_too() {
    let cleaned = SafetyPipeline::new(false).sanitize(HOSTILE).expect("sanitize");
    assert_clean(&cleaned);
    assert!(cleaned.contains("kept"));
}

#[test]
fn rendered_output_is_cleaned_before_it_is_returned() {
    for strict in [false, true] {
        let registry = Arc::new(RendererRegistry::new());
        register(
            &registry,
            svg_descriptor("hostile", 1),
            true,
            Behavior::Svg(HOSTILE.to_string()),
        );
        let orchestrator = RenderOrchestrator::new(registry, RenderPolicy::default())
            .with_safety(SafetyPipeline::new(strict));

        let outcome = orchestrator
            .render(&flowchart(OutputFormat::Svg))
            .expect("hostile output is cleaned, not rejected");
        let text = outcome.text().expect("svg is text");
        assert_clean(text);
        assert!(text.contains("<svg"), "{text}");
        assert!(outcome.metadata.contains_key("safety"));
    }
}

#[test]
fn default_pipeline_drops_entity_encoded_script_urls() {
    let pipeline = SafetyPipeline::new(false);
    for markup in [
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg">"#,
            r#"<a href="&#106;avascript:alert(1)"><text>kept</text></a></svg>"#,
        ),
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><a href="/x">"#,
            r#"<animate attributeName="href" values="&#x6A;avascript:alert(1)"/>"#,
            "<text>kept</text></a></svg>",
        ),
    ] {
        assert_eq!(scan(markup).risk, Risk::High, "{markup}");

        let safe = pipeline
            .process(RenderContent::Text(markup.to_string()), OutputFormat::Svg)
            .expect("payload is cleaned, not rejected");
        let text = safe.content.as_text().expect("svg is text");
        assert!(!text.contains("avascript"), "{text}");
        assert!(text.contains("kept"), "{text}");
        assert_eq!(safe.report.initial_risk, Some(Risk::High));
        assert!(safe.report.sanitized);
        assert!(scan(text).safe_to_use);
    }
}

#[test]
fn unusable_output_moves_on_to_the_next_renderer() {
    let registry = Arc::new(RendererRegistry::new());
    let broken = register(
        &registry,
        svg_descriptor("html-emitter", 1),
        true,
        Behavior::Svg("<html><body>not a diagram</body></html>".to_string()),
    );
    working(&registry, "steady", 2);
    let orchestrator = RenderOrchestrator::new(registry, RenderPolicy::default());

    let outcome = orchestrator
        .render(&flowchart(OutputFormat::Svg))
        .expect("steady renders");
    assert_eq!(outcome.renderer_name, "steady");
    assert_eq!(broken.renders(), 1);

    let failed = outcome.metadata["failed_attempts"]
        .as_array()
        .expect("trace is an array");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["renderer"], "html-emitter");
    assert_eq!(failed[0]["error"]["category"], ErrorCategory::Rendering.as_str());
}

#[test]
fn binary_output_needs_its_signature() {
    let pipeline = SafetyPipeline::new(false);
    let png = RenderContent::Binary(b"\x89PNG\r\n\x1a\nrest-of-image".to_vec());
    assert!(pipeline.process(png, OutputFormat::Png).is_ok());

    let fake = RenderContent::Binary(b"<svg></svg>".to_vec());
    assert!(pipeline.process(fake, OutputFormat::Png).is_err());
}
