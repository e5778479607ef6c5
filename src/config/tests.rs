use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::*;
use crate::domain::{Capability, OutputFormat};

fn render_args(argv: &[&str]) -> RenderArgs {
    let mut full = vec!["diagram-relay", "render"];
    full.extend_from_slice(argv);
    match CliArgs::parse_from(full).command {
        Command::Render(args) => args,
        other => panic!("expected render command, got {other:?}"),
    }
}

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.render.max_fallbacks, 3);
    assert_eq!(settings.render.attempt_timeout, Duration::from_secs(30));
    assert!(settings.render.strict_validation);
    assert!(!settings.render.strict_sanitization);
    assert_eq!(settings.validation.max_source_bytes, 50_000);
    assert_eq!(settings.validation.max_edges, 400);
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.ttl_seconds, 3_600);
    assert_eq!(settings.cache.capacity, 256);
    assert!(settings.cache.directory.is_none());
    assert!(settings.renderers.is_empty());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());

    raw.apply_log_overrides(&LogOverrides {
        log_level: Some("debug".to_string()),
        log_json: Some(true),
    });
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn strict_render_flag_enables_both_strict_modes() {
    let mut raw = RawSettings::default();
    raw.render.strict_validation = Some(false);
    raw.apply_render_overrides(&render_args(&["diagram.mmd", "--strict", "--no-cache"]));

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.render.strict_validation);
    assert!(settings.render.strict_sanitization);
    assert!(!settings.cache.enabled);
}

#[test]
fn zero_values_are_rejected_with_their_key() {
    let mut raw = RawSettings::default();
    raw.render.max_fallbacks = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "render.max_fallbacks",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.cache.ttl_seconds = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.ttl_seconds",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.logging.level = Some("chatty".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "logging.level", .. })
    ));
}

#[test]
fn parse_render_arguments() {
    let args = render_args(&[
        "-",
        "--format",
        "png",
        "--output",
        "out.png",
        "--renderer",
        "kroki",
        "--theme",
        "dark",
        "--require",
        "theme-support",
        "--require",
        "remote",
    ]);

    assert_eq!(args.input, PathBuf::from("-"));
    assert_eq!(args.format, OutputFormat::Png);
    assert_eq!(args.output, Some(PathBuf::from("out.png")));
    assert_eq!(args.renderer.as_deref(), Some("kroki"));
    assert_eq!(args.theme.as_deref(), Some("dark"));
    assert_eq!(
        args.require,
        vec![Capability::ThemeSupport, Capability::RemoteRendering]
    );
    assert!(!args.strict);
}

#[test]
fn render_format_defaults_to_svg() {
    assert_eq!(render_args(&["diagram.mmd"]).format, OutputFormat::Svg);
}

#[test]
fn parse_other_subcommands() {
    let args = CliArgs::parse_from([
        "diagram-relay",
        "validate",
        "in.mmd",
        "--strict",
        "--log-level",
        "warn",
    ]);
    match args.command {
        Command::Validate(validate) => {
            assert!(validate.strict);
            assert_eq!(validate.format, OutputFormat::Svg);
        }
        other => panic!("expected validate command, got {other:?}"),
    }
    assert_eq!(args.logging.log_level.as_deref(), Some("warn"));

    let args = CliArgs::parse_from([
        "diagram-relay",
        "renderers",
        "--format",
        "pdf",
        "--available",
    ]);
    assert!(matches!(
        args.command,
        Command::Renderers(RenderersArgs {
            format: Some(OutputFormat::Pdf),
            available: true,
        })
    ));

    let args = CliArgs::parse_from(["diagram-relay", "cache", "purge"]);
    assert!(matches!(
        args.command,
        Command::Cache(CacheArgs {
            command: CacheCommand::Purge
        })
    ));
}

#[test]
fn rejects_unknown_formats_and_missing_commands() {
    assert!(
        CliArgs::try_parse_from(["diagram-relay", "render", "a.mmd", "--format", "gif"]).is_err()
    );
    assert!(
        CliArgs::try_parse_from([
            "diagram-relay",
            "render",
            "a.mmd",
            "--require",
            "telepathy"
        ])
        .is_err()
    );
    assert!(CliArgs::try_parse_from(["diagram-relay"]).is_err());
}

#[test]
#[serial]
fn file_then_env_then_cli_precedence() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("relay.toml");
    fs::write(
        &path,
        r#"
[logging]
level = "warn"

[render]
max_fallbacks = 5
attempt_timeout_seconds = 12

[cache]
directory = "/var/cache/diagram-relay"

[renderers.kroki]
server = "https://kroki.internal"
timeout_seconds = 4
"#,
    )
    .expect("write config");

    // SAFETY: env-mutating tests are serialized.
    unsafe { std::env::set_var("DIAGRAM_RELAY__RENDER__MAX_FALLBACKS", "2") };
    let args = CliArgs::parse_from([
        "diagram-relay",
        "--config-file",
        path.to_str().expect("utf-8 path"),
        "renderers",
        "--log-level",
        "error",
    ]);
    let loaded = load(&args);
    unsafe { std::env::remove_var("DIAGRAM_RELAY__RENDER__MAX_FALLBACKS") };

    let settings = loaded.expect("settings load");
    assert_eq!(settings.logging.level, LevelFilter::ERROR);
    assert_eq!(settings.render.max_fallbacks, 2);
    assert_eq!(settings.render.attempt_timeout, Duration::from_secs(12));
    assert_eq!(
        settings.cache.directory,
        Some(PathBuf::from("/var/cache/diagram-relay"))
    );
    let kroki = &settings.renderers["kroki"];
    assert_eq!(kroki.get("server"), Some("https://kroki.internal"));
    assert_eq!(kroki.get("timeout_seconds"), Some("4"));
}

#[test]
#[serial]
fn missing_explicit_config_file_is_an_error() {
    let args = CliArgs::parse_from([
        "diagram-relay",
        "--config-file",
        "/nonexistent/diagram-relay.toml",
        "cache",
        "purge",
    ]);
    assert!(matches!(load(&args), Err(LoadError::Build(_))));
}
