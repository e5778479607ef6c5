use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process,
};

use diagram_relay::{
    application::{error::AppError, registry::RendererFilter, runtime::RenderRuntime},
    cache::DiskStore,
    config::{self, CacheCommand, Command, RenderArgs, RenderersArgs, Settings, ValidateArgs},
    domain::{RenderRequest, Theme},
    infra::telemetry,
};
use serde::Serialize;
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    let log = || {
        error!(
            target = "diagram_relay::main",
            source = report.source,
            error = %report.chain(),
            "application error"
        );
    };
    if dispatcher::has_been_set() {
        log();
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, log);
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Render(args) => run_render(&settings, args),
        Command::Validate(args) => run_validate(&settings, args),
        Command::Renderers(args) => run_renderers(&settings, args),
        Command::Cache(args) => match args.command {
            CacheCommand::Purge => run_cache_purge(&settings),
        },
    }
}

fn run_render(settings: &Settings, args: RenderArgs) -> Result<(), AppError> {
    let source = read_input(&args.input)?;
    let mut request = RenderRequest::new(source, args.format);
    if let Some(theme) = args.theme {
        request = request.with_theme(Theme::named(theme));
    }
    if let Some(renderer) = args.renderer {
        request = request.with_preferred_renderer(renderer);
    }
    for capability in args.require {
        request = request.requiring(capability);
    }

    let runtime = RenderRuntime::from_settings(settings)?;
    let result = runtime.render(&request);
    runtime.shutdown();

    let outcome = result.inspect_err(|failure| {
        if let Some(record) = failure.record() {
            warn!(
                target = "diagram_relay::main",
                op = "render",
                result = "error",
                code = %record.code,
                category = record.category.as_str(),
                suggestions = ?record.suggestions,
                "Render failed"
            );
        }
    })?;
    let content = outcome
        .content
        .as_ref()
        .ok_or_else(|| AppError::unexpected("successful render carried no content"))?;

    match &args.output {
        Some(path) => {
            fs::write(path, content.as_bytes()).map_err(|source| AppError::Output {
                path: path.clone(),
                source,
            })?;
            print_json(&outcome)?;
            info!(
                target = "diagram_relay::main",
                op = "render",
                result = "success",
                renderer = %outcome.renderer_name,
                output = %path.display(),
                mime = outcome.format.mime_type(),
                bytes = content.len(),
                "Diagram written"
            );
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(content.as_bytes())
                .and_then(|()| stdout.flush())
                .map_err(|source| AppError::Output {
                    path: PathBuf::from("-"),
                    source,
                })?;
        }
    }
    Ok(())
}

fn run_validate(settings: &Settings, args: ValidateArgs) -> Result<(), AppError> {
    let source = read_input(&args.input)?;
    let mut request = RenderRequest::new(source, args.format);
    if let Some(renderer) = args.renderer {
        request = request.with_preferred_renderer(renderer);
    }

    let runtime = RenderRuntime::from_settings(settings)?;
    let validation = runtime.validate(&request);
    runtime.shutdown();

    print_json(&validation)?;
    if validation.is_valid {
        Ok(())
    } else {
        Err(AppError::invalid_source(validation.errors.join("; ")))
    }
}

#[derive(Serialize)]
struct RendererListing {
    name: String,
    priority: u32,
    description: String,
    formats: Vec<String>,
    capabilities: Vec<String>,
}

fn run_renderers(settings: &Settings, args: RenderersArgs) -> Result<(), AppError> {
    let runtime = RenderRuntime::from_settings(settings)?;
    let mut filter = RendererFilter::any();
    if let Some(format) = args.format {
        filter = filter.format(format);
    }
    if args.available {
        filter = filter.available_only();
    }

    let registry = runtime.registry();
    let listings: Vec<RendererListing> = registry
        .list_renderers(&filter)
        .into_iter()
        .filter_map(|name| registry.descriptor(&name))
        .map(|descriptor| RendererListing {
            name: descriptor.name,
            priority: descriptor.priority,
            description: descriptor.description,
            formats: descriptor
                .supported_formats
                .iter()
                .map(|format| format.to_string())
                .collect(),
            capabilities: descriptor
                .capabilities
                .iter()
                .map(|capability| capability.to_string())
                .collect(),
        })
        .collect();

    let skipped: Vec<_> = runtime
        .discovery()
        .skipped
        .iter()
        .map(|(name, reason)| json!({"name": name, "reason": reason}))
        .collect();
    runtime.shutdown();

    print_json(&json!({"renderers": listings, "skipped": skipped}))
}

fn run_cache_purge(settings: &Settings) -> Result<(), AppError> {
    let Some(directory) = settings.cache.directory.as_ref() else {
        info!(
            target = "diagram_relay::main",
            op = "cache_purge",
            result = "skipped",
            "No cache directory configured"
        );
        return print_json(&json!({"removed": 0}));
    };

    let removed = DiskStore::open(directory)?.purge()?;
    info!(
        target = "diagram_relay::main",
        op = "cache_purge",
        result = "success",
        removed,
        directory = %directory.display(),
        "Cache purged"
    );
    print_json(&json!({"removed": removed, "directory": directory}))
}

fn read_input(path: &Path) -> Result<String, AppError> {
    let read = if path.as_os_str() == "-" {
        let mut source = String::new();
        io::stdin().read_to_string(&mut source).map(|_| source)
    } else {
        fs::read_to_string(path)
    };
    read.map_err(|source| AppError::Input {
        path: path.to_path_buf(),
        source,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let line = serde_json::to_string(value).map_err(|err| AppError::unexpected(err.to_string()))?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{line}").map_err(|source| AppError::Output {
        path: PathBuf::from("-"),
        source,
    })
}
