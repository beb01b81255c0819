use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use regex::Regex;
use resizer_core::{
    decode_target, run_resize_with_telemetry, v1, Dimensions, PlatformTarget, RequestedSize, RuntimeConfig, SampleFactor,
    ScaleRequest, ScaleResult,
};
use resizer_runtime::{config_from_env, LocalResizeBackend};
use resizer_source::{
    default_content_index_path, merge_content_records, mime_type_for_extension, read_content_index, write_content_index,
    ContentIndex, ContentRecord,
};
use resizer_storage::{path_from_file_uri, sha256_file};
use resizer_telemetry::sink_from_env;
use serde::Serialize;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "resizer", version, about = "Aspect-preserving JPEG resizer")]
struct Cli {
    /// Repeat for more log output (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: TopLevelCommand,
}

#[derive(Subcommand, Debug)]
enum TopLevelCommand {
    /// Resize one image locator.
    Resize(ResizeArgs),
    /// Resize every image matching a path, directory or file-name regex.
    Batch(BatchArgs),
    /// Print the output box and decode factor without touching any file.
    Plan(PlanArgs),
    /// Manage the content index used for `content://` locators.
    Content(ContentCommand),
}

#[derive(Args, Debug, Clone)]
struct RuntimeArgs {
    #[arg(long)]
    output_root: Option<PathBuf>,
    #[arg(long)]
    assets_root: Option<PathBuf>,
    #[arg(long)]
    content_index: Option<PathBuf>,
    #[arg(long)]
    http_timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
struct OutputArgs {
    #[arg(long, short = 'f', default_value = "resized")]
    folder: String,
    #[arg(long, short = 'q', default_value_t = 85)]
    quality: i32,
    /// Target width; 0 or negative derives it from the height.
    #[arg(long, short = 'W', default_value_t = 0, allow_hyphen_values = true)]
    width: i32,
    /// Target height; 0 or negative derives it from the width.
    #[arg(long, short = 'H', default_value_t = 0, allow_hyphen_values = true)]
    height: i32,
}

#[derive(Args, Debug)]
struct ResizeArgs {
    #[arg(long, short = 'i')]
    uri: String,
    #[command(flatten)]
    output: OutputArgs,
    #[command(flatten)]
    runtime: RuntimeArgs,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// File, directory, or a regex matched against file names under --input-root.
    #[arg(long, short = 'i')]
    input: String,
    /// Root directory for regex input matching (defaults to current directory).
    #[arg(long, short = 'r')]
    input_root: Option<PathBuf>,
    /// Recurse when scanning directories / regex matches.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    recursive: bool,
    /// If set, abort the whole run on the first input error.
    #[arg(long, default_value_t = false, action = ArgAction::SetTrue)]
    strict: bool,
    #[command(flatten)]
    output: OutputArgs,
    #[command(flatten)]
    runtime: RuntimeArgs,
}

#[derive(Args, Debug)]
struct PlanArgs {
    #[arg(long)]
    source_width: i64,
    #[arg(long)]
    source_height: i64,
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    width: i64,
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    height: i64,
}

#[derive(Args, Debug)]
struct ContentCommand {
    #[command(subcommand)]
    command: ContentSubcommand,
}

#[derive(Subcommand, Debug)]
enum ContentSubcommand {
    Add(ContentAddArgs),
    List(ContentListArgs),
}

#[derive(Args, Debug)]
struct ContentAddArgs {
    #[arg(long)]
    uri: String,
    #[arg(long)]
    path: PathBuf,
    #[arg(long)]
    document_id: Option<String>,
    #[arg(long)]
    mime_type: Option<String>,
    #[arg(long)]
    index: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ContentListArgs {
    #[arg(long)]
    index: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResizeReport {
    input: String,
    uri: String,
    native: Dimensions,
    output: ScaleResult,
    sample_factor: SampleFactor,
    size: u64,
    sha256: String,
    elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanReport {
    native: Dimensions,
    requested: RequestedSize,
    output: ScaleResult,
    decode_target: Dimensions,
    sample_factor: SampleFactor,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let mut filter = EnvFilter::from_default_env();
    for target in ["resizer", "resizer_core", "resizer_source", "resizer_image", "resizer_storage", "resizer_runtime"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }
    // stdout carries the JSON report
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        TopLevelCommand::Resize(args) => {
            let backend = build_backend(&args.runtime)?;
            let report = resize_one(&backend, &args.uri, &args.output)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        TopLevelCommand::Batch(args) => {
            let inputs = resolve_batch_inputs(&args)?;
            if inputs.is_empty() {
                return Err(anyhow!("no input images matched"));
            }
            let backend = build_backend(&args.runtime)?;
            let total_start = Instant::now();
            let mut results = Vec::with_capacity(inputs.len());
            let mut failures = 0usize;
            for input in inputs {
                let uri = input.to_string_lossy().into_owned();
                match resize_one(&backend, &uri, &args.output) {
                    Ok(report) => results.push(serde_json::to_value(&report)?),
                    Err(err) if !args.strict => {
                        warn!(input = %uri, error = %err, "skipping input");
                        failures += 1;
                        results.push(serde_json::json!({
                            "input": uri,
                            "error": format!("{:#}", err),
                        }));
                    }
                    Err(err) => return Err(err.context(format!("resizing {}", uri))),
                }
            }
            info!(files = results.len(), failures, "batch finished");
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "results": results,
                    "failures": failures,
                    "totalMs": total_start.elapsed().as_millis() as u64,
                }))?
            );
        }
        TopLevelCommand::Plan(args) => {
            let report = plan(&args)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        TopLevelCommand::Content(content) => match content.command {
            ContentSubcommand::Add(args) => {
                let index_path = content_index_path(args.index.as_deref())?;
                let index = add_content_record(&index_path, &args)?;
                println!("{}", serde_json::to_string_pretty(&index)?);
            }
            ContentSubcommand::List(args) => {
                let index_path = content_index_path(args.index.as_deref())?;
                let index = if index_path.exists() {
                    read_content_index(&index_path)?
                } else {
                    ContentIndex::default()
                };
                println!("{}", serde_json::to_string_pretty(&index.records)?);
            }
        },
    }

    Ok(())
}

/// Flags win over `RESIZER_*` environment variables.
fn runtime_config(args: &RuntimeArgs, env_cfg: RuntimeConfig) -> RuntimeConfig {
    let as_string = |path: &Option<PathBuf>| path.as_ref().map(|p| p.display().to_string());
    resizer_core::resolve_runtime_config(RuntimeConfig {
        output_root: as_string(&args.output_root).or(env_cfg.output_root),
        assets_root: as_string(&args.assets_root).or(env_cfg.assets_root),
        content_index: as_string(&args.content_index).or(env_cfg.content_index),
        http_timeout_ms: args.http_timeout_ms.unwrap_or(env_cfg.http_timeout_ms),
    })
}

fn build_backend(args: &RuntimeArgs) -> Result<LocalResizeBackend> {
    let config = runtime_config(args, config_from_env());
    debug!(?config, "runtime config");
    LocalResizeBackend::from_config(&config).context("building resize backend")
}

fn resize_one(backend: &LocalResizeBackend, uri: &str, output: &OutputArgs) -> Result<ResizeReport> {
    let start = Instant::now();
    let telemetry = sink_from_env();
    let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());
    let request = v1::ResizeRequest {
        uri: uri.to_string(),
        folder_name: output.folder.clone(),
        quality: output.quality,
        width: output.width,
        height: output.height,
    };
    let outcome = run_resize_with_telemetry(backend, &request, PlatformTarget::Cli, telemetry_ref)?;
    let written = path_from_file_uri(&outcome.uri)?;
    let size = fs::metadata(&written)
        .with_context(|| format!("reading metadata of {}", written.display()))?
        .len();
    Ok(ResizeReport {
        input: uri.to_string(),
        sha256: sha256_file(&written)?,
        uri: outcome.uri,
        native: outcome.native,
        output: outcome.output,
        sample_factor: outcome.sample_factor,
        size,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

fn plan(args: &PlanArgs) -> Result<PlanReport> {
    let request = ScaleRequest::new(args.source_width, args.source_height, args.width, args.height)?;
    Ok(PlanReport {
        native: request.native,
        requested: request.requested,
        output: request.output(),
        decode_target: decode_target(request.native, request.requested),
        sample_factor: request.sample_factor(),
    })
}

fn content_index_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = config_from_env().content_index {
        return Ok(PathBuf::from(path));
    }
    Ok(default_content_index_path()?)
}

fn add_content_record(index_path: &Path, args: &ContentAddArgs) -> Result<ContentIndex> {
    let path = fs::canonicalize(&args.path).with_context(|| format!("resolving {}", args.path.display()))?;
    let path = path.to_string_lossy().into_owned();
    let record = ContentRecord {
        uri: args.uri.clone(),
        document_id: args.document_id.clone(),
        mime_type: args
            .mime_type
            .clone()
            .or_else(|| mime_type_for_extension(&path).map(str::to_string)),
        path,
    };
    let existing = if index_path.exists() {
        Some(read_content_index(index_path).with_context(|| format!("reading {}", index_path.display()))?)
    } else {
        None
    };
    let index = merge_content_records(existing, vec![record]);
    write_content_index(index_path, &index)?;
    Ok(index)
}

fn resolve_batch_inputs(args: &BatchArgs) -> Result<Vec<PathBuf>> {
    let candidate = PathBuf::from(&args.input);
    if candidate.exists() {
        if candidate.is_dir() {
            return collect_images(&candidate, args.recursive, None);
        }
        return Ok(vec![candidate]);
    }
    // Treat as regex matching file name under input_root.
    let root = match &args.input_root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("reading current directory")?,
    };
    let re = Regex::new(&args.input).map_err(|e| anyhow!("invalid regex: {}", e))?;
    collect_images(&root, args.recursive, Some(&re))
}

fn collect_images(root: &Path, recursive: bool, name_filter: Option<&Regex>) -> Result<Vec<PathBuf>> {
    let walker = if recursive {
        WalkDir::new(root)
    } else {
        WalkDir::new(root).max_depth(1)
    };
    let mut out = Vec::new();
    for entry in walker.into_iter().filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let p = entry.into_path();
        if !is_supported_image(&p) {
            continue;
        }
        let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name_filter.map_or(true, |re| re.is_match(name)) {
            out.push(p);
        }
    }
    out.sort();
    Ok(out)
}

fn is_supported_image(path: &Path) -> bool {
    path.to_str()
        .and_then(mime_type_for_extension)
        .is_some_and(|mime| mime.starts_with("image/"))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn negative_sizes_parse_as_unset() {
        let cli = Cli::try_parse_from(["resizer", "resize", "--uri", "a.png", "--width", "-1", "--height", "300"])
            .expect("parse");
        match cli.command {
            TopLevelCommand::Resize(args) => {
                assert_eq!((args.output.width, args.output.height), (-1, 300));
                assert_eq!(args.output.folder, "resized");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn plan_reports_box_and_factor() {
        let report = plan(&PlanArgs {
            source_width: 4000,
            source_height: 3000,
            width: 800,
            height: 800,
        })
        .expect("plan");
        assert_eq!((report.output.width(), report.output.height()), (800, 600));
        assert_eq!(report.sample_factor.get(), 5);

        let report = plan(&PlanArgs {
            source_width: 1920,
            source_height: 1080,
            width: 0,
            height: 0,
        })
        .expect("plan");
        assert_eq!(report.decode_target, report.native);
        assert!(report.sample_factor.is_full_resolution());
    }

    #[test]
    fn plan_rejects_empty_source() {
        assert!(plan(&PlanArgs {
            source_width: 0,
            source_height: 10,
            width: 5,
            height: 5,
        })
        .is_err());
    }

    #[test]
    fn flags_override_environment() {
        let args = RuntimeArgs {
            output_root: Some(PathBuf::from("/flag/out")),
            assets_root: None,
            content_index: None,
            http_timeout_ms: None,
        };
        let env_cfg = RuntimeConfig {
            output_root: Some("/env/out".to_string()),
            assets_root: Some("/env/assets".to_string()),
            content_index: None,
            http_timeout_ms: 5_000,
        };
        let cfg = runtime_config(&args, env_cfg);
        assert_eq!(cfg.output_root.as_deref(), Some("/flag/out"));
        assert_eq!(cfg.assets_root.as_deref(), Some("/env/assets"));
        assert_eq!(cfg.http_timeout_ms, 5_000);
    }

    #[test]
    fn batch_inputs_by_directory_and_regex() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("nested")).expect("nested");
        for name in ["a.png", "b.JPG", "notes.txt", "nested/c.webp"] {
            fs::write(dir.path().join(name), b"x").expect("write");
        }
        let by_dir = collect_images(dir.path(), true, None).expect("collect");
        assert_eq!(by_dir.len(), 3);
        let shallow = collect_images(dir.path(), false, None).expect("collect");
        assert_eq!(shallow.len(), 2);
        let re = Regex::new(r"^[ab]\.").expect("regex");
        let by_regex = collect_images(dir.path(), true, Some(&re)).expect("collect");
        assert_eq!(by_regex.len(), 2);
    }

    #[test]
    fn batch_of_quick_resizes_keeps_every_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = LocalResizeBackend::from_config(&RuntimeConfig {
            output_root: Some(dir.path().join("out").display().to_string()),
            ..RuntimeConfig::default()
        })
        .expect("backend");
        let output = OutputArgs {
            folder: "b".to_string(),
            quality: 85,
            width: 0,
            height: 0,
        };

        let mut uris = std::collections::BTreeSet::new();
        for i in 0..20u8 {
            let src = dir.path().join(format!("in-{}.png", i));
            image::RgbImage::from_pixel(2, 2, image::Rgb([i, i, i])).save(&src).expect("write input");
            let report = resize_one(&backend, &src.to_string_lossy(), &output).expect("resize");
            uris.insert(report.uri);
        }
        assert_eq!(uris.len(), 20);
        assert_eq!(fs::read_dir(dir.path().join("out").join("b")).expect("list").count(), 20);
    }

    #[test]
    fn content_add_merges_into_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let photo = dir.path().join("p.jpg");
        fs::write(&photo, b"x").expect("write");
        let index_path = dir.path().join("index").join("content-index.json");
        let args = ContentAddArgs {
            uri: "content://media/external/images/media/3".to_string(),
            path: photo.clone(),
            document_id: Some("3".to_string()),
            mime_type: None,
            index: Some(index_path.clone()),
        };
        add_content_record(&index_path, &args).expect("first add");
        let index = add_content_record(&index_path, &args).expect("second add");
        assert_eq!(index.records.len(), 1);
        assert_eq!(index.records[0].mime_type.as_deref(), Some("image/jpeg"));
        assert_eq!(read_content_index(&index_path).expect("read").records.len(), 1);
    }
}
