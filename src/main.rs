use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use detectbatch::preferences::{LAST_INPUT_DIR, LAST_MODEL};
use detectbatch::{
    AppConfig, AssetSet, AssetStatus, ChannelReporter, ContourDetector, DetectionOrchestrator,
    LogLevel, MemoryPreferences, ModelStore, PreferenceStore, ProgressReporter, RunConfig, RunEvent,
    RunState, TomlPreferences, TracingReporter,
};

#[derive(Parser)]
#[command(name = "detectbatch")]
#[command(about = "Run object detection over batches of images")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to ./detectbatch.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect objects in images and folders of images
    Run(RunArgs),
    /// List the models available in the model directory
    Models {
        /// Directory holding model manifests
        #[arg(long, value_name = "DIR")]
        models_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Image files or folders (folders are scanned recursively)
    #[arg(value_name = "PATH", required = true)]
    inputs: Vec<PathBuf>,

    /// Model identifier; defaults to the last model used
    #[arg(short, long)]
    model: Option<String>,

    /// Directory holding model manifests
    #[arg(long, value_name = "DIR")]
    models_dir: Option<PathBuf>,

    /// Where run directories are created
    #[arg(long, value_name = "DIR")]
    results_dir: Option<PathBuf>,

    /// Inference worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Do not write label files
    #[arg(long)]
    no_labels: bool,

    /// Append confidences to label lines
    #[arg(long)]
    save_conf: bool,

    /// Save a cropped image per detection
    #[arg(long)]
    save_crops: bool,

    /// Render confidence and class distribution plots
    #[arg(long)]
    save_plots: bool,

    /// Draw boxes without class tabs
    #[arg(long)]
    hide_labels: bool,

    /// Draw class tabs without the confidence bar
    #[arg(long)]
    hide_conf: bool,

    /// Do not open the results directory when the run completes
    #[arg(long)]
    no_open: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let app_config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::discover()?,
    };
    let mut preferences = open_preferences();

    match cli.command {
        Command::Models { models_dir } => {
            let store = ModelStore::new(models_dir.unwrap_or(app_config.models_dir));
            list_models(&store, preferences.as_ref())
        }
        Command::Run(args) => run(args, app_config, preferences.as_mut()).await,
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_preferences() -> Box<dyn PreferenceStore> {
    if let Some(path) = TomlPreferences::default_path() {
        match TomlPreferences::open(&path) {
            Ok(store) => return Box::new(store),
            Err(e) => warn!("ignoring preferences at {}: {}", path.display(), e),
        }
    }
    Box::new(MemoryPreferences::default())
}

fn list_models(store: &ModelStore, preferences: &dyn PreferenceStore) -> anyhow::Result<()> {
    let models = store
        .list()
        .with_context(|| format!("Failed to list models in {}", store.root().display()))?;

    if models.is_empty() {
        println!("No models found in {}", store.root().display());
        return Ok(());
    }

    let last = preferences.get(LAST_MODEL);
    for model in models {
        let marker = if last.as_deref() == Some(model.as_str()) { " (last used)" } else { "" };
        println!("{model}{marker}");
    }
    Ok(())
}

async fn run(
    args: RunArgs,
    mut app_config: AppConfig,
    preferences: &mut dyn PreferenceStore,
) -> anyhow::Result<()> {
    if let Some(dir) = args.models_dir.clone() {
        app_config.models_dir = dir;
    }
    if let Some(dir) = args.results_dir.clone() {
        app_config.results_dir = dir;
    }
    if let Some(workers) = args.workers {
        app_config.workers = workers.max(1);
    }

    let store = ModelStore::new(&app_config.models_dir);
    let model = match args.model.clone().or_else(|| preferences.get(LAST_MODEL)) {
        Some(model) => model,
        None => store.list()?.into_iter().next().unwrap_or_default(),
    };

    let config = RunConfig::builder(model)
        .with_save_labels(!args.no_labels)
        .with_save_confidence(args.save_conf)
        .with_save_crops(args.save_crops)
        .with_save_plots(args.save_plots)
        .with_hide_labels(args.hide_labels)
        .with_hide_confidence(args.hide_conf)
        .with_auto_open_output(!args.no_open)
        .build()?;

    let assets = collect_assets(&args.inputs);
    if let Some(dir) = input_dir(&args.inputs) {
        remember(preferences, LAST_INPUT_DIR, &dir.to_string_lossy());
    }

    let (sender, receiver) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(receiver, args.json));

    let detector = ContourDetector::new(store, app_config.workers);
    let orchestrator = DetectionOrchestrator::new(
        detector,
        ChannelReporter::new(sender),
        &app_config.results_dir,
    );

    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let outcome = orchestrator.run(&assets, &config).await;
    drop(orchestrator);
    printer.await.context("Progress printer stopped unexpectedly")?;
    let outcome = outcome?;

    remember(preferences, LAST_MODEL, &config.model_identifier);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        let summary = &outcome.summary;
        println!("\n=== Detection Results ===");
        println!("Run state: {:?}", outcome.state);
        println!("Assets: {} ({} succeeded, {} failed)", summary.total, summary.succeeded, summary.failed);
        if !summary.degraded.is_empty() {
            println!("Incomplete outputs: {}", summary.degraded.len());
        }
        println!("Detections: {}", summary.detection_count());
        for (class, count) in &summary.class_counts {
            println!("  {class}: {count}");
        }
        if let Some(mean) = summary.mean_confidence() {
            println!("Mean confidence: {mean:.2}");
        }
        println!("Results saved in: {}", outcome.output_dir.display());
    }

    if outcome.state == RunState::Cancelled {
        warn!("run was cancelled; partial results kept");
    }

    Ok(())
}

fn collect_assets(inputs: &[PathBuf]) -> AssetSet {
    let mut assets = AssetSet::new();
    for input in inputs {
        if input.is_dir() {
            match assets.add_folder(input) {
                Ok(report) => debug!("{}: {} images added", input.display(), report.added),
                Err(e) => warn!("{e}"),
            }
        } else {
            let report = assets.add_files([input]);
            for rejection in report.rejected {
                warn!("{rejection}");
            }
        }
    }
    assets
}

fn input_dir(inputs: &[PathBuf]) -> Option<PathBuf> {
    let first = inputs.first()?;
    let dir = if first.is_dir() {
        first.as_path()
    } else {
        first.parent()?
    };
    std::path::absolute(dir).ok()
}

fn remember(preferences: &mut dyn PreferenceStore, key: &str, value: &str) {
    if let Err(e) = preferences.set(key, value) {
        warn!("could not save preference {key}: {e}");
    }
}

/// Progress goes to stdout, or to the log when stdout is reserved for JSON
async fn print_events(mut receiver: mpsc::UnboundedReceiver<RunEvent>, quiet: bool) {
    while let Some(event) = receiver.recv().await {
        if quiet && !matches!(event, RunEvent::RevealOutput(_)) {
            TracingReporter.report(event);
            continue;
        }
        match event {
            RunEvent::Progress(progress) => {
                let name = progress
                    .asset_path
                    .as_deref()
                    .and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned());
                let message = progress.message.unwrap_or_default();
                match (progress.phase, name, progress.status) {
                    (RunState::Running, None, _) => {
                        println!("Processing {} images...", progress.total)
                    }
                    (_, Some(name), Some(AssetStatus::Failed(_))) => {
                        println!("[{}/{}] {}: failed ({})", progress.index, progress.total, name, message)
                    }
                    (_, Some(name), _) => {
                        let found = if message.is_empty() { "no detections" } else { message.as_str() };
                        println!("[{}/{}] {}: {}", progress.index, progress.total, name, found)
                    }
                    (phase, None, _) => info!("{:?}: {}", phase, message),
                }
            }
            RunEvent::Log { level, message } => match level {
                LogLevel::Debug => debug!("{message}"),
                LogLevel::Info => info!("{message}"),
                LogLevel::Warn | LogLevel::Error => warn!("{message}"),
            },
            RunEvent::RevealOutput(dir) => reveal(&dir).await,
        }
    }
}

/// Program that opens a directory in the platform's file browser
fn opener() -> &'static str {
    if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    }
}

async fn reveal(dir: &Path) {
    let program = opener();
    match run_opener(program, dir).await {
        Ok(status) if status.success() => debug!("opened {}", dir.display()),
        Ok(status) => warn!("{program} exited with {status} for {}", dir.display()),
        Err(e) => warn!("could not open {}: {}", dir.display(), e),
    }
}

async fn run_opener(program: &str, dir: &Path) -> std::io::Result<ExitStatus> {
    tokio::process::Command::new(program).arg(dir).status().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn opener_exit_status_is_awaited() {
        let status = run_opener("true", Path::new(".")).await.unwrap();
        assert!(status.success());

        let status = run_opener("false", Path::new(".")).await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn missing_opener_is_an_error() {
        assert!(run_opener("detectbatch-no-such-opener", Path::new(".")).await.is_err());
    }
}
