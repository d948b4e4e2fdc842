//! DocDrop command-line uploader.
//!
//! Uploads files into a directory-backed store and renders the engine's
//! event stream. Name conflicts can be settled up front with
//! `--on-conflict`; otherwise they are reported and the file is left alone.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use docdrop_protocol::{ErrorKind, FileSpec, JobId, JobResult, UploadEvent};
use docdrop_transfer::ProgressSummary;
use docdrop_upload::{EngineConfig, LocalDirTransport, UploadManager, human_size};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "docdrop", version, about = "Upload files into a document store")]
struct Cli {
    /// Files to upload.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Root directory of the store.
    #[arg(long)]
    store: PathBuf,

    /// Destination folder inside the store.
    #[arg(long, default_value = "/")]
    dest: String,

    /// Engine config file (JSON). Defaults to ~/.config/docdrop/config.json.
    #[arg(long)]
    config: Option<PathBuf>,

    /// What to do when a file with the same name already exists.
    #[arg(long, value_enum)]
    on_conflict: Option<ConflictPolicy>,

    /// Upload at most N files at a time.
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Automatic attempts per file, first one included.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Print events as JSON lines instead of progress text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictPolicy {
    Overwrite,
    Rename,
    Skip,
}

impl ConflictPolicy {
    fn choice(self) -> &'static str {
        match self {
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::Rename => "rename",
            ConflictPolicy::Skip => "skip",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting docdrop");

    let config = load_config(&cli);
    let files = cli
        .files
        .iter()
        .map(|path| file_spec(path))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let transport = Arc::new(LocalDirTransport::new(&cli.store));
    let mut manager = UploadManager::new(transport, &config);
    let mut events = manager
        .take_events()
        .context("event stream already taken")?;

    let session = manager.submit(files, &cli.dest)?;
    let mut restarted: HashSet<JobId> = HashSet::new();
    let mut skipped: Vec<(JobId, String)> = Vec::new();
    let mut cancelled = false;

    let results = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                cancelled = true;
                eprintln!();
                tracing::warn!("interrupted, cancelling uploads");
                manager.cancel_session(&session)?;
                continue;
            }
        };
        let Some(event) = event else {
            anyhow::bail!("event stream closed before the session completed");
        };

        if cli.json {
            println!("{}", serde_json::to_string(&event)?);
        }

        match &event {
            UploadEvent::JobProgress { .. } if !cli.json => {
                render_progress(&manager.summary(&session)?);
            }
            UploadEvent::JobError {
                job_id,
                classified_error,
                ..
            } => {
                let policy = cli
                    .on_conflict
                    .filter(|_| classified_error.kind == ErrorKind::NameConflict);
                if let Some(policy) = policy {
                    let name = file_name(&manager, job_id);
                    manager.resolve(job_id, policy.choice())?;
                    if matches!(policy, ConflictPolicy::Skip) {
                        skipped.push((job_id.clone(), name));
                    } else {
                        restarted.insert(job_id.clone());
                    }
                } else if !cli.json {
                    let name = file_name(&manager, job_id);
                    eprintln!("\n{name}: {}", classified_error.title);
                    eprintln!("  {}", classified_error.message);
                    eprintln!("  {}", classified_error.suggestion);
                    restarted.remove(job_id);
                } else {
                    restarted.remove(job_id);
                }
            }
            UploadEvent::JobRetrying {
                job_id,
                attempt,
                max_attempts,
                delay_seconds,
            } if !cli.json => {
                let name = file_name(&manager, job_id);
                eprintln!(
                    "\n{name}: retrying ({attempt}/{max_attempts}) in {delay_seconds:.0}s"
                );
            }
            UploadEvent::JobSuccess { job_id } | UploadEvent::JobCancelled { job_id } => {
                restarted.remove(job_id);
            }
            UploadEvent::SessionComplete { results, .. } if restarted.is_empty() => {
                break results.clone();
            }
            _ => {}
        }
    };

    // A skipped file may still show up as a conflict in a report emitted
    // before the skip was applied.
    let results: Vec<JobResult> = results
        .into_iter()
        .filter(|r| !skipped.iter().any(|(id, _)| id == &r.job_id))
        .collect();
    if !cli.json {
        eprintln!();
        print_results(&results, &skipped);
    }
    let all_ok = results.iter().all(JobResult::succeeded);
    Ok(if all_ok && !cancelled {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn load_config(cli: &Cli) -> EngineConfig {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(docdrop_upload::default_config_path);
    let mut config = match EngineConfig::load(&path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            EngineConfig::default()
        }
    };
    if let Some(n) = cli.max_concurrent {
        config.max_concurrent_uploads = Some(n);
    }
    if let Some(n) = cli.max_attempts {
        config.max_attempts = n;
    }
    config
}

fn file_spec(path: &Path) -> anyhow::Result<FileSpec> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    anyhow::ensure!(meta.is_file(), "{} is not a regular file", path.display());
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", path.display()))?;
    let size = i64::try_from(meta.len()).context("file too large")?;
    Ok(FileSpec::new(name, size).with_source(path))
}

fn file_name(manager: &UploadManager, job_id: &JobId) -> String {
    manager
        .tracker()
        .get_job(job_id)
        .map(|j| j.file_name)
        .unwrap_or_else(|| job_id.to_string())
}

fn render_progress(summary: &ProgressSummary) {
    let eta = summary
        .eta_seconds
        .map(|s| format!(", {s:.0}s left"))
        .unwrap_or_default();
    eprint!(
        "\r{:5.1}%  {} / {}{eta}    ",
        summary.percent,
        human_size(summary.loaded_bytes),
        human_size(summary.total_bytes),
    );
    let _ = std::io::stderr().flush();
}

fn print_results(results: &[JobResult], skipped: &[(JobId, String)]) {
    for (_, name) in skipped {
        println!("{name:<40} skipped");
    }
    for result in results {
        let outcome = match &result.error {
            Some(error) => format!("{} ({})", result.status, error.title),
            None => result.status.to_string(),
        };
        println!("{:<40} {outcome}", result.file_name);
    }
    let ok = results.iter().filter(|r| r.succeeded()).count();
    println!("{ok}/{} uploaded", results.len());
}
