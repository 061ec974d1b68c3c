//! Command-line host for the batch uploader.
//!
//! Files on the command line are submitted like a picker selection;
//! directories are submitted like a drop of every file inside them.
//!
//! ```bash
//! batch-uploader --url http://localhost:8000/upload runs/*.csv
//! batch-uploader --url http://localhost:8000/upload --accept ".csv,.json" ./exports --json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use batch_uploader::config::{self, UploaderConfig};
use batch_uploader::uploader::intake::read_dropped_directory;
use batch_uploader::{FileUploader, RawFile, SelectionSource, UploadEvents, UploadResult};

/// Validate and upload files one at a time to a multipart endpoint.
#[derive(Parser)]
#[command(name = "batch-uploader", version, about)]
struct Cli {
    /// Files to upload; directories contribute every file directly inside them
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Upload endpoint (overrides `upload_url` from the config file)
    #[arg(long)]
    url: Option<String>,

    /// Accepted types, e.g. ".csv,text/*"
    #[arg(long)]
    accept: Option<String>,

    /// Maximum size per file in MB
    #[arg(long)]
    max_size_mb: Option<u64>,

    /// Maximum number of files
    #[arg(long)]
    max_files: Option<usize>,

    /// Keep only one file, replacing any earlier selection
    #[arg(long)]
    single: bool,

    /// Config file (default: platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Write the effective settings (config file plus flags) back to the config file
    #[arg(long)]
    save_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Reports notifications on stderr so stdout stays machine-readable
struct ConsoleEvents {
    quiet: bool,
}

impl UploadEvents for ConsoleEvents {
    fn selection_changed(&self, files: &[RawFile]) {
        log::debug!("{} files selected", files.len());
    }

    fn validation_error(&self, message: &str) {
        for line in message.lines() {
            eprintln!("rejected: {}", line);
        }
    }

    fn progress(&self, percent: u8) {
        if !self.quiet {
            eprintln!("progress: {}%", percent);
        }
    }

    fn upload_completed(&self, results: &[UploadResult]) {
        if self.quiet {
            return;
        }
        for result in results {
            match (&result.locator, &result.error) {
                (_, Some(error)) => eprintln!("failed:   {} - {}", result.filename, error),
                (Some(locator), None) => eprintln!("uploaded: {} -> {}", result.filename, locator),
                (None, None) => eprintln!("uploaded: {}", result.filename),
            }
        }
    }
}

fn apply_overrides(cli: &Cli, mut config: UploaderConfig) -> UploaderConfig {
    if let Some(url) = &cli.url {
        config.upload_url = Some(url.clone());
    }
    if let Some(accept) = &cli.accept {
        config.accept = accept.clone();
    }
    if let Some(max_size_mb) = cli.max_size_mb {
        config.max_size_mb = max_size_mb;
    }
    if let Some(max_files) = cli.max_files {
        config.max_files = max_files;
    }
    if cli.single {
        config.multiple = false;
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging comes up before the config is read so config warnings are shown.
    // The level from the config file is applied once it is known.
    let env_filter = std::env::var_os("RUST_LOG").is_some();
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Trace)
        .parse_default_env()
        .init();
    if !env_filter {
        log::set_max_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        });
    }

    log::info!("Starting batch uploader");

    let file_config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    }
    .context("Failed to load configuration")?;
    let config = apply_overrides(&cli, file_config);

    if !env_filter && !cli.verbose {
        log::set_max_level(config.log_level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log_level {:?}, using info", config.log_level);
            log::LevelFilter::Info
        }));
    }

    if cli.save_config {
        match &cli.config {
            Some(path) => config::save_config_to(&config, path),
            None => config::save_config(&config),
        }
        .context("Failed to save configuration")?;
        log::info!("Configuration saved");
    }

    let uploader = FileUploader::new(config)
        .context("Invalid uploader configuration")?
        .with_events(Arc::new(ConsoleEvents { quiet: cli.json }));

    let cancel = uploader.cancel_handle();
    ctrlc::set_handler(move || {
        eprintln!("cancelling after the current file...");
        cancel.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let (dirs, files): (Vec<PathBuf>, Vec<PathBuf>) =
        cli.paths.iter().cloned().partition(|p| p.is_dir());

    uploader
        .add_paths(SelectionSource::Picker, &files)
        .await
        .context("Failed to add files")?;

    for dir in dirs {
        let dropped = read_dropped_directory(&dir)
            .await
            .with_context(|| format!("Failed to read {}", dir.display()))?;
        uploader
            .add_paths(SelectionSource::Drop, &dropped)
            .await
            .context("Failed to add dropped files")?;
    }

    if !uploader.has_pending() {
        anyhow::bail!("No files to upload");
    }

    if uploader.config().upload_url.is_none() {
        for file in uploader.files() {
            println!("{}\t{} bytes", file.raw_file().name(), file.raw_file().size());
        }
        eprintln!("No upload endpoint configured; files were validated but not uploaded");
        return Ok(());
    }

    let summary = uploader.start_upload().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{} uploaded, {} failed{}",
            summary.succeeded,
            summary.failed,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
    }

    if !summary.all_succeeded() {
        std::process::exit(1);
    }

    Ok(())
}
