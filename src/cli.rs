use crate::{
    format_bytes, output_file_name, BatchAccumulator, BatchRunner, Config,
    ConversionPipeline, ConversionRequest, ProgressInfo, SourceLocation,
};
use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "topng")]
#[command(about = "Download a JPEG image and store it as PNG")]
#[command(version)]
#[command(subcommand_negates_reqs = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(required = true, help = "Source image URL (or local path)")]
    pub source: Option<String>,

    #[arg(required = true, help = "Local output filename")]
    pub output: Option<PathBuf>,

    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Download timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a batch of images with a fixed number of workers
    Batch {
        #[arg(
            short,
            long,
            help = "Directory of JPEG files, or a file listing URLs/paths (one per line)"
        )]
        input: PathBuf,

        #[arg(short, long, help = "Output directory for PNG files")]
        output: PathBuf,

        #[arg(short, long, help = "Number of concurrent workers")]
        workers: Option<usize>,

        #[arg(long, help = "Progress reporting interval in seconds")]
        progress_interval: Option<u64>,
    },
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub workers: Option<usize>,
    pub progress_interval: Option<u64>,
}

pub struct CliRunner {
    pub config: Config,
    pub pipeline: ConversionPipeline,
    cancel: CancellationToken,
}

impl CliRunner {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let pipeline = ConversionPipeline::new(&config)?;

        Ok(Self {
            config,
            pipeline,
            cancel: CancellationToken::new(),
        })
    }

    /// Token observed by every conversion this runner starts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, args: Cli) -> anyhow::Result<()> {
        match args.command {
            Some(Commands::Batch {
                input,
                output,
                workers,
                progress_interval,
            }) => {
                self.run_batch(BatchOptions {
                    input,
                    output,
                    workers,
                    progress_interval,
                })
                .await
            }
            None => {
                let source = args
                    .source
                    .ok_or_else(|| anyhow!("missing source image url"))?;
                let output = args
                    .output
                    .ok_or_else(|| anyhow!("missing local output filename"))?;
                self.run_single(&source, &output).await
            }
        }
    }

    pub async fn run_single(&self, source: &str, output: &Path) -> anyhow::Result<()> {
        let source = SourceLocation::parse(source)?;
        info!("Downloading {}", source);

        self.pipeline
            .try_convert(ConversionRequest::new(source, output), &self.cancel)
            .await?;

        info!("Written {}", output.display());
        Ok(())
    }

    pub async fn run_batch(&self, options: BatchOptions) -> anyhow::Result<()> {
        let workers = options.workers.unwrap_or(self.config.workers);
        let workers = NonZeroUsize::new(workers).context("Worker count must be greater than 0")?;

        let sources = self.collect_sources(&options.input).await?;
        info!(
            "Loaded {} sources from {}",
            sources.len(),
            options.input.display()
        );

        fs::create_dir_all(&options.output)
            .await
            .with_context(|| format!("creating {}", options.output.display()))?;

        let requests: Vec<ConversionRequest> = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let destination = options.output.join(output_file_name(index, &source));
                ConversionRequest::new(source, destination)
            })
            .collect();

        let accumulator = Arc::new(BatchAccumulator::new(requests.len()));

        if let Some(interval) = options.progress_interval.filter(|secs| *secs > 0) {
            let tracker = accumulator.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval));
                interval.tick().await;

                while !tracker.is_complete() {
                    interval.tick().await;
                    info!("{}", progress_line(&tracker.progress()));
                }
            });
        }

        let runner = BatchRunner::with_cancellation(self.pipeline.clone(), self.cancel.clone());
        let outcome = runner
            .run_batch_with(requests, workers, accumulator)
            .await;

        println!("Batch completed:");
        println!("  Items: {}", outcome.items_attempted);
        println!("  Succeeded: {}", outcome.succeeded);
        println!("  Failed: {}", outcome.failed);
        println!("  Downloaded/read: {}", format_bytes(outcome.source_bytes));
        println!("  Written: {}", format_bytes(outcome.output_bytes));
        println!("  Duration: {:.2?}", outcome.elapsed);
        println!("  Rate: {:.1} images/s", outcome.rate());

        for failure in &outcome.failures {
            warn!("{}", failure);
        }

        match outcome.first_error {
            Some(failure) => bail!("batch failed: {}", failure),
            None => Ok(()),
        }
    }

    /// Directory inputs are walked for files with a configured extension;
    /// anything else is read as a list of sources, one per line.
    pub async fn collect_sources(&self, input: &Path) -> anyhow::Result<Vec<SourceLocation>> {
        let metadata = fs::metadata(input)
            .await
            .with_context(|| format!("reading {}", input.display()))?;

        if metadata.is_dir() {
            let mut paths = Vec::new();
            for entry in WalkDir::new(input) {
                let entry = entry.with_context(|| format!("walking {}", input.display()))?;
                if entry.file_type().is_file() && self.config.matches_extension(entry.path()) {
                    paths.push(entry.into_path());
                }
            }
            paths.sort();
            return Ok(paths.into_iter().map(SourceLocation::Local).collect());
        }

        let content = fs::read_to_string(input)
            .await
            .with_context(|| format!("reading {}", input.display()))?;

        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| SourceLocation::parse(line).map_err(anyhow::Error::from))
            .collect()
    }
}

fn progress_line(progress: &ProgressInfo) -> String {
    format!(
        "Progress: {}/{} ({:.1}%) - Errors: {}, Rate: {:.1}/s, Elapsed: {:.1?}",
        progress.completed,
        progress.total,
        if progress.total > 0 {
            progress.completed as f64 / progress.total as f64 * 100.0
        } else {
            100.0
        },
        progress.errors,
        progress.rate,
        progress.elapsed
    )
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {e}"))?;

    Ok(())
}
