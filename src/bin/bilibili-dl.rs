//! Command-line front end for bilibili-dl.
//!
//! Collects inputs from arguments and an optional batch file, layers flags over
//! an optional JSON config, then renders the batch with one progress bar per job.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use bilibili_dl::observer::BatchObserver;
use bilibili_dl::utils::read_batch_file;
use bilibili_dl::{
    BatchDownloader, BatchResult, Config, JobId, JobStatus, ShutdownSignal, forward_events,
    run_with_shutdown,
};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

/// Batch download bilibili videos through you-get
#[derive(Debug, Parser)]
#[command(name = "bilibili-dl", version, about)]
struct Cli {
    /// Video URLs, BV/av ids, or text containing one
    #[arg(value_name = "URL")]
    urls: Vec<String>,

    /// File with one input per line ('#' starts a comment)
    #[arg(short = 'b', long = "urls-file", value_name = "FILE")]
    urls_file: Option<PathBuf>,

    /// Output directory
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Stream format passed to the downloader
    #[arg(short = 'f', long = "format")]
    format: Option<String>,

    /// Print stream information instead of downloading
    #[arg(short = 'i', long = "info")]
    info_only: bool,

    /// Also download captions
    #[arg(short = 'c', long = "caption")]
    caption: bool,

    /// Keep video and audio parts unmerged
    #[arg(long)]
    no_merge: bool,

    /// Bypass any configured proxy
    #[arg(long)]
    no_proxy: bool,

    /// Cookies file for logged-in downloads
    #[arg(long, value_name = "FILE")]
    cookies: Option<PathBuf>,

    /// Downloader network timeout in seconds [default: 600]
    #[arg(short = 't', long = "timeout", value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Maximum simultaneous downloads
    #[arg(short = 'j', long = "jobs")]
    jobs: Option<usize>,

    /// Kill a job that runs longer than this many seconds
    #[arg(long, value_name = "SECONDS")]
    job_timeout: Option<u64>,

    /// Path to the downloader executable
    #[arg(long, env = "BILIBILI_DL_DOWNLOADER", value_name = "PATH")]
    downloader: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging; also passes --debug to the downloader
    #[arg(long)]
    debug: bool,
}

const DEFAULT_NETWORK_TIMEOUT: u64 = 600;

impl Cli {
    /// Apply command-line flags over a loaded (or default) config
    fn build_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(dir) = &self.output_dir {
            config.download.output_dir = dir.clone();
        }
        if let Some(jobs) = self.jobs {
            config.download.max_concurrent_downloads = jobs;
        }
        if let Some(secs) = self.job_timeout {
            config.download.job_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(path) = &self.downloader {
            config.tools.downloader_path = Some(path.clone());
        }

        let options = &mut config.options;
        if self.format.is_some() {
            options.format = self.format.clone();
        }
        options.info_only |= self.info_only;
        options.caption |= self.caption;
        options.no_merge |= self.no_merge;
        options.no_proxy |= self.no_proxy;
        options.debug |= self.debug;
        if self.cookies.is_some() {
            options.cookies = self.cookies.clone();
        }
        match self.timeout {
            Some(secs) => options.network_timeout = Some(Duration::from_secs(secs)),
            None if options.network_timeout.is_none() => {
                options.network_timeout = Some(Duration::from_secs(DEFAULT_NETWORK_TIMEOUT));
            }
            None => {}
        }

        config.validate()?;
        Ok(config)
    }

    async fn collect_inputs(&self) -> anyhow::Result<Vec<String>> {
        let mut inputs: Vec<String> = self
            .urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if let Some(path) = &self.urls_file {
            inputs.extend(read_batch_file(path).await?);
        }
        Ok(inputs)
    }
}

/// Renders batch events as terminal progress bars
struct TerminalProgress {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: HashMap<JobId, ProgressBar>,
    overall: ProgressBar,
    /// Print downloader output to stdout (info-only mode has nothing else to show)
    echo_output: bool,
}

impl TerminalProgress {
    fn new(total: usize, echo_output: bool) -> anyhow::Result<Self> {
        let multi = MultiProgress::new();
        let style = ProgressStyle::default_bar()
            .template("{prefix:>6} [{bar:30.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-");
        let overall = multi.add(ProgressBar::new(total as u64));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] batch {pos}/{len} {msg}")?,
        );
        overall.enable_steady_tick(Duration::from_millis(200));
        Ok(Self {
            multi,
            style,
            bars: HashMap::new(),
            overall,
            echo_output,
        })
    }

    /// Stdout line for a downloader output line, if output is echoed
    fn echo_line(&self, id: JobId, text: &str) -> Option<String> {
        self.echo_output.then(|| format!("[#{id}] {text}"))
    }

    fn bar(&mut self, id: JobId) -> &ProgressBar {
        let multi = &self.multi;
        let style = &self.style;
        self.bars.entry(id).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            bar.set_prefix(format!("#{id}"));
            bar
        })
    }
}

impl BatchObserver for TerminalProgress {
    fn on_job_queued(&mut self, id: JobId, input: &str) {
        self.bar(id).set_message(format!("queued {input}"));
    }

    fn on_job_started(&mut self, id: JobId, url: &str) {
        self.bar(id).set_message(url.to_string());
    }

    fn on_progress(&mut self, id: JobId, percent: u8, message: &str) {
        let bar = self.bar(id);
        bar.set_position(u64::from(percent));
        bar.set_message(message.to_string());
    }

    fn on_log_line(&mut self, id: JobId, text: &str, stalled_lines: usize) {
        tracing::debug!(job_id = %id, stalled_lines, "{}", text);
        if let Some(line) = self.echo_line(id, text) {
            self.multi.suspend(|| println!("{line}"));
        }
        // No percentage moved; show the output so the bar is visibly alive
        if stalled_lines > 0 {
            self.bar(id).set_message(text.to_string());
        }
    }

    fn on_job_done(&mut self, id: JobId, success: bool, status: JobStatus, message: &str) {
        let bar = self.bar(id);
        if success {
            bar.finish_with_message(message.to_string());
        } else {
            bar.abandon_with_message(format!("{status}: {message}"));
        }
    }

    fn on_batch_progress(&mut self, completed: usize, _total: usize, percent: u8) {
        self.overall.set_position(completed as u64);
        self.overall.set_message(format!("({percent}%)"));
    }

    fn on_batch_done(&mut self, result: &BatchResult) {
        self.overall.finish_with_message(format!(
            "success {} / fail {}",
            result.succeeded,
            result.failed + result.cancelled
        ));
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Signal that cancelled the batch, or `None` after aborting the listener
async fn stop_signal_task(task: tokio::task::JoinHandle<ShutdownSignal>) -> Option<ShutdownSignal> {
    if task.is_finished() {
        return task.await.ok();
    }
    task.abort();
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = cli.build_config()?;
    let inputs = cli.collect_inputs().await?;
    if inputs.is_empty() {
        eprintln!("No URLs given. Pass URLs as arguments or use --urls-file.");
        return Ok(ExitCode::FAILURE);
    }

    let downloader = BatchDownloader::new(config).context("starting downloader")?;
    let config = downloader.get_config();
    tracing::info!(
        downloader = %downloader.program().display(),
        output_dir = %config.output_dir().display(),
        jobs = inputs.len(),
        "Starting batch"
    );

    let renderer = TerminalProgress::new(inputs.len(), config.options.info_only)?;
    let render_task = tokio::spawn(forward_events(downloader.subscribe(), renderer));
    let signal_task = tokio::spawn(run_with_shutdown(downloader.clone()));

    let result = downloader.run_inputs(inputs).await;
    let signal = stop_signal_task(signal_task).await;
    let result = result?;
    if let Err(e) = render_task.await {
        tracing::warn!(error = %e, "Progress renderer stopped unexpectedly");
    }

    if let Some(signal) = signal {
        eprintln!("Batch cancelled by {signal}");
    }
    for job in result.per_job.iter().filter(|j| j.status != JobStatus::Succeeded) {
        eprintln!(
            "{} [{}] {}",
            job.request.raw_input,
            job.status,
            job.error.as_deref().unwrap_or("")
        );
    }
    println!(
        "success {} / fail {}",
        result.succeeded,
        result.failed + result.cancelled
    );

    Ok(if result.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
