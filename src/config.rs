//! Configuration types for bilibili-dl
//!
//! [`Config`] is the context object handed to [`crate::BatchDownloader`]. It is
//! owned by the orchestrator and threaded through every job; nothing here is
//! global.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Download behavior configuration (directories, concurrency, timeouts)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Output directory passed to the downloader via `-o` (default: "./downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum concurrent downloads (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Wall-clock limit for a single job (None = unlimited)
    #[serde(default, with = "optional_duration_serde")]
    pub job_timeout: Option<Duration>,

    /// How long a cancelled batch waits for running jobs to report back (default: 5 seconds)
    #[serde(default = "default_cancel_grace", with = "duration_serde")]
    pub cancel_grace: Duration,

    /// Number of trailing output lines kept as diagnostics for failed jobs (default: 20)
    #[serde(default = "default_diagnostic_lines")]
    pub diagnostic_lines: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            job_timeout: None,
            cancel_grace: default_cancel_grace(),
            diagnostic_lines: default_diagnostic_lines(),
        }
    }
}

/// External downloader location
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the downloader executable (auto-detected if None)
    #[serde(default)]
    pub downloader_path: Option<PathBuf>,

    /// Executable name searched on PATH when no explicit path is set (default: "you-get")
    #[serde(default = "default_downloader_name")]
    pub downloader_name: String,

    /// Whether to search PATH for the downloader if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            downloader_path: None,
            downloader_name: default_downloader_name(),
            search_path: true,
        }
    }
}

/// Flags forwarded to every downloader invocation
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DownloaderOptions {
    /// Stream format to request (`-f`, e.g. "dash-flv480-AV1")
    #[serde(default)]
    pub format: Option<String>,

    /// Only print video information, do not download (`-i`)
    #[serde(default)]
    pub info_only: bool,

    /// Also download captions (`-c`)
    #[serde(default)]
    pub caption: bool,

    /// Do not merge video parts (`--no-merge`)
    #[serde(default)]
    pub no_merge: bool,

    /// Bypass any configured proxy (`--no-proxy`)
    #[serde(default)]
    pub no_proxy: bool,

    /// Cookies file (`--cookies`)
    #[serde(default)]
    pub cookies: Option<PathBuf>,

    /// Socket timeout handed to the downloader (`-t`, seconds)
    #[serde(default, with = "optional_duration_serde")]
    pub network_timeout: Option<Duration>,

    /// Ask the downloader for debug output (`--debug`)
    #[serde(default)]
    pub debug: bool,
}

impl DownloaderOptions {
    /// Render these options as downloader arguments, excluding `-o` and the URL
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(format) = &self.format {
            args.push("-f".to_string());
            args.push(format.clone());
        }
        if self.info_only {
            args.push("-i".to_string());
        }
        if self.caption {
            args.push("-c".to_string());
        }
        if self.no_merge {
            args.push("--no-merge".to_string());
        }
        if self.no_proxy {
            args.push("--no-proxy".to_string());
        }
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }
        if let Some(timeout) = self.network_timeout {
            args.push("-t".to_string());
            args.push(timeout.as_secs().to_string());
        }
        if self.debug {
            args.push("--debug".to_string());
        }
        args
    }
}

/// Main configuration for BatchDownloader
///
/// Fields are organized into sub-configs:
/// - [`download`](DownloadConfig) - output directory, concurrency, timeouts
/// - [`tools`](ToolsConfig) - downloader executable discovery
/// - [`options`](DownloaderOptions) - flags forwarded to the downloader
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// External tool location
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Downloader flags
    #[serde(default)]
    pub options: DownloaderOptions,
}

impl Config {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their defaults, so `{}` is a valid file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        let config: Config = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that would make a batch impossible to run
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::config(
                "max_concurrent_downloads must be at least 1",
                "max_concurrent_downloads",
            ));
        }
        if self.tools.downloader_path.is_none() && self.tools.downloader_name.trim().is_empty() {
            return Err(Error::config(
                "downloader_name must not be empty when no downloader_path is set",
                "downloader_name",
            ));
        }
        if self.download.job_timeout == Some(Duration::ZERO) {
            return Err(Error::config(
                "job_timeout must be greater than zero",
                "job_timeout",
            ));
        }
        Ok(())
    }

    /// Output directory
    pub fn output_dir(&self) -> &PathBuf {
        &self.download.output_dir
    }
}

// Default value functions
fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_diagnostic_lines() -> usize {
    20
}

fn default_downloader_name() -> String {
    "you-get".to_string()
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
