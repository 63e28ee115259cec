use crate::global;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const ENV_BIND_ADDRESS: &str = "MEDIAPROBE_BIND_ADDRESS";
pub const ENV_PORT: &str = "MEDIAPROBE_PORT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub fetch: FetchConfig,
    pub analysis: AnalysisConfig,
    pub thumbnails: ThumbnailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Largest accepted request body (JSON or multipart upload).
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Most bytes downloaded from a remote URL.
    pub byte_ceiling: usize,
    /// Wall-clock budget for each download attempt.
    pub timeout_secs: u64,
    pub user_agent: String,
    pub max_redirects: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Command looked up on PATH when no candidate exists.
    pub command: String,
    /// Absolute locations tried first, in order.
    pub candidates: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub ffmpeg_command: String,
    pub default_count: usize,
    pub max_count: usize,
    /// Parallel ffmpeg processes for single-source generation.
    pub concurrency: usize,
    /// Parallel timestamps for comparisons (each runs two processes).
    pub compare_concurrency: usize,
    pub width: u32,
    pub quality: u32,
    /// Per-process limit; unset means no limit.
    pub frame_timeout_secs: Option<u64>,
    /// Where frame scratch files go; defaults to the system temp dir.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 3000,
            max_body_bytes: 50 * 1024 * 1024,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            byte_ceiling: 5 * 1024 * 1024,
            timeout_secs: 45,
            user_agent: "Mozilla/5.0 (compatible; MediaInfo-Bot/1.0)".to_string(),
            max_redirects: 5,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            command: "mediainfo".to_string(),
            candidates: vec![
                PathBuf::from("/usr/bin/mediainfo"),
                PathBuf::from("/usr/local/bin/mediainfo"),
                PathBuf::from("/opt/homebrew/bin/mediainfo"),
            ],
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            ffmpeg_command: "ffmpeg".to_string(),
            default_count: 5,
            max_count: 8,
            concurrency: 3,
            compare_concurrency: 2,
            width: 320,
            quality: 3,
            frame_timeout_secs: None,
            scratch_dir: None,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ThumbnailConfig {
    pub fn frame_timeout(&self) -> Option<Duration> {
        self.frame_timeout_secs.map(Duration::from_secs)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(global::scratch_dir)
    }
}

impl Config {
    /// Loads from `path`, or the default location when `None`. A missing file
    /// yields defaults; environment overrides are applied either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Self = toml::from_str(&content).context("Failed to parse config file")?;
            info!("Loaded config from {:?}", config_path);
            config
        } else {
            if path.is_some() {
                bail!("Config file not found: {}", config_path.display());
            }
            info!("Config file not found at {:?}, using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config to `path`, or the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(config_path)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup(ENV_BIND_ADDRESS).filter(|v| !v.trim().is_empty()) {
            self.server.bind_address = address.trim().to_string();
        }
        if let Some(port) = lookup(ENV_PORT).filter(|v| !v.trim().is_empty()) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PORT} must be a port number, got '{port}'"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.byte_ceiling == 0 {
            bail!("fetch.byte_ceiling must be greater than zero");
        }
        if self.fetch.timeout_secs == 0 {
            bail!("fetch.timeout_secs must be greater than zero");
        }
        if self.thumbnails.concurrency == 0 || self.thumbnails.compare_concurrency == 0 {
            bail!("thumbnails concurrency settings must be greater than zero");
        }
        if self.thumbnails.max_count == 0 || self.thumbnails.default_count == 0 {
            bail!("thumbnails counts must be greater than zero");
        }
        if self.thumbnails.frame_timeout_secs == Some(0) {
            bail!("thumbnails.frame_timeout_secs must be greater than zero when set");
        }
        if self.server.max_body_bytes == 0 {
            bail!("server.max_body_bytes must be greater than zero");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
