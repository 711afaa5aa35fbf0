use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// Directory holding every stored payload of one capture session.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.data_dir.join("streams").join(session_id)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
    /// How long the log of a stopped session is kept for late viewers.
    #[serde(default = "default_closed_retention_secs")]
    pub closed_retention_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            keepalive_ms: default_keepalive_ms(),
            closed_retention_secs: default_closed_retention_secs(),
        }
    }
}

fn default_queue_capacity() -> usize {
    32
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_keepalive_ms() -> u64 {
    1000
}
fn default_closed_retention_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_bbox")]
    pub bbox: [f64; 4],
    #[serde(default)]
    pub barcode: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            label: default_label(),
            confidence: default_confidence(),
            bbox: default_bbox(),
            barcode: None,
        }
    }
}

fn default_provider() -> String {
    "stub".to_string()
}
fn default_label() -> String {
    "object".to_string()
}
fn default_confidence() -> f64 {
    0.9
}
fn default_bbox() -> [f64; 4] {
    [0.0, 0.0, 10.0, 10.0]
}

impl Config {
    /// All-defaults configuration keeping the database and frame storage
    /// under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            db: DbConfig {
                path: root.join("garage.sqlite"),
            },
            storage: StorageConfig {
                data_dir: root.join("data"),
            },
            server: ServerConfig::default(),
            stream: StreamConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate stream
    if config.stream.queue_capacity == 0 {
        anyhow::bail!("stream.queue_capacity must be >= 1");
    }
    if config.stream.poll_interval_ms == 0 {
        anyhow::bail!("stream.poll_interval_ms must be >= 1");
    }
    if config.stream.keepalive_ms < config.stream.poll_interval_ms {
        anyhow::bail!("stream.keepalive_ms must be >= stream.poll_interval_ms");
    }

    // Validate detector
    match config.detector.provider.as_str() {
        "stub" | "none" => {}
        other => anyhow::bail!(
            "Unknown detector provider: '{}'. Must be stub or none.",
            other
        ),
    }
    if !(0.0..=1.0).contains(&config.detector.confidence) {
        anyhow::bail!("detector.confidence must be in [0.0, 1.0]");
    }
    let [_, _, w, h] = config.detector.bbox;
    if w < 0.0 || h < 0.0 {
        anyhow::bail!("detector.bbox width and height must be >= 0");
    }

    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be > 0");
    }

    Ok(())
}
