//! Layered engine configuration.
//!
//! Built-in defaults, then an optional TOML file, then environment variables
//! of the form `SAYONARA__EXECUTOR__CHUNK_SIZE=1048576`.

use crate::error::ExponentialBackoff;
use crate::{DriveError, DriveResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SAYONARA";
const SYSTEM_DATA_DIR: &str = "/var/lib/sayonara-wipe";

/// How much of a verified pass is read back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationLevel {
    /// First chunk, last chunk and `verify_samples` random chunks
    Sampled,
    /// Every byte
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Bytes written per chunk; cancellation is checked between chunks
    pub chunk_size: usize,
    pub max_chunk_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub verification: VerificationLevel,
    pub verify_samples: usize,
    pub checkpoint_interval_secs: u64,
    pub checkpoint_bytes: u64,
    /// Poll interval used by `wait`
    pub status_poll_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4 * 1024 * 1024,
            max_chunk_retries: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2000,
            verification: VerificationLevel::Sampled,
            verify_samples: 64,
            checkpoint_interval_secs: 60,
            checkpoint_bytes: 1024 * 1024 * 1024,
            status_poll_ms: 100,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> DriveResult<()> {
        if self.chunk_size == 0 {
            return Err(DriveError::Config("executor.chunk_size must be positive".to_string()));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(DriveError::Config(
                "executor.retry_base_delay_ms exceeds retry_max_delay_ms".to_string(),
            ));
        }
        if self.status_poll_ms == 0 {
            return Err(DriveError::Config("executor.status_poll_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn retry_strategy(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
            self.max_chunk_retries,
        )
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    pub level: String,
    pub json: bool,
    /// Write a daily rolling log file here in addition to stderr
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub journal_path: PathBuf,
    pub signing_key_path: PathBuf,
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            executor: ExecutorConfig::default(),
            journal_path: data_dir.join("journal.db"),
            signing_key_path: data_dir.join("signing_key.pk8"),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults, then `file` (or the per-user `engine.toml` if it exists),
    /// then environment overrides
    pub fn load(file: Option<&Path>) -> DriveResult<Self> {
        let defaults = config::Config::try_from(&EngineConfig::default())
            .map_err(|e| DriveError::Config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);

        match file {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(path) = default_config_file() {
                    builder = builder.add_source(config::File::from(path).required(false));
                }
            }
        }

        let loaded: EngineConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DriveError::Config(e.to_string()))?;

        loaded.executor.validate()?;
        Ok(loaded)
    }
}

/// System-wide state directory when running as root, per-user otherwise
pub fn default_data_dir() -> PathBuf {
    if unsafe { libc::geteuid() == 0 } {
        return PathBuf::from(SYSTEM_DATA_DIR);
    }
    ProjectDirs::from("org", "sayonara", "sayonara-wipe")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".sayonara"))
}

pub fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("org", "sayonara", "sayonara-wipe")
        .map(|dirs| dirs.config_dir().join("engine.toml"))
}
