//! Engine configuration
//!
//! Loaded from a JSON file; every field except `data_dir` has a default.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::observability::Severity;

/// How much page flushing a checkpoint performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointLevel {
    /// Record state only, flush nothing
    Indirect,
    /// Flush pages dirtied before the previous checkpoint
    Medium,
    /// Flush every dirty page
    Full,
}

impl CheckpointLevel {
    /// Name used in config files and logs
    pub fn name(self) -> &'static str {
        match self {
            CheckpointLevel::Indirect => "indirect",
            CheckpointLevel::Medium => "medium",
            CheckpointLevel::Full => "full",
        }
    }
}

/// When obsolete log files are removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogPurge {
    /// Right after each checkpoint
    Immediate,
    /// Only when `purge` is called explicitly
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Table files and the control file
    pub data_dir: PathBuf,

    /// Log files; defaults to `data_dir`
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Log rotation limit in bytes
    #[serde(default = "default_log_file_size")]
    pub log_file_size: u32,

    /// Page cache capacity in slots
    #[serde(default = "default_page_cache_pages")]
    pub page_cache_pages: usize,

    /// Default block size for new tables
    #[serde(default = "default_block_size")]
    pub block_size: u32,

    /// Seconds between background checkpoints, 0 disables them
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: u64,

    #[serde(default = "default_checkpoint_level")]
    pub checkpoint_level: CheckpointLevel,

    #[serde(default = "default_log_purge")]
    pub log_purge: LogPurge,

    /// fsync log files on flush
    #[serde(default = "default_sync_log")]
    pub sync_log: bool,

    /// Continue past per-page errors during recovery
    #[serde(default)]
    pub recover_best_effort: bool,

    /// JSON key file for table encryption
    #[serde(default)]
    pub encryption_key_file: Option<PathBuf>,
}

fn default_log_file_size() -> u32 {
    1 << 30
}
fn default_page_cache_pages() -> usize {
    4096
}
fn default_block_size() -> u32 {
    8192
}
fn default_checkpoint_interval() -> u64 {
    30
}
fn default_checkpoint_level() -> CheckpointLevel {
    CheckpointLevel::Medium
}
fn default_log_purge() -> LogPurge {
    LogPurge::Immediate
}
fn default_sync_log() -> bool {
    true
}

pub const MIN_LOG_FILE_SIZE: u32 = 64 * 1024;
pub const MIN_BLOCK_SIZE: u32 = 1024;
pub const MAX_BLOCK_SIZE: u32 = 32768;
pub const MIN_CACHE_PAGES: usize = 8;

impl EngineConfig {
    /// Configuration with every default, rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            log_dir: None,
            log_file_size: default_log_file_size(),
            page_cache_pages: default_page_cache_pages(),
            block_size: default_block_size(),
            checkpoint_interval_secs: default_checkpoint_interval(),
            checkpoint_level: default_checkpoint_level(),
            log_purge: default_log_purge(),
            sync_log: default_sync_log(),
            recover_best_effort: false,
            encryption_key_file: None,
        }
    }

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::unreadable(format!("cannot read {}", path.display()), e)
        })?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| ConfigError::invalid(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check option ranges
    pub fn validate(&self) -> ConfigResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("data_dir must not be empty"));
        }
        if self.log_file_size < MIN_LOG_FILE_SIZE {
            return Err(ConfigError::invalid(format!(
                "log_file_size {} below minimum {}",
                self.log_file_size, MIN_LOG_FILE_SIZE
            )));
        }
        validate_block_size(self.block_size)?;
        if self.page_cache_pages < MIN_CACHE_PAGES {
            return Err(ConfigError::invalid(format!(
                "page_cache_pages {} below minimum {}",
                self.page_cache_pages, MIN_CACHE_PAGES
            )));
        }
        Ok(())
    }

    /// Directory holding the log files
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| self.data_dir.clone())
    }
}

/// Block sizes are powers of two between 1 KiB and 32 KiB
pub fn validate_block_size(block_size: u32) -> ConfigResult<()> {
    if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) || !block_size.is_power_of_two() {
        return Err(ConfigError::invalid(format!(
            "block_size {} must be a power of two in {}..={}",
            block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorCode {
    AriaConfigUnreadable,
    AriaConfigInvalid,
}

impl ConfigErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            ConfigErrorCode::AriaConfigUnreadable => "ARIA_CONFIG_UNREADABLE",
            ConfigErrorCode::AriaConfigInvalid => "ARIA_CONFIG_INVALID",
        }
    }
}

#[derive(Debug)]
pub struct ConfigError {
    code: ConfigErrorCode,
    message: String,
    source: Option<io::Error>,
}

impl ConfigError {
    /// Config file could not be read
    pub fn unreadable(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: ConfigErrorCode::AriaConfigUnreadable,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Config file is invalid
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: ConfigErrorCode::AriaConfigInvalid,
            message: message.into(),
            source: None,
        }
    }

    /// Get the error code
    pub fn code(&self) -> ConfigErrorCode {
        self.code
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", Severity::Error, self.code.code(), self.message)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: EngineConfig = serde_json::from_str(r#"{"data_dir": "/tmp/aria"}"#).unwrap();
        assert_eq!(config.block_size, 8192);
        assert_eq!(config.log_file_size, 1 << 30);
        assert_eq!(config.checkpoint_level, CheckpointLevel::Medium);
        assert_eq!(config.log_purge, LogPurge::Immediate);
        assert!(config.sync_log);
        assert!(!config.recover_best_effort);
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/aria"));
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aria.json");
        fs::write(
            &path,
            r#"{"data_dir": "/tmp/aria", "log_dir": "/tmp/logs", "block_size": 16384, "checkpoint_level": "full"}"#,
        )
        .unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.block_size, 16384);
        assert_eq!(config.checkpoint_level, CheckpointLevel::Full);
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/logs"));
    }

    #[test]
    fn test_rejects_bad_block_size() {
        let mut config = EngineConfig::new("/tmp/aria");
        config.block_size = 3000;
        assert_eq!(config.validate().unwrap_err().code(), ConfigErrorCode::AriaConfigInvalid);
        config.block_size = 65536;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_log_files() {
        let mut config = EngineConfig::new("/tmp/aria");
        config.log_file_size = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let err = EngineConfig::load(Path::new("/nonexistent/aria.json")).unwrap_err();
        assert_eq!(err.code(), ConfigErrorCode::AriaConfigUnreadable);
    }
}
