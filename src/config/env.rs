use std::{path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub profile: String,
    pub api_base_url: String,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
    pub sync: SyncConfig,
    pub http: HttpConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
    pub db_filename: String,
    pub pages_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Extra attempts after the first failed fetch of a list.
    pub retries: u32,
    pub retry_delay: Duration,
    pub max_age: Duration,
    pub cron_specs: Vec<String>,
    /// How often the daemon checks the database for commits made by other processes.
    pub store_poll: Duration,
}

impl SyncConfig {
    pub fn retry_policy(&self) -> crate::tasks::retry::RetryPolicy {
        crate::tasks::retry::RetryPolicy {
            retries: self.retries,
            delay: self.retry_delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct TransferConfig {
    pub import_file: Option<PathBuf>,
    pub export_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
