use std::{env, path::PathBuf, time::Duration};

use url::Url;

use crate::settings::DEFAULT_API_BASE_URL;

use super::env::{
    AppConfig, ConfigError, DirectoryConfig, HttpConfig, LoggingConfig, SyncConfig,
    TransferConfig,
};

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let profile = non_empty("OVERMOD_PROFILE").unwrap_or_else(|| "default".to_string());

        let api_base_url = match non_empty("OVERMOD_API_BASE_URL") {
            Some(raw) => validate_base_url(&raw)?,
            None => DEFAULT_API_BASE_URL.to_string(),
        };

        let directories = DirectoryConfig {
            logs_dir: env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string()),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            db_filename: env::var("DB_FILENAME").unwrap_or_else(|_| "overmod.db".to_string()),
            pages_dir: non_empty("PAGES_DIR"),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        let sync = SyncConfig {
            retries: parse_num("SYNC_RETRIES").unwrap_or(2),
            retry_delay: Duration::from_millis(parse_num("SYNC_RETRY_DELAY_MS").unwrap_or(500)),
            max_age: Duration::from_secs(parse_num("SYNC_MAX_AGE_SECS").unwrap_or(4 * 60 * 60)),
            cron_specs: env::var("SYNC_CRONS")
                .map(|value| {
                    value
                        .split(';')
                        .map(|part| part.trim().to_string())
                        .filter(|part| !part.is_empty())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_else(|_| vec!["0 0 * * * *".to_string()]),
            store_poll: Duration::from_millis(parse_num("STORE_POLL_MS").unwrap_or(2_000)),
        };

        let http = HttpConfig {
            timeout: Duration::from_millis(parse_num("HTTP_TIMEOUT_MS").unwrap_or(10_000)),
        };

        let transfer = TransferConfig {
            import_file: non_empty("IMPORT_FILE").map(PathBuf::from),
            export_file: non_empty("EXPORT_FILE").map(PathBuf::from),
        };

        Ok(Self {
            profile,
            api_base_url,
            directories,
            logging,
            sync,
            http,
            transfer,
        })
    }
}

fn validate_base_url(raw: &str) -> Result<String, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|err| ConfigError::Invalid {
        key: "OVERMOD_API_BASE_URL",
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            key: "OVERMOD_API_BASE_URL",
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_num<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(
            validate_base_url("https://custom.overmod.org/").unwrap(),
            "https://custom.overmod.org"
        );
        assert!(validate_base_url("ftp://x.org").is_err());
        assert!(validate_base_url("not a url").is_err());
    }
}
