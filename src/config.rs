use std::time::Duration;

use getset::Getters;
use thiserror::Error;

use crate::builder::{DEFAULT_CALL_TIMEOUT, DEFAULT_QUEUE_NAME, DEFAULT_RESULT_TTL};

pub const DEFAULT_SCHEMA: &str = "albumlist";
pub const DEFAULT_CACHE_PREFIX: &str = "albumlist:";
pub const DEFAULT_ALBUM_OF_THE_DAY_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {name}")]
    Invalid { name: &'static str, value: String },

    #[error("Failed to read .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
}

/// Settings the worker binary reads from its environment.
#[derive(Getters, Debug, Clone, PartialEq)]
#[getset(get = "pub")]
pub struct WorkerConfig {
    redis_url: String,
    database_url: String,
    /// Postgres schema holding the album list tables
    schema: String,
    queue_name: String,
    concurrency: usize,
    result_ttl: Duration,
    call_timeout: Duration,
    slack_token: Option<String>,
    cache_prefix: String,
    /// How often `check-all-urls` is queued, if at all
    check_urls_interval: Option<Duration>,
    /// Channel that gets the album of the day; none disables it
    album_of_the_day_channel: Option<String>,
    album_of_the_day_interval: Duration,
}

impl WorkerConfig {
    /// Loads `.env` when there is one, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) | Err(dotenvy::Error::Io(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from `lookup`, which returns the value of a variable
    /// when it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));
        let secs = |name: &'static str| -> Result<Option<Duration>, ConfigError> {
            var(name)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u64>()
                        .map(Duration::from_secs)
                        .map_err(|_| ConfigError::Invalid { name, value })
                })
                .transpose()
        };

        let concurrency = match var("WORKER_CONCURRENCY") {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "WORKER_CONCURRENCY",
                        value,
                    })
                }
            },
            None => 1,
        };

        Ok(WorkerConfig {
            redis_url: required("REDIS_URL")?,
            database_url: required("DATABASE_URL")?,
            schema: var("ALBUMLIST_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            queue_name: var("QUEUE_NAME").unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
            concurrency,
            result_ttl: secs("RESULT_TTL_SECS")?.unwrap_or(DEFAULT_RESULT_TTL),
            call_timeout: secs("TASK_CALL_TIMEOUT_SECS")?.unwrap_or(DEFAULT_CALL_TIMEOUT),
            slack_token: var("SLACK_OAUTH_TOKEN"),
            cache_prefix: var("CACHE_PREFIX").unwrap_or_else(|| DEFAULT_CACHE_PREFIX.to_string()),
            check_urls_interval: secs("CHECK_URLS_INTERVAL_SECS")?.filter(|d| !d.is_zero()),
            album_of_the_day_channel: var("AOTD_CHANNEL_ID"),
            album_of_the_day_interval: secs("AOTD_INTERVAL_SECS")?
                .filter(|d| !d.is_zero())
                .unwrap_or(DEFAULT_ALBUM_OF_THE_DAY_INTERVAL),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("REDIS_URL", "redis://127.0.0.1/"),
        ("DATABASE_URL", "postgres://localhost/albumlist"),
    ];

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.queue_name(), "deferred_queue");
        assert_eq!(*config.concurrency(), 1);
        assert_eq!(*config.result_ttl(), Duration::from_secs(500));
        assert_eq!(*config.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.schema(), "albumlist");
        assert_eq!(*config.slack_token(), None);
        assert_eq!(*config.check_urls_interval(), None);
        assert_eq!(*config.album_of_the_day_channel(), None);
        assert_eq!(
            *config.album_of_the_day_interval(),
            DEFAULT_ALBUM_OF_THE_DAY_INTERVAL
        );
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("QUEUE_NAME", "albums"),
            ("WORKER_CONCURRENCY", "4"),
            ("RESULT_TTL_SECS", "60"),
            ("SLACK_OAUTH_TOKEN", "xoxb-1"),
            ("CHECK_URLS_INTERVAL_SECS", "86400"),
            ("AOTD_CHANNEL_ID", "C9"),
            ("AOTD_INTERVAL_SECS", "3600"),
        ]);
        let config = WorkerConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.queue_name(), "albums");
        assert_eq!(*config.concurrency(), 4);
        assert_eq!(*config.result_ttl(), Duration::from_secs(60));
        assert_eq!(config.slack_token().as_deref(), Some("xoxb-1"));
        assert_eq!(*config.check_urls_interval(), Some(Duration::from_secs(86400)));
        assert_eq!(config.album_of_the_day_channel().as_deref(), Some("C9"));
        assert_eq!(*config.album_of_the_day_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_missing_and_invalid() {
        let err = WorkerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("REDIS_URL")));

        let mut vars = REQUIRED.to_vec();
        vars.push(("WORKER_CONCURRENCY", "0"));
        let err = WorkerConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "WORKER_CONCURRENCY", .. }));

        let mut vars = REQUIRED.to_vec();
        vars.push(("RESULT_TTL_SECS", "soon"));
        assert!(WorkerConfig::from_lookup(lookup(&vars)).is_err());
    }
}
