use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_STALE_HOURS: i64 = 6;
pub const DEFAULT_REMOTE_BUDGET: usize = 5;
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 4;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;
pub const DEFAULT_JOB_STALE_DAYS: i64 = 14;

/// Connection settings for the remote sponsor-data provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub provider: Option<ProviderConfig>,
    pub stale_hours: i64,
    pub remote_budget: usize,
    pub embedding: EmbeddingConfig,
    pub job_stale_days: i64,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();

        let provider = match (env_string("SPONSOR_API_URL"), env_string("SPONSOR_API_KEY")) {
            (Some(base_url), Some(api_key)) => Some(ProviderConfig {
                base_url,
                api_key,
                timeout: Duration::from_secs(env_parse(
                    "SPONSOR_API_TIMEOUT_SECS",
                    DEFAULT_PROVIDER_TIMEOUT_SECS,
                )),
            }),
            _ => None,
        };

        Self {
            db_path: env_string("JOBSCOUT_DB")
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            provider,
            stale_hours: env_non_negative("SPONSOR_STALE_HOURS", DEFAULT_STALE_HOURS),
            remote_budget: env_parse("ENRICH_REMOTE_BUDGET", DEFAULT_REMOTE_BUDGET),
            embedding: EmbeddingConfig {
                api_key: env_string("OPENAI_API_KEY"),
                model: env_string("EMBEDDING_MODEL")
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
                dimension: env_parse("EMBEDDING_DIM", DEFAULT_EMBEDDING_DIM),
            },
            job_stale_days: env_non_negative("JOB_STALE_DAYS", DEFAULT_JOB_STALE_DAYS),
        }
    }

    pub fn provider_configured(&self) -> bool {
        self.provider.as_ref().is_some_and(ProviderConfig::is_configured)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            provider: None,
            stale_hours: DEFAULT_STALE_HOURS,
            remote_budget: DEFAULT_REMOTE_BUDGET,
            embedding: EmbeddingConfig {
                api_key: None,
                model: DEFAULT_EMBEDDING_MODEL.to_string(),
                dimension: DEFAULT_EMBEDDING_DIM,
            },
            job_stale_days: DEFAULT_JOB_STALE_DAYS,
        }
    }
}

fn default_db_path() -> PathBuf {
    // XDG data directory, or the working directory as a fallback
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobscout") {
        proj_dirs.data_dir().join("jobscout.db")
    } else {
        PathBuf::from("jobscout.db")
    }
}

fn env_string(key: &str) -> Option<String> {
    dotenv::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env_string(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "Ignoring malformed config value");
            default
        }),
        None => default,
    }
}

fn env_non_negative(key: &str, default: i64) -> i64 {
    let value = env_parse(key, default);
    if value < 0 {
        warn!(key, value, default, "Ignoring negative config value");
        return default;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_requires_url_and_key() {
        let mut provider = ProviderConfig {
            base_url: "https://sponsors.example.com".to_string(),
            api_key: "k".to_string(),
            timeout: Duration::from_secs(4),
        };
        assert!(provider.is_configured());

        provider.api_key = "  ".to_string();
        assert!(!provider.is_configured());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.stale_hours, 6);
        assert_eq!(config.remote_budget, 5);
        assert_eq!(config.embedding.dimension, 1536);
        assert!(!config.provider_configured());
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        unsafe { std::env::set_var("JOBSCOUT_TEST_BUDGET", "lots"); }
        assert_eq!(env_parse("JOBSCOUT_TEST_BUDGET", 5usize), 5);

        unsafe { std::env::set_var("JOBSCOUT_TEST_BUDGET", "8"); }
        assert_eq!(env_parse("JOBSCOUT_TEST_BUDGET", 5usize), 8);

        unsafe { std::env::remove_var("JOBSCOUT_TEST_BUDGET"); }
    }

    #[test]
    fn test_negative_hours_fall_back() {
        unsafe { std::env::set_var("JOBSCOUT_TEST_HOURS", "-3"); }
        assert_eq!(env_non_negative("JOBSCOUT_TEST_HOURS", 6), 6);

        unsafe { std::env::set_var("JOBSCOUT_TEST_HOURS", "12"); }
        assert_eq!(env_non_negative("JOBSCOUT_TEST_HOURS", 6), 12);

        unsafe { std::env::remove_var("JOBSCOUT_TEST_HOURS"); }
    }
}
