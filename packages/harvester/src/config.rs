use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jurisdiction: String,
    /// Comma-separated production locality set.
    pub localities: Vec<String>,
    /// Comma-separated profession set.
    pub professions: Vec<String>,
    pub consumer_count: usize,
    pub batch_size: i64,
    pub poll_interval_secs: u64,
    pub max_retries: i32,
    pub extract_timeout_secs: u64,
    pub result_limit: Option<usize>,
    pub requests_per_second: i32,
    pub refresh_after_secs: i64,
    pub queue_low_water_mark: i64,
    pub coordinator_cadence: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            jurisdiction: env::var("HARVEST_JURISDICTION")
                .unwrap_or_else(|_| "mn".to_string()),
            localities: list_var("HARVEST_LOCALITIES", DEFAULT_LOCALITIES),
            professions: list_var("HARVEST_PROFESSIONS", DEFAULT_PROFESSIONS),
            consumer_count: env::var("CONSUMER_COUNT")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("CONSUMER_COUNT must be a valid number")?,
            batch_size: env::var("CONSUMER_BATCH_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("CONSUMER_BATCH_SIZE must be a valid number")?,
            poll_interval_secs: env::var("CONSUMER_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("CONSUMER_POLL_INTERVAL_SECS must be a valid number")?,
            max_retries: env::var("MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("MAX_RETRIES must be a valid number")?,
            extract_timeout_secs: env::var("EXTRACT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("EXTRACT_TIMEOUT_SECS must be a valid number")?,
            result_limit: match env::var("RESULT_LIMIT") {
                Ok(v) => Some(v.parse().context("RESULT_LIMIT must be a valid number")?),
                Err(_) => None,
            },
            requests_per_second: env::var("REQUESTS_PER_SECOND")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("REQUESTS_PER_SECOND must be a valid number")?,
            // 30 days: licensing rosters change slowly.
            refresh_after_secs: env::var("REFRESH_AFTER_SECS")
                .unwrap_or_else(|_| "2592000".to_string())
                .parse()
                .context("REFRESH_AFTER_SECS must be a valid number")?,
            queue_low_water_mark: env::var("QUEUE_LOW_WATER_MARK")
                .unwrap_or_else(|_| "25".to_string())
                .parse()
                .context("QUEUE_LOW_WATER_MARK must be a valid number")?,
            coordinator_cadence: env::var("COORDINATOR_CADENCE")
                .unwrap_or_else(|_| "0 */5 * * * *".to_string()),
        })
    }
}

const DEFAULT_LOCALITIES: &[&str] = &[
    "minneapolis",
    "st_paul",
    "duluth",
    "rochester",
    "bloomington",
    "brooklyn_park",
    "plymouth",
    "woodbury",
    "maple_grove",
    "st_cloud",
];

const DEFAULT_PROFESSIONS: &[&str] = &["electrician", "plumber", "hvac", "general_contractor"];

fn list_var(name: &str, default: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_var_splits_and_trims() {
        std::env::set_var("TEST_LIST_VAR", "a, b ,c,");
        assert_eq!(
            list_var("TEST_LIST_VAR", &["x"]),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        std::env::remove_var("TEST_LIST_VAR");
    }

    #[test]
    fn list_var_falls_back_to_default() {
        assert_eq!(list_var("TEST_LIST_VAR_MISSING", &["x", "y"]), vec!["x", "y"]);
    }
}
