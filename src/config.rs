use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub device_url: String,
    pub status_interval_ms: u64,
    pub elapsed_tick_ms: u64,
    pub save_max_attempts: u32,
    pub save_backoff_ms: u64,
    pub save_flash_ms: u64,
    // 0 leaves requests to the platform's own connection timeout
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device_url: "http://ccxsfs20.local".to_string(),
            status_interval_ms: 2500,
            elapsed_tick_ms: 100,
            save_max_attempts: 3,
            save_backoff_ms: 500,
            save_flash_ms: 3000,
            request_timeout_ms: 0,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        let device_url = env::var("DEVICE_URL").unwrap_or(defaults.device_url);

        let status_interval_ms = get_env_var_u64("STATUS_INTERVAL_MS", defaults.status_interval_ms);
        let elapsed_tick_ms = get_env_var_u64("ELAPSED_TICK_MS", defaults.elapsed_tick_ms);
        let save_max_attempts = get_env_var_u32("SAVE_MAX_ATTEMPTS", defaults.save_max_attempts);
        let save_backoff_ms = get_env_var_u64("SAVE_BACKOFF_MS", defaults.save_backoff_ms);
        let save_flash_ms = get_env_var_u64("SAVE_FLASH_MS", defaults.save_flash_ms);
        let request_timeout_ms = get_env_var_u64("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms);

        Ok(Config {
            device_url,
            status_interval_ms,
            elapsed_tick_ms,
            save_max_attempts,
            save_backoff_ms,
            save_flash_ms,
            request_timeout_ms,
        }
        .normalized())
    }

    fn normalized(mut self) -> Self {
        self.device_url = self.device_url.trim_end_matches('/').to_string();
        // a zero period would make tokio's interval panic
        self.status_interval_ms = self.status_interval_ms.max(1);
        self.elapsed_tick_ms = self.elapsed_tick_ms.max(1);
        self.save_max_attempts = self.save_max_attempts.max(1);
        self
    }

    fn get_config_file_path() -> PathBuf {
        let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(config_dir).join("console_config.json")
    }

    /// File config if present, environment otherwise.
    pub fn load() -> Result<Self> {
        if Self::get_config_file_path().exists() {
            Self::load_from_file()
        } else {
            Self::from_env()
        }
    }

    pub fn load_from_file() -> Result<Self> {
        Self::load_from_path(&Self::get_config_file_path())
    }

    pub fn save_to_file(&self) -> Result<PathBuf> {
        let config_file_path = Self::get_config_file_path();
        self.save_to_path(&config_file_path)?;
        Ok(config_file_path)
    }

    pub fn load_from_path(path: &std::path::Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config.normalized())
    }

    pub fn save_to_path(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.save_max_attempts, Duration::from_millis(self.save_backoff_ms))
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn elapsed_tick(&self) -> Duration {
        Duration::from_millis(self.elapsed_tick_ms)
    }

    pub fn save_flash(&self) -> Duration {
        Duration::from_millis(self.save_flash_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

fn get_env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

fn get_env_var_u32(key: &str, default: u32) -> u32 {
    u32::try_from(get_env_var_u64(key, u64::from(default))).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_cadence() {
        let config = Config::default();
        assert_eq!(config.status_interval(), Duration::from_millis(2500));
        assert_eq!(config.elapsed_tick(), Duration::from_millis(100));
        assert_eq!(config.save_flash(), Duration::from_millis(3000));
        assert_eq!(config.request_timeout(), None);
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("console_config.json");
        let config = Config {
            device_url: "http://192.168.1.40".to_string(),
            request_timeout_ms: 5000,
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();
        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.request_timeout(), Some(Duration::from_millis(5000)));
    }

    #[test]
    fn zero_periods_in_file_are_raised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console_config.json");
        fs::write(
            &path,
            r#"{
                "device_url": "http://192.168.1.40/",
                "status_interval_ms": 0,
                "elapsed_tick_ms": 0,
                "save_max_attempts": 0,
                "save_backoff_ms": 500,
                "save_flash_ms": 3000,
                "request_timeout_ms": 0
            }"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.device_url, "http://192.168.1.40");
        assert_eq!(config.status_interval(), Duration::from_millis(1));
        assert_eq!(config.elapsed_tick(), Duration::from_millis(1));
        assert_eq!(config.retry_policy().max_attempts, 1);
    }

    #[test]
    fn oversized_attempt_count_saturates() {
        env::set_var("RUNOUT_TEST_SAVE_MAX_ATTEMPTS", "8589934592");
        assert_eq!(get_env_var_u32("RUNOUT_TEST_SAVE_MAX_ATTEMPTS", 3), u32::MAX);
        env::set_var("RUNOUT_TEST_SAVE_MAX_ATTEMPTS", "5");
        assert_eq!(get_env_var_u32("RUNOUT_TEST_SAVE_MAX_ATTEMPTS", 3), 5);
        env::remove_var("RUNOUT_TEST_SAVE_MAX_ATTEMPTS");
        assert_eq!(get_env_var_u32("RUNOUT_TEST_SAVE_MAX_ATTEMPTS", 3), 3);
    }
}
