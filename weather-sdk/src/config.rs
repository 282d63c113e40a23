use anyhow::{Context, Result, anyhow, ensure};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

pub const DEFAULT_BASE_URL: &str = "https://openweathermap.org/api";

/// Tuning knobs shared by every client a [`Registry`](crate::Registry) creates.
///
/// Example TOML (every key optional):
/// ```toml
/// base_url = "https://openweathermap.org/api"
/// ttl_ms = 600000
/// capacity = 10
/// poll_interval_ms = 600000
/// request_timeout_ms = 10000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Upstream endpoint; requests go to `{base_url}/{location}/{credential}`.
    pub base_url: String,

    /// How long a cached record stays relevant.
    pub ttl_ms: u64,

    /// Maximum number of locations cached per client.
    pub capacity: usize,

    /// Period of the background refresher in polling mode.
    pub poll_interval_ms: u64,

    pub request_timeout_ms: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ttl_ms: 10 * 60 * 1000,
            capacity: 10,
            poll_interval_ms: 10 * 60 * 1000,
            request_timeout_ms: 10_000,
        }
    }
}

impl SdkConfig {
    /// Load config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let cfg: SdkConfig = toml::from_str(contents).context("Invalid configuration TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check that the values can actually drive a client.
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;

        ensure!(self.capacity > 0, "Cache capacity must be greater than zero");
        ensure!(self.ttl_ms > 0, "Cache TTL must be greater than zero");
        ensure!(self.poll_interval_ms > 0, "Poll interval must be greater than zero");

        Ok(())
    }

    /// Parsed upstream endpoint.
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base URL '{}'", self.base_url))?;

        if url.cannot_be_a_base() {
            return Err(anyhow!("Base URL '{}' cannot carry path segments", self.base_url));
        }

        Ok(url)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_ten_minute_window() {
        let cfg = SdkConfig::default();

        assert_eq!(cfg.ttl(), Duration::from_secs(600));
        assert_eq!(cfg.poll_interval(), Duration::from_secs(600));
        assert_eq!(cfg.capacity, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = SdkConfig::from_toml_str("capacity = 3\nttl_ms = 500\n").expect("valid config");

        assert_eq!(cfg.capacity, 3);
        assert_eq!(cfg.ttl(), Duration::from_millis(500));
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = SdkConfig::from_toml_str("capacity = 0").unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn rejects_unusable_base_url() {
        let cfg = SdkConfig { base_url: "mailto:someone@example.com".into(), ..Default::default() };
        let err = cfg.validate().unwrap_err();

        assert!(err.to_string().contains("cannot carry path segments"));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "base_url = \"http://localhost:8080/api\"").expect("write config");

        let cfg = SdkConfig::load(file.path()).expect("config should load");
        assert_eq!(cfg.base_url, "http://localhost:8080/api");
    }

    #[test]
    fn load_missing_file_names_path() {
        let err = SdkConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
