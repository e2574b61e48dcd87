#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Monitor configuration loaded from a TOML file.
//!
//! Loading runs in four steps: the file is parsed into a raw table, the
//! table is brought to [`CURRENT_VERSION`] by [`migration::migrate`], the
//! result is deserialized with defaults filled in, and the
//! [`API_KEY_ENV`] override is applied before [`Config::validate`].

pub mod migration;

use std::path::{Path, PathBuf};
use std::str::FromStr as _;
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;
use taiwan_aqm_source::retry::RetryPolicy;
use taiwan_aqm_source::site::SiteFormat;
use taiwan_aqm_source::{micro_sensor, site};

/// Config layout version produced by this build.
pub const CURRENT_VERSION: i64 = 2;

/// File read when no path is given.
pub const DEFAULT_PATH: &str = "taiwan_aqm.toml";

/// Environment variable that overrides `api_key`.
pub const API_KEY_ENV: &str = "TAIWAN_AQM_API_KEY";

/// Errors from loading or validating a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config migration failed: {0}")]
    Migration(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: i64,
    /// Station feed key. Required only when `sites` is non-empty.
    pub api_key: String,
    /// Fixed-station ids to keep.
    pub sites: Vec<String>,
    /// Micro sensor business station ids to keep.
    pub micro_sensors: Vec<String>,
    pub accept_invalid_certs: bool,
    /// Offset used to render observation times, e.g. `+08:00`.
    pub utc_offset: String,
    pub site_feed: SiteFeedConfig,
    pub micro_feed: MicroFeedConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            api_key: String::new(),
            sites: Vec::new(),
            micro_sensors: Vec::new(),
            accept_invalid_certs: true,
            utc_offset: "+08:00".to_owned(),
            site_feed: SiteFeedConfig::default(),
            micro_feed: MicroFeedConfig::default(),
        }
    }
}

/// `[site_feed]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SiteFeedConfig {
    pub url: String,
    pub format: SiteFormat,
    pub timeout_secs: u64,
    pub schedule: ScheduleConfig,
    pub retry: RetryConfig,
}

impl Default for SiteFeedConfig {
    fn default() -> Self {
        Self {
            url: site::DEFAULT_URL.to_owned(),
            format: SiteFormat::Csv,
            timeout_secs: 15,
            schedule: ScheduleConfig::EverySecs(11 * 60),
            retry: RetryConfig::from(RetryPolicy::SITE),
        }
    }
}

/// `[micro_feed]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MicroFeedConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub schedule: ScheduleConfig,
    pub retry: RetryConfig,
}

impl Default for MicroFeedConfig {
    fn default() -> Self {
        Self {
            url: micro_sensor::DEFAULT_URL.to_owned(),
            timeout_secs: 15,
            schedule: ScheduleConfig::EverySecs(2 * 60),
            retry: RetryConfig::from(RetryPolicy::MICRO_SENSOR),
        }
    }
}

/// When a feed refreshes after its first fetch.
///
/// Written as `{ every_secs = 660 }` or `{ hourly_at_minute = 15 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleConfig {
    /// Rolling interval measured from the previous refresh.
    EverySecs(u64),
    /// Once an hour at this minute past the hour.
    HourlyAtMinute(u32),
}

/// Retry bound and jitter range of one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(RetryPolicy::default())
    }
}

impl From<RetryPolicy> for RetryConfig {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            jitter_min_ms: u64::try_from(policy.jitter_min.as_millis()).unwrap_or(u64::MAX),
            jitter_max_ms: u64::try_from(policy.jitter_max.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            jitter_min: Duration::from_millis(self.jitter_min_ms),
            jitter_max: Duration::from_millis(self.jitter_max_ms),
        }
    }

    fn validate(&self, feed: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(format!(
                "{feed}.retry.max_attempts must be at least 1"
            )));
        }
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(ConfigError::Invalid(format!(
                "{feed}.retry.jitter_min_ms ({}) exceeds jitter_max_ms ({})",
                self.jitter_min_ms, self.jitter_max_ms
            )));
        }
        Ok(())
    }
}

impl ScheduleConfig {
    fn validate(self, feed: &str) -> Result<(), ConfigError> {
        match self {
            Self::EverySecs(0) => Err(ConfigError::Invalid(format!(
                "{feed}.schedule.every_secs must be positive"
            ))),
            Self::HourlyAtMinute(minute) if minute > 59 => Err(ConfigError::Invalid(format!(
                "{feed}.schedule.hourly_at_minute must be 0-59, got {minute}"
            ))),
            Self::EverySecs(_) | Self::HourlyAtMinute(_) => Ok(()),
        }
    }
}

fn validate_timeout(feed: &str, secs: u64) -> Result<(), ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Invalid(format!(
            "{feed}.timeout_secs must be positive"
        )));
    }
    Ok(())
}

impl Config {
    /// Parses, migrates, and deserializes a config document.
    ///
    /// Does not apply environment overrides or validate.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Toml`] if the text is not a valid document.
    /// * [`ConfigError::Migration`] if the version cannot be migrated.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table = text.parse::<toml::Table>()?;
        let table = migration::migrate(table)?;
        Ok(toml::Value::Table(table).try_into()?)
    }

    /// Applies environment overrides looked up through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var(API_KEY_ENV)
            && !key.trim().is_empty()
        {
            log::debug!("Using api_key from {API_KEY_ENV}");
            self.api_key = key.trim().to_owned();
        }
    }

    /// Checks value ranges and cross-field requirements.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sites.is_empty() && self.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "api_key is required when sites are configured (or set {API_KEY_ENV})"
            )));
        }
        if self.sites.iter().chain(&self.micro_sensors).any(|id| id.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "station ids must not be blank".to_owned(),
            ));
        }

        self.offset()?;

        validate_timeout("site_feed", self.site_feed.timeout_secs)?;
        self.site_feed.schedule.validate("site_feed")?;
        self.site_feed.retry.validate("site_feed")?;

        validate_timeout("micro_feed", self.micro_feed.timeout_secs)?;
        self.micro_feed.schedule.validate("micro_feed")?;
        self.micro_feed.retry.validate("micro_feed")?;

        Ok(())
    }

    /// Parses [`Config::utc_offset`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if it is not of the form `+HH:MM`.
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::from_str(&self.utc_offset).map_err(|e| {
            ConfigError::Invalid(format!("utc_offset {:?}: {e}", self.utc_offset))
        })
    }

    /// Returns `true` if either feed has anything to poll.
    #[must_use]
    pub fn has_stations(&self) -> bool {
        !self.sites.is_empty() || !self.micro_sensors.is_empty()
    }
}

/// Reads and validates the config at `path`, applying process
/// environment overrides.
///
/// # Errors
///
/// * [`ConfigError::Io`] if the file cannot be read.
/// * Any error of [`Config::from_toml_str`] or [`Config::validate`].
pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut config = Config::from_toml_str(&text)?;
    config.apply_overrides(|name| std::env::var(name).ok());
    config.validate()?;

    log::info!(
        "Loaded {}: {} sites, {} micro sensors",
        path.display(),
        config.sites.len(),
        config.micro_sensors.len()
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        version = 2
        api_key = "k"
        sites = ["1", "12"]
        micro_sensors = ["10287843"]
        accept_invalid_certs = false
        utc_offset = "+09:00"

        [site_feed]
        url = "http://localhost/aqx"
        format = "json"
        timeout_secs = 20
        schedule = { hourly_at_minute = 15 }
        retry = { max_attempts = 3, jitter_min_ms = 0, jitter_max_ms = 10 }

        [micro_feed]
        schedule = { every_secs = 60 }
    "#;

    #[test]
    fn parses_full_document() {
        let config = Config::from_toml_str(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.sites, vec!["1", "12"]);
        assert!(!config.accept_invalid_certs);
        assert_eq!(config.site_feed.format, SiteFormat::Json);
        assert_eq!(config.site_feed.schedule, ScheduleConfig::HourlyAtMinute(15));
        assert_eq!(config.site_feed.retry.policy().max_attempts, 3);
        assert_eq!(config.micro_feed.schedule, ScheduleConfig::EverySecs(60));
        assert_eq!(config.micro_feed.retry, RetryConfig::from(RetryPolicy::MICRO_SENSOR));
        assert_eq!(config.offset().unwrap().local_minus_utc(), 9 * 3600);
    }

    #[test]
    fn empty_document_uses_upstream_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.site_feed.schedule, ScheduleConfig::EverySecs(660));
        assert_eq!(config.site_feed.retry.policy(), RetryPolicy::SITE);
        assert_eq!(config.micro_feed.schedule, ScheduleConfig::EverySecs(120));
        assert_eq!(config.offset().unwrap().local_minus_utc(), 8 * 3600);
        assert!(config.validate().is_ok());
        assert!(!config.has_stations());
    }

    #[test]
    fn env_override_replaces_api_key() {
        let mut config = Config::from_toml_str("sites = [\"1\"]").unwrap();
        assert!(config.validate().is_err());

        config.apply_overrides(|name| (name == API_KEY_ENV).then(|| " from-env ".to_owned()));
        assert_eq!(config.api_key, "from-env");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn blank_override_is_ignored() {
        let mut config = Config::from_toml_str("api_key = \"file\"").unwrap();
        config.apply_overrides(|_| Some("   ".to_owned()));
        assert_eq!(config.api_key, "file");
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cases = [
            "[site_feed]\nretry = { max_attempts = 0 }",
            "[micro_feed]\nretry = { jitter_min_ms = 5, jitter_max_ms = 1 }",
            "[site_feed]\nschedule = { hourly_at_minute = 60 }",
            "[micro_feed]\nschedule = { every_secs = 0 }",
            "[site_feed]\ntimeout_secs = 0",
            "utc_offset = \"Asia/Taipei\"",
            "micro_sensors = [\"\"]",
        ];
        for case in cases {
            let config = Config::from_toml_str(case).unwrap();
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "accepted: {case}"
            );
        }
    }

    #[test]
    fn unknown_format_is_a_toml_error() {
        assert!(matches!(
            Config::from_toml_str("[site_feed]\nformat = \"xml\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let path = std::env::temp_dir().join("taiwan_aqm_missing_config.toml");
        assert!(matches!(load(&path), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn load_reads_and_validates_file() {
        let path = std::env::temp_dir().join(format!(
            "taiwan_aqm_config_test_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "micro_sensors = [\"10287843\"]\n").unwrap();
        let config = load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.micro_sensors, vec!["10287843"]);
    }
}
