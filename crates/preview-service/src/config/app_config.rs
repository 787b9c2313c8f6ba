//! Runtime application configuration loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use super::defaults::{self, DEFAULT_SETTINGS};
use super::validation::validate_setting;
use super::{ConfigError, SettingInfo};

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub paper_width: u32,
    pub throttle_interval: Duration,
    pub retry_delay: Duration,
    pub font_path: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paper_width: image_processor::PAPER_WIDTH,
            throttle_interval: Duration::from_millis(100),
            retry_delay: Duration::from_millis(250),
            font_path: None,
            log_filter: "info".into(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment, after reading `.env`
    /// if one exists.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from `lookup`, falling back to the defaults for
    /// unset or empty keys. Every value is validated.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let g = |key: &'static str| -> Result<String, ConfigError> {
            let value = lookup(key)
                .filter(|v| !v.trim().is_empty())
                .or_else(|| defaults::get_default(key).map(str::to_string))
                .unwrap_or_default();
            validate_setting(key, &value).map_err(|reason| ConfigError::Invalid { key, reason })?;
            Ok(value)
        };

        let font_path = g("FONT_PATH")?;
        Ok(Self {
            paper_width: parse("PAPER_WIDTH", &g("PAPER_WIDTH")?)?,
            throttle_interval: Duration::from_millis(parse(
                "THROTTLE_INTERVAL_MS",
                &g("THROTTLE_INTERVAL_MS")?,
            )?),
            retry_delay: Duration::from_millis(parse("RETRY_DELAY_MS", &g("RETRY_DELAY_MS")?)?),
            font_path: if font_path.is_empty() {
                None
            } else {
                Some(PathBuf::from(font_path))
            },
            log_filter: g("LOG_FILTER")?,
        })
    }

    /// Effective value of every known setting.
    pub fn settings(&self) -> Vec<SettingInfo> {
        defaults::keys()
            .map(|key| {
                let value = match key {
                    "PAPER_WIDTH" => self.paper_width.to_string(),
                    "THROTTLE_INTERVAL_MS" => self.throttle_interval.as_millis().to_string(),
                    "RETRY_DELAY_MS" => self.retry_delay.as_millis().to_string(),
                    "FONT_PATH" => self
                        .font_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    "LOG_FILTER" => self.log_filter.clone(),
                    _ => String::new(),
                };
                SettingInfo {
                    key: key.to_string(),
                    has_value: !value.is_empty(),
                    value,
                    description: DEFAULT_SETTINGS
                        .get(key)
                        .map(|d| d.description.to_string())
                        .unwrap_or_default(),
                }
            })
            .collect()
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        reason: format!("cannot parse '{value}'"),
    })
}
