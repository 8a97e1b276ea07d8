use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::atomic;
use crate::error::{Error, Result};
use crate::geocode::cache::DEFAULT_PRECISION;
use crate::geocode::nominatim::DEFAULT_ENDPOINT;
use crate::geocode::RetryPolicy;
use crate::grouping::GroupMode;

pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Highest quantization precision accepted; 10^9 still fits comfortably in an i64 key.
pub const MAX_PRECISION: u32 = 9;

/// User-tunable options, persisted as JSON. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Clustering threshold in meters.
    pub cluster_distance_m: f64,
    pub group_mode: GroupMode,
    pub user_agent: String,
    /// Minimum spacing between geocoding requests.
    pub rate_limit_ms: u64,
    /// Decimal places kept when quantizing coordinates for the geocode cache.
    pub geocode_precision: u32,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub endpoint: String,
    pub language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cluster_distance_m: 1000.0,
            group_mode: GroupMode::Folder,
            user_agent: format!("PhotoMap/{} (photomap-cli)", env!("CARGO_PKG_VERSION")),
            rate_limit_ms: 1100,
            geocode_precision: DEFAULT_PRECISION,
            max_attempts: 3,
            backoff_ms: 2000,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            language: "en".to_string(),
        }
    }
}

/// Setting names accepted by [`Settings::set`], in display order.
pub const KEYS: &[&str] = &[
    "cluster_distance_m",
    "group_mode",
    "user_agent",
    "rate_limit_ms",
    "geocode_precision",
    "max_attempts",
    "backoff_ms",
    "endpoint",
    "language",
];

impl Settings {
    /// Read settings from `path`; defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let settings: Settings = serde_json::from_slice(&bytes)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        atomic::write_bytes(path, &serde_json::to_vec_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.cluster_distance_m.is_finite() && self.cluster_distance_m > 0.0) {
            return Err(invalid("cluster_distance_m", "must be a positive number of meters"));
        }
        if self.user_agent.trim().is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }
        if self.geocode_precision > MAX_PRECISION {
            return Err(invalid(
                "geocode_precision",
                &format!("must be at most {MAX_PRECISION}"),
            ));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(invalid("endpoint", "must be an http(s) URL"));
        }
        if self.language.trim().is_empty() {
            return Err(invalid("language", "must not be empty"));
        }
        Ok(())
    }

    /// Update one field from its textual form. The change is validated; on error
    /// `self` is left untouched.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        let value = value.trim();
        match key {
            "cluster_distance_m" => next.cluster_distance_m = parse(key, value)?,
            "group_mode" => {
                next.group_mode = value
                    .parse()
                    .map_err(|message: String| invalid(key, &message))?
            }
            "user_agent" => next.user_agent = value.to_string(),
            "rate_limit_ms" => next.rate_limit_ms = parse(key, value)?,
            "geocode_precision" => next.geocode_precision = parse(key, value)?,
            "max_attempts" => next.max_attempts = parse(key, value)?,
            "backoff_ms" => next.backoff_ms = parse(key, value)?,
            "endpoint" => next.endpoint = value.to_string(),
            "language" => next.language = value.to_string(),
            other => return Err(Error::UnknownSetting(other.to_string())),
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Current value of `key` in the form accepted by [`Settings::set`].
    pub fn get(&self, key: &str) -> Result<String> {
        Ok(match key {
            "cluster_distance_m" => self.cluster_distance_m.to_string(),
            "group_mode" => self.group_mode.to_string(),
            "user_agent" => self.user_agent.clone(),
            "rate_limit_ms" => self.rate_limit_ms.to_string(),
            "geocode_precision" => self.geocode_precision.to_string(),
            "max_attempts" => self.max_attempts.to_string(),
            "backoff_ms" => self.backoff_ms.to_string(),
            "endpoint" => self.endpoint.clone(),
            "language" => self.language.clone(),
            other => return Err(Error::UnknownSetting(other.to_string())),
        })
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

fn invalid(key: &str, message: &str) -> Error {
    Error::InvalidSetting {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| invalid(key, &format!("cannot parse `{value}`")))
}
