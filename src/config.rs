//! Runtime configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `.env` / process environment variables. The result is validated once at
//! load time so the rest of the crate can trust it.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::data::chat::{DEFAULT_CHAT_MODEL, GEMINI_BASE_URL};
use crate::data::donki::{DONKI_BASE_URL, NASA_DEMO_KEY};
use crate::data::satellite::N2YO_BASE_URL;
use crate::data::swpc::SWPC_BASE_URL;
use crate::data::weather::{AQICN_BASE_URL, OPENWEATHER_BASE_URL};
use crate::data::Observer;

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "spacewatch.toml";

/// Default prediction backend
pub const DEFAULT_PREDICTION_URL: &str = "http://localhost:8000";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment variable holds an unparseable value
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// A provider was requested but has no key
    #[error("{0} is not set")]
    MissingKey(&'static str),
}

/// Upstream base URLs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub swpc: String,
    pub donki: String,
    pub n2yo: String,
    pub openweather: String,
    pub aqicn: String,
    pub gemini: String,
    pub prediction: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            swpc: SWPC_BASE_URL.to_string(),
            donki: DONKI_BASE_URL.to_string(),
            n2yo: N2YO_BASE_URL.to_string(),
            openweather: OPENWEATHER_BASE_URL.to_string(),
            aqicn: AQICN_BASE_URL.to_string(),
            gemini: GEMINI_BASE_URL.to_string(),
            prediction: DEFAULT_PREDICTION_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Points every upstream at one base URL, for tests against a mock server
    pub fn all_at(base_url: &str) -> Self {
        Self {
            swpc: base_url.to_string(),
            donki: base_url.to_string(),
            n2yo: base_url.to_string(),
            openweather: base_url.to_string(),
            aqicn: base_url.to_string(),
            gemini: base_url.to_string(),
            prediction: base_url.to_string(),
        }
    }
}

/// Provider credentials
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub nasa: String,
    pub n2yo: Option<String>,
    pub openweather: Option<String>,
    pub aqicn: Option<String>,
    pub gemini: Option<String>,
}

impl Default for ApiKeys {
    fn default() -> Self {
        Self {
            nasa: NASA_DEMO_KEY.to_string(),
            n2yo: None,
            openweather: None,
            aqicn: None,
            gemini: None,
        }
    }
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn mask(key: &Option<String>) -> &'static str {
            if key.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        }
        f.debug_struct("ApiKeys")
            .field("nasa", &if self.uses_demo_key() { NASA_DEMO_KEY } else { "<set>" })
            .field("n2yo", &mask(&self.n2yo))
            .field("openweather", &mask(&self.openweather))
            .field("aqicn", &mask(&self.aqicn))
            .field("gemini", &mask(&self.gemini))
            .finish()
    }
}

impl ApiKeys {
    pub fn uses_demo_key(&self) -> bool {
        self.nasa == NASA_DEMO_KEY
    }
}

/// Request budgets in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub data_ms: u64,
    pub heavy_ms: u64,
    pub probe_first_ms: u64,
    pub probe_retry_ms: u64,
    pub chat_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            data_ms: 10_000,
            heavy_ms: 15_000,
            probe_first_ms: 30_000,
            probe_retry_ms: 10_000,
            chat_ms: 30_000,
        }
    }
}

impl Timeouts {
    pub fn data(&self) -> Duration {
        Duration::from_millis(self.data_ms)
    }

    /// Budget for large payloads such as the aurora grid
    pub fn heavy(&self) -> Duration {
        Duration::from_millis(self.heavy_ms)
    }

    pub fn probe_first(&self) -> Duration {
        Duration::from_millis(self.probe_first_ms)
    }

    pub fn probe_retry(&self) -> Duration {
        Duration::from_millis(self.probe_retry_ms)
    }

    pub fn chat(&self) -> Duration {
        Duration::from_millis(self.chat_ms)
    }
}

/// Cache lifetimes in seconds, per upstream domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    pub swpc_secs: u64,
    pub aurora_secs: u64,
    pub donki_secs: u64,
    pub satellite_secs: u64,
    pub weather_secs: u64,
    pub air_quality_secs: u64,
    pub model_secs: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            swpc_secs: 300,
            aurora_secs: 600,
            donki_secs: 3600,
            satellite_secs: 30,
            weather_secs: 600,
            air_quality_secs: 1800,
            model_secs: 3600,
        }
    }
}

impl CacheTtls {
    pub fn swpc(&self) -> Duration {
        Duration::from_secs(self.swpc_secs)
    }

    pub fn aurora(&self) -> Duration {
        Duration::from_secs(self.aurora_secs)
    }

    pub fn donki(&self) -> Duration {
        Duration::from_secs(self.donki_secs)
    }

    pub fn satellite(&self) -> Duration {
        Duration::from_secs(self.satellite_secs)
    }

    pub fn weather(&self) -> Duration {
        Duration::from_secs(self.weather_secs)
    }

    pub fn air_quality(&self) -> Duration {
        Duration::from_secs(self.air_quality_secs)
    }

    pub fn model(&self) -> Duration {
        Duration::from_secs(self.model_secs)
    }
}

/// Background refresh settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { interval_secs: 180 }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub endpoints: Endpoints,
    pub keys: ApiKeys,
    pub observer: Option<Observer>,
    pub timeouts: Timeouts,
    pub cache_ttls: CacheTtls,
    pub refresh: RefreshConfig,
    pub chat_model: String,
    /// How many days of DONKI catalogs the summary covers
    pub cme_lookback_days: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            keys: ApiKeys::default(),
            observer: None,
            timeouts: Timeouts::default(),
            cache_ttls: CacheTtls::default(),
            refresh: RefreshConfig::default(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            cme_lookback_days: 7,
        }
    }
}

impl AppConfig {
    /// Loads configuration from defaults, a TOML file and the environment
    ///
    /// When `path` is `None`, `spacewatch.toml` in the working directory is
    /// used if it exists. An explicit path that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;

        if config.keys.uses_demo_key() {
            warn!("NASA_API_KEY not set, using the rate-limited DEMO_KEY");
        }
        Ok(config)
    }

    /// Parses a TOML config file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Overrides values from environment variables
    ///
    /// `lookup` abstracts the environment; empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(key) = var("NASA_API_KEY") {
            self.keys.nasa = key;
        }
        if let Some(key) = var("N2YO_API_KEY") {
            self.keys.n2yo = Some(key);
        }
        if let Some(key) = var("OPENWEATHER_API_KEY") {
            self.keys.openweather = Some(key);
        }
        if let Some(token) = var("AQICN_TOKEN") {
            self.keys.aqicn = Some(token);
        }
        if let Some(key) = var("GEMINI_API_KEY") {
            self.keys.gemini = Some(key);
        }
        if let Some(url) = var("SPACEWATCH_PREDICTION_URL") {
            self.endpoints.prediction = url;
        }
        if let Some(secs) = var("SPACEWATCH_REFRESH_SECS") {
            self.refresh.interval_secs = parse_env("SPACEWATCH_REFRESH_SECS", &secs)?;
        }

        let lat = var("SPACEWATCH_OBSERVER_LAT")
            .map(|v| parse_env::<f64>("SPACEWATCH_OBSERVER_LAT", &v))
            .transpose()?;
        let lon = var("SPACEWATCH_OBSERVER_LON")
            .map(|v| parse_env::<f64>("SPACEWATCH_OBSERVER_LON", &v))
            .transpose()?;
        if lat.is_none() && lon.is_none() {
            return Ok(());
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.latitude = lat.unwrap_or(observer.latitude);
            observer.longitude = lon.unwrap_or(observer.longitude);
            return Ok(());
        }
        match (lat, lon) {
            (Some(latitude), Some(longitude)) => {
                self.observer = Some(Observer {
                    latitude,
                    longitude,
                    altitude_m: 0.0,
                });
                Ok(())
            }
            _ => Err(ConfigError::Invalid(
                "SPACEWATCH_OBSERVER_LAT and SPACEWATCH_OBSERVER_LON must be set together".into(),
            )),
        }
    }

    /// Checks ranges; collects every problem into one error
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();

        let timeouts = [
            ("timeouts.data_ms", self.timeouts.data_ms),
            ("timeouts.heavy_ms", self.timeouts.heavy_ms),
            ("timeouts.probe_first_ms", self.timeouts.probe_first_ms),
            ("timeouts.probe_retry_ms", self.timeouts.probe_retry_ms),
            ("timeouts.chat_ms", self.timeouts.chat_ms),
            ("refresh.interval_secs", self.refresh.interval_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                issues.push(format!("{} must be > 0", name));
            }
        }

        if let Some(observer) = &self.observer {
            if !(-90.0..=90.0).contains(&observer.latitude) {
                issues.push(format!("observer.latitude {} is outside [-90, 90]", observer.latitude));
            }
            if !(-180.0..=180.0).contains(&observer.longitude) {
                issues.push(format!(
                    "observer.longitude {} is outside [-180, 180]",
                    observer.longitude
                ));
            }
        }

        if self.cme_lookback_days == 0 || self.cme_lookback_days > 30 {
            issues.push("cme_lookback_days must be between 1 and 30".into());
        }
        if self.keys.nasa.is_empty() {
            issues.push("keys.nasa must not be empty".into());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues.join("; ")))
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.timeouts.data(), Duration::from_secs(10));
        assert_eq!(config.timeouts.heavy(), Duration::from_secs(15));
        assert_eq!(config.timeouts.probe_first(), Duration::from_secs(30));
        assert_eq!(config.timeouts.probe_retry(), Duration::from_secs(10));
        assert_eq!(config.cache_ttls.satellite(), Duration::from_secs(30));
        assert_eq!(config.cache_ttls.weather(), Duration::from_secs(600));
        assert_eq!(config.cache_ttls.air_quality(), Duration::from_secs(1800));
        assert_eq!(config.cache_ttls.donki(), Duration::from_secs(3600));
        assert_eq!(config.refresh.interval(), Duration::from_secs(180));
        assert!(config.keys.uses_demo_key());
        assert!(config.observer.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_overrides() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"
chat_model = "gemini-pro"

[observer]
latitude = 64.84
longitude = -147.72

[timeouts]
data_ms = 2500

[keys]
n2yo = "abc"
"#
        )
        .expect("write config");

        let config = AppConfig::from_file(file.path()).expect("config should load");

        assert_eq!(config.chat_model, "gemini-pro");
        assert_eq!(config.timeouts.data_ms, 2500);
        assert_eq!(config.timeouts.heavy_ms, 15_000);
        assert_eq!(config.keys.n2yo.as_deref(), Some("abc"));
        assert!(config.keys.uses_demo_key());
        let observer = config.observer.expect("observer");
        assert_eq!(observer.altitude_m, 0.0);
        assert_eq!(observer.latitude, 64.84);
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let result = AppConfig::from_file(Path::new("/nonexistent/spacewatch.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_from_file_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "timeouts = [not toml").expect("write config");

        assert!(matches!(AppConfig::from_file(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut config = AppConfig::default();

        config
            .apply_env(env(&[
                ("NASA_API_KEY", "real-key"),
                ("OPENWEATHER_API_KEY", "ow"),
                ("AQICN_TOKEN", "  "),
                ("SPACEWATCH_REFRESH_SECS", "60"),
                ("SPACEWATCH_PREDICTION_URL", "http://ml.internal:9000"),
                ("SPACEWATCH_OBSERVER_LAT", "69.65"),
                ("SPACEWATCH_OBSERVER_LON", "18.96"),
            ]))
            .expect("env should apply");

        assert!(!config.keys.uses_demo_key());
        assert_eq!(config.keys.openweather.as_deref(), Some("ow"));
        assert_eq!(config.keys.aqicn, None);
        assert_eq!(config.refresh.interval_secs, 60);
        assert_eq!(config.endpoints.prediction, "http://ml.internal:9000");
        assert_eq!(config.observer.map(|o| o.latitude), Some(69.65));
    }

    #[test]
    fn test_apply_env_invalid_number() {
        let mut config = AppConfig::default();

        let result = config.apply_env(env(&[("SPACEWATCH_REFRESH_SECS", "soon")]));

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { name: "SPACEWATCH_REFRESH_SECS", .. })
        ));
    }

    #[test]
    fn test_apply_env_half_observer_rejected() {
        let mut config = AppConfig::default();

        let result = config.apply_env(env(&[("SPACEWATCH_OBSERVER_LAT", "45")]));

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_apply_env_half_observer_updates_existing() {
        let mut config = AppConfig {
            observer: Some(Observer {
                latitude: 10.0,
                longitude: 20.0,
                altitude_m: 5.0,
            }),
            ..AppConfig::default()
        };

        config
            .apply_env(env(&[("SPACEWATCH_OBSERVER_LON", "-30")]))
            .expect("env should apply");

        let observer = config.observer.expect("observer");
        assert_eq!((observer.latitude, observer.longitude), (10.0, -30.0));
    }

    #[test]
    fn test_validate_collects_issues() {
        let config = AppConfig {
            observer: Some(Observer {
                latitude: 91.0,
                longitude: 200.0,
                altitude_m: 0.0,
            }),
            timeouts: Timeouts {
                data_ms: 0,
                ..Timeouts::default()
            },
            ..AppConfig::default()
        };

        match config.validate() {
            Err(ConfigError::Invalid(msg)) => {
                assert!(msg.contains("timeouts.data_ms"));
                assert!(msg.contains("latitude"));
                assert!(msg.contains("longitude"));
            }
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn test_api_keys_debug_masks_secrets() {
        let keys = ApiKeys {
            gemini: Some("super-secret".into()),
            ..ApiKeys::default()
        };

        let rendered = format!("{:?}", keys);

        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<set>"));
    }
}
