/// Service configuration.
///
/// Loaded from a TOML file (default `polder.toml`, or the path in
/// `POLDER_CONFIG`). Every section has defaults, so a missing file gives a
/// working configuration. Secrets never live in the file: the store auth
/// token and the audit database URL are read from environment variables
/// (after `.env` is loaded) whose names the file can override.

use crate::channels::{self, ForecastLocation};
use crate::ingest::bmkg::BMKG_FORECAST_URL;
use crate::logging::LogLevel;
use crate::timestamps;
use chrono::FixedOffset;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "polder.toml";
pub const CONFIG_PATH_ENV: &str = "POLDER_CONFIG";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "malformed config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub weather: WeatherConfig,
    pub model: ModelConfig,
    pub schedule: ScheduleConfig,
    pub time: TimeConfig,
    pub on_demand: OnDemandConfig,
    pub logging: LoggingConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub base_url: String,
    /// Node under which every series lives.
    pub root: String,
    pub timeout_secs: u64,
    /// Environment variable holding the database auth token.
    pub auth_token_env: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            base_url: "https://floody-252ef-default-rtdb.asia-southeast1.firebasedatabase.app".to_string(),
            root: "Polder".to_string(),
            timeout_secs: 10,
            auth_token_env: "FIREBASE_AUTH".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub locations: Vec<ForecastLocation>,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        WeatherConfig {
            base_url: BMKG_FORECAST_URL.to_string(),
            timeout_secs: 10,
            locations: channels::default_locations(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            path: PathBuf::from("model/polder_model.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub prediction_interval_minutes: u64,
    pub prediction_misfire_grace_secs: u64,
    pub forecast_interval_minutes: u64,
    pub forecast_misfire_grace_secs: u64,
    /// Fire both jobs at startup instead of one interval later.
    pub run_on_start: bool,
    /// Let in-flight runs finish at shutdown.
    pub wait_on_shutdown: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            prediction_interval_minutes: 5,
            prediction_misfire_grace_secs: 120,
            forecast_interval_minutes: 5,
            forecast_misfire_grace_secs: 1,
            run_on_start: false,
            wait_on_shutdown: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Offset of local time from UTC; WIB (Asia/Jakarta) is +7 with no DST.
    pub utc_offset_hours: i32,
}

impl Default for TimeConfig {
    fn default() -> Self {
        TimeConfig { utc_offset_hours: 7 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OnDemandConfig {
    /// Persist decisions computed from caller-supplied overrides.
    pub persist_overrides: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file: Option<String>,
    pub console_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            file: None,
            console_timestamps: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub database_url_env: String,
    /// Bounds the connection attempt and every statement.
    pub timeout_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            enabled: false,
            database_url_env: "DATABASE_URL".to_string(),
            timeout_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`; a missing file yields the validated defaults.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Path from `POLDER_CONFIG`, else `polder.toml`.
    pub fn default_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.schedule.prediction_interval_minutes == 0 {
            return invalid("schedule.prediction_interval_minutes must be at least 1".into());
        }
        if self.schedule.forecast_interval_minutes == 0 {
            return invalid("schedule.forecast_interval_minutes must be at least 1".into());
        }
        if self.store.timeout_secs == 0 || self.weather.timeout_secs == 0 || self.audit.timeout_secs == 0 {
            return invalid("timeouts must be at least 1 second".into());
        }
        if self.store.root.trim_matches('/').is_empty() {
            return invalid("store.root must not be empty".into());
        }
        if self.utc_offset().is_none() || self.time.utc_offset_hours.abs() > 14 {
            return invalid(format!(
                "time.utc_offset_hours {} is not a valid offset",
                self.time.utc_offset_hours
            ));
        }

        let mut seen = HashSet::new();
        for location in &self.weather.locations {
            if location.name.trim().is_empty() {
                return invalid("weather location name must not be empty".into());
            }
            if location.name.contains('/') {
                return invalid(format!("weather location '{}' must not contain '/'", location.name));
            }
            if !seen.insert(location.name.as_str()) {
                return invalid(format!("duplicate weather location '{}'", location.name));
            }
            if !channels::is_valid_adm4_code(&location.code) {
                return invalid(format!(
                    "weather location '{}' has malformed adm4 code '{}'",
                    location.name, location.code
                ));
            }
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> Option<FixedOffset> {
        timestamps::local_offset(self.time.utc_offset_hours)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store.timeout_secs)
    }

    pub fn weather_timeout(&self) -> Duration {
        Duration::from_secs(self.weather.timeout_secs)
    }

    pub fn audit_timeout(&self) -> Duration {
        Duration::from_secs(self.audit.timeout_secs)
    }

    /// The store auth token from the environment, if set.
    pub fn store_auth_token(&self) -> Option<String> {
        std::env::var(&self.store.auth_token_env)
            .ok()
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = Config::from_toml_str("").expect("defaults are valid");
        assert_eq!(config.store.root, "Polder");
        assert_eq!(config.schedule.prediction_interval_minutes, 5);
        assert_eq!(config.schedule.prediction_misfire_grace_secs, 120);
        assert_eq!(config.schedule.forecast_misfire_grace_secs, 1);
        assert_eq!(config.time.utc_offset_hours, 7);
        assert!(!config.on_demand.persist_overrides);
        assert!(!config.audit.enabled);
        assert_eq!(config.audit_timeout(), Duration::from_secs(5));
        assert_eq!(config.weather.locations.len(), 2);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let text = r#"
            [schedule]
            prediction_interval_minutes = 10

            [on_demand]
            persist_overrides = true

            [logging]
            level = "warn"

            [[weather.locations]]
            name = "bojongsoang"
            code = "32.04.08.2002"
        "#;
        let config = Config::from_toml_str(text).unwrap();
        assert_eq!(config.schedule.prediction_interval_minutes, 10);
        assert_eq!(config.schedule.forecast_interval_minutes, 5);
        assert!(config.on_demand.persist_overrides);
        assert_eq!(config.logging.level, LogLevel::Warning);
        assert_eq!(config.weather.locations.len(), 1);
        assert_eq!(config.weather.locations[0].code, "32.04.08.2002");
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = Config::from_toml_str("[schedule]\nforecast_interval_minutes = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_audit_timeout_is_rejected() {
        let err = Config::from_toml_str("[audit]\nenabled = true\ntimeout_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let config = Config::from_toml_str("[audit]\ntimeout_secs = 2").unwrap();
        assert_eq!(config.audit_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_duplicate_locations_are_rejected() {
        let text = r#"
            [[weather.locations]]
            name = "bojongsoang"
            code = "32.04.12.2002"
            [[weather.locations]]
            name = "bojongsoang"
            code = "32.04.12.2003"
        "#;
        assert!(Config::from_toml_str(text).is_err());
    }

    #[test]
    fn test_bad_offset_and_code_are_rejected() {
        assert!(Config::from_toml_str("[time]\nutc_offset_hours = 20").is_err());
        let text = "[[weather.locations]]\nname = \"x\"\ncode = \"32-04\"";
        assert!(Config::from_toml_str(text).is_err());
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        assert!(matches!(
            Config::from_toml_str("[schedule\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.store.timeout_secs, 10);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("polder.toml");
        let config = Config::load(&path).expect("shipped polder.toml should be valid");
        let defaults = Config::default();
        assert_eq!(config.store.base_url, defaults.store.base_url);
        assert_eq!(config.weather.locations, defaults.weather.locations);
        assert_eq!(config.model.path, defaults.model.path);
        assert_eq!(config.logging.level, defaults.logging.level);
        assert_eq!(config.audit.timeout_secs, defaults.audit.timeout_secs);
    }

    #[test]
    fn test_load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store]\nroot = \"PolderTest\"\ntimeout_secs = 3").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.store.root, "PolderTest");
        assert_eq!(config.store_timeout(), Duration::from_secs(3));
    }
}
