/// Structured logging for the polder flood-control service
///
/// Provides context-rich logging with component and subject identifiers
/// (channel, location, job id), timestamps, and severity levels. Supports
/// both console output and file-based logging for daemon operations.

use crate::model::FetchFailure;
use crate::store::StoreError;
use chrono::Utc;
use serde::Deserialize;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    Store,
    Bmkg,
    Model,
    Scheduler,
    Pipeline,
    Audit,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Store => write!(f, "STORE"),
            Component::Bmkg => write!(f, "BMKG"),
            Component::Model => write!(f, "MODEL"),
            Component::Scheduler => write!(f, "SCHED"),
            Component::Pipeline => write!(f, "PIPE"),
            Component::Audit => write!(f, "AUDIT"),
            Component::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Unexpected failure - indicates service degradation or configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, component: &Component, subject: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let entry = format_entry(&timestamp, level, component, subject, message);
        let subject_part = subject.map(|s| format!(" [{}]", s)).unwrap_or_default();

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", component, subject_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", component, subject_part, message),
                LogLevel::Info => println!("   {}{}: {}", component, subject_part, message),
                LogLevel::Debug => println!("   [DEBUG] {}{}: {}", component, subject_part, message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

/// One log line: `<timestamp> <LEVEL> <COMPONENT>[ [subject]]: <message>`.
pub fn format_entry(
    timestamp: &str,
    level: LogLevel,
    component: &Component,
    subject: Option<&str>,
    message: &str,
) -> String {
    let subject_part = subject.map(|s| format!(" [{}]", s)).unwrap_or_default();
    format!("{} {} {}{}: {}", timestamp, level, component, subject_part, message)
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, component: Component, subject: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, &component, subject, message);
        }
    }
}

/// Log a general informational message
pub fn info(component: Component, subject: Option<&str>, message: &str) {
    emit(LogLevel::Info, component, subject, message);
}

/// Log a warning message
pub fn warn(component: Component, subject: Option<&str>, message: &str) {
    emit(LogLevel::Warning, component, subject, message);
}

/// Log an error message
pub fn error(component: Component, subject: Option<&str>, message: &str) {
    emit(LogLevel::Error, component, subject, message);
}

/// Log a debug message
pub fn debug(component: Component, subject: Option<&str>, message: &str) {
    emit(LogLevel::Debug, component, subject, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a BMKG forecast failure
pub fn classify_bmkg_failure(failure: &FetchFailure) -> FailureType {
    match failure {
        FetchFailure::HttpError(_) | FetchFailure::Timeout | FetchFailure::Transport(_) => {
            FailureType::Unexpected
        }
        // Parse errors suggest an API change
        FetchFailure::ParseError(_) => FailureType::Unexpected,
        // Empty payload or a forecast horizon that ran out
        FetchFailure::NoForecastData | FetchFailure::NoFutureEntry => FailureType::Unknown,
    }
}

/// Classify a store failure. Every store failure means the tree could not
/// be read or written as asked.
pub fn classify_store_failure(err: &StoreError) -> FailureType {
    match err {
        StoreError::HttpError(_)
        | StoreError::Timeout
        | StoreError::Unavailable(_)
        | StoreError::ParseError(_) => FailureType::Unexpected,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

fn log_classified(component: Component, subject: &str, failure_type: FailureType, message: &str) {
    match failure_type {
        FailureType::Unexpected => error(component, Some(subject), message),
        FailureType::Unknown => warn(component, Some(subject), message),
    }
}

/// Log a forecast fetch failure with automatic classification
pub fn log_bmkg_failure(location: &str, operation: &str, failure: &FetchFailure) {
    let failure_type = classify_bmkg_failure(failure);
    let message = format!("{} failed [{}]: {}", operation, failure_type, failure);
    log_classified(Component::Bmkg, location, failure_type, &message);
}

/// Log a store failure with classification
pub fn log_store_failure(path: &str, operation: &str, err: &StoreError) {
    let failure_type = classify_store_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);
    log_classified(Component::Store, path, failure_type, &message);
}

// ---------------------------------------------------------------------------
// Cycle Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a forecast cycle
pub fn log_cycle_summary(component: Component, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "Cycle complete: {}/{} locations updated, {} unavailable",
        successful, total, failed
    );

    if failed == 0 {
        info(component, None, &message);
    } else if successful == 0 {
        error(component, None, &message);
    } else {
        warn(component, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parses_from_config_strings() {
        #[derive(Deserialize)]
        struct Wrapper {
            level: LogLevel,
        }
        let w: Wrapper = toml::from_str("level = \"warn\"").unwrap();
        assert_eq!(w.level, LogLevel::Warning);
        let w: Wrapper = toml::from_str("level = \"debug\"").unwrap();
        assert_eq!(w.level, LogLevel::Debug);
    }

    #[test]
    fn test_bmkg_failure_classification() {
        assert_eq!(classify_bmkg_failure(&FetchFailure::HttpError(503)), FailureType::Unexpected);
        assert_eq!(classify_bmkg_failure(&FetchFailure::Timeout), FailureType::Unexpected);
        assert_eq!(
            classify_bmkg_failure(&FetchFailure::ParseError("expected value".into())),
            FailureType::Unexpected
        );
        assert_eq!(classify_bmkg_failure(&FetchFailure::NoFutureEntry), FailureType::Unknown);
        assert_eq!(classify_bmkg_failure(&FetchFailure::NoForecastData), FailureType::Unknown);
    }

    #[test]
    fn test_store_failure_classification() {
        assert_eq!(classify_store_failure(&StoreError::HttpError(401)), FailureType::Unexpected);
        assert_eq!(classify_store_failure(&StoreError::HttpError(500)), FailureType::Unexpected);
        assert_eq!(classify_store_failure(&StoreError::Timeout), FailureType::Unexpected);
        assert_eq!(
            classify_store_failure(&StoreError::ParseError("trailing characters".into())),
            FailureType::Unexpected
        );
        assert_eq!(
            classify_store_failure(&StoreError::Unavailable("connection refused".into())),
            FailureType::Unexpected
        );
    }

    #[test]
    fn test_entry_format_includes_subject_once() {
        let line = format_entry(
            "2025-01-01 00:00:00 UTC",
            LogLevel::Warning,
            &Component::Bmkg,
            Some("bojongsoang"),
            "fetch failed",
        );
        assert_eq!(line, "2025-01-01 00:00:00 UTC WARN BMKG [bojongsoang]: fetch failed");
    }
}
