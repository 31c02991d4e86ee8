//! Preflight verification.
//!
//! Checks the configured sources once before the service is trusted with a
//! schedule: every forecast location is fetched from the weather API and
//! every channel node is read from the store. Nothing is written.

use crate::channels::{self, CHANNEL_REGISTRY, Channel, ForecastLocation};
use crate::features::{self, STALE_AFTER_MINUTES};
use crate::ingest::bmkg::{self, WeatherApi};
use crate::store::TreeStore;
use crate::timestamps;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub location_results: Vec<LocationVerification>,
    pub channel_results: Vec<ChannelVerification>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub locations_total: usize,
    pub locations_working: usize,
    pub locations_failed: usize,
    pub channels_total: usize,
    pub channels_working: usize,
    pub channels_failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationVerification {
    pub name: String,
    pub code: String,
    pub status: VerificationStatus,
    pub api_responsive: bool,
    pub entry_count: usize,
    /// Key of the entry the forecast cycle would write.
    pub next_forecast_key: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelVerification {
    pub channel: String,
    pub path: String,
    pub status: VerificationStatus,
    pub reading_count: usize,
    pub latest_key: Option<String>,
    pub latest_age_minutes: Option<i64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

// ============================================================================
// Weather locations
// ============================================================================

/// Success: entries and a future one. Partial: entries, all in the past.
pub fn verify_location(
    api: &dyn WeatherApi,
    location: &ForecastLocation,
    offset: &FixedOffset,
    now: DateTime<Utc>,
) -> LocationVerification {
    let mut result = LocationVerification {
        name: location.name.clone(),
        code: location.code.clone(),
        status: VerificationStatus::Failed,
        api_responsive: false,
        entry_count: 0,
        next_forecast_key: None,
        error_message: None,
    };

    match api.fetch_entries(&location.code) {
        Ok(entries) => {
            result.api_responsive = true;
            result.entry_count = entries.len();
            match bmkg::select_next(&entries, now) {
                Some(entry) => {
                    result.next_forecast_key = Some(timestamps::format_key(entry.valid_at, offset));
                    result.status = VerificationStatus::Success;
                }
                None if !entries.is_empty() => {
                    result.status = VerificationStatus::PartialSuccess;
                    result.error_message = Some("no entry after current time".to_string());
                }
                None => result.error_message = Some("no forecast entries".to_string()),
            }
        }
        Err(e) => result.error_message = Some(e.to_string()),
    }

    result
}

// ============================================================================
// Store channels
// ============================================================================

/// Success: a reading newer than the staleness limit. Partial: readable but
/// empty or stale.
pub fn verify_channel(
    store: &dyn TreeStore,
    root: &str,
    channel: &Channel,
    offset: &FixedOffset,
    now: DateTime<Utc>,
) -> ChannelVerification {
    let path = channels::channel_path(root, channel);
    let mut result = ChannelVerification {
        channel: channel.name.to_string(),
        path: path.clone(),
        status: VerificationStatus::Failed,
        reading_count: 0,
        latest_key: None,
        latest_age_minutes: None,
        error_message: None,
    };

    let node = match store.get(&path) {
        Ok(node) => node,
        Err(e) => {
            result.error_message = Some(e.to_string());
            return result;
        }
    };

    result.reading_count = node
        .as_ref()
        .and_then(|n| n.as_object())
        .map(|m| m.keys().filter(|k| timestamps::is_key(k)).count())
        .unwrap_or(0);

    match features::latest_entry(node.as_ref()) {
        Some((key, _)) => {
            let age = timestamps::key_age_minutes_at(key, offset, now);
            result.latest_key = Some(key.to_string());
            result.latest_age_minutes = age;
            if age.is_some_and(|a| a <= STALE_AFTER_MINUTES) {
                result.status = VerificationStatus::Success;
            } else {
                result.status = VerificationStatus::PartialSuccess;
                result.error_message = Some(format!("latest reading older than {} minutes", STALE_AFTER_MINUTES));
            }
        }
        None => {
            result.status = VerificationStatus::PartialSuccess;
            result.error_message = Some("no readings recorded".to_string());
        }
    }

    result
}

// ============================================================================
// Full run
// ============================================================================

pub fn run_verification_at(
    api: &dyn WeatherApi,
    store: &dyn TreeStore,
    root: &str,
    locations: &[ForecastLocation],
    offset: &FixedOffset,
    now: DateTime<Utc>,
) -> VerificationReport {
    let mut report = VerificationReport {
        timestamp: now.to_rfc3339(),
        location_results: Vec::new(),
        channel_results: Vec::new(),
        summary: VerificationSummary {
            locations_total: locations.len(),
            channels_total: CHANNEL_REGISTRY.len(),
            ..VerificationSummary::default()
        },
    };

    println!("\nVerifying forecast locations...");
    for location in locations {
        let result = verify_location(api, location, offset, now);
        match result.status {
            VerificationStatus::Success => {
                println!(
                    "  {} ... OK ({} entries, next {})",
                    location.name,
                    result.entry_count,
                    result.next_forecast_key.as_deref().unwrap_or("-")
                );
                report.summary.locations_working += 1;
            }
            VerificationStatus::PartialSuccess => {
                println!("  {} ... PARTIAL: only past entries", location.name);
                report.summary.locations_working += 1;
            }
            VerificationStatus::Failed => {
                println!(
                    "  {} ... FAILED: {}",
                    location.name,
                    result.error_message.as_deref().unwrap_or("Unknown")
                );
                report.summary.locations_failed += 1;
            }
        }
        report.location_results.push(result);
    }

    println!("\nVerifying store channels...");
    for channel in CHANNEL_REGISTRY {
        let result = verify_channel(store, root, channel, offset, now);
        match result.status {
            VerificationStatus::Success => {
                println!("  {} ... OK ({} readings)", channel.name, result.reading_count);
                report.summary.channels_working += 1;
            }
            VerificationStatus::PartialSuccess => {
                println!(
                    "  {} ... PARTIAL: {}",
                    channel.name,
                    result.error_message.as_deref().unwrap_or("Unknown")
                );
                report.summary.channels_working += 1;
            }
            VerificationStatus::Failed => {
                println!(
                    "  {} ... FAILED: {}",
                    channel.name,
                    result.error_message.as_deref().unwrap_or("Unknown")
                );
                report.summary.channels_failed += 1;
            }
        }
        report.channel_results.push(result);
    }

    report
}

pub fn print_summary(report: &VerificationReport) {
    println!("\n===========================================================");
    println!("VERIFICATION SUMMARY");
    println!("===========================================================");
    println!(
        "Forecast locations: {}/{} working  ({} failed)",
        report.summary.locations_working, report.summary.locations_total, report.summary.locations_failed
    );
    println!(
        "Store channels:     {}/{} working  ({} failed)",
        report.summary.channels_working, report.summary.channels_total, report.summary.channels_failed
    );

    let working = report.summary.locations_working + report.summary.channels_working;
    let total = report.summary.locations_total + report.summary.channels_total;
    let success_rate = if total > 0 {
        (working as f64 / total as f64) * 100.0
    } else {
        0.0
    };
    println!("Overall Success Rate: {:.1}% ({}/{})", success_rate, working, total);
    println!("===========================================================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::bmkg::RawForecastEntry;
    use crate::model::FetchFailure;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    struct PastOnly;

    impl WeatherApi for PastOnly {
        fn fetch_entries(&self, code: &str) -> Result<Vec<RawForecastEntry>, FetchFailure> {
            if code == "32.04.12.2003" {
                return Err(FetchFailure::HttpError(503));
            }
            Ok(vec![RawForecastEntry {
                valid_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                precipitation: 0.4,
            }])
        }
    }

    fn wib() -> FixedOffset {
        timestamps::local_offset(7).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 1, 30, 0).unwrap()
    }

    #[test]
    fn test_location_statuses() {
        let locations = channels::default_locations();
        let partial = verify_location(&PastOnly, &locations[0], &wib(), now());
        assert_eq!(partial.status, VerificationStatus::PartialSuccess);
        assert_eq!(partial.entry_count, 1);

        let failed = verify_location(&PastOnly, &locations[1], &wib(), now());
        assert_eq!(failed.status, VerificationStatus::Failed);
        assert!(!failed.api_responsive);
        assert_eq!(failed.error_message.as_deref(), Some("HTTP error: 503"));
    }

    #[test]
    fn test_channel_statuses() {
        let store = MemoryStore::with_tree(json!({"Polder": {
            "TMA_Kolam": {"2025-01-01-08_00_00": 1.2, "error": "x"},
            "TMA_Hilir": {"2025-01-01-05_00_00": 0.8},
        }}));
        store.fail_reads_under("Polder/TMA_Sungai");
        let (_, kolam) = channels::find_channel("TMA_Kolam").unwrap();
        let (_, hilir) = channels::find_channel("TMA_Hilir").unwrap();
        let (_, sungai) = channels::find_channel("TMA_Sungai").unwrap();

        let ok = verify_channel(&store, "Polder", kolam, &wib(), now());
        assert_eq!(ok.status, VerificationStatus::Success);
        assert_eq!(ok.reading_count, 1);
        assert_eq!(ok.latest_age_minutes, Some(30));

        let stale = verify_channel(&store, "Polder", hilir, &wib(), now());
        assert_eq!(stale.status, VerificationStatus::PartialSuccess);

        let failed = verify_channel(&store, "Polder", sungai, &wib(), now());
        assert_eq!(failed.status, VerificationStatus::Failed);
    }

    #[test]
    fn test_report_summary_counts() {
        let store = MemoryStore::new();
        let report = run_verification_at(
            &PastOnly,
            &store,
            "Polder",
            &channels::default_locations(),
            &wib(),
            now(),
        );
        assert_eq!(report.summary.locations_total, 2);
        assert_eq!(report.summary.locations_working, 1);
        assert_eq!(report.summary.locations_failed, 1);
        assert_eq!(report.summary.channels_total, 8);
        assert_eq!(report.summary.channels_working, 8);
        assert!(serde_json::to_string(&report).is_ok());
    }
}
