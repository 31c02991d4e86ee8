/// Latest-value resolution and feature assembly.
///
/// Sensor nodes in the store are sparse maps of timestamp key → reading. The
/// resolver picks the reading at the greatest key; the assembler runs it over
/// every channel of `channels::CHANNEL_REGISTRY` and emits the values in the
/// registry's column order.
///
/// Missing data is not an error at this layer: an absent node, an empty node,
/// or a node that is not a map all resolve to `0.0`. Callers cannot tell
/// "no data yet" from "reading was zero".

use crate::channels::{self, CHANNEL_REGISTRY};
use crate::logging::{self, Component};
use crate::model::{FeatureVector, PipelineError};
use crate::store::TreeStore;
use crate::timestamps;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;
use std::collections::HashMap;

/// Readings older than this are used but logged as stale.
pub const STALE_AFTER_MINUTES: i64 = 60;

// ---------------------------------------------------------------------------
// Latest-value resolver
// ---------------------------------------------------------------------------

/// Key and value of the most recent reading in a sensor node, if any.
///
/// Only keys in the `YYYY-MM-DD-HH_MM_SS` shape take part; anything else
/// (the forecast `error` marker, stray children) would otherwise win the
/// lexicographic comparison.
pub fn latest_entry(node: Option<&Value>) -> Option<(&str, f64)> {
    let map = node?.as_object()?;
    let (key, value) = map
        .iter()
        .filter(|(k, _)| timestamps::is_key(k))
        .max_by(|a, b| a.0.cmp(b.0))?;
    Some((key.as_str(), scalar(value)))
}

/// The reading at the greatest timestamp key, or `0.0`.
pub fn latest_value(node: Option<&Value>) -> f64 {
    latest_entry(node).map(|(_, v)| v).unwrap_or(0.0)
}

/// Numeric readings pass through; numeric strings are parsed (some loggers
/// write them quoted); everything else counts as absent.
fn scalar(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Feature assembler
// ---------------------------------------------------------------------------

/// Builds feature vectors in the fixed channel order.
pub struct FeatureAssembler<'a> {
    store: &'a dyn TreeStore,
    root: &'a str,
    offset: FixedOffset,
}

impl<'a> FeatureAssembler<'a> {
    pub fn new(store: &'a dyn TreeStore, root: &'a str, offset: FixedOffset) -> Self {
        FeatureAssembler { store, root, offset }
    }

    /// Resolved mode: reads every channel's node and takes its latest value.
    ///
    /// A failed read aborts assembly; an absent node does not.
    pub fn resolve(&self) -> Result<FeatureVector, PipelineError> {
        self.resolve_at(Utc::now())
    }

    /// Resolved mode with an injected clock for the staleness check.
    pub fn resolve_at(&self, now: DateTime<Utc>) -> Result<FeatureVector, PipelineError> {
        let mut values = Vec::with_capacity(CHANNEL_REGISTRY.len());

        for channel in CHANNEL_REGISTRY {
            let path = channels::channel_path(self.root, channel);
            let node = self.store.get(&path).map_err(|e| {
                logging::log_store_failure(&path, "channel read", &e);
                PipelineError::StoreReadFailure {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?;

            match latest_entry(node.as_ref()) {
                Some((key, value)) => {
                    if let Some(age) = timestamps::key_age_minutes_at(key, &self.offset, now) {
                        if age > STALE_AFTER_MINUTES {
                            logging::warn(
                                Component::Pipeline,
                                Some(channel.name),
                                &format!("latest reading {} is {} minutes old", key, age),
                            );
                        }
                    }
                    values.push(value);
                }
                None => {
                    logging::debug(
                        Component::Pipeline,
                        Some(channel.name),
                        "no readings recorded; using 0",
                    );
                    values.push(0.0);
                }
            }
        }

        Ok(FeatureVector::from_values(values))
    }
}

/// Override mode: takes caller-supplied values by channel name.
///
/// Names are matched case-insensitively against the channel table. Channels
/// not supplied default to `0.0`. Unknown names are logged and ignored.
pub fn from_overrides(overrides: &HashMap<String, f64>) -> Result<FeatureVector, PipelineError> {
    let mut values = vec![0.0; CHANNEL_REGISTRY.len()];
    let mut supplied = vec![false; CHANNEL_REGISTRY.len()];

    for (name, value) in overrides {
        match channels::find_channel(name) {
            Some((idx, channel)) => {
                if !value.is_finite() {
                    return Err(PipelineError::InvalidOverride {
                        channel: channel.name.to_string(),
                        reason: format!("value {} is not finite", value),
                    });
                }
                if supplied[idx] {
                    return Err(PipelineError::InvalidOverride {
                        channel: channel.name.to_string(),
                        reason: "supplied more than once".to_string(),
                    });
                }
                supplied[idx] = true;
                values[idx] = *value;
            }
            None => logging::warn(
                Component::Pipeline,
                Some(name.as_str()),
                "ignoring override for unknown channel",
            ),
        }
    }

    Ok(FeatureVector::from_values(values))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn wib() -> FixedOffset {
        timestamps::local_offset(7).unwrap()
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap()
    }

    // --- Resolver -----------------------------------------------------------

    #[test]
    fn test_latest_value_picks_greatest_key_regardless_of_insertion_order() {
        let node = json!({
            "2025-01-01-01_00_00": 7.0,
            "2024-12-31-23_59_59": 9.0,
            "2025-01-01-00_00_00": 5.0,
        });
        assert_eq!(latest_value(Some(&node)), 7.0);
    }

    #[test]
    fn test_latest_value_defaults_to_zero_for_absent_or_empty() {
        assert_eq!(latest_value(None), 0.0);
        assert_eq!(latest_value(Some(&json!({}))), 0.0);
    }

    #[test]
    fn test_latest_value_defaults_to_zero_for_non_mapping() {
        assert_eq!(latest_value(Some(&json!(3.5))), 0.0);
        assert_eq!(latest_value(Some(&json!([1.0, 2.0]))), 0.0);
        assert_eq!(latest_value(Some(&json!("12"))), 0.0);
    }

    #[test]
    fn test_latest_value_ignores_error_marker_key() {
        let node = json!({
            "2025-01-01-00_00_00": 4.5,
            "error": "Data tidak ditemukan",
        });
        assert_eq!(latest_value(Some(&node)), 4.5);
        assert_eq!(latest_value(Some(&json!({"error": "Data tidak ditemukan"}))), 0.0);
    }

    #[test]
    fn test_latest_value_coerces_quoted_numbers_and_rejects_junk() {
        assert_eq!(latest_value(Some(&json!({"2025-01-01-00_00_00": "3.25"}))), 3.25);
        assert_eq!(latest_value(Some(&json!({"2025-01-01-00_00_00": "n/a"}))), 0.0);
        assert_eq!(latest_value(Some(&json!({"2025-01-01-00_00_00": null}))), 0.0);
    }

    // --- Resolved mode ------------------------------------------------------

    #[test]
    fn test_resolved_vector_with_single_populated_channel() {
        let store = MemoryStore::with_tree(json!({
            "Polder": {
                "bojongsoang": {
                    "2025-01-01-00_00_00": 5.0,
                    "2025-01-01-01_00_00": 7.0,
                }
            }
        }));
        let assembler = FeatureAssembler::new(&store, "Polder", wib());
        let v = assembler.resolve_at(fixed_now()).expect("reads should succeed");
        assert_eq!(v.values(), &[7.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_resolved_vector_follows_channel_order() {
        let store = MemoryStore::with_tree(json!({
            "Polder": {
                "TMA_Sungai": {"2025-01-01-08_00_00": 8.0},
                "Debit_Citarum": {"2025-01-01-08_00_00": 4.0},
                "bojongsoang": {"2025-01-01-08_00_00": 1.0},
                "TMA_Kolam": {"2025-01-01-08_00_00": 7.0},
                "dayeuhkolot": {"2025-01-01-08_00_00": 2.0},
                "Debit_Hilir": {"2025-01-01-08_00_00": 5.0},
                "TMA_Hilir": {"2025-01-01-08_00_00": 6.0},
                "Debit_Cipalasari": {"2025-01-01-08_00_00": 3.0},
            }
        }));
        let assembler = FeatureAssembler::new(&store, "Polder", wib());
        let v = assembler.resolve_at(fixed_now()).unwrap();
        assert_eq!(v.values(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_resolved_mode_aborts_on_read_failure() {
        let store = MemoryStore::new();
        store.fail_reads_under("Polder/Debit_Hilir");
        let assembler = FeatureAssembler::new(&store, "Polder", wib());
        match assembler.resolve_at(fixed_now()) {
            Err(PipelineError::StoreReadFailure { path, .. }) => {
                assert_eq!(path, "Polder/Debit_Hilir")
            }
            other => panic!("expected StoreReadFailure, got {:?}", other),
        }
    }

    // --- Override mode ------------------------------------------------------

    #[test]
    fn test_override_vector_normalizes_names_and_defaults_missing() {
        let mut overrides = HashMap::new();
        overrides.insert("TMA_sungai".to_string(), 3.0);
        overrides.insert("bojongsoang".to_string(), 12.5);
        overrides.insert("Debit_Citarum".to_string(), 40.0);
        let v = from_overrides(&overrides).unwrap();
        assert_eq!(v.values(), &[12.5, 0.0, 0.0, 40.0, 0.0, 0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_override_vector_ignores_unknown_channels() {
        let mut overrides = HashMap::new();
        overrides.insert("Debit_Cikapundung".to_string(), 99.0);
        let v = from_overrides(&overrides).unwrap();
        assert_eq!(v.values(), &[0.0; 8]);
    }

    #[test]
    fn test_override_rejects_duplicate_channel_under_two_casings() {
        let mut overrides = HashMap::new();
        overrides.insert("TMA_Hilir".to_string(), 1.0);
        overrides.insert("TMA_hilir".to_string(), 2.0);
        assert!(matches!(
            from_overrides(&overrides),
            Err(PipelineError::InvalidOverride { .. })
        ));
    }

    #[test]
    fn test_override_rejects_non_finite_values() {
        let mut overrides = HashMap::new();
        overrides.insert("TMA_Kolam".to_string(), f64::NAN);
        assert!(from_overrides(&overrides).is_err());
    }
}
