/// Decision writer.
///
/// Persists a decision as two independent store writes under the same key:
///   {root}/pump_on/{ts}       = pump activation count
///   {root}/status_banjir/{ts} = alert level
///
/// The pair is not transactional. If the second write fails the first is not
/// rolled back; the error names the path that failed so the half-written
/// timestamp can be found.

use crate::channels::join_path;
use crate::logging::{self, Component};
use crate::model::{Decision, PipelineError, SERIES_PUMP_ON, SERIES_STATUS_BANJIR};
use crate::store::TreeStore;
use serde_json::json;

pub struct DecisionWriter<'a> {
    store: &'a dyn TreeStore,
    root: &'a str,
}

impl<'a> DecisionWriter<'a> {
    pub fn new(store: &'a dyn TreeStore, root: &'a str) -> Self {
        DecisionWriter { store, root }
    }

    /// Writes `decision` under `ts_key`: pump_on first, then status_banjir.
    pub fn write(&self, ts_key: &str, decision: &Decision) -> Result<(), PipelineError> {
        self.put(SERIES_PUMP_ON, ts_key, json!(decision.pump_on))?;
        self.put(SERIES_STATUS_BANJIR, ts_key, json!(decision.alert_level.as_label()))
            .inspect_err(|_| {
                logging::error(
                    Component::Store,
                    Some(ts_key),
                    "pump_on written but status_banjir missing for this timestamp",
                );
            })?;

        logging::info(
            Component::Pipeline,
            Some(ts_key),
            &format!(
                "decision stored: pump_on={}, alert_level={}",
                decision.pump_on,
                decision.alert_level.as_label()
            ),
        );
        Ok(())
    }

    fn put(&self, series: &str, ts_key: &str, value: serde_json::Value) -> Result<(), PipelineError> {
        let path = join_path(&join_path(self.root, series), ts_key);
        self.store.set(&path, value).map_err(|e| {
            logging::log_store_failure(&path, "decision write", &e);
            PipelineError::StoreWriteFailure {
                path: path.clone(),
                reason: e.to_string(),
            }
        })
    }
}
