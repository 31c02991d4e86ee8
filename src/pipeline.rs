/// The prediction and forecast cycles, and their registration with the
/// scheduler.
///
/// `Pipeline` is built once at startup and owns the process-wide handles:
/// store client, weather client, inference engine, key minter and the
/// optional audit log. The scheduler jobs and the on-demand handler share it
/// through an `Arc`.
///
/// Prediction cycle:
///   resolve 8 channels → infer → mint key → write pump_on, status_banjir → audit
///
/// Any failure before the writes leaves the store untouched.

use crate::audit::{AuditQueue, DecisionLog, DecisionOrigin, DecisionRecord};
use crate::channels::ForecastLocation;
use crate::config::ScheduleConfig;
use crate::decision::DecisionWriter;
use crate::features::{self, FeatureAssembler};
use crate::forecast::{self, ForecastReport};
use crate::inference::InferenceEngine;
use crate::ingest::bmkg::WeatherApi;
use crate::logging::{self, Component};
use crate::model::{Decision, FeatureVector, PipelineError};
use crate::scheduler::{JobResult, JobSpec, Scheduler, SchedulerError};
use crate::store::TreeStore;
use crate::timestamps::KeyMinter;
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const PREDICTION_JOB_ID: &str = "predict_upload_job";
pub const FORECAST_JOB_ID: &str = "weather_upload_job";

/// Default misfire grace for the prediction job.
pub const PREDICTION_MISFIRE_GRACE: Duration = Duration::from_secs(120);
/// Default misfire grace for the forecast job.
pub const FORECAST_MISFIRE_GRACE: Duration = Duration::from_secs(1);

/// Result of one inference through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionOutcome {
    pub decision: Decision,
    pub features: FeatureVector,
    /// Key the decision was stored under; `None` when it was not persisted.
    pub ts_key: Option<String>,
}

impl PredictionOutcome {
    pub fn persisted(&self) -> bool {
        self.ts_key.is_some()
    }
}

pub struct Pipeline {
    store: Arc<dyn TreeStore>,
    weather: Arc<dyn WeatherApi>,
    engine: Arc<InferenceEngine>,
    root: String,
    locations: Vec<ForecastLocation>,
    minter: KeyMinter,
    audit: Option<AuditQueue>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn TreeStore>,
        weather: Arc<dyn WeatherApi>,
        engine: Arc<InferenceEngine>,
        root: &str,
        locations: Vec<ForecastLocation>,
        offset: FixedOffset,
    ) -> Self {
        Pipeline {
            store,
            weather,
            engine,
            root: root.trim_matches('/').to_string(),
            locations,
            minter: KeyMinter::new(offset),
            audit: None,
        }
    }

    /// Appends every persisted decision to `log` as well, from a writer
    /// thread of its own.
    pub fn with_audit(mut self, log: Box<dyn DecisionLog>) -> Self {
        match AuditQueue::spawn(log) {
            Ok(queue) => self.audit = Some(queue),
            Err(e) => logging::warn(
                Component::Audit,
                None,
                &format!("audit writer could not start: {}", e),
            ),
        }
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn locations(&self) -> &[ForecastLocation] {
        &self.locations
    }

    pub fn offset(&self) -> &FixedOffset {
        self.minter.offset()
    }

    pub fn store(&self) -> &dyn TreeStore {
        self.store.as_ref()
    }

    pub fn weather(&self) -> &dyn WeatherApi {
        self.weather.as_ref()
    }

    // -----------------------------------------------------------------------
    // Prediction
    // -----------------------------------------------------------------------

    /// Full resolved-mode cycle with persistence.
    pub fn run_prediction_now(&self) -> Result<PredictionOutcome, PipelineError> {
        self.run_prediction_at(Utc::now(), DecisionOrigin::OnDemand)
    }

    /// Resolved-mode cycle with an injected clock.
    pub fn run_prediction_at(
        &self,
        now: DateTime<Utc>,
        origin: DecisionOrigin,
    ) -> Result<PredictionOutcome, PipelineError> {
        let (decision, features) = self.resolve_and_infer(now)?;
        let ts_key = self.persist(now, origin, &decision, &features)?;
        Ok(PredictionOutcome {
            decision,
            features,
            ts_key: Some(ts_key),
        })
    }

    /// Resolved-mode inference that leaves the store untouched.
    pub fn preview_prediction_now(&self) -> Result<PredictionOutcome, PipelineError> {
        self.preview_prediction_at(Utc::now())
    }

    pub fn preview_prediction_at(&self, now: DateTime<Utc>) -> Result<PredictionOutcome, PipelineError> {
        let (decision, features) = self.resolve_and_infer(now)?;
        Ok(PredictionOutcome {
            decision,
            features,
            ts_key: None,
        })
    }

    fn resolve_and_infer(&self, now: DateTime<Utc>) -> Result<(Decision, FeatureVector), PipelineError> {
        let assembler = FeatureAssembler::new(self.store.as_ref(), &self.root, *self.offset());
        let features = assembler.resolve_at(now)?;
        let decision = self.engine.infer(&features)?;
        Ok((decision, features))
    }

    /// Override-mode inference. Nothing is read from the store, and the
    /// decision is written only when `persist` is set.
    pub fn run_prediction_with_overrides(
        &self,
        overrides: &HashMap<String, f64>,
        persist: bool,
    ) -> Result<PredictionOutcome, PipelineError> {
        let features = features::from_overrides(overrides)?;
        let decision = self.engine.infer(&features)?;

        let ts_key = if persist {
            Some(self.persist(Utc::now(), DecisionOrigin::Override, &decision, &features)?)
        } else {
            logging::debug(
                Component::Pipeline,
                None,
                "override decision returned without persisting",
            );
            None
        };
        Ok(PredictionOutcome {
            decision,
            features,
            ts_key,
        })
    }

    fn persist(
        &self,
        now: DateTime<Utc>,
        origin: DecisionOrigin,
        decision: &Decision,
        features: &FeatureVector,
    ) -> Result<String, PipelineError> {
        let ts_key = self.minter.mint_at(now);
        DecisionWriter::new(self.store.as_ref(), &self.root).write(&ts_key, decision)?;

        if let Some(audit) = &self.audit {
            audit.submit(DecisionRecord {
                ts_key: ts_key.clone(),
                recorded_at: now,
                origin,
                decision: *decision,
                features: features.clone(),
            });
        }
        Ok(ts_key)
    }

    // -----------------------------------------------------------------------
    // Forecast
    // -----------------------------------------------------------------------

    /// One forecast cycle over every configured location.
    pub fn run_forecast_fetch_now(&self) -> Result<ForecastReport, PipelineError> {
        self.run_forecast_fetch_at(Utc::now())
    }

    pub fn run_forecast_fetch_at(&self, now: DateTime<Utc>) -> Result<ForecastReport, PipelineError> {
        forecast::run_forecast_cycle_at(
            self.weather.as_ref(),
            self.store.as_ref(),
            &self.root,
            &self.locations,
            self.offset(),
            now,
        )
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Registers the prediction cycle every `interval_minutes` with the
    /// default grace. Returns `true` if it replaced an earlier registration.
    pub fn register_prediction_job(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        interval_minutes: u64,
    ) -> Result<bool, SchedulerError> {
        let spec = JobSpec::every_minutes(PREDICTION_JOB_ID, interval_minutes)
            .with_misfire_grace(PREDICTION_MISFIRE_GRACE);
        self.add_prediction_job(scheduler, spec)
    }

    /// Registers the forecast cycle every `interval_minutes` with the
    /// default grace.
    pub fn register_forecast_job(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        interval_minutes: u64,
    ) -> Result<bool, SchedulerError> {
        let spec = JobSpec::every_minutes(FORECAST_JOB_ID, interval_minutes)
            .with_misfire_grace(FORECAST_MISFIRE_GRACE);
        self.add_forecast_job(scheduler, spec)
    }

    /// Registers both jobs with the timings from `[schedule]`.
    pub fn register_jobs(self: &Arc<Self>, scheduler: &Scheduler, schedule: &ScheduleConfig) -> Result<(), SchedulerError> {
        let prediction = JobSpec::every_minutes(PREDICTION_JOB_ID, schedule.prediction_interval_minutes)
            .with_misfire_grace(Duration::from_secs(schedule.prediction_misfire_grace_secs))
            .run_immediately(schedule.run_on_start);
        let forecast = JobSpec::every_minutes(FORECAST_JOB_ID, schedule.forecast_interval_minutes)
            .with_misfire_grace(Duration::from_secs(schedule.forecast_misfire_grace_secs))
            .run_immediately(schedule.run_on_start);

        self.add_prediction_job(scheduler, prediction)?;
        self.add_forecast_job(scheduler, forecast)?;
        Ok(())
    }

    fn add_prediction_job(self: &Arc<Self>, scheduler: &Scheduler, spec: JobSpec) -> Result<bool, SchedulerError> {
        let pipeline = Arc::clone(self);
        scheduler.add_job(
            spec,
            Arc::new(move || -> JobResult {
                pipeline.run_prediction_at(Utc::now(), DecisionOrigin::Scheduled)?;
                Ok(())
            }),
        )
    }

    fn add_forecast_job(self: &Arc<Self>, scheduler: &Scheduler, spec: JobSpec) -> Result<bool, SchedulerError> {
        let pipeline = Arc::clone(self);
        scheduler.add_job(
            spec,
            Arc::new(move || -> JobResult {
                pipeline.run_forecast_fetch_now()?;
                Ok(())
            }),
        )
    }
}
