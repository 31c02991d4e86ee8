/// Fixed-interval job scheduler.
///
/// Timers come from a `tokio_cron_scheduler::JobScheduler` running on the
/// scheduler's own tokio runtime, one repeated job per id. Each firing runs
/// the blocking task on the runtime's blocking pool, so a slow prediction
/// cycle never delays the forecast cycle's timer.
///
/// Per job:
///   idle → running → idle
/// - A boundary reached while the job is still running stays pending and is
///   re-checked as soon as the run finishes. Pending boundaries are
///   coalesced, so a job never runs twice at once and never catches up with
///   a burst of back-to-back runs.
/// - A boundary acted on later than the misfire grace period is skipped.
/// - A failed or panicking run is logged and the job stays registered.

use crate::logging::{self, Component};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use uuid::Uuid;

pub type JobResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
pub type JobTask = Arc<dyn Fn() -> JobResult + Send + Sync>;

/// Smallest interval a job may be registered with. Repeated cron jobs count
/// in whole seconds.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum SchedulerError {
    /// The tokio runtime could not be built.
    Runtime(std::io::Error),
    /// The cron scheduler refused an operation.
    Cron(JobSchedulerError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchedulerError::Runtime(e) => write!(f, "scheduler runtime: {}", e),
            SchedulerError::Cron(e) => write!(f, "cron scheduler: {}", e),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchedulerError::Runtime(e) => Some(e),
            SchedulerError::Cron(_) => None,
        }
    }
}

impl From<std::io::Error> for SchedulerError {
    fn from(e: std::io::Error) -> Self {
        SchedulerError::Runtime(e)
    }
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(e: JobSchedulerError) -> Self {
        SchedulerError::Cron(e)
    }
}

// ---------------------------------------------------------------------------
// Job configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub id: String,
    pub interval: Duration,
    pub misfire_grace: Duration,
    /// Fire at start (or at registration, once started) instead of one
    /// interval later.
    pub run_immediately: bool,
}

impl JobSpec {
    pub fn new(id: &str, interval: Duration) -> Self {
        JobSpec {
            id: id.to_string(),
            interval: interval.max(MIN_INTERVAL),
            misfire_grace: Duration::from_secs(1),
            run_immediately: false,
        }
    }

    pub fn every_minutes(id: &str, minutes: u64) -> Self {
        Self::new(id, Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn with_misfire_grace(mut self, grace: Duration) -> Self {
        self.misfire_grace = grace;
        self
    }

    pub fn run_immediately(mut self, yes: bool) -> Self {
        self.run_immediately = yes;
        self
    }
}

/// What happens to in-flight runs at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    WaitForRunning,
    Abandon,
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub id: String,
    pub interval: Duration,
    pub running: bool,
    pub runs: u64,
    pub failures: u64,
    pub misfires: u64,
}

// ---------------------------------------------------------------------------
// Per-job state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    /// Free: start a run.
    Fire,
    /// The previous run is still going; the boundary waits for it.
    Coalesced,
    /// Acted on this much later than the grace period allows.
    Misfired(Duration),
}

struct JobSlot {
    spec: JobSpec,
    task: JobTask,
    /// Id of the cron job currently driving this slot.
    cron_id: Option<Uuid>,
    running: bool,
    /// Earliest boundary reached while running.
    pending: Option<Instant>,
    runs: u64,
    failures: u64,
    misfires: u64,
}

impl JobSlot {
    fn new(spec: JobSpec, task: JobTask) -> Self {
        JobSlot {
            spec,
            task,
            cron_id: None,
            running: false,
            pending: None,
            runs: 0,
            failures: 0,
            misfires: 0,
        }
    }

    /// A boundary that came due at `due`, acted on at `now`.
    fn on_boundary(&mut self, due: Instant, now: Instant) -> Tick {
        if self.running {
            self.pending.get_or_insert(due);
            return Tick::Coalesced;
        }

        let lateness = now.saturating_duration_since(due);
        if lateness > self.spec.misfire_grace {
            self.misfires += 1;
            return Tick::Misfired(lateness);
        }
        self.running = true;
        Tick::Fire
    }

    /// Marks the run finished and hands back the boundary it held up.
    fn on_finished(&mut self, failed: bool) -> Option<Instant> {
        self.running = false;
        self.runs += 1;
        if failed {
            self.failures += 1;
        }
        self.pending.take()
    }

    fn status(&self) -> JobStatus {
        JobStatus {
            id: self.spec.id.clone(),
            interval: self.spec.interval,
            running: self.running,
            runs: self.runs,
            failures: self.failures,
            misfires: self.misfires,
        }
    }
}

// ---------------------------------------------------------------------------
// Job table
// ---------------------------------------------------------------------------

struct TableState {
    jobs: HashMap<String, JobSlot>,
    shutdown: bool,
    workers: Vec<JoinHandle<()>>,
}

/// Shared between the scheduler handle and every cron callback.
struct JobTable {
    handle: Handle,
    state: Mutex<TableState>,
}

impl JobTable {
    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A boundary for `id`. `source` is the cron job that produced it; ticks
    /// from a cron job that has since been replaced are dropped.
    fn on_tick(self: &Arc<Self>, id: &str, source: Option<Uuid>) {
        let now = Instant::now();
        let mut state = self.lock();
        if state.shutdown {
            return;
        }
        let Some(slot) = state.jobs.get_mut(id) else {
            return;
        };
        if source.is_some() && slot.cron_id != source {
            return;
        }

        let tick = slot.on_boundary(now, now);
        let task = Arc::clone(&slot.task);
        self.act(&mut state, id, tick, task);
    }

    fn on_finished(self: &Arc<Self>, id: &str, failed: bool) {
        let mut state = self.lock();
        let shutdown = state.shutdown;
        let Some(slot) = state.jobs.get_mut(id) else {
            return;
        };
        let Some(due) = slot.on_finished(failed) else {
            return;
        };
        if shutdown {
            return;
        }

        let tick = slot.on_boundary(due, Instant::now());
        let task = Arc::clone(&slot.task);
        self.act(&mut state, id, tick, task);
    }

    fn act(self: &Arc<Self>, state: &mut TableState, id: &str, tick: Tick, task: JobTask) {
        match tick {
            Tick::Fire => {
                let worker = self.spawn_run(id.to_string(), task);
                state.workers.retain(|w| !w.is_finished());
                state.workers.push(worker);
            }
            Tick::Coalesced => logging::debug(
                Component::Scheduler,
                Some(id),
                "previous run still in progress; boundary coalesced",
            ),
            Tick::Misfired(late) => {
                let grace = state
                    .jobs
                    .get(id)
                    .map(|slot| slot.spec.misfire_grace)
                    .unwrap_or_default();
                logging::warn(
                    Component::Scheduler,
                    Some(id),
                    &format!(
                        "run skipped: {:.1}s late exceeds misfire grace of {:.1}s",
                        late.as_secs_f64(),
                        grace.as_secs_f64()
                    ),
                );
            }
        }
    }

    fn spawn_run(self: &Arc<Self>, id: String, task: JobTask) -> JoinHandle<()> {
        let table = Arc::clone(self);
        self.handle.spawn(async move {
            let started = Instant::now();
            logging::debug(Component::Scheduler, Some(id.as_str()), "run started");

            let failed = match tokio::task::spawn_blocking(move || task()).await {
                Ok(Ok(())) => {
                    logging::debug(
                        Component::Scheduler,
                        Some(id.as_str()),
                        &format!("run finished in {:.2}s", started.elapsed().as_secs_f64()),
                    );
                    false
                }
                Ok(Err(e)) => {
                    logging::error(
                        Component::Scheduler,
                        Some(id.as_str()),
                        &format!("run failed, retrying at next interval: {}", e),
                    );
                    true
                }
                Err(e) if e.is_panic() => {
                    logging::error(Component::Scheduler, Some(id.as_str()), "run panicked");
                    true
                }
                Err(e) => {
                    logging::error(Component::Scheduler, Some(id.as_str()), &format!("run cancelled: {}", e));
                    true
                }
            };

            table.on_finished(&id, failed);
        })
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    runtime: Option<Runtime>,
    handle: Handle,
    cron: JobScheduler,
    table: Arc<JobTable>,
    started: watch::Sender<bool>,
    stopped: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new() -> Result<Self, SchedulerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("scheduler")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let cron = handle.block_on(JobScheduler::new())?;

        Ok(Scheduler {
            table: Arc::new(JobTable {
                handle: handle.clone(),
                state: Mutex::new(TableState {
                    jobs: HashMap::new(),
                    shutdown: false,
                    workers: Vec::new(),
                }),
            }),
            runtime: Some(runtime),
            handle,
            cron,
            started: watch::Sender::new(false),
            stopped: watch::Sender::new(false),
        })
    }

    fn is_started(&self) -> bool {
        *self.started.borrow()
    }

    fn cron_job(&self, id: &str, interval: Duration) -> Result<Job, SchedulerError> {
        let table = Arc::clone(&self.table);
        let id = id.to_string();
        let job = Job::new_repeated_async(interval, move |uuid, _l| {
            let table = Arc::clone(&table);
            let id = id.clone();
            Box::pin(async move {
                table.on_tick(&id, Some(uuid));
            })
        })?;
        Ok(job)
    }

    /// Registers a job, replacing any job with the same id.
    ///
    /// A replacement takes the new interval, grace and task but keeps the
    /// running flag, so it cannot start while the old run is in flight. The
    /// new cron job is added before the old one is removed.
    /// Returns `true` if an existing job was replaced.
    pub fn add_job(&self, spec: JobSpec, task: JobTask) -> Result<bool, SchedulerError> {
        let id = spec.id.clone();
        let interval = spec.interval;
        let grace = spec.misfire_grace;
        let run_immediately = spec.run_immediately;

        let job = self.cron_job(&id, interval)?;
        let cron_id = self.handle.block_on(self.cron.add(job))?;

        let previous = {
            let mut state = self.table.lock();
            let slot = state
                .jobs
                .entry(id.clone())
                .or_insert_with(|| JobSlot::new(spec.clone(), Arc::clone(&task)));
            slot.spec = spec;
            slot.task = task;
            slot.cron_id.replace(cron_id)
        };
        let replaced = previous.is_some();

        if let Some(old) = previous
            && let Err(e) = self.handle.block_on(self.cron.remove(&old))
        {
            logging::warn(
                Component::Scheduler,
                Some(id.as_str()),
                &format!("could not remove replaced timer {}: {}", old, e),
            );
        }

        logging::info(
            Component::Scheduler,
            Some(id.as_str()),
            &format!(
                "{} every {}s (misfire grace {}s)",
                if replaced { "re-registered" } else { "registered" },
                interval.as_secs_f64(),
                grace.as_secs_f64()
            ),
        );

        if run_immediately && self.is_started() {
            self.table.on_tick(&id, None);
        }
        Ok(replaced)
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.table.lock().jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.table.lock().jobs.get(id).map(JobSlot::status)
    }

    /// Starts the timers. Jobs registered with `run_immediately` fire now.
    /// Calling it twice has no effect.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.started.send_replace(true) {
            return Ok(());
        }
        self.handle.block_on(self.cron.start())?;
        logging::info(Component::Scheduler, None, "scheduler started");

        let immediate: Vec<String> = self
            .table
            .lock()
            .jobs
            .values()
            .filter(|slot| slot.spec.run_immediately)
            .map(|slot| slot.spec.id.clone())
            .collect();
        for id in immediate {
            self.table.on_tick(&id, None);
        }
        Ok(())
    }

    /// Blocks until `shutdown` has been called.
    pub fn wait(&self) {
        let mut stopped = self.stopped.subscribe();
        let _ = self.handle.block_on(stopped.wait_for(|s| *s));
    }

    /// Stops firing new runs and applies `policy` to in-flight ones.
    pub fn shutdown(&self, policy: ShutdownPolicy) {
        self.table.lock().shutdown = true;

        let mut cron = self.cron.clone();
        if let Err(e) = self.handle.block_on(cron.shutdown()) {
            logging::warn(Component::Scheduler, None, &format!("timer shutdown: {}", e));
        }

        if policy == ShutdownPolicy::WaitForRunning {
            let workers = std::mem::take(&mut self.table.lock().workers);
            for worker in workers {
                let _ = self.handle.block_on(worker);
            }
        }

        self.stopped.send_replace(true);
        logging::info(Component::Scheduler, None, "scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.table.lock().shutdown = true;
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
