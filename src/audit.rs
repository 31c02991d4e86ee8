/// Append-only decision audit log.
///
/// The time-series store keys decisions by wall-clock timestamp, so two
/// decisions minted in the same second overwrite each other there. The audit
/// log keeps every persisted decision under a monotonic sequence number, with
/// the store key as a secondary index, so the history can be reconstructed
/// exactly.
///
/// Disabled unless `[audit] enabled = true`. Records go through an
/// `AuditQueue` to a writer thread, so a slow database never holds up a
/// decision. Audit failures never fail a cycle; they are logged and the
/// decision stands.

use crate::logging::{self, Component};
use crate::model::{Decision, FeatureVector};
use chrono::{DateTime, Utc};
use postgres::{Client, NoTls};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Which path produced a persisted decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOrigin {
    Scheduled,
    OnDemand,
    Override,
}

impl DecisionOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionOrigin::Scheduled => "scheduled",
            DecisionOrigin::OnDemand => "on_demand",
            DecisionOrigin::Override => "override",
        }
    }
}

/// One persisted decision.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    pub ts_key: String,
    pub recorded_at: DateTime<Utc>,
    pub origin: DecisionOrigin,
    pub decision: Decision,
    pub features: FeatureVector,
}

#[derive(Debug)]
pub enum AuditError {
    Database(postgres::Error),
    MissingUrl(String),
}

impl std::fmt::Display for AuditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditError::Database(e) => write!(f, "audit database error: {}", e),
            AuditError::MissingUrl(var) => write!(f, "{} must be set when audit is enabled", var),
        }
    }
}

impl std::error::Error for AuditError {}

impl From<postgres::Error> for AuditError {
    fn from(e: postgres::Error) -> Self {
        AuditError::Database(e)
    }
}

/// Sink for persisted decisions.
pub trait DecisionLog: Send {
    /// Appends a record and returns its sequence number.
    fn append(&mut self, record: &DecisionRecord) -> Result<i64, AuditError>;
}

const SCHEMA_SQL: &str = "
    CREATE SCHEMA IF NOT EXISTS polder;
    CREATE TABLE IF NOT EXISTS polder.decision_log (
        seq          BIGSERIAL PRIMARY KEY,
        ts_key       TEXT NOT NULL,
        recorded_at  TIMESTAMPTZ NOT NULL,
        origin       TEXT NOT NULL,
        pump_on      BIGINT NOT NULL,
        alert_level  BIGINT NOT NULL,
        features     DOUBLE PRECISION[] NOT NULL
    );
    CREATE INDEX IF NOT EXISTS decision_log_ts_key_idx ON polder.decision_log (ts_key);
";

/// Postgres-backed decision log.
pub struct PgDecisionLog {
    client: Client,
}

/// Connection settings for `database_url` with every wait bounded by
/// `timeout`: the connect attempt, each statement on the server, and
/// keepalive probing of a silent peer.
pub fn connection_config(database_url: &str, timeout: Duration) -> Result<postgres::Config, AuditError> {
    let mut config: postgres::Config = database_url.parse()?;
    config
        .connect_timeout(timeout)
        .keepalives(true)
        .keepalives_idle(timeout)
        .options(&format!("-c statement_timeout={}", timeout.as_millis()));
    Ok(config)
}

impl PgDecisionLog {
    /// Connects and creates the schema if needed.
    pub fn connect(database_url: &str, timeout: Duration) -> Result<PgDecisionLog, AuditError> {
        let mut client = connection_config(database_url, timeout)?.connect(NoTls)?;
        client.batch_execute(SCHEMA_SQL)?;
        Ok(PgDecisionLog { client })
    }

    /// Connects using the URL in environment variable `var` (after `.env`).
    pub fn connect_from_env(var: &str, timeout: Duration) -> Result<PgDecisionLog, AuditError> {
        let url = std::env::var(var).map_err(|_| AuditError::MissingUrl(var.to_string()))?;
        Self::connect(&url, timeout)
    }

    /// Most recent records for a store key, newest first.
    pub fn records_for_key(&mut self, ts_key: &str) -> Result<Vec<(i64, String, i64, i64)>, AuditError> {
        let rows = self.client.query(
            "SELECT seq, origin, pump_on, alert_level
             FROM polder.decision_log
             WHERE ts_key = $1
             ORDER BY seq DESC",
            &[&ts_key],
        )?;
        Ok(rows
            .iter()
            .map(|row| (row.get(0), row.get(1), row.get(2), row.get(3)))
            .collect())
    }
}

impl DecisionLog for PgDecisionLog {
    fn append(&mut self, record: &DecisionRecord) -> Result<i64, AuditError> {
        let features: Vec<f64> = record.features.values().to_vec();
        let row = self.client.query_one(
            "INSERT INTO polder.decision_log
                 (ts_key, recorded_at, origin, pump_on, alert_level, features)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING seq",
            &[
                &record.ts_key,
                &record.recorded_at,
                &record.origin.as_str(),
                &record.decision.pump_on,
                &record.decision.alert_level.as_label(),
                &features,
            ],
        )?;
        Ok(row.get(0))
    }
}

// ---------------------------------------------------------------------------
// Writer thread
// ---------------------------------------------------------------------------

/// Records waiting for the writer beyond this are dropped.
pub const AUDIT_QUEUE_CAPACITY: usize = 256;

/// Bounded hand-off from the decision path to a dedicated writer thread.
pub struct AuditQueue {
    sender: Option<SyncSender<DecisionRecord>>,
    writer: Option<JoinHandle<()>>,
}

impl AuditQueue {
    pub fn spawn(log: Box<dyn DecisionLog>) -> std::io::Result<AuditQueue> {
        Self::with_capacity(log, AUDIT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(log: Box<dyn DecisionLog>, capacity: usize) -> std::io::Result<AuditQueue> {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let writer = thread::Builder::new()
            .name("audit-writer".to_string())
            .spawn(move || drain(log, receiver))?;
        Ok(AuditQueue {
            sender: Some(sender),
            writer: Some(writer),
        })
    }

    /// Queues a record without blocking. Returns `false` if it was dropped.
    pub fn submit(&self, record: DecisionRecord) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                logging::warn(
                    Component::Audit,
                    Some(record.ts_key.as_str()),
                    "audit queue full; decision not audited",
                );
                false
            }
            Err(TrySendError::Disconnected(record)) => {
                logging::warn(
                    Component::Audit,
                    Some(record.ts_key.as_str()),
                    "audit writer stopped; decision not audited",
                );
                false
            }
        }
    }

    /// Stops accepting records and waits for the queued ones to be written.
    pub fn close(mut self) {
        self.sender.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

impl Drop for AuditQueue {
    fn drop(&mut self) {
        // The writer finishes the backlog on its own.
        self.sender.take();
    }
}

fn drain(mut log: Box<dyn DecisionLog>, records: Receiver<DecisionRecord>) {
    for record in records {
        match log.append(&record) {
            Ok(seq) => logging::debug(
                Component::Audit,
                Some(record.ts_key.as_str()),
                &format!("appended as seq {}", seq),
            ),
            Err(e) => logging::warn(
                Component::Audit,
                Some(record.ts_key.as_str()),
                &format!("decision not audited: {}", e),
            ),
        }
    }
}
