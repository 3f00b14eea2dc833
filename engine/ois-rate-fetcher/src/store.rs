use crate::config::{RetryConfig, StoreConfig};
use crate::error::{OisError, Result, StoreFailure};
use crate::models::StorageRecord;
use crate::retry::{run_with_retry, RetryError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Postgres error codes worth retrying
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "53300", // too_many_connections
    "57P01", // admin_shutdown
    "57P03", // cannot_connect_now
    "08000", // connection_exception
    "08003", // connection_does_not_exist
    "08006", // connection_failure
];

/// Capability to upsert metric records keyed by `(metric_id, timestamp_ms)`
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Label used in logs
    fn name(&self) -> &str;

    /// Make the store ready for writes. Called once per run, before the first upsert.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Insert or overwrite the record with the same key.
    /// Retryable failures are reported as `OisError::Transient`.
    async fn upsert(&self, record: &StorageRecord) -> Result<()>;
}

/// Prepare the store under the retry policy
pub async fn prepare_store(store: &dyn MetricStore, retry: &RetryConfig) -> Result<()> {
    match run_with_retry("store setup", retry, || store.prepare()).await {
        Ok(()) => Ok(()),
        Err(RetryError::Exhausted { attempts, last }) => {
            Err(OisError::StoreSetup { attempts, reason: last.reason() })
        }
        Err(RetryError::Aborted { attempts, error }) => {
            Err(OisError::StoreSetup { attempts, reason: error.reason() })
        }
    }
}

/// Write every record, each independently, and report all failures together.
///
/// Returns the number of records written.
pub async fn persist_records(
    store: &dyn MetricStore,
    records: &[StorageRecord],
    retry: &RetryConfig,
) -> Result<usize> {
    let mut failures = Vec::new();
    let mut written = 0;

    for record in records {
        let result = run_with_retry("store", retry, move || store.upsert(record)).await;
        let failure = match result {
            Ok(()) => {
                info!(
                    metric_id = %record.metric_id,
                    "Upserted {} = {} at {} into {}",
                    record.metric_id, record.value, record.timestamp_ms, store.name()
                );
                written += 1;
                continue;
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                StoreFailure { metric_id: record.metric_id.clone(), attempts, reason: last.reason() }
            }
            Err(RetryError::Aborted { attempts, error }) => {
                let reason = match error {
                    OisError::Store { failures } => {
                        failures.into_iter().map(|f| f.reason).collect::<Vec<_>>().join("; ")
                    }
                    other => other.reason(),
                };
                StoreFailure { metric_id: record.metric_id.clone(), attempts, reason }
            }
        };

        error!(
            metric_id = %failure.metric_id,
            "Failed to store {} after {} attempt(s): {}",
            failure.metric_id, failure.attempts, failure.reason
        );
        failures.push(failure);
    }

    if failures.is_empty() {
        Ok(written)
    } else {
        Err(OisError::Store { failures })
    }
}

/// Postgres-backed metric table
pub struct PgMetricStore {
    pool: PgPool,
    table: String,
    upsert_sql: String,
    create_table: bool,
}

impl PgMetricStore {
    /// Create a store with a lazily connecting pool, so connection failures
    /// surface on the first write where they are retried.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.retry.call_timeout())
            .connect_lazy(&config.url)
            .map_err(|e| OisError::config(format!("Invalid database URL: {}", e)))?;

        let mut store = Self::with_pool(pool, &config.table_name);
        store.create_table = config.create_table_if_missing;
        Ok(store)
    }

    /// Wrap an existing pool. `table` must already be a validated identifier.
    pub fn with_pool(pool: PgPool, table: &str) -> Self {
        let upsert_sql = format!(
            r#"
            INSERT INTO {} (metric_id, ts, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (metric_id, ts)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
            table
        );

        Self { pool, table: table.to_string(), upsert_sql, create_table: false }
    }

    /// Create the metric table when it does not exist yet
    pub async fn ensure_table(&self) -> Result<()> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                metric_id TEXT NOT NULL,
                ts BIGINT NOT NULL,
                value NUMERIC NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (metric_id, ts)
            )
            "#,
            self.table
        );

        sqlx::query(&ddl).execute(&self.pool).await.map_err(|e| {
            let reason = format!("creating table {} failed: {}", self.table, e);
            if is_transient_sqlx_error(&e) {
                OisError::transient(reason)
            } else {
                OisError::StoreSetup { attempts: 1, reason }
            }
        })?;

        info!("Ensured metric table {} exists", self.table);
        Ok(())
    }
}

#[async_trait]
impl MetricStore for PgMetricStore {
    fn name(&self) -> &str {
        &self.table
    }

    async fn prepare(&self) -> Result<()> {
        if self.create_table {
            self.ensure_table().await?;
        }
        Ok(())
    }

    async fn upsert(&self, record: &StorageRecord) -> Result<()> {
        sqlx::query(&self.upsert_sql)
            .bind(record.metric_id.as_str())
            .bind(record.timestamp_ms)
            .bind(record.value)
            .execute(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(record, e))?;

        Ok(())
    }
}

fn is_transient_sqlx_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map_or(false, |code| TRANSIENT_SQLSTATES.iter().any(|c| *c == code)),
        _ => false,
    }
}

fn classify_sqlx_error(record: &StorageRecord, err: sqlx::Error) -> OisError {
    if is_transient_sqlx_error(&err) {
        OisError::transient(format!("write of {} failed: {}", record.metric_id, err))
    } else {
        OisError::Store {
            failures: vec![StoreFailure {
                metric_id: record.metric_id.clone(),
                attempts: 1,
                reason: err.to_string(),
            }],
        }
    }
}

/// In-memory metric table with the same upsert semantics (tests and dry runs)
#[derive(Clone, Default)]
pub struct InMemoryMetricStore {
    records: Arc<Mutex<HashMap<(String, i64), Decimal>>>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of upserts performed, including overwrites
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn get(&self, metric_id: &str, timestamp_ms: i64) -> Option<Decimal> {
        self.records.lock().await.get(&(metric_id.to_string(), timestamp_ms)).copied()
    }

    /// Stored records ordered by key
    pub async fn snapshot(&self) -> Vec<StorageRecord> {
        let records = self.records.lock().await;
        let mut snapshot: Vec<StorageRecord> = records
            .iter()
            .map(|((metric_id, timestamp_ms), value)| StorageRecord {
                metric_id: metric_id.clone(),
                timestamp_ms: *timestamp_ms,
                value: *value,
            })
            .collect();
        snapshot.sort_by(|a, b| a.key().cmp(&b.key()));
        snapshot
    }
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn upsert(&self, record: &StorageRecord) -> Result<()> {
        self.records.lock().await.insert(record.key(), record.value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
