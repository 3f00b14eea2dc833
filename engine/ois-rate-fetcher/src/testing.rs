//! Test doubles for the source and store capabilities

use crate::error::{OisError, Result, StoreFailure};
use crate::fetcher::MarketDataSource;
use crate::models::{RawQuote, StorageRecord};
use crate::store::{InMemoryMetricStore, MetricStore};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Source replaying a fixed sequence of outcomes, then failing transiently
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Vec<RawQuote>>>>,
    attempts: AtomicU32,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<Vec<RawQuote>>>) -> Self {
        Self { script: Mutex::new(script.into()), attempts: AtomicU32::new(0) }
    }

    pub fn returning(quotes: Vec<RawQuote>) -> Self {
        Self::new(vec![Ok(quotes)])
    }

    pub fn failing_then(failures: usize, quotes: Vec<RawQuote>) -> Self {
        let mut script: Vec<Result<Vec<RawQuote>>> =
            (0..failures).map(|_| Err(OisError::transient("connection reset"))).collect();
        script.push(Ok(quotes));
        Self::new(script)
    }

    pub fn always_failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self) -> Result<Vec<RawQuote>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(OisError::transient("HTTP 503 Service Unavailable")))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FailureMode {
    /// Every write fails transiently
    Transient,
    /// The first n writes fail transiently
    TransientTimes(u32),
    /// Every write fails permanently
    Permanent,
}

/// Store wrapper failing writes for chosen metric identifiers
pub struct FlakyStore {
    inner: InMemoryMetricStore,
    failing: Vec<String>,
    mode: FailureMode,
    attempts: Mutex<HashMap<String, u32>>,
    setup_mode: Option<FailureMode>,
    setup_attempts: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: InMemoryMetricStore, failing: &[&str], mode: FailureMode) -> Self {
        Self {
            inner,
            failing: failing.iter().map(|s| s.to_string()).collect(),
            mode,
            attempts: Mutex::new(HashMap::new()),
            setup_mode: None,
            setup_attempts: AtomicU32::new(0),
        }
    }

    /// Also fail `prepare` according to `mode`
    pub fn with_setup_failures(mut self, mode: FailureMode) -> Self {
        self.setup_mode = Some(mode);
        self
    }

    pub fn setup_attempts(&self) -> u32 {
        self.setup_attempts.load(Ordering::SeqCst)
    }

    pub fn attempts_for(&self, metric_id: &str) -> u32 {
        self.attempts.lock().unwrap().get(metric_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MetricStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn prepare(&self) -> Result<()> {
        let attempt = self.setup_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        match self.setup_mode {
            Some(FailureMode::Transient) => Err(OisError::transient("pool timed out")),
            Some(FailureMode::TransientTimes(n)) if attempt <= n => {
                Err(OisError::transient("pool timed out"))
            }
            Some(FailureMode::Permanent) => Err(OisError::StoreSetup {
                attempts: 1,
                reason: "permission denied for schema".to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn upsert(&self, record: &StorageRecord) -> Result<()> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(record.metric_id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if self.failing.contains(&record.metric_id) {
            match self.mode {
                FailureMode::Transient => {
                    return Err(OisError::transient("throttled"));
                }
                FailureMode::TransientTimes(n) if attempt <= n => {
                    return Err(OisError::transient("throttled"));
                }
                FailureMode::TransientTimes(_) => {}
                FailureMode::Permanent => {
                    return Err(OisError::Store {
                        failures: vec![StoreFailure {
                            metric_id: record.metric_id.clone(),
                            attempts: 1,
                            reason: "permission denied".to_string(),
                        }],
                    });
                }
            }
        }

        self.inner.upsert(record).await
    }
}
