//! Error types for the OIS rate fetcher

use std::fmt;
use thiserror::Error;

/// Result type alias for fetcher operations
pub type Result<T> = std::result::Result<T, OisError>;

/// Pipeline stage an error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Fetch,
    Data,
    Calculation,
    Store,
}

impl Stage {
    /// Process exit code reported when a run aborts in this stage
    pub fn exit_code(&self) -> u8 {
        match self {
            Stage::Config => 2,
            Stage::Fetch => 3,
            Stage::Data => 4,
            Stage::Calculation => 5,
            Stage::Store => 6,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Fetch => "fetch",
            Stage::Data => "data",
            Stage::Calculation => "calculation",
            Stage::Store => "store",
        };
        f.write_str(name)
    }
}

/// A metric write that failed after the retry policy gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFailure {
    pub metric_id: String,
    pub attempts: u32,
    pub reason: String,
}

impl fmt::Display for StoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} after {} attempt(s): {}", self.metric_id, self.attempts, self.reason)
    }
}

/// Errors that can occur during a fetch-derive-store run
#[derive(Error, Debug)]
pub enum OisError {
    /// Invalid or unloadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single attempt failed in a way that may succeed on retry
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Market data source unreachable or persistently failing
    #[error("Fetch error after {attempts} attempt(s): {reason}")]
    Fetch { attempts: u32, reason: String },

    /// Market data received but structurally invalid
    #[error("Data error: {0}")]
    Data(String),

    /// Valid data that cannot produce a metric
    #[error("Calculation error: {0}")]
    Calculation(String),

    /// One or more metric writes failed
    #[error("Store error: {}", join_failures(.failures))]
    Store { failures: Vec<StoreFailure> },

    /// The store could not be prepared for writes
    #[error("Store setup failed after {attempts} attempt(s): {reason}")]
    StoreSetup { attempts: u32, reason: String },
}

fn join_failures(failures: &[StoreFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl OisError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn calculation(msg: impl Into<String>) -> Self {
        Self::Calculation(msg.into())
    }

    /// Whether the retry policy should try the operation again
    pub fn is_transient(&self) -> bool {
        matches!(self, OisError::Transient(_))
    }

    /// Bare failure message without the variant prefix
    pub fn reason(&self) -> String {
        match self {
            OisError::Config(msg)
            | OisError::Transient(msg)
            | OisError::Data(msg)
            | OisError::Calculation(msg) => msg.clone(),
            OisError::Fetch { reason, .. } | OisError::StoreSetup { reason, .. } => reason.clone(),
            OisError::Store { failures } => join_failures(failures),
        }
    }

    /// Stage the error is attributed to.
    ///
    /// A bare `Transient` only escapes the retry policy through a bug, so it is
    /// reported against the fetch stage where network failures originate.
    pub fn stage(&self) -> Stage {
        match self {
            OisError::Config(_) => Stage::Config,
            OisError::Transient(_) | OisError::Fetch { .. } => Stage::Fetch,
            OisError::Data(_) => Stage::Data,
            OisError::Calculation(_) => Stage::Calculation,
            OisError::Store { .. } | OisError::StoreSetup { .. } => Stage::Store,
        }
    }
}

impl From<config::ConfigError> for OisError {
    fn from(err: config::ConfigError) -> Self {
        OisError::Config(err.to_string())
    }
}
