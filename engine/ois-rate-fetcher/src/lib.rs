//! OIS Rate Fetcher
//!
//! Single-shot job that fetches an overnight index swap curve, derives the one-month
//! OIS rate and the implied overnight policy rate, and upserts both into a keyed
//! metric table. Each stage must succeed before the next one runs.

pub mod calculator;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod store;

#[cfg(test)]
mod testing;

pub use calculator::{CalculatorConfig, ImpliedRateTransform, RateCalculator};
pub use config::FetcherConfig;
pub use error::{OisError, Result, Stage};
pub use fetcher::{FileMarketDataSource, HttpMarketDataSource, MarketDataSource};
pub use models::*;
pub use pipeline::OisPipeline;
pub use store::{InMemoryMetricStore, MetricStore, PgMetricStore};
