use crate::calculator::RateCalculator;
use crate::config::FetcherConfig;
use crate::error::Result;
use crate::fetcher::{build_source, fetch_curve, MarketDataSource};
use crate::models::{DerivedRates, RunReport, StorageRecord};
use crate::store::{persist_records, prepare_store, MetricStore, PgMetricStore};
use tracing::info;

/// One fetch → derive → persist cycle
pub struct OisPipeline {
    config: FetcherConfig,
    source: Box<dyn MarketDataSource>,
    calculator: RateCalculator,
    store: Option<Box<dyn MetricStore>>,
}

impl OisPipeline {
    /// Create a pipeline from explicit components. Without a store, runs are dry runs.
    pub fn new(
        config: FetcherConfig,
        source: Box<dyn MarketDataSource>,
        store: Option<Box<dyn MetricStore>>,
    ) -> Self {
        let calculator = RateCalculator::new(config.calculator.clone());
        Self { config, source, calculator, store }
    }

    /// Create the configured source and, unless `dry_run`, the Postgres store.
    /// Nothing is contacted until `run`.
    pub async fn from_config(config: FetcherConfig, dry_run: bool) -> Result<Self> {
        let source = build_source(&config.source)?;

        let store: Option<Box<dyn MetricStore>> = if dry_run {
            None
        } else {
            Some(Box::new(PgMetricStore::new(&config.store)?))
        };

        Ok(Self::new(config, source, store))
    }

    /// Fetch the curve and derive both metrics
    pub async fn compute(&self) -> Result<DerivedRates> {
        let quotes = fetch_curve(self.source.as_ref(), &self.config.source.retry).await?;
        self.calculator.derive(&quotes)
    }

    /// Storage records for the derived metrics under their configured identifiers
    pub fn records_for(&self, rates: &DerivedRates) -> Vec<StorageRecord> {
        rates
            .metrics()
            .iter()
            .map(|metric| {
                StorageRecord::new(
                    self.config.metrics.id_for(metric.metric_id),
                    metric.as_of,
                    metric.value,
                )
            })
            .collect()
    }

    /// Run the full cycle. Later stages never run once an earlier one fails.
    pub async fn run(&self) -> Result<RunReport> {
        let rates = self.compute().await?;

        let records_written = match &self.store {
            Some(store) => {
                prepare_store(store.as_ref(), &self.config.store.retry).await?;
                let records = self.records_for(&rates);
                persist_records(store.as_ref(), &records, &self.config.store.retry).await?
            }
            None => {
                info!("Dry run: skipping store");
                0
            }
        };

        let report = RunReport {
            as_of: rates.as_of,
            ois_1m: rates.ois_1m.value,
            implied_ff: rates.implied_ff.value,
            records_written,
            dry_run: self.store.is_none(),
        };

        info!(
            "Run complete: OIS 1M {}%, implied policy rate {}%, as of {}, {} record(s) written",
            report.ois_1m, report.implied_ff, report.as_of, report.records_written
        );

        Ok(report)
    }
}
