use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Year fractions are compared on a grid of 1/4380 year, the smallest grid on
/// which days (1/365), weeks and months (1/12) are all whole numbers.
const UNITS_PER_YEAR: u64 = 4380;
const UNITS_PER_DAY: u64 = UNITS_PER_YEAR / 365;
const UNITS_PER_WEEK: u64 = UNITS_PER_DAY * 7;
const UNITS_PER_MONTH: u64 = UNITS_PER_YEAR / 12;

/// Unit of a curve tenor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenorUnit {
    Day,
    Week,
    Month,
    Year,
}

impl TenorUnit {
    fn suffix(&self) -> char {
        match self {
            TenorUnit::Day => 'D',
            TenorUnit::Week => 'W',
            TenorUnit::Month => 'M',
            TenorUnit::Year => 'Y',
        }
    }

    fn units(&self) -> u64 {
        match self {
            TenorUnit::Day => UNITS_PER_DAY,
            TenorUnit::Week => UNITS_PER_WEEK,
            TenorUnit::Month => UNITS_PER_MONTH,
            TenorUnit::Year => UNITS_PER_YEAR,
        }
    }
}

/// Maturity point on a rate curve, e.g. `1W`, `1M`, `3M`.
///
/// Tenors compare by maturity, so `12M` and `1Y` are equal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tenor {
    count: u32,
    unit: TenorUnit,
}

impl Tenor {
    pub const ONE_MONTH: Tenor = Tenor { count: 1, unit: TenorUnit::Month };

    pub fn new(count: u32, unit: TenorUnit) -> Option<Self> {
        (count > 0).then_some(Self { count, unit })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn unit(&self) -> TenorUnit {
        self.unit
    }

    /// Maturity in 1/4380ths of a year
    pub fn year_units(&self) -> u64 {
        u64::from(self.count) * self.unit.units()
    }
}

impl PartialEq for Tenor {
    fn eq(&self, other: &Self) -> bool {
        self.year_units() == other.year_units()
    }
}

impl Eq for Tenor {}

impl Hash for Tenor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.year_units().hash(state);
    }
}

impl PartialOrd for Tenor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tenor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.year_units().cmp(&other.year_units())
    }
}

impl fmt::Display for Tenor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

impl FromStr for Tenor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        // Overnight, tom-next and spot-next are all one-day deposits
        if matches!(normalized.as_str(), "ON" | "O/N" | "TN" | "T/N" | "SN" | "S/N") {
            return Ok(Tenor { count: 1, unit: TenorUnit::Day });
        }

        let mut chars = normalized.chars();
        let unit = match chars.next_back() {
            Some('D') => TenorUnit::Day,
            Some('W') => TenorUnit::Week,
            Some('M') => TenorUnit::Month,
            Some('Y') => TenorUnit::Year,
            _ => return Err(format!("unrecognised tenor '{}'", s)),
        };
        let count: u32 = chars
            .as_str()
            .parse()
            .map_err(|_| format!("unrecognised tenor '{}'", s))?;

        Tenor::new(count, unit).ok_or_else(|| format!("tenor '{}' must be positive", s))
    }
}

impl TryFrom<String> for Tenor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Tenor> for String {
    fn from(tenor: Tenor) -> Self {
        tenor.to_string()
    }
}

/// One point on the market curve at fetch time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    pub tenor: Tenor,
    /// Annualised rate in percent
    pub rate: Decimal,
    pub as_of: DateTime<Utc>,
    pub source: String,
}

impl RawQuote {
    pub fn new(tenor: Tenor, rate: Decimal, as_of: DateTime<Utc>, source: impl Into<String>) -> Self {
        Self { tenor, rate, as_of, source: source.into() }
    }
}

/// The two metrics derived on every run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricId {
    /// Calculated one-month OIS rate
    Ois1m,
    /// Implied overnight policy rate
    ImpliedFf,
}

impl MetricId {
    pub const ALL: [MetricId; 2] = [MetricId::Ois1m, MetricId::ImpliedFf];
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricId::Ois1m => f.write_str("OIS_1M"),
            MetricId::ImpliedFf => f.write_str("IMPLIED_FF"),
        }
    }
}

/// A derived, named, timestamped value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub metric_id: MetricId,
    /// Value in percent
    pub value: Decimal,
    pub as_of: DateTime<Utc>,
}

/// Both metrics of one run, sharing a timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedRates {
    pub as_of: DateTime<Utc>,
    pub ois_1m: Metric,
    pub implied_ff: Metric,
}

impl DerivedRates {
    pub fn new(as_of: DateTime<Utc>, ois_1m: Decimal, implied_ff: Decimal) -> Self {
        Self {
            as_of,
            ois_1m: Metric { metric_id: MetricId::Ois1m, value: ois_1m, as_of },
            implied_ff: Metric { metric_id: MetricId::ImpliedFf, value: implied_ff, as_of },
        }
    }

    pub fn metrics(&self) -> [&Metric; 2] {
        [&self.ois_1m, &self.implied_ff]
    }
}

/// Persisted form of a metric, keyed by `(metric_id, timestamp_ms)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageRecord {
    /// Configured identifier of the metric
    pub metric_id: String,
    /// `as_of` as UTC epoch milliseconds
    pub timestamp_ms: i64,
    pub value: Decimal,
}

impl StorageRecord {
    pub fn new(metric_id: impl Into<String>, as_of: DateTime<Utc>, value: Decimal) -> Self {
        Self { metric_id: metric_id.into(), timestamp_ms: as_of.timestamp_millis(), value }
    }

    pub fn key(&self) -> (String, i64) {
        (self.metric_id.clone(), self.timestamp_ms)
    }
}

/// Summary of one completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub as_of: DateTime<Utc>,
    pub ois_1m: Decimal,
    pub implied_ff: Decimal,
    pub records_written: usize,
    pub dry_run: bool,
}
