use crate::config::{RetryConfig, SourceConfig, SourceKind};
use crate::error::{OisError, Result};
use crate::models::{RawQuote, Tenor};
use crate::retry::{run_with_retry, RetryError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{error, info};

/// Capability to retrieve the current OIS quote curve
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Label used in logs
    fn name(&self) -> &str;

    /// Fetch one curve. Retryable failures are reported as `OisError::Transient`.
    async fn fetch(&self) -> Result<Vec<RawQuote>>;
}

/// Fetch the curve, retrying transient failures.
///
/// Exhausted or non-transient source failures become `OisError::Fetch`;
/// invalid payloads stay `OisError::Data`.
pub async fn fetch_curve(source: &dyn MarketDataSource, retry: &RetryConfig) -> Result<Vec<RawQuote>> {
    info!("Fetching OIS curve from {}", source.name());

    let result = run_with_retry("fetch", retry, move || source.fetch()).await;
    match result {
        Ok(quotes) => {
            info!("Fetched {} quotes from {}", quotes.len(), source.name());
            Ok(quotes)
        }
        Err(RetryError::Exhausted { attempts, last }) => {
            error!("Fetch from {} failed after {} attempts: {}", source.name(), attempts, last);
            Err(OisError::Fetch { attempts, reason: last.reason() })
        }
        Err(RetryError::Aborted { attempts, error: OisError::Fetch { reason, .. } }) => {
            error!("Fetch from {} failed: {}", source.name(), reason);
            Err(OisError::Fetch { attempts, reason })
        }
        Err(RetryError::Aborted { error, .. }) => {
            error!("Fetch from {} returned unusable data: {}", source.name(), error);
            Err(error)
        }
    }
}

/// Build the source described by the configuration
pub fn build_source(config: &SourceConfig) -> Result<Box<dyn MarketDataSource>> {
    match config.kind {
        SourceKind::Http => Ok(Box::new(HttpMarketDataSource::new(config)?)),
        SourceKind::File => Ok(Box::new(FileMarketDataSource::new(config)?)),
    }
}

/// Curve source served over HTTP as JSON
pub struct HttpMarketDataSource {
    client: Client,
    url: String,
    name: String,
    api_key: Option<(String, String)>,
}

impl HttpMarketDataSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| OisError::config("source.url is required for http sources"))?;

        let client = Client::builder()
            .timeout(config.retry.call_timeout())
            .build()
            .map_err(|e| OisError::config(format!("Failed to create HTTP client: {}", e)))?;

        let api_key = match &config.api_key_env {
            Some(var) => {
                let key = std::env::var(var).map_err(|_| {
                    OisError::config(format!("API key variable {} is not set", var))
                })?;
                Some((config.api_key_header.clone(), key))
            }
            None => None,
        };

        Ok(Self { client, url, name: config.name.clone(), api_key })
    }
}

#[async_trait]
impl MarketDataSource for HttpMarketDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<RawQuote>> {
        let fetched_at = Utc::now();

        let mut request = self.client.get(&self.url);
        if let Some((header, key)) = &self.api_key {
            request = request.header(header.as_str(), key.as_str());
        }

        let response = request.send().await.map_err(classify_request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let body = response.bytes().await.map_err(classify_request_error)?;
        parse_curve(&body, fetched_at, &self.name)
    }
}

/// Curve source read from a local JSON file
pub struct FileMarketDataSource {
    path: PathBuf,
    name: String,
}

impl FileMarketDataSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| OisError::config("source.path is required for file sources"))?;
        Ok(Self { path, name: config.name.clone() })
    }
}

#[async_trait]
impl MarketDataSource for FileMarketDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<RawQuote>> {
        let fetched_at = Utc::now();
        let body = tokio::fs::read(&self.path).await.map_err(|e| OisError::Fetch {
            attempts: 1,
            reason: format!("Failed to read {}: {}", self.path.display(), e),
        })?;
        parse_curve(&body, fetched_at, &self.name)
    }
}

/// Statuses worth retrying: server errors, request timeout and throttling
fn classify_status(status: StatusCode) -> OisError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        OisError::transient(format!("source responded with HTTP {}", status))
    } else {
        OisError::Fetch { attempts: 1, reason: format!("source responded with HTTP {}", status) }
    }
}

fn classify_request_error(err: reqwest::Error) -> OisError {
    if err.is_builder() {
        OisError::Fetch { attempts: 1, reason: format!("invalid request: {}", err) }
    } else if err.is_decode() {
        OisError::data(format!("undecodable response body: {}", err))
    } else {
        OisError::transient(format!("request failed: {}", err))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireCurve {
    Bare(Vec<WireQuote>),
    Envelope(WireEnvelope),
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    as_of: Option<String>,
    source: Option<String>,
    quotes: Option<Vec<WireQuote>>,
}

#[derive(Debug, Deserialize)]
struct WireQuote {
    tenor: Option<serde_json::Value>,
    rate: Option<serde_json::Value>,
    as_of: Option<String>,
}

/// Validate a curve payload into quotes sorted by tenor.
///
/// Accepts `{"as_of"?, "source"?, "quotes": [...]}` or a bare quote array. A quote's
/// own `as_of` wins over the envelope's, which defaults to `fetched_at`.
pub fn parse_curve(body: &[u8], fetched_at: DateTime<Utc>, default_source: &str) -> Result<Vec<RawQuote>> {
    let curve: WireCurve = serde_json::from_slice(body)
        .map_err(|e| OisError::data(format!("malformed curve payload: {}", e)))?;

    let (envelope_as_of, source, wire_quotes) = match curve {
        WireCurve::Bare(quotes) => (None, None, quotes),
        WireCurve::Envelope(envelope) => {
            let quotes = envelope
                .quotes
                .ok_or_else(|| OisError::data("curve payload has no quotes field"))?;
            (envelope.as_of, envelope.source, quotes)
        }
    };

    if wire_quotes.is_empty() {
        return Err(OisError::data("curve payload contains no quotes"));
    }

    let curve_as_of = match envelope_as_of {
        Some(raw) => parse_timestamp(&raw).map_err(|e| OisError::data(format!("curve {}", e)))?,
        None => fetched_at,
    };
    let source = source.unwrap_or_else(|| default_source.to_string());

    let mut quotes = wire_quotes
        .into_iter()
        .enumerate()
        .map(|(index, wire)| {
            parse_quote(wire, curve_as_of, &source)
                .map_err(|reason| OisError::data(format!("quote {}: {}", index, reason)))
        })
        .collect::<Result<Vec<_>>>()?;

    quotes.sort_by_key(|q| q.tenor);
    Ok(quotes)
}

fn parse_quote(
    wire: WireQuote,
    curve_as_of: DateTime<Utc>,
    source: &str,
) -> std::result::Result<RawQuote, String> {
    let tenor = match wire.tenor {
        Some(serde_json::Value::String(raw)) => Tenor::from_str(&raw)?,
        Some(other) => return Err(format!("tenor must be a string, got {}", other)),
        None => return Err("missing tenor".to_string()),
    };

    let rate = match wire.rate {
        Some(serde_json::Value::Number(n)) => parse_rate(&n.to_string())?,
        Some(serde_json::Value::String(raw)) => parse_rate(&raw)?,
        Some(other) => return Err(format!("rate must be numeric, got {}", other)),
        None => return Err("missing rate".to_string()),
    };
    if rate.is_sign_negative() && !rate.is_zero() {
        return Err(format!("rate {} for tenor {} is negative", rate, tenor));
    }

    let as_of = match wire.as_of {
        Some(raw) => parse_timestamp(&raw)?,
        None => curve_as_of,
    };

    Ok(RawQuote::new(tenor, rate, as_of, source))
}

/// Parse the textual form so the quote keeps exactly the precision it was sent with
fn parse_rate(raw: &str) -> std::result::Result<Decimal, String> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| format!("rate '{}' is not a finite decimal", raw))
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("timestamp '{}' is not RFC 3339: {}", raw, e))
}
