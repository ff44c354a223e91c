//! CME prediction backend client and provider selection
//!
//! The prediction backend serves a health document at `/` and model output
//! under `/api`. When the backend is not live, a deterministic mock provider
//! stands in so callers always get a snapshot, tagged with its provenance.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{coerce_f64, parse_timestamp, SourceId};
use crate::cache::{CachedData, CachedFetcher, ResponseCache};
use crate::config::{CacheTtls, Timeouts};
use crate::fetch::{FetchError, FetchRequest, FetchResult, TimedFetch};
use crate::health::HealthProbe;

/// Longest forecast horizon the backend supports
pub const MAX_FORECAST_HOURS: u32 = 72;

/// Alert tier for a CME prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    None,
    Low,
    Moderate,
    High,
    Extreme,
}

impl AlertLevel {
    /// Alert tier for a raw probability in `[0, 1]`
    pub fn from_probability(probability: f64) -> Self {
        match probability {
            p if p >= 0.9 => AlertLevel::Extreme,
            p if p >= 0.7 => AlertLevel::High,
            p if p >= 0.5 => AlertLevel::Moderate,
            p if p >= 0.3 => AlertLevel::Low,
            _ => AlertLevel::None,
        }
    }

    /// Parses the backend's label, case-insensitively
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "NONE" => Some(AlertLevel::None),
            "LOW" => Some(AlertLevel::Low),
            "MODERATE" => Some(AlertLevel::Moderate),
            "HIGH" => Some(AlertLevel::High),
            "EXTREME" => Some(AlertLevel::Extreme),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::None => "NONE",
            AlertLevel::Low => "LOW",
            AlertLevel::Moderate => "MODERATE",
            AlertLevel::High => "HIGH",
            AlertLevel::Extreme => "EXTREME",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A CME probability prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSnapshot {
    /// CME probability, percent (0-100)
    pub probability: f64,
    /// Expected arrival in hours
    pub arrival_hours: f64,
    /// Model confidence, percent (0-100)
    pub confidence: f64,
    pub alert_level: AlertLevel,
}

impl PredictionSnapshot {
    /// Human-readable arrival estimate
    pub fn arrival_eta(&self) -> String {
        format_eta(self.arrival_hours)
    }
}

/// A snapshot together with whether it came from the live backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidedPrediction {
    pub snapshot: PredictionSnapshot,
    pub is_live: bool,
}

impl ProvidedPrediction {
    pub fn mock() -> Self {
        Self {
            snapshot: MockProvider.snapshot(),
            is_live: false,
        }
    }
}

/// Backend health document served at `/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl BackendHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Forecast for a bounded horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub period_hours: u32,
    pub snapshot: PredictionSnapshot,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Validation metrics reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub precision: Option<f64>,
    #[serde(default)]
    pub recall: Option<f64>,
    #[serde(default)]
    pub f1_score: Option<f64>,
    #[serde(default)]
    pub auc_roc: Option<f64>,
    #[serde(default)]
    pub validation_period: Option<String>,
    #[serde(default)]
    pub total_events_tested: Option<u32>,
    #[serde(default)]
    pub true_positives: Option<u32>,
    #[serde(default)]
    pub false_positives: Option<u32>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Model description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub validation_source: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
    /// Free-form architecture description
    #[serde(default)]
    pub architecture: Value,
    /// Free-form input description
    #[serde(default)]
    pub input: Value,
}

/// Relative importance of one model input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeight {
    pub feature: String,
    pub importance: f64,
}

/// Recent solar wind series as seen by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeSeries {
    pub data_source: String,
    pub timestamps: Vec<DateTime<Utc>>,
    /// Column name to values, aligned with `timestamps`
    pub columns: BTreeMap<String, Vec<f64>>,
}

/// Client for the CME prediction backend
#[derive(Debug, Clone)]
pub struct PredictionClient {
    base_url: String,
    http: TimedFetch,
    timeout: Duration,
    accuracy: CachedFetcher<AccuracyMetrics>,
    model_info: CachedFetcher<ModelInfo>,
    features: CachedFetcher<Vec<FeatureWeight>>,
}

impl PredictionClient {
    pub fn new(
        base_url: impl Into<String>,
        http: TimedFetch,
        cache: ResponseCache,
        timeouts: &Timeouts,
        ttls: &CacheTtls,
    ) -> Self {
        // Live model output goes straight to `http`; only the metadata endpoints are cached.
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: http.clone(),
            timeout: timeouts.data(),
            accuracy: CachedFetcher::new(
                SourceId::Prediction,
                http.clone(),
                cache.clone(),
                ttls.model(),
                timeouts.data(),
                parse_accuracy,
            ),
            model_info: CachedFetcher::new(
                SourceId::Prediction,
                http.clone(),
                cache.clone(),
                ttls.model(),
                timeouts.data(),
                parse_model_info,
            ),
            features: CachedFetcher::new(
                SourceId::Prediction,
                http,
                cache,
                ttls.model(),
                timeouts.data(),
                parse_feature_importance,
            ),
        }
    }

    fn get(&self, path: &str) -> FetchRequest {
        FetchRequest::get(format!("{}{}", self.base_url, path))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One health check against `/` with the given budget
    pub async fn health(&self, timeout: Duration) -> FetchResult<BackendHealth> {
        let raw = self.http.fetch(&self.get("/"), timeout).await?.error_for_status()?;
        Ok(serde_json::from_str(&raw.body)?)
    }

    /// Current prediction from live solar wind data
    pub async fn fetch_prediction(&self) -> FetchResult<PredictionSnapshot> {
        self.http
            .fetch_parsed(&self.get("/api/predict"), self.timeout, parse_prediction)
            .await
    }

    /// Forecast for the next `hours`, clamped to `1..=72`
    pub async fn fetch_forecast(&self, hours: u32) -> FetchResult<Forecast> {
        let hours = hours.clamp(1, MAX_FORECAST_HOURS);
        let request = self.get(&format!("/api/forecast/{}", hours));
        self.http.fetch_parsed(&request, self.timeout, parse_forecast).await
    }

    pub async fn fetch_accuracy(&self) -> FetchResult<CachedData<AccuracyMetrics>> {
        self.accuracy.fetch("MODEL_accuracy", self.get("/api/accuracy")).await
    }

    pub async fn fetch_model_info(&self) -> FetchResult<CachedData<ModelInfo>> {
        self.model_info.fetch("MODEL_info", self.get("/api/model-info")).await
    }

    /// Feature importance, most important first
    pub async fn fetch_feature_importance(&self) -> FetchResult<CachedData<Vec<FeatureWeight>>> {
        self.features
            .fetch("MODEL_features", self.get("/api/feature-importance"))
            .await
    }

    pub async fn fetch_realtime(&self) -> FetchResult<RealtimeSeries> {
        self.http
            .fetch_parsed(&self.get("/api/data/realtime"), self.timeout, parse_realtime)
            .await
    }
}

/// Deterministic stand-in used when the backend is not live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockProvider;

impl MockProvider {
    pub fn snapshot(&self) -> PredictionSnapshot {
        let probability = 35.0;
        PredictionSnapshot {
            probability,
            arrival_hours: 52.0,
            confidence: 60.0,
            alert_level: AlertLevel::from_probability(probability / 100.0),
        }
    }
}

/// Source of prediction snapshots for one refresh pass
#[derive(Debug, Clone)]
pub enum PredictionProvider {
    Live(PredictionClient),
    Mock(MockProvider),
}

impl PredictionProvider {
    /// Probes the backend and picks the live or mock variant
    pub async fn select(probe: &HealthProbe, client: &PredictionClient) -> Self {
        if probe.is_live(client).await {
            debug!(backend = %client.base_url(), "Prediction backend is live");
            PredictionProvider::Live(client.clone())
        } else {
            info!(backend = %client.base_url(), "Prediction backend not live, using mock provider");
            PredictionProvider::Mock(MockProvider)
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, PredictionProvider::Live(_))
    }

    /// Produces a snapshot; only the live variant can fail
    pub async fn provide(&self) -> FetchResult<ProvidedPrediction> {
        match self {
            PredictionProvider::Live(client) => Ok(ProvidedPrediction {
                snapshot: client.fetch_prediction().await?,
                is_live: true,
            }),
            PredictionProvider::Mock(mock) => Ok(ProvidedPrediction {
                snapshot: mock.snapshot(),
                is_live: false,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prediction: Option<RawSnapshot>,
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    cme_probability: Value,
    #[serde(default)]
    arrival_time_hours: Value,
    #[serde(default)]
    confidence: Value,
    #[serde(default)]
    alert_level: Option<String>,
}

impl RawSnapshot {
    fn normalize(&self) -> PredictionSnapshot {
        let probability = coerce_f64(&self.cme_probability).clamp(0.0, 100.0);
        let alert_level = self
            .alert_level
            .as_deref()
            .and_then(AlertLevel::parse)
            .unwrap_or_else(|| AlertLevel::from_probability(probability / 100.0));
        PredictionSnapshot {
            probability,
            arrival_hours: coerce_f64(&self.arrival_time_hours).max(0.0),
            confidence: coerce_f64(&self.confidence).clamp(0.0, 100.0),
            alert_level,
        }
    }
}

/// Parses `/api/predict`
///
/// `status: "error"` is a parse failure carrying the backend's message.
pub fn parse_prediction(body: &str) -> FetchResult<PredictionSnapshot> {
    let response: PredictResponse = serde_json::from_str(body)?;
    if response.status.as_deref() == Some("error") {
        return Err(FetchError::ParseFailure(
            response.error.unwrap_or_else(|| "prediction failed".to_string()),
        ));
    }
    response
        .prediction
        .map(|raw| raw.normalize())
        .ok_or_else(|| FetchError::ParseFailure("missing prediction".to_string()))
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    forecast_period_hours: Option<u32>,
    #[serde(default)]
    generated_at: Option<String>,
    #[serde(flatten)]
    snapshot: RawSnapshot,
}

/// Parses `/api/forecast/{hours}`
pub fn parse_forecast(body: &str) -> FetchResult<Forecast> {
    let response: ForecastResponse = serde_json::from_str(body)?;
    Ok(Forecast {
        period_hours: response.forecast_period_hours.unwrap_or(0),
        snapshot: response.snapshot.normalize(),
        generated_at: response.generated_at.as_deref().and_then(parse_timestamp),
    })
}

pub fn parse_accuracy(body: &str) -> FetchResult<AccuracyMetrics> {
    Ok(serde_json::from_str(body)?)
}

pub fn parse_model_info(body: &str) -> FetchResult<ModelInfo> {
    Ok(serde_json::from_str(body)?)
}

#[derive(Debug, Deserialize)]
struct FeatureImportanceResponse {
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    importance: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Parses `/api/feature-importance`, most important first
pub fn parse_feature_importance(body: &str) -> FetchResult<Vec<FeatureWeight>> {
    let response: FeatureImportanceResponse = serde_json::from_str(body)?;
    if let Some(error) = response.error {
        return Err(FetchError::ParseFailure(error));
    }

    let mut weights: Vec<FeatureWeight> = response
        .features
        .into_iter()
        .zip(response.importance.iter())
        .map(|(feature, importance)| FeatureWeight {
            feature,
            importance: coerce_f64(importance),
        })
        .collect();
    weights.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    Ok(weights)
}

#[derive(Debug, Deserialize)]
struct RealtimeResponse {
    #[serde(default)]
    data_source: String,
    #[serde(default)]
    timestamps: Vec<String>,
    #[serde(default)]
    values: BTreeMap<String, Vec<Value>>,
}

/// Parses `/api/data/realtime`
///
/// Timestamps that fail to parse drop the whole row across every column.
pub fn parse_realtime(body: &str) -> FetchResult<RealtimeSeries> {
    let response: RealtimeResponse = serde_json::from_str(body)?;
    let parsed: Vec<Option<DateTime<Utc>>> = response
        .timestamps
        .iter()
        .map(|t| parse_timestamp(t))
        .collect();

    let columns = response
        .values
        .into_iter()
        .map(|(name, values)| {
            let cleaned = parsed
                .iter()
                .enumerate()
                .filter(|(_, t)| t.is_some())
                .map(|(i, _)| values.get(i).map(coerce_f64).unwrap_or(0.0))
                .collect();
            (name, cleaned)
        })
        .collect();

    Ok(RealtimeSeries {
        data_source: response.data_source,
        timestamps: parsed.into_iter().flatten().collect(),
        columns,
    })
}

/// Formats an arrival estimate in minutes, hours or days
pub fn format_eta(hours: f64) -> String {
    if hours < 1.0 {
        format!("{} minutes", (hours * 60.0) as i64)
    } else if hours < 24.0 {
        format!("{:.1} hours", hours)
    } else {
        format!("{:.1} days", hours / 24.0)
    }
}
