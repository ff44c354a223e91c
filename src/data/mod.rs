//! Upstream clients and normalized data models
//!
//! Each submodule talks to one upstream and turns its payload into the shapes
//! the rest of the crate works with. The helpers in this module do the shared
//! sanitization: numbers are always finite, timestamps are UTC.

pub mod chat;
pub mod donki;
pub mod prediction;
pub mod satellite;
pub mod swpc;
pub mod weather;

pub use chat::ChatClient;
pub use donki::{CmeEvent, DonkiClient, FlareEvent, StormEvent};
pub use prediction::{
    AlertLevel, MockProvider, PredictionClient, PredictionProvider, PredictionSnapshot,
    ProvidedPrediction,
};
pub use satellite::{SatelliteClient, SatellitePosition, SatelliteTrack};
pub use swpc::{
    AuroraPoint, KpReading, MagneticFieldSample, SolarWindSample, SwpcClient, SwpcWindow,
    XrayFluxSample,
};
pub use weather::{
    AirQuality, LocalConditions, ProviderFailure, WeatherClient, WeatherCondition, WeatherReport,
};

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fetch::FetchResult;

/// Identifies an upstream data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    SolarWind,
    Magnetometer,
    Kp,
    Xray,
    Aurora,
    Cme,
    Flare,
    Storm,
    Satellite,
    Weather,
    AirQuality,
    Prediction,
    Chat,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::SolarWind => "solar_wind",
            SourceId::Magnetometer => "magnetometer",
            SourceId::Kp => "kp",
            SourceId::Xray => "xray",
            SourceId::Aurora => "aurora",
            SourceId::Cme => "cme",
            SourceId::Flare => "flare",
            SourceId::Storm => "storm",
            SourceId::Satellite => "satellite",
            SourceId::Weather => "weather",
            SourceId::AirQuality => "air_quality",
            SourceId::Prediction => "prediction",
            SourceId::Chat => "chat",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider credential that never appears in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observer location used for weather, air quality and satellite passes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude above sea level in meters
    #[serde(default)]
    pub altitude_m: f64,
}

/// Coerces a JSON value into a finite number
///
/// Numbers and numeric strings are accepted; anything else, and any NaN or
/// infinity, becomes `0.0`.
pub fn coerce_f64(value: &Value) -> f64 {
    coerce_opt_f64(value).unwrap_or(0.0)
}

/// Like [`coerce_f64`] but keeps "missing" distinguishable as `None`
pub fn coerce_opt_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Parses the timestamp formats used by NOAA, DONKI and the prediction backend
///
/// Accepts RFC 3339, `2024-05-10 17:36:00.000`, `2024-05-10T17:36:00`,
/// `2024-05-10T17:36Z` and bare dates. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive_formats = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%MZ",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for format in naive_formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// A NOAA SWPC "table" payload: an array whose first row names the columns
///
/// Rows are positional; columns are looked up by header name with a fixed
/// fallback position for payloads whose header is missing a name.
#[derive(Debug, Clone)]
pub struct HeaderedTable {
    columns: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl HeaderedTable {
    /// Parses a header-row-prefixed JSON array
    pub fn parse(body: &str) -> FetchResult<Self> {
        let mut rows: Vec<Vec<Value>> = serde_json::from_str(body)?;
        if rows.is_empty() {
            return Ok(Self {
                columns: HashMap::new(),
                rows,
            });
        }

        let header = rows.remove(0);
        let columns = header
            .iter()
            .enumerate()
            .filter_map(|(i, name)| name.as_str().map(|n| (n.to_ascii_lowercase(), i)))
            .collect();

        Ok(Self { columns, rows })
    }

    /// Resolves a column index by header name, else `fallback`
    pub fn column(&self, name: &str, fallback: usize) -> usize {
        self.columns
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(fallback)
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }
}

/// Shared JSON null for lookups that fall back to "missing"
pub(crate) static NULL: Value = Value::Null;

/// Returns the cell at `index` or JSON null
pub fn cell(row: &[Value], index: usize) -> &Value {
    row.get(index).unwrap_or(&NULL)
}

/// Parses a cell holding a timestamp string
pub fn cell_timestamp(row: &[Value], index: usize) -> Option<DateTime<Utc>> {
    cell(row, index).as_str().and_then(parse_timestamp)
}
