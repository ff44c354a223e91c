//! NASA DONKI event catalog client
//!
//! Fetches coronal mass ejections, solar flares and geomagnetic storms from the
//! Space Weather Database Of Notifications, Knowledge, Information (DONKI).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{coerce_opt_f64, parse_timestamp, ApiKey, SourceId};
use crate::cache::{CachedData, CachedFetcher, ResponseCache};
use crate::config::{CacheTtls, Timeouts};
use crate::fetch::{FetchRequest, FetchResult, TimedFetch};

/// Base URL for the NASA DONKI API
pub const DONKI_BASE_URL: &str = "https://api.nasa.gov/DONKI";

/// NASA's public rate-limited key
pub const NASA_DEMO_KEY: &str = "DEMO_KEY";

/// A coronal mass ejection with its selected analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmeEvent {
    pub activity_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub source_location: Option<String>,
    pub note: Option<String>,
    /// Speed from the selected analysis, km/s
    pub speed_km_s: Option<f64>,
    pub half_angle_deg: Option<f64>,
    /// Analysis type code (S, C, O, R, ER)
    pub cme_type: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A solar flare
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlareEvent {
    pub flare_id: String,
    pub begin_time: Option<DateTime<Utc>>,
    pub peak_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// GOES class, e.g. "X1.1"
    pub class_type: Option<String>,
    pub source_location: Option<String>,
    pub active_region: Option<u32>,
}

impl FlareEvent {
    /// Peak flux implied by the class string, used for ranking
    pub fn peak_flux(&self) -> Option<f64> {
        self.class_type.as_deref().and_then(class_to_flux)
    }
}

/// A geomagnetic storm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormEvent {
    pub storm_id: String,
    pub start_time: Option<DateTime<Utc>>,
    /// Highest observed Kp during the storm
    pub max_kp: f64,
    pub kp_observations: usize,
}

/// Client for NASA DONKI catalogs
#[derive(Debug, Clone)]
pub struct DonkiClient {
    base_url: String,
    api_key: ApiKey,
    cmes: CachedFetcher<Vec<CmeEvent>>,
    flares: CachedFetcher<Vec<FlareEvent>>,
    storms: CachedFetcher<Vec<StormEvent>>,
}

impl DonkiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        http: TimedFetch,
        cache: ResponseCache,
        timeouts: &Timeouts,
        ttls: &CacheTtls,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: ApiKey::new(api_key),
            cmes: CachedFetcher::new(
                SourceId::Cme,
                http.clone(),
                cache.clone(),
                ttls.donki(),
                timeouts.data(),
                parse_cmes,
            ),
            flares: CachedFetcher::new(
                SourceId::Flare,
                http.clone(),
                cache.clone(),
                ttls.donki(),
                timeouts.data(),
                parse_flares,
            ),
            storms: CachedFetcher::new(
                SourceId::Storm,
                http,
                cache,
                ttls.donki(),
                timeouts.data(),
                parse_storms,
            ),
        }
    }

    fn request(&self, catalog: &str, start: NaiveDate, end: NaiveDate) -> FetchRequest {
        FetchRequest::get(format!(
            "{}/{}?startDate={}&endDate={}&api_key={}",
            self.base_url,
            catalog,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
            self.api_key
        ))
    }

    /// Generates the cache key for a catalog and date range
    fn cache_key(catalog: &str, start: NaiveDate, end: NaiveDate) -> String {
        format!("{}_{}_{}", catalog, start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
    }

    /// Fetches CMEs that started between `start` and `end` inclusive
    pub async fn fetch_cmes(&self, start: NaiveDate, end: NaiveDate) -> FetchResult<CachedData<Vec<CmeEvent>>> {
        self.cmes
            .fetch(&Self::cache_key("CME", start, end), self.request("CME", start, end))
            .await
    }

    /// Fetches solar flares between `start` and `end` inclusive
    pub async fn fetch_flares(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FetchResult<CachedData<Vec<FlareEvent>>> {
        self.flares
            .fetch(&Self::cache_key("FLR", start, end), self.request("FLR", start, end))
            .await
    }

    /// Fetches geomagnetic storms between `start` and `end` inclusive
    pub async fn fetch_storms(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FetchResult<CachedData<Vec<StormEvent>>> {
        self.storms
            .fetch(&Self::cache_key("GST", start, end), self.request("GST", start, end))
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCme {
    #[serde(rename = "activityID", default)]
    activity_id: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    source_location: Option<String>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    cme_analyses: Option<Vec<RawCmeAnalysis>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCmeAnalysis {
    #[serde(default)]
    is_most_accurate: Option<bool>,
    #[serde(default)]
    speed: Value,
    #[serde(default)]
    half_angle: Value,
    #[serde(default)]
    latitude: Value,
    #[serde(default)]
    longitude: Value,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFlare {
    #[serde(rename = "flrID", default)]
    flr_id: Option<String>,
    #[serde(default)]
    begin_time: Option<String>,
    #[serde(default)]
    peak_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    class_type: Option<String>,
    #[serde(default)]
    source_location: Option<String>,
    #[serde(default)]
    active_region_num: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStorm {
    #[serde(rename = "gstID", default)]
    gst_id: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    all_kp_index: Option<Vec<RawKpObservation>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKpObservation {
    #[serde(default)]
    kp_index: Value,
}

/// Deserializes a DONKI array; a blank body means "no events"
fn parse_catalog<T: serde::de::DeserializeOwned>(body: &str) -> FetchResult<Vec<T>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let items: Option<Vec<T>> = serde_json::from_str(body)?;
    Ok(items.unwrap_or_default())
}

fn parse_time_field(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(parse_timestamp)
}

/// Picks the analysis flagged most accurate, else the first one
fn select_analysis(analyses: &[RawCmeAnalysis]) -> Option<&RawCmeAnalysis> {
    analyses
        .iter()
        .find(|a| a.is_most_accurate == Some(true))
        .or_else(|| analyses.first())
}

/// Parses the DONKI `CME` catalog
pub fn parse_cmes(body: &str) -> FetchResult<Vec<CmeEvent>> {
    let raw: Vec<RawCme> = parse_catalog(body)?;

    Ok(raw
        .into_iter()
        .map(|cme| {
            let analyses = cme.cme_analyses.unwrap_or_default();
            let analysis = select_analysis(&analyses);
            CmeEvent {
                activity_id: cme.activity_id.unwrap_or_default(),
                start_time: parse_time_field(cme.start_time.as_deref()),
                source_location: cme.source_location.filter(|s| !s.is_empty()),
                note: cme.note.filter(|s| !s.is_empty()),
                speed_km_s: analysis.and_then(|a| coerce_opt_f64(&a.speed)),
                half_angle_deg: analysis.and_then(|a| coerce_opt_f64(&a.half_angle)),
                cme_type: analysis.and_then(|a| a.kind.clone()),
                latitude: analysis.and_then(|a| coerce_opt_f64(&a.latitude)),
                longitude: analysis.and_then(|a| coerce_opt_f64(&a.longitude)),
            }
        })
        .collect())
}

/// Parses the DONKI `FLR` catalog
pub fn parse_flares(body: &str) -> FetchResult<Vec<FlareEvent>> {
    let raw: Vec<RawFlare> = parse_catalog(body)?;

    Ok(raw
        .into_iter()
        .map(|flr| FlareEvent {
            flare_id: flr.flr_id.unwrap_or_default(),
            begin_time: parse_time_field(flr.begin_time.as_deref()),
            peak_time: parse_time_field(flr.peak_time.as_deref()),
            end_time: parse_time_field(flr.end_time.as_deref()),
            class_type: flr.class_type.filter(|s| !s.is_empty()),
            source_location: flr.source_location.filter(|s| !s.is_empty()),
            active_region: flr.active_region_num,
        })
        .collect())
}

/// Parses the DONKI `GST` catalog
pub fn parse_storms(body: &str) -> FetchResult<Vec<StormEvent>> {
    let raw: Vec<RawStorm> = parse_catalog(body)?;

    Ok(raw
        .into_iter()
        .map(|gst| {
            let observations = gst.all_kp_index.unwrap_or_default();
            let max_kp = observations
                .iter()
                .filter_map(|o| coerce_opt_f64(&o.kp_index))
                .fold(0.0, f64::max);
            StormEvent {
                storm_id: gst.gst_id.unwrap_or_default(),
                start_time: parse_time_field(gst.start_time.as_deref()),
                max_kp,
                kp_observations: observations.len(),
            }
        })
        .collect())
}

/// Converts a GOES class string ("M2.3") to peak flux in W/m²
pub fn class_to_flux(class: &str) -> Option<f64> {
    let class = class.trim();
    let mut chars = class.chars();
    let base = match chars.next()?.to_ascii_uppercase() {
        'X' => 1e-4,
        'M' => 1e-5,
        'C' => 1e-6,
        'B' => 1e-7,
        'A' => 1e-8,
        _ => return None,
    };
    let magnitude = chars.as_str();
    let magnitude = if magnitude.is_empty() {
        1.0
    } else {
        magnitude.parse::<f64>().ok()?
    };
    Some(base * magnitude)
}

/// Latest CME by start time
pub fn latest_cme(events: &[CmeEvent]) -> Option<&CmeEvent> {
    events.iter().filter(|e| e.start_time.is_some()).max_by_key(|e| e.start_time)
}

/// Strongest flare by class
pub fn strongest_flare(events: &[FlareEvent]) -> Option<&FlareEvent> {
    events
        .iter()
        .filter_map(|e| e.peak_flux().map(|flux| (flux, e)))
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, e)| e)
}
