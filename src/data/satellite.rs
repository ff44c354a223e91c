//! N2YO satellite position client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{coerce_f64, ApiKey, Observer, SourceId};
use crate::cache::{CachedData, CachedFetcher, ResponseCache};
use crate::config::{CacheTtls, Timeouts};
use crate::fetch::{FetchError, FetchRequest, FetchResult, TimedFetch};

/// Base URL for the N2YO REST API
pub const N2YO_BASE_URL: &str = "https://api.n2yo.com/rest/v1/satellite";

/// N2YO caps position requests at 300 seconds of samples
pub const MAX_POSITION_SECONDS: u32 = 300;

/// NORAD catalog number of the ISS
pub const ISS_NORAD_ID: u32 = 25544;

/// One predicted ground position of a satellite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatellitePosition {
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in km
    pub altitude_km: f64,
    /// Azimuth from the observer, degrees
    pub azimuth: f64,
    /// Elevation above the observer's horizon, degrees
    pub elevation: f64,
}

/// Positions for one satellite over the requested window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteTrack {
    pub norad_id: u32,
    pub name: String,
    pub positions: Vec<SatellitePosition>,
}

impl SatelliteTrack {
    /// Whether the satellite is above the observer's horizon at the first sample
    pub fn is_visible(&self) -> bool {
        self.positions.first().is_some_and(|p| p.elevation > 0.0)
    }
}

#[derive(Debug, Deserialize)]
struct N2yoResponse {
    #[serde(default)]
    info: Option<N2yoInfo>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    positions: Option<Vec<N2yoPosition>>,
}

#[derive(Debug, Deserialize)]
struct N2yoInfo {
    #[serde(default)]
    satid: Option<u32>,
    #[serde(default)]
    satname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct N2yoPosition {
    #[serde(default)]
    satlatitude: Value,
    #[serde(default)]
    satlongitude: Value,
    #[serde(default)]
    sataltitude: Value,
    #[serde(default)]
    azimuth: Value,
    #[serde(default)]
    elevation: Value,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Client for N2YO satellite positions
#[derive(Debug, Clone)]
pub struct SatelliteClient {
    base_url: String,
    api_key: ApiKey,
    positions: CachedFetcher<SatelliteTrack>,
}

impl SatelliteClient {
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
            positions: CachedFetcher::new(
                SourceId::Satellite,
                http,
                cache,
                ttls.satellite(),
                timeouts.data(),
                parse_positions,
            ),
        }
    }

    /// Fetches `seconds` one-second position samples for `norad_id` as seen
    /// from `observer`
    ///
    /// `seconds` is clamped to `1..=300`.
    pub async fn fetch_positions(
        &self,
        norad_id: u32,
        observer: &Observer,
        seconds: u32,
    ) -> FetchResult<CachedData<SatelliteTrack>> {
        let seconds = seconds.clamp(1, MAX_POSITION_SECONDS);
        let url = format!(
            "{}/positions/{}/{}/{}/{}/{}/?apiKey={}",
            self.base_url,
            norad_id,
            observer.latitude,
            observer.longitude,
            observer.altitude_m,
            seconds,
            self.api_key
        );
        let key = format!(
            "SAT_{}_{}_{}_{}_{}",
            norad_id, observer.latitude, observer.longitude, observer.altitude_m, seconds
        );
        self.positions.fetch(&key, FetchRequest::get(url)).await
    }
}

/// Parses an N2YO `positions` response
///
/// Samples without a timestamp are dropped; non-numeric fields become 0. A body
/// without `info` (N2YO's error shape) is a parse failure.
pub fn parse_positions(body: &str) -> FetchResult<SatelliteTrack> {
    let response: N2yoResponse = serde_json::from_str(body)?;
    let Some(info) = response.info else {
        let reason = response
            .error
            .unwrap_or_else(|| "response has no satellite info".to_string());
        return Err(FetchError::ParseFailure(reason));
    };

    let mut positions: Vec<SatellitePosition> = response
        .positions
        .unwrap_or_default()
        .iter()
        .filter_map(|p| {
            Some(SatellitePosition {
                time: DateTime::from_timestamp(p.timestamp?, 0)?,
                latitude: coerce_f64(&p.satlatitude),
                longitude: coerce_f64(&p.satlongitude),
                altitude_km: coerce_f64(&p.sataltitude),
                azimuth: coerce_f64(&p.azimuth),
                elevation: coerce_f64(&p.elevation),
            })
        })
        .collect();
    positions.sort_by_key(|p| p.time);

    Ok(SatelliteTrack {
        norad_id: info.satid.unwrap_or_default(),
        name: info.satname.unwrap_or_default(),
        positions,
    })
}
