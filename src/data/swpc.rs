//! NOAA SWPC real-time products client
//!
//! Fetches DSCOVR solar wind plasma and magnetometer data, the planetary Kp
//! index, GOES X-ray flux and the OVATION aurora nowcast from
//! `services.swpc.noaa.gov`, and sanitizes them into finite readings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{cell, cell_timestamp, coerce_f64, parse_timestamp, HeaderedTable, SourceId, NULL};
use crate::cache::{CachedData, CachedFetcher, ResponseCache};
use crate::config::{CacheTtls, Timeouts};
use crate::fetch::{FetchRequest, FetchResult, TimedFetch};

/// Base URL for NOAA SWPC
pub const SWPC_BASE_URL: &str = "https://services.swpc.noaa.gov";

/// Only the long-wavelength GOES channel defines flare classes
const XRAY_FLARE_CHANNEL: &str = "0.1-0.8nm";

/// One solar wind plasma sample from DSCOVR at L1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarWindSample {
    pub time: DateTime<Utc>,
    /// Bulk speed in km/s, always > 0
    pub speed_km_s: f64,
    /// Proton density in p/cm³
    pub density_p_cm3: f64,
    /// Temperature in Kelvin
    pub temperature_k: f64,
}

/// One interplanetary magnetic field sample (GSM coordinates)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagneticFieldSample {
    pub time: DateTime<Utc>,
    pub bx_nt: f64,
    pub by_nt: f64,
    pub bz_nt: f64,
    /// Total field magnitude
    pub bt_nt: f64,
}

/// Planetary Kp index reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpReading {
    pub time: DateTime<Utc>,
    pub kp: f64,
}

/// GOES X-ray flux sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrayFluxSample {
    pub time: DateTime<Utc>,
    /// Flux in W/m²
    pub flux: f64,
    pub energy: String,
}

/// A single cell of the aurora probability grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuroraPoint {
    /// Longitude in degrees, normalized to [-180, 180)
    pub longitude: f64,
    pub latitude: f64,
    /// Aurora probability in percent
    pub intensity: f64,
}

/// OVATION aurora nowcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuroraNowcast {
    pub observation_time: Option<DateTime<Utc>>,
    pub forecast_time: Option<DateTime<Utc>>,
    /// Grid cells with non-zero probability
    pub points: Vec<AuroraPoint>,
}

impl AuroraNowcast {
    pub fn max_intensity(&self) -> f64 {
        self.points.iter().map(|p| p.intensity).fold(0.0, f64::max)
    }
}

/// Time span of the SWPC solar wind products
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwpcWindow {
    Day,
    Week,
}

impl SwpcWindow {
    fn product_suffix(&self) -> &'static str {
        match self {
            SwpcWindow::Day => "1-day",
            SwpcWindow::Week => "7-day",
        }
    }
}

/// Client for NOAA SWPC JSON products
#[derive(Debug, Clone)]
pub struct SwpcClient {
    base_url: String,
    plasma: CachedFetcher<Vec<SolarWindSample>>,
    mag: CachedFetcher<Vec<MagneticFieldSample>>,
    kp: CachedFetcher<Vec<KpReading>>,
    xray: CachedFetcher<Vec<XrayFluxSample>>,
    aurora: CachedFetcher<AuroraNowcast>,
}

impl SwpcClient {
    pub fn new(
        base_url: impl Into<String>,
        http: TimedFetch,
        cache: ResponseCache,
        timeouts: &Timeouts,
        ttls: &CacheTtls,
    ) -> Self {
        let plasma = CachedFetcher::new(
            SourceId::SolarWind,
            http.clone(),
            cache.clone(),
            ttls.swpc(),
            timeouts.data(),
            parse_plasma,
        );
        let mag = CachedFetcher::new(
            SourceId::Magnetometer,
            http.clone(),
            cache.clone(),
            ttls.swpc(),
            timeouts.data(),
            parse_mag,
        );
        let kp = CachedFetcher::new(
            SourceId::Kp,
            http.clone(),
            cache.clone(),
            ttls.swpc(),
            timeouts.data(),
            parse_kp,
        );
        let xray = CachedFetcher::new(
            SourceId::Xray,
            http.clone(),
            cache.clone(),
            ttls.swpc(),
            timeouts.data(),
            parse_xray,
        );
        // The aurora grid is the heaviest SWPC product.
        let aurora = CachedFetcher::new(
            SourceId::Aurora,
            http,
            cache,
            ttls.aurora(),
            timeouts.heavy(),
            parse_aurora,
        );

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            plasma,
            mag,
            kp,
            xray,
            aurora,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetches solar wind plasma samples, oldest first
    pub async fn fetch_solar_wind(&self, window: SwpcWindow) -> FetchResult<CachedData<Vec<SolarWindSample>>> {
        let suffix = window.product_suffix();
        let url = self.url(&format!("/products/solar-wind/plasma-{}.json", suffix));
        self.plasma
            .fetch(&format!("swpc_plasma_{}", suffix), FetchRequest::get(url))
            .await
    }

    /// Fetches IMF magnetometer samples, oldest first
    pub async fn fetch_magnetic_field(
        &self,
        window: SwpcWindow,
    ) -> FetchResult<CachedData<Vec<MagneticFieldSample>>> {
        let suffix = window.product_suffix();
        let url = self.url(&format!("/products/solar-wind/mag-{}.json", suffix));
        self.mag
            .fetch(&format!("swpc_mag_{}", suffix), FetchRequest::get(url))
            .await
    }

    /// Fetches the planetary Kp series, oldest first
    pub async fn fetch_kp_index(&self) -> FetchResult<CachedData<Vec<KpReading>>> {
        let url = self.url("/products/noaa-planetary-k-index.json");
        self.kp.fetch("swpc_kp", FetchRequest::get(url)).await
    }

    /// Fetches GOES long-channel X-ray flux, oldest first
    pub async fn fetch_xray_flux(&self) -> FetchResult<CachedData<Vec<XrayFluxSample>>> {
        let url = self.url("/json/goes/primary/xrays-1-day.json");
        self.xray.fetch("swpc_xray", FetchRequest::get(url)).await
    }

    /// Fetches the OVATION aurora nowcast grid
    pub async fn fetch_aurora(&self) -> FetchResult<CachedData<AuroraNowcast>> {
        let url = self.url("/json/ovation_aurora_latest.json");
        self.aurora.fetch("swpc_aurora", FetchRequest::get(url)).await
    }
}

/// Parses `plasma-*.json`: time, density, speed, temperature
///
/// Rows without a valid time or with speed <= 0 are dropped; other non-numeric
/// fields become 0.
pub fn parse_plasma(body: &str) -> FetchResult<Vec<SolarWindSample>> {
    let table = HeaderedTable::parse(body)?;
    let time_col = table.column("time_tag", 0);
    let density_col = table.column("density", 1);
    let speed_col = table.column("speed", 2);
    let temperature_col = table.column("temperature", 3);

    let mut samples: Vec<SolarWindSample> = table
        .rows()
        .iter()
        .filter_map(|row| {
            let time = cell_timestamp(row, time_col)?;
            let speed_km_s = coerce_f64(cell(row, speed_col));
            if speed_km_s <= 0.0 {
                return None;
            }
            Some(SolarWindSample {
                time,
                speed_km_s,
                density_p_cm3: coerce_f64(cell(row, density_col)),
                temperature_k: coerce_f64(cell(row, temperature_col)),
            })
        })
        .collect();

    samples.sort_by_key(|s| s.time);
    Ok(samples)
}

/// Parses `mag-*.json`: time, bx, by, bz, (lon, lat), bt
pub fn parse_mag(body: &str) -> FetchResult<Vec<MagneticFieldSample>> {
    let table = HeaderedTable::parse(body)?;
    let time_col = table.column("time_tag", 0);
    let bx_col = table.column("bx_gsm", 1);
    let by_col = table.column("by_gsm", 2);
    let bz_col = table.column("bz_gsm", 3);
    let bt_col = table.column("bt", 6);

    let mut samples: Vec<MagneticFieldSample> = table
        .rows()
        .iter()
        .filter_map(|row| {
            Some(MagneticFieldSample {
                time: cell_timestamp(row, time_col)?,
                bx_nt: coerce_f64(cell(row, bx_col)),
                by_nt: coerce_f64(cell(row, by_col)),
                bz_nt: coerce_f64(cell(row, bz_col)),
                bt_nt: coerce_f64(cell(row, bt_col)),
            })
        })
        .collect();

    samples.sort_by_key(|s| s.time);
    Ok(samples)
}

/// Parses `noaa-planetary-k-index.json`
///
/// Accepts both the header-row table and the newer array-of-objects layout.
pub fn parse_kp(body: &str) -> FetchResult<Vec<KpReading>> {
    let value: Value = serde_json::from_str(body)?;
    let first_is_object = value
        .as_array()
        .and_then(|rows| rows.first())
        .is_some_and(Value::is_object);

    let mut readings: Vec<KpReading> = if first_is_object {
        value
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|row| {
                let time = row.get("time_tag")?.as_str().and_then(parse_timestamp)?;
                let kp = row.get("Kp").or_else(|| row.get("kp")).unwrap_or(&NULL);
                Some(KpReading {
                    time,
                    kp: coerce_f64(kp),
                })
            })
            .collect()
    } else {
        let table = HeaderedTable::parse(body)?;
        let time_col = table.column("time_tag", 0);
        let kp_col = table.column("kp", 1);
        table
            .rows()
            .iter()
            .filter_map(|row| {
                Some(KpReading {
                    time: cell_timestamp(row, time_col)?,
                    kp: coerce_f64(cell(row, kp_col)),
                })
            })
            .collect()
    };

    readings.sort_by_key(|r| r.time);
    Ok(readings)
}

/// Parses `xrays-*.json`, keeping the 0.1-0.8 nm channel
pub fn parse_xray(body: &str) -> FetchResult<Vec<XrayFluxSample>> {
    let rows: Vec<Value> = serde_json::from_str(body)?;

    let mut samples: Vec<XrayFluxSample> = rows
        .iter()
        .filter(|row| row.get("energy").and_then(Value::as_str) == Some(XRAY_FLARE_CHANNEL))
        .filter_map(|row| {
            Some(XrayFluxSample {
                time: row.get("time_tag")?.as_str().and_then(parse_timestamp)?,
                flux: coerce_f64(row.get("flux").unwrap_or(&NULL)),
                energy: XRAY_FLARE_CHANNEL.to_string(),
            })
        })
        .collect();

    samples.sort_by_key(|s| s.time);
    Ok(samples)
}

#[derive(Debug, Deserialize)]
struct OvationResponse {
    #[serde(rename = "Observation Time", default)]
    observation_time: Option<String>,
    #[serde(rename = "Forecast Time", default)]
    forecast_time: Option<String>,
    #[serde(default)]
    coordinates: Vec<Vec<Value>>,
}

/// Parses `ovation_aurora_latest.json`, keeping non-zero grid cells
pub fn parse_aurora(body: &str) -> FetchResult<AuroraNowcast> {
    let response: OvationResponse = serde_json::from_str(body)?;

    let points = response
        .coordinates
        .iter()
        .filter(|triple| triple.len() >= 3)
        .map(|triple| AuroraPoint {
            longitude: normalize_longitude(coerce_f64(&triple[0])),
            latitude: coerce_f64(&triple[1]),
            intensity: coerce_f64(&triple[2]),
        })
        .filter(|p| p.intensity > 0.0)
        .collect();

    Ok(AuroraNowcast {
        observation_time: response.observation_time.as_deref().and_then(parse_timestamp),
        forecast_time: response.forecast_time.as_deref().and_then(parse_timestamp),
        points,
    })
}

fn normalize_longitude(lon: f64) -> f64 {
    if lon >= 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

/// NOAA G-scale geomagnetic storm level for a Kp value
pub fn storm_level(kp: f64) -> &'static str {
    match kp {
        k if k >= 9.0 => "G5",
        k if k >= 8.0 => "G4",
        k if k >= 7.0 => "G3",
        k if k >= 6.0 => "G2",
        k if k >= 5.0 => "G1",
        _ => "G0",
    }
}

/// Flare class (A/B/C/M/X with magnitude) for a GOES long-channel flux
///
/// Returns `None` for non-positive flux.
pub fn flare_class(flux: f64) -> Option<String> {
    if !(flux.is_finite() && flux > 0.0) {
        return None;
    }
    let (letter, base) = match flux {
        f if f >= 1e-4 => ('X', 1e-4),
        f if f >= 1e-5 => ('M', 1e-5),
        f if f >= 1e-6 => ('C', 1e-6),
        f if f >= 1e-7 => ('B', 1e-7),
        _ => ('A', 1e-8),
    };
    Some(format!("{}{:.1}", letter, flux / base))
}
