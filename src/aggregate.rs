//! Multi-source aggregation into one space-weather summary
//!
//! Every pass fans out to all configured upstreams concurrently and waits for
//! all of them to settle. A failed source never aborts the pass: its field
//! falls back to the previous summary's value (or a neutral default) and the
//! source is listed in `sources_degraded`.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{CachedData, ResponseCache};
use crate::config::AppConfig;
use crate::data::donki::{latest_cme, strongest_flare};
use crate::data::swpc::{flare_class, storm_level};
use crate::data::{
    AirQuality, ChatClient, CmeEvent, DonkiClient, FlareEvent, Observer, PredictionClient,
    PredictionProvider, ProvidedPrediction, SatelliteClient, SourceId, SwpcClient, SwpcWindow,
    WeatherClient, WeatherReport,
};
use crate::fetch::{FetchResult, TimedFetch};
use crate::health::HealthProbe;

/// Placeholder for text fields with no data
pub const NO_DATA: &str = "--";

/// Latest solar wind plasma reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolarWindSummary {
    pub speed_km_s: f64,
    pub density_p_cm3: f64,
    pub temperature_k: f64,
    pub time: Option<DateTime<Utc>>,
}

/// Latest IMF reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MagneticFieldSummary {
    pub bx_nt: f64,
    pub by_nt: f64,
    pub bz_nt: f64,
    pub bt_nt: f64,
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeomagneticSummary {
    pub kp_index: f64,
    /// NOAA G-scale level, `--` when unknown
    pub storm_level: String,
    pub time: Option<DateTime<Utc>>,
}

impl Default for GeomagneticSummary {
    fn default() -> Self {
        Self {
            kp_index: 0.0,
            storm_level: NO_DATA.to_string(),
            time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XraySummary {
    /// Long-channel flux in W/m²
    pub flux: f64,
    pub flare_class: String,
    pub time: Option<DateTime<Utc>>,
}

impl Default for XraySummary {
    fn default() -> Self {
        Self {
            flux: 0.0,
            flare_class: NO_DATA.to_string(),
            time: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CmeSummary {
    pub total_cmes: usize,
    /// Days of catalog the count covers, 0 when unknown
    #[serde(default)]
    pub window_days: u32,
    pub latest_cme: Option<CmeEvent>,
    /// CME with the highest analyzed speed
    pub fastest: Option<CmeEvent>,
}

impl CmeSummary {
    pub fn from_events(events: &[CmeEvent], window_days: u32) -> Self {
        let fastest = events
            .iter()
            .filter_map(|e| e.speed_km_s.map(|speed| (speed, e)))
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, e)| e.clone());
        Self {
            total_cmes: events.len(),
            window_days,
            latest_cme: latest_cme(events).cloned(),
            fastest,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlareSummary {
    pub total_flares: usize,
    pub strongest: Option<FlareEvent>,
}

impl FlareSummary {
    pub fn from_events(events: &[FlareEvent]) -> Self {
        Self {
            total_flares: events.len(),
            strongest: strongest_flare(events).cloned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    #[default]
    Low,
    Moderate,
    High,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Low => "Low",
            Level::Moderate => "Moderate",
            Level::High => "High",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BzDirection {
    Northward,
    #[default]
    Neutral,
    Southward,
}

impl fmt::Display for BzDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BzDirection::Northward => "Northward",
            BzDirection::Neutral => "Neutral",
            BzDirection::Southward => "Southward",
        })
    }
}

/// Qualitative conditions derived from solar wind and IMF
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpaceWeatherConditions {
    pub speed_category: Level,
    pub bz_direction: BzDirection,
    pub storm_potential: Level,
    pub plasma_beta: f64,
}

impl SpaceWeatherConditions {
    pub fn derive(wind: &SolarWindSummary, field: &MagneticFieldSummary) -> Self {
        let speed = wind.speed_km_s;
        let bz = field.bz_nt;

        let speed_category = match speed {
            s if s > 500.0 => Level::High,
            s if s > 400.0 => Level::Moderate,
            _ => Level::Low,
        };
        let bz_direction = match bz {
            b if b < -5.0 => BzDirection::Southward,
            b if b > 0.0 => BzDirection::Northward,
            _ => BzDirection::Neutral,
        };
        let storm_potential = if speed > 500.0 && bz < -5.0 {
            Level::High
        } else if speed > 450.0 || bz < -3.0 {
            Level::Moderate
        } else {
            Level::Low
        };

        Self {
            speed_category,
            bz_direction,
            storm_potential,
            plasma_beta: plasma_beta(wind.density_p_cm3, wind.temperature_k, field.bt_nt),
        }
    }
}

/// Plasma beta from density (p/cm³), temperature (K) and total field (nT)
pub fn plasma_beta(density: f64, temperature: f64, bt: f64) -> f64 {
    if bt == 0.0 {
        return 0.0;
    }
    let beta = 4.03e-11 * density * temperature / (bt * bt);
    if beta.is_finite() {
        beta
    } else {
        0.0
    }
}

/// Merged view of every upstream for one refresh pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub solar_wind: SolarWindSummary,
    pub magnetic_field: MagneticFieldSummary,
    pub geomagnetic: GeomagneticSummary,
    pub xray: XraySummary,
    pub cme: CmeSummary,
    pub flares: FlareSummary,
    pub conditions: SpaceWeatherConditions,
    pub prediction: ProvidedPrediction,
    pub local_weather: Option<WeatherReport>,
    pub air_quality: Option<AirQuality>,
    pub last_updated: DateTime<Utc>,
    pub sources_degraded: BTreeSet<SourceId>,
}

impl Default for AggregateSummary {
    fn default() -> Self {
        Self {
            solar_wind: SolarWindSummary::default(),
            magnetic_field: MagneticFieldSummary::default(),
            geomagnetic: GeomagneticSummary::default(),
            xray: XraySummary::default(),
            cme: CmeSummary::default(),
            flares: FlareSummary::default(),
            conditions: SpaceWeatherConditions::default(),
            prediction: ProvidedPrediction::mock(),
            local_weather: None,
            air_quality: None,
            last_updated: Utc::now(),
            sources_degraded: BTreeSet::new(),
        }
    }
}

impl AggregateSummary {
    pub fn is_degraded(&self) -> bool {
        !self.sources_degraded.is_empty()
    }
}

/// Every upstream client, built once from config around a shared cache
#[derive(Debug, Clone)]
pub struct SourceClients {
    pub swpc: SwpcClient,
    pub donki: DonkiClient,
    pub prediction: PredictionClient,
    pub weather: WeatherClient,
    pub satellite: Option<SatelliteClient>,
    pub chat: Option<ChatClient>,
}

impl SourceClients {
    pub fn from_config(config: &AppConfig, http: TimedFetch, cache: ResponseCache) -> Self {
        let endpoints = &config.endpoints;
        let keys = &config.keys;
        let timeouts = &config.timeouts;
        let ttls = &config.cache_ttls;

        let mut weather = WeatherClient::new(http.clone(), cache.clone(), timeouts, ttls);
        if let Some(key) = &keys.openweather {
            weather = weather.with_openweather(endpoints.openweather.as_str(), key.as_str());
        }
        if let Some(token) = &keys.aqicn {
            weather = weather.with_aqicn(endpoints.aqicn.as_str(), token.as_str());
        }

        Self {
            swpc: SwpcClient::new(endpoints.swpc.as_str(), http.clone(), cache.clone(), timeouts, ttls),
            donki: DonkiClient::new(
                endpoints.donki.as_str(),
                keys.nasa.as_str(),
                http.clone(),
                cache.clone(),
                timeouts,
                ttls,
            ),
            prediction: PredictionClient::new(
                endpoints.prediction.as_str(),
                http.clone(),
                cache.clone(),
                timeouts,
                ttls,
            ),
            weather,
            satellite: keys.n2yo.as_ref().map(|key| {
                SatelliteClient::new(
                    endpoints.n2yo.as_str(),
                    key.as_str(),
                    http.clone(),
                    cache.clone(),
                    timeouts,
                    ttls,
                )
            }),
            chat: keys.gemini.as_ref().map(|key| {
                ChatClient::new(
                    endpoints.gemini.as_str(),
                    key.as_str(),
                    config.chat_model.as_str(),
                    http.clone(),
                    timeouts,
                )
            }),
        }
    }
}

/// Folds one source result into a value, recording degradation
///
/// Fresh values pass through. Stale values pass through and mark the source
/// degraded. Errors mark it degraded and yield `None` so the caller can fall
/// back.
fn settle<T>(
    source: SourceId,
    result: FetchResult<CachedData<T>>,
    degraded: &mut BTreeSet<SourceId>,
) -> Option<T> {
    match result {
        Ok(cached) => {
            if cached.is_expired {
                degraded.insert(source);
            }
            Some(cached.data)
        }
        Err(err) => {
            warn!(source = %source, error = %err, "Source failed, keeping previous value");
            degraded.insert(source);
            None
        }
    }
}

/// Builds summaries from all upstreams, remembering the last one
#[derive(Debug)]
pub struct Aggregator {
    clients: SourceClients,
    probe: HealthProbe,
    observer: Option<Observer>,
    lookback_days: u32,
    previous: Option<AggregateSummary>,
}

impl Aggregator {
    pub fn new(
        clients: SourceClients,
        probe: HealthProbe,
        observer: Option<Observer>,
        lookback_days: u32,
    ) -> Self {
        Self {
            clients,
            probe,
            observer,
            lookback_days,
            previous: None,
        }
    }

    /// Builds every client from config with one shared HTTP client and cache
    pub fn from_config(config: &AppConfig) -> Self {
        let clients = SourceClients::from_config(config, TimedFetch::new(), ResponseCache::new());
        Self::new(
            clients,
            HealthProbe::from_timeouts(&config.timeouts),
            config.observer,
            config.cme_lookback_days,
        )
    }

    pub fn clients(&self) -> &SourceClients {
        &self.clients
    }

    pub fn previous(&self) -> Option<&AggregateSummary> {
        self.previous.as_ref()
    }

    /// Catalog window ending today (UTC)
    pub fn catalog_range(&self) -> (NaiveDate, NaiveDate) {
        let end = Utc::now().date_naive();
        let start = end
            .checked_sub_days(Days::new(u64::from(self.lookback_days)))
            .unwrap_or(end);
        (start, end)
    }

    /// Runs one aggregation pass
    pub async fn fetch_summary(&mut self) -> AggregateSummary {
        let started = Instant::now();
        let (start, end) = self.catalog_range();
        let clients = &self.clients;
        let observer = self.observer;

        let prediction_branch = async {
            let provider = PredictionProvider::select(&self.probe, &clients.prediction).await;
            provider.provide().await
        };
        let weather_branch = async {
            match observer {
                Some(o) => clients.weather.fetch_weather(o.latitude, o.longitude).await,
                None => None,
            }
        };
        let air_quality_branch = async {
            match observer {
                Some(o) => clients.weather.fetch_air_quality(o.latitude, o.longitude).await,
                None => None,
            }
        };

        let (wind, mag, kp, xray, cmes, flares, prediction, weather, air_quality) = futures::join!(
            clients.swpc.fetch_solar_wind(SwpcWindow::Day),
            clients.swpc.fetch_magnetic_field(SwpcWindow::Day),
            clients.swpc.fetch_kp_index(),
            clients.swpc.fetch_xray_flux(),
            clients.donki.fetch_cmes(start, end),
            clients.donki.fetch_flares(start, end),
            prediction_branch,
            weather_branch,
            air_quality_branch,
        );

        let previous = self.previous.as_ref();
        let mut degraded = BTreeSet::new();

        let solar_wind = match settle(SourceId::SolarWind, wind, &mut degraded) {
            Some(samples) => samples
                .last()
                .map(|s| SolarWindSummary {
                    speed_km_s: s.speed_km_s,
                    density_p_cm3: s.density_p_cm3,
                    temperature_k: s.temperature_k,
                    time: Some(s.time),
                })
                .unwrap_or_default(),
            None => previous.map(|p| p.solar_wind.clone()).unwrap_or_default(),
        };

        let magnetic_field = match settle(SourceId::Magnetometer, mag, &mut degraded) {
            Some(samples) => samples
                .last()
                .map(|s| MagneticFieldSummary {
                    bx_nt: s.bx_nt,
                    by_nt: s.by_nt,
                    bz_nt: s.bz_nt,
                    bt_nt: s.bt_nt,
                    time: Some(s.time),
                })
                .unwrap_or_default(),
            None => previous.map(|p| p.magnetic_field.clone()).unwrap_or_default(),
        };

        let geomagnetic = match settle(SourceId::Kp, kp, &mut degraded) {
            Some(readings) => readings
                .last()
                .map(|r| GeomagneticSummary {
                    kp_index: r.kp,
                    storm_level: storm_level(r.kp).to_string(),
                    time: Some(r.time),
                })
                .unwrap_or_default(),
            None => previous.map(|p| p.geomagnetic.clone()).unwrap_or_default(),
        };

        let xray = match settle(SourceId::Xray, xray, &mut degraded) {
            Some(samples) => samples
                .last()
                .map(|s| XraySummary {
                    flux: s.flux,
                    flare_class: flare_class(s.flux).unwrap_or_else(|| NO_DATA.to_string()),
                    time: Some(s.time),
                })
                .unwrap_or_default(),
            None => previous.map(|p| p.xray.clone()).unwrap_or_default(),
        };

        let cme = match settle(SourceId::Cme, cmes, &mut degraded) {
            Some(events) => CmeSummary::from_events(&events, self.lookback_days),
            None => previous.map(|p| p.cme.clone()).unwrap_or(CmeSummary {
                window_days: self.lookback_days,
                ..CmeSummary::default()
            }),
        };

        let flares = match settle(SourceId::Flare, flares, &mut degraded) {
            Some(events) => FlareSummary::from_events(&events),
            None => previous.map(|p| p.flares.clone()).unwrap_or_default(),
        };

        let prediction = match prediction {
            Ok(provided) => provided,
            Err(err) => {
                warn!(error = %err, "Live prediction failed, keeping previous prediction");
                degraded.insert(SourceId::Prediction);
                previous
                    .map(|p| p.prediction.clone())
                    .unwrap_or_else(ProvidedPrediction::mock)
            }
        };

        let local_weather = weather.and_then(|result| {
            settle(SourceId::Weather, result, &mut degraded)
                .or_else(|| previous.and_then(|p| p.local_weather.clone()))
        });
        let air_quality = air_quality.and_then(|result| {
            settle(SourceId::AirQuality, result, &mut degraded)
                .or_else(|| previous.and_then(|p| p.air_quality.clone()))
        });

        let summary = AggregateSummary {
            conditions: SpaceWeatherConditions::derive(&solar_wind, &magnetic_field),
            solar_wind,
            magnetic_field,
            geomagnetic,
            xray,
            cme,
            flares,
            prediction,
            local_weather,
            air_quality,
            last_updated: Utc::now(),
            sources_degraded: degraded,
        };

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            degraded = summary.sources_degraded.len(),
            live_prediction = summary.prediction.is_live,
            "Aggregation pass complete"
        );

        self.previous = Some(summary.clone());
        summary
    }
}
