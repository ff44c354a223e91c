//! OpenWeather and AQICN client
//!
//! This module fetches current conditions from OpenWeather and air quality from
//! the World Air Quality Index project for an observer location. Each provider
//! is keyed separately; an unconfigured provider yields `None` instead of a
//! request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tracing::warn;

use super::{coerce_f64, coerce_opt_f64, parse_timestamp, ApiKey, Observer, SourceId};
use crate::cache::{CachedData, CachedFetcher, ResponseCache};
use crate::config::{CacheTtls, Timeouts};
use crate::fetch::{FetchError, FetchRequest, FetchResult, TimedFetch};

/// Base URL for the OpenWeather API
pub const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// Base URL for the AQICN API
pub const AQICN_BASE_URL: &str = "https://api.waqi.info";

/// Types of weather conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeatherCondition {
    Clear,
    PartlyCloudy,
    Cloudy,
    Rain,
    Showers,
    Thunderstorm,
    Snow,
    Fog,
}

impl WeatherCondition {
    /// Whether the sky is clear enough to look for aurora
    pub fn is_sky_visible(&self) -> bool {
        matches!(self, WeatherCondition::Clear | WeatherCondition::PartlyCloudy)
    }
}

/// Current weather at the observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub location: String,
    /// Temperature in Celsius
    pub temperature_c: f64,
    /// Feels-like temperature in Celsius
    pub feels_like_c: f64,
    /// Relative humidity percentage (0-100)
    pub humidity: u8,
    pub pressure_hpa: f64,
    /// Wind speed in m/s
    pub wind_speed_m_s: f64,
    pub wind_deg: f64,
    /// Cloud cover percentage
    pub cloud_cover: f64,
    pub visibility_m: f64,
    pub condition: WeatherCondition,
    pub description: String,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
    pub observed_at: Option<DateTime<Utc>>,
}

/// Air quality at the nearest monitoring station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQuality {
    pub aqi: f64,
    pub station: String,
    pub dominant_pollutant: Option<String>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub o3: Option<f64>,
    pub no2: Option<f64>,
    pub observed_at: Option<DateTime<Utc>>,
}

impl AirQuality {
    pub fn category(&self) -> &'static str {
        aqi_category(self.aqi)
    }
}

/// A provider that was configured but could not answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderFailure {
    pub source: SourceId,
    pub error: String,
}

/// Weather and air quality at one observer
///
/// A provider that is not configured leaves its field `None` without a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalConditions {
    pub weather: Option<WeatherReport>,
    pub air_quality: Option<AirQuality>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ProviderFailure>,
}

#[derive(Debug, Clone)]
struct KeyedEndpoint {
    base_url: String,
    key: ApiKey,
}

impl KeyedEndpoint {
    fn new(base_url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key: ApiKey::new(key),
        }
    }
}

/// Client for observer-local weather and air quality
#[derive(Debug, Clone)]
pub struct WeatherClient {
    openweather: Option<KeyedEndpoint>,
    aqicn: Option<KeyedEndpoint>,
    weather: CachedFetcher<WeatherReport>,
    air_quality: CachedFetcher<AirQuality>,
}

impl WeatherClient {
    /// Creates a client with no provider configured
    pub fn new(http: TimedFetch, cache: ResponseCache, timeouts: &Timeouts, ttls: &CacheTtls) -> Self {
        Self {
            openweather: None,
            aqicn: None,
            weather: CachedFetcher::new(
                SourceId::Weather,
                http.clone(),
                cache.clone(),
                ttls.weather(),
                timeouts.data(),
                parse_weather,
            ),
            air_quality: CachedFetcher::new(
                SourceId::AirQuality,
                http,
                cache,
                ttls.air_quality(),
                timeouts.data(),
                parse_air_quality,
            ),
        }
    }

    /// Enables OpenWeather current conditions
    pub fn with_openweather(mut self, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.openweather = Some(KeyedEndpoint::new(base_url, api_key));
        self
    }

    /// Enables AQICN air quality
    pub fn with_aqicn(mut self, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        self.aqicn = Some(KeyedEndpoint::new(base_url, token));
        self
    }

    pub fn has_weather(&self) -> bool {
        self.openweather.is_some()
    }

    pub fn has_air_quality(&self) -> bool {
        self.aqicn.is_some()
    }

    /// Fetches current weather, or `None` when OpenWeather is not configured
    pub async fn fetch_weather(&self, lat: f64, lon: f64) -> Option<FetchResult<CachedData<WeatherReport>>> {
        let endpoint = self.openweather.as_ref()?;
        let url = format!(
            "{}/weather?lat={}&lon={}&units=metric&appid={}",
            endpoint.base_url, lat, lon, endpoint.key
        );
        let key = format!("WEATHER_{}_{}", lat, lon);
        Some(self.weather.fetch(&key, FetchRequest::get(url)).await)
    }

    /// Fetches air quality, or `None` when AQICN is not configured
    pub async fn fetch_air_quality(&self, lat: f64, lon: f64) -> Option<FetchResult<CachedData<AirQuality>>> {
        let endpoint = self.aqicn.as_ref()?;
        let url = format!(
            "{}/feed/geo:{};{}/?token={}",
            endpoint.base_url, lat, lon, endpoint.key
        );
        let key = format!("AQI_{}_{}", lat, lon);
        Some(self.air_quality.fetch(&key, FetchRequest::get(url)).await)
    }

    /// Queries both providers at once and keeps whichever answered
    ///
    /// Fails only when no configured provider produced a value.
    pub async fn fetch_conditions(&self, observer: &Observer) -> FetchResult<LocalConditions> {
        let (weather, air_quality) = futures::join!(
            self.fetch_weather(observer.latitude, observer.longitude),
            self.fetch_air_quality(observer.latitude, observer.longitude),
        );

        let mut errors = Vec::new();
        let weather = settle(SourceId::Weather, weather, &mut errors);
        let air_quality = settle(SourceId::AirQuality, air_quality, &mut errors);

        if weather.is_none() && air_quality.is_none() {
            if let Some((_, err)) = errors.first() {
                return Err(err.clone());
            }
        }

        Ok(LocalConditions {
            weather,
            air_quality,
            failures: errors
                .into_iter()
                .map(|(source, err)| ProviderFailure {
                    source,
                    error: err.to_string(),
                })
                .collect(),
        })
    }
}

fn settle<T>(
    source: SourceId,
    result: Option<FetchResult<CachedData<T>>>,
    errors: &mut Vec<(SourceId, FetchError)>,
) -> Option<T> {
    match result? {
        Ok(cached) => Some(cached.into_inner()),
        Err(err) => {
            warn!(%source, error = %err, "Provider unavailable");
            errors.push((source, err));
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenWeatherResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    dt: Option<i64>,
    #[serde(default)]
    weather: Vec<OpenWeatherCondition>,
    main: OpenWeatherMain,
    #[serde(default)]
    wind: Option<OpenWeatherWind>,
    #[serde(default)]
    clouds: Option<OpenWeatherClouds>,
    #[serde(default)]
    visibility: Value,
    #[serde(default)]
    sys: Option<OpenWeatherSys>,
}

#[derive(Debug, Deserialize)]
struct OpenWeatherCondition {
    id: u16,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct OpenWeatherMain {
    #[serde(default)]
    temp: Value,
    #[serde(default)]
    feels_like: Value,
    #[serde(default)]
    humidity: Value,
    #[serde(default)]
    pressure: Value,
}

#[derive(Debug, Deserialize)]
struct OpenWeatherWind {
    #[serde(default)]
    speed: Value,
    #[serde(default)]
    deg: Value,
}

#[derive(Debug, Deserialize)]
struct OpenWeatherClouds {
    #[serde(default)]
    all: Value,
}

#[derive(Debug, Deserialize)]
struct OpenWeatherSys {
    #[serde(default)]
    sunrise: Option<i64>,
    #[serde(default)]
    sunset: Option<i64>,
}

fn from_unix(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Parses an OpenWeather `/weather` response
pub fn parse_weather(body: &str) -> FetchResult<WeatherReport> {
    let response: OpenWeatherResponse = serde_json::from_str(body)?;
    let primary = response.weather.first();

    Ok(WeatherReport {
        location: response.name.unwrap_or_default(),
        temperature_c: coerce_f64(&response.main.temp),
        feels_like_c: coerce_f64(&response.main.feels_like),
        humidity: coerce_f64(&response.main.humidity).clamp(0.0, 100.0) as u8,
        pressure_hpa: coerce_f64(&response.main.pressure),
        wind_speed_m_s: response.wind.as_ref().map(|w| coerce_f64(&w.speed)).unwrap_or(0.0),
        wind_deg: response.wind.as_ref().map(|w| coerce_f64(&w.deg)).unwrap_or(0.0),
        cloud_cover: response.clouds.as_ref().map(|c| coerce_f64(&c.all)).unwrap_or(0.0),
        visibility_m: coerce_f64(&response.visibility),
        condition: primary
            .map(|w| condition_code_to_condition(w.id))
            .unwrap_or(WeatherCondition::Cloudy),
        description: primary.map(|w| w.description.clone()).unwrap_or_default(),
        sunrise: from_unix(response.sys.as_ref().and_then(|s| s.sunrise)),
        sunset: from_unix(response.sys.as_ref().and_then(|s| s.sunset)),
        observed_at: from_unix(response.dt),
    })
}

/// Maps OpenWeather condition codes to our WeatherCondition enum
///
/// OpenWeather condition groups:
/// - 2xx: Thunderstorm
/// - 3xx: Drizzle
/// - 500-504: Rain
/// - 511: Freezing rain
/// - 520-531: Shower rain
/// - 6xx: Snow
/// - 7xx: Atmosphere (mist, smoke, haze, fog)
/// - 800: Clear
/// - 801-802: Few/scattered clouds
/// - 803-804: Broken/overcast clouds
pub fn condition_code_to_condition(code: u16) -> WeatherCondition {
    match code {
        200..=299 => WeatherCondition::Thunderstorm,
        300..=399 | 520..=531 => WeatherCondition::Showers,
        500..=519 => WeatherCondition::Rain,
        600..=699 => WeatherCondition::Snow,
        700..=799 => WeatherCondition::Fog,
        800 => WeatherCondition::Clear,
        801..=802 => WeatherCondition::PartlyCloudy,
        _ => WeatherCondition::Cloudy,
    }
}

#[derive(Debug, Deserialize)]
struct AqicnResponse {
    status: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct AqicnData {
    #[serde(default)]
    aqi: Value,
    #[serde(default)]
    city: Option<AqicnCity>,
    #[serde(default)]
    dominentpol: Option<String>,
    #[serde(default)]
    iaqi: Option<Value>,
    #[serde(default)]
    time: Option<AqicnTime>,
}

#[derive(Debug, Deserialize)]
struct AqicnCity {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct AqicnTime {
    #[serde(default)]
    iso: Option<String>,
}

/// Parses an AQICN `/feed` response
///
/// A non-`ok` status carries an error message in `data` and is a parse failure.
pub fn parse_air_quality(body: &str) -> FetchResult<AirQuality> {
    let response: AqicnResponse = serde_json::from_str(body)?;
    if response.status != "ok" {
        let message = response.data.as_str().unwrap_or("unknown error").to_string();
        return Err(FetchError::ParseFailure(format!("AQICN status {}: {}", response.status, message)));
    }

    let data: AqicnData = serde_json::from_value(response.data)?;
    let pollutant = |name: &str| {
        data.iaqi
            .as_ref()
            .and_then(|iaqi| iaqi.get(name))
            .and_then(|p| p.get("v"))
            .and_then(coerce_opt_f64)
    };

    Ok(AirQuality {
        aqi: coerce_f64(&data.aqi),
        station: data.city.as_ref().map(|c| c.name.clone()).unwrap_or_default(),
        dominant_pollutant: data.dominentpol.clone().filter(|p| !p.is_empty()),
        pm25: pollutant("pm25"),
        pm10: pollutant("pm10"),
        o3: pollutant("o3"),
        no2: pollutant("no2"),
        observed_at: data.time.as_ref().and_then(|t| t.iso.as_deref()).and_then(parse_timestamp),
    })
}

/// US EPA category for an AQI value
pub fn aqi_category(aqi: f64) -> &'static str {
    match aqi {
        a if a <= 50.0 => "Good",
        a if a <= 100.0 => "Moderate",
        a if a <= 150.0 => "Unhealthy for Sensitive Groups",
        a if a <= 200.0 => "Unhealthy",
        a if a <= 300.0 => "Very Unhealthy",
        _ => "Hazardous",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    /// Sample valid OpenWeather response
    const WEATHER: &str = r#"{
        "coord": {"lon": -123.12, "lat": 49.28},
        "weather": [{"id": 802, "main": "Clouds", "description": "scattered clouds", "icon": "03n"}],
        "base": "stations",
        "main": {"temp": 12.4, "feels_like": 11.6, "temp_min": 10.9, "temp_max": 13.8, "pressure": 1016, "humidity": 78},
        "visibility": 10000,
        "wind": {"speed": 3.6, "deg": 250},
        "clouds": {"all": 40},
        "dt": 1715371200,
        "sys": {"country": "CA", "sunrise": 1715345000, "sunset": 1715399000},
        "timezone": -25200,
        "name": "Vancouver",
        "cod": 200
    }"#;

    const AQI: &str = r#"{
        "status": "ok",
        "data": {
            "aqi": 42,
            "idx": 1234,
            "city": {"geo": [49.28, -123.12], "name": "Vancouver Downtown"},
            "dominentpol": "pm25",
            "iaqi": {"pm25": {"v": 42}, "pm10": {"v": 12}, "o3": {"v": "18.5"}},
            "time": {"s": "2024-05-10 17:00:00", "tz": "-07:00", "iso": "2024-05-10T17:00:00-07:00"}
        }
    }"#;

    #[test]
    fn test_parse_weather() {
        let report = parse_weather(WEATHER).expect("weather should parse");

        assert_eq!(report.location, "Vancouver");
        assert!((report.temperature_c - 12.4).abs() < 0.01);
        assert!((report.feels_like_c - 11.6).abs() < 0.01);
        assert_eq!(report.humidity, 78);
        assert_eq!(report.condition, WeatherCondition::PartlyCloudy);
        assert_eq!(report.description, "scattered clouds");
        assert!((report.wind_speed_m_s - 3.6).abs() < 0.01);
        assert_eq!(report.cloud_cover, 40.0);
        assert_eq!(report.sunrise.map(|t| t.timestamp()), Some(1715345000));
        assert!(report.condition.is_sky_visible());
    }

    #[test]
    fn test_parse_weather_missing_optional_sections() {
        let report = parse_weather(r#"{"main": {"temp": "n/a"}}"#).expect("tolerated");

        assert_eq!(report.temperature_c, 0.0);
        assert_eq!(report.condition, WeatherCondition::Cloudy);
        assert_eq!(report.sunrise, None);
    }

    #[test]
    fn test_parse_weather_malformed() {
        assert!(parse_weather("{}").is_err());
        assert!(parse_weather("not json").is_err());
    }

    #[test]
    fn test_condition_code_mapping() {
        assert_eq!(condition_code_to_condition(211), WeatherCondition::Thunderstorm);
        assert_eq!(condition_code_to_condition(301), WeatherCondition::Showers);
        assert_eq!(condition_code_to_condition(500), WeatherCondition::Rain);
        assert_eq!(condition_code_to_condition(521), WeatherCondition::Showers);
        assert_eq!(condition_code_to_condition(601), WeatherCondition::Snow);
        assert_eq!(condition_code_to_condition(741), WeatherCondition::Fog);
        assert_eq!(condition_code_to_condition(800), WeatherCondition::Clear);
        assert_eq!(condition_code_to_condition(801), WeatherCondition::PartlyCloudy);
        assert_eq!(condition_code_to_condition(804), WeatherCondition::Cloudy);
        assert_eq!(condition_code_to_condition(999), WeatherCondition::Cloudy);
    }

    #[test]
    fn test_parse_air_quality() {
        let aq = parse_air_quality(AQI).expect("aqi should parse");

        assert_eq!(aq.aqi, 42.0);
        assert_eq!(aq.station, "Vancouver Downtown");
        assert_eq!(aq.dominant_pollutant.as_deref(), Some("pm25"));
        assert_eq!(aq.pm10, Some(12.0));
        assert_eq!(aq.o3, Some(18.5));
        assert_eq!(aq.no2, None);
        assert_eq!(aq.category(), "Good");
        assert!(aq.observed_at.is_some());
    }

    #[test]
    fn test_parse_air_quality_error_status() {
        let result = parse_air_quality(r#"{"status": "error", "data": "Invalid key"}"#);

        match result {
            Err(FetchError::ParseFailure(msg)) => assert!(msg.contains("Invalid key")),
            other => panic!("expected parse failure, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_air_quality_dash_aqi() {
        let aq = parse_air_quality(r#"{"status": "ok", "data": {"aqi": "-"}}"#).expect("tolerated");
        assert_eq!(aq.aqi, 0.0);
    }

    #[test]
    fn test_aqi_category_boundaries() {
        assert_eq!(aqi_category(50.0), "Good");
        assert_eq!(aqi_category(51.0), "Moderate");
        assert_eq!(aqi_category(150.0), "Unhealthy for Sensitive Groups");
        assert_eq!(aqi_category(200.0), "Unhealthy");
        assert_eq!(aqi_category(300.0), "Very Unhealthy");
        assert_eq!(aqi_category(301.0), "Hazardous");
    }

    #[tokio::test]
    async fn test_unconfigured_providers_skip_requests() {
        let client = WeatherClient::new(
            TimedFetch::new(),
            ResponseCache::new(),
            &Timeouts::default(),
            &CacheTtls::default(),
        );

        assert!(!client.has_weather());
        assert!(client.fetch_weather(49.28, -123.12).await.is_none());
        assert!(client.fetch_air_quality(49.28, -123.12).await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_weather_and_air_quality() {
        let server = MockServer::start_async().await;
        let weather_mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/weather")
                    .query_param("units", "metric")
                    .query_param("appid", "OW_KEY");
                then.status(200).body(WEATHER);
            })
            .await;
        let aqi_mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/feed/geo:49.28;-123.12/")
                    .query_param("token", "AQ_TOKEN");
                then.status(200).body(AQI);
            })
            .await;
        let client = WeatherClient::new(
            TimedFetch::new(),
            ResponseCache::new(),
            &Timeouts::default(),
            &CacheTtls::default(),
        )
        .with_openweather(server.base_url(), "OW_KEY")
        .with_aqicn(server.base_url(), "AQ_TOKEN");

        let weather = client
            .fetch_weather(49.28, -123.12)
            .await
            .expect("configured")
            .expect("fetch");
        let aq = client
            .fetch_air_quality(49.28, -123.12)
            .await
            .expect("configured")
            .expect("fetch");

        weather_mock.assert_async().await;
        aqi_mock.assert_async().await;
        assert_eq!(weather.data.location, "Vancouver");
        assert_eq!(aq.data.aqi, 42.0);
    }

    #[tokio::test]
    async fn test_nearby_observers_get_separate_reports() {
        let server = MockServer::start_async().await;
        let near = server
            .mock_async(|when, then| {
                when.method(GET).path("/weather").query_param("lat", "49.281");
                then.status(200).body(WEATHER);
            })
            .await;
        let far = server
            .mock_async(|when, then| {
                when.method(GET).path("/weather").query_param("lat", "49.284");
                then.status(200).body(WEATHER);
            })
            .await;
        let client = WeatherClient::new(
            TimedFetch::new(),
            ResponseCache::new(),
            &Timeouts::default(),
            &CacheTtls::default(),
        )
        .with_openweather(server.base_url(), "OW_KEY");

        for lat in [49.281, 49.284, 49.281] {
            client
                .fetch_weather(lat, -123.12)
                .await
                .expect("configured")
                .expect("fetch");
        }

        assert_eq!(near.hits_async().await, 1);
        assert_eq!(far.hits_async().await, 1);
    }

    fn both_providers(server: &MockServer) -> WeatherClient {
        WeatherClient::new(
            TimedFetch::new(),
            ResponseCache::new(),
            &Timeouts::default(),
            &CacheTtls::default(),
        )
        .with_openweather(server.base_url(), "OW_KEY")
        .with_aqicn(server.base_url(), "AQ_TOKEN")
    }

    const OBSERVER: Observer = Observer {
        latitude: 49.28,
        longitude: -123.12,
        altitude_m: 0.0,
    };

    #[tokio::test]
    async fn test_fetch_conditions_keeps_air_quality_when_weather_fails() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/weather");
                then.status(500).body("boom");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/feed/geo:49.28;-123.12/");
                then.status(200).body(AQI);
            })
            .await;

        let conditions = both_providers(&server)
            .fetch_conditions(&OBSERVER)
            .await
            .expect("air quality alone is enough");

        assert!(conditions.weather.is_none());
        assert_eq!(conditions.air_quality.expect("aqi").station, "Vancouver Downtown");
        assert_eq!(conditions.failures.len(), 1);
        assert_eq!(conditions.failures[0].source, SourceId::Weather);
        assert!(conditions.failures[0].error.contains("500"));
    }

    #[tokio::test]
    async fn test_fetch_conditions_fails_when_every_provider_fails() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/weather");
                then.status(500);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/feed/geo:49.28;-123.12/");
                then.status(503);
            })
            .await;

        let result = both_providers(&server).fetch_conditions(&OBSERVER).await;

        assert_eq!(result.unwrap_err(), FetchError::UpstreamStatus(500));
    }
}
