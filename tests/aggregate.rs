//! End-to-end aggregation passes against mock upstreams

use std::collections::BTreeSet;
use std::time::Duration;

use httpmock::prelude::*;
use httpmock::Mock;

use spacewatch::aggregate::{Aggregator, SourceClients};
use spacewatch::cache::ResponseCache;
use spacewatch::config::{AppConfig, CacheTtls, Endpoints, Timeouts};
use spacewatch::data::SourceId;
use spacewatch::fetch::TimedFetch;
use spacewatch::health::HealthProbe;

const PLASMA: &str = r#"[
    ["time_tag","density","speed","temperature"],
    ["2024-05-10 17:35:00.000","4.12","402.3","95000"],
    ["2024-05-10 17:36:00.000","8.50","680.0","210000"]
]"#;

const MAG: &str = r#"[
    ["time_tag","bx_gsm","by_gsm","bz_gsm","lon_gsm","lat_gsm","bt"],
    ["2024-05-10 17:36:00.000","1.10","-2.20","-12.50","120.0","-30.0","15.40"]
]"#;

const KP: &str = r#"[
    ["time_tag","Kp","a_running","station_count"],
    ["2024-05-10 15:00:00.000","5.33","56","8"],
    ["2024-05-10 18:00:00.000","8.67","300","8"]
]"#;

const XRAY: &str = r#"[
    {"time_tag":"2024-05-10T17:35:00Z","satellite":16,"flux":2.3e-5,"energy":"0.1-0.8nm"}
]"#;

const CMES: &str = r#"[
    {"activityID": "2024-05-08T05:36:00-CME-001", "startTime": "2024-05-08T05:36Z",
     "cmeAnalyses": [{"speed": 870.0, "halfAngle": 55.0, "type": "O", "isMostAccurate": true}]},
    {"activityID": "2024-05-09T09:24:00-CME-001", "startTime": "2024-05-09T09:24Z",
     "cmeAnalyses": [{"speed": 1024.0, "type": "O", "isMostAccurate": true}]}
]"#;

const FLARES: &str = r#"[
    {"flrID": "2024-05-10T06:27:00-FLR-001", "beginTime": "2024-05-10T06:27Z", "peakTime": "2024-05-10T06:54Z", "classType": "X3.9"},
    {"flrID": "2024-05-10T12:00:00-FLR-001", "beginTime": "2024-05-10T12:00Z", "classType": "M8.1"}
]"#;

const HEALTHY: &str = r#"{"status": "healthy", "timestamp": "2024-05-10T17:40:00", "model_loaded": true, "api_version": "2.0.0"}"#;

const PREDICT: &str = r#"{
    "status": "success",
    "timestamp": "2024-05-10T17:40:00",
    "prediction": {
        "cme_probability": 72.41,
        "arrival_time_hours": 38.2,
        "confidence": 81.5,
        "alert_level": "HIGH"
    }
}"#;

fn timeouts() -> Timeouts {
    Timeouts {
        data_ms: 500,
        heavy_ms: 500,
        probe_first_ms: 300,
        probe_retry_ms: 300,
        chat_ms: 500,
    }
}

fn config(server: &MockServer) -> AppConfig {
    AppConfig {
        endpoints: Endpoints::all_at(&server.base_url()),
        timeouts: timeouts(),
        ..AppConfig::default()
    }
}

/// Aggregator sharing `cache` with the caller, with every TTL set to zero
fn aggregator_with_cache(server: &MockServer, cache: &ResponseCache) -> Aggregator {
    let config = AppConfig {
        cache_ttls: CacheTtls {
            swpc_secs: 0,
            aurora_secs: 0,
            donki_secs: 0,
            satellite_secs: 0,
            weather_secs: 0,
            air_quality_secs: 0,
            model_secs: 0,
        },
        ..config(server)
    };
    let clients = SourceClients::from_config(&config, TimedFetch::new(), cache.clone());
    Aggregator::new(
        clients,
        HealthProbe::from_timeouts(&config.timeouts),
        None,
        config.cme_lookback_days,
    )
}

async fn mock_get<'a>(server: &'a MockServer, path: &str, body: &str) -> Mock<'a> {
    let path = path.to_string();
    let body = body.to_string();
    server
        .mock_async(move |when, then| {
            when.method(GET).path(path);
            then.status(200).body(body);
        })
        .await
}

/// Mocks every space weather upstream except the paths in `skip`
async fn mock_space_weather<'a>(server: &'a MockServer, skip: &[&str]) -> Vec<Mock<'a>> {
    let routes = [
        ("/products/solar-wind/plasma-1-day.json", PLASMA),
        ("/products/solar-wind/mag-1-day.json", MAG),
        ("/products/noaa-planetary-k-index.json", KP),
        ("/json/goes/primary/xrays-1-day.json", XRAY),
        ("/CME", CMES),
        ("/FLR", FLARES),
    ];
    let mut mocks = Vec::new();
    for (path, body) in routes {
        if !skip.contains(&path) {
            mocks.push(mock_get(server, path, body).await);
        }
    }
    mocks
}

#[tokio::test]
async fn test_healthy_pass_is_not_degraded() {
    let server = MockServer::start_async().await;
    mock_space_weather(&server, &[]).await;
    mock_get(&server, "/", HEALTHY).await;
    mock_get(&server, "/api/predict", PREDICT).await;
    let mut aggregator = Aggregator::from_config(&config(&server));

    let summary = aggregator.fetch_summary().await;

    assert!(!summary.is_degraded(), "degraded: {:?}", summary.sources_degraded);
    assert_eq!(summary.solar_wind.speed_km_s, 680.0);
    assert_eq!(summary.magnetic_field.bz_nt, -12.5);
    assert_eq!(summary.geomagnetic.kp_index, 8.67);
    assert_eq!(summary.geomagnetic.storm_level, "G4");
    assert_eq!(summary.xray.flare_class, "M2.3");
    assert_eq!(summary.cme.total_cmes, 2);
    assert_eq!(summary.cme.window_days, 7);
    assert_eq!(summary.flares.total_flares, 2);
    assert_eq!(
        summary.flares.strongest.and_then(|f| f.class_type),
        Some("X3.9".to_string())
    );
    assert!(summary.prediction.is_live);
    assert_eq!(summary.prediction.snapshot.probability, 72.41);
    assert!(summary.local_weather.is_none());
    assert!(summary.air_quality.is_none());
}

#[tokio::test]
async fn test_kp_timeout_degrades_only_kp() {
    let server = MockServer::start_async().await;
    mock_space_weather(&server, &["/products/noaa-planetary-k-index.json"]).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/products/noaa-planetary-k-index.json");
            then.status(200).delay(Duration::from_secs(2)).body(KP);
        })
        .await;
    let mut aggregator = Aggregator::from_config(&config(&server));

    let summary = aggregator.fetch_summary().await;

    assert_eq!(summary.sources_degraded, BTreeSet::from([SourceId::Kp]));
    assert_eq!(summary.geomagnetic.kp_index, 0.0);
    assert_eq!(summary.geomagnetic.storm_level, "--");
    assert_eq!(summary.solar_wind.speed_km_s, 680.0);
}

#[tokio::test]
async fn test_offline_backend_uses_mock_without_degrading() {
    let server = MockServer::start_async().await;
    mock_space_weather(&server, &[]).await;
    let mut aggregator = Aggregator::from_config(&config(&server));

    let summary = aggregator.fetch_summary().await;

    assert!(!summary.prediction.is_live);
    assert!(!summary.sources_degraded.contains(&SourceId::Prediction));
}

#[tokio::test]
async fn test_live_prediction_failure_degrades_prediction() {
    let server = MockServer::start_async().await;
    mock_space_weather(&server, &[]).await;
    mock_get(&server, "/", HEALTHY).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/predict");
            then.status(500).body("boom");
        })
        .await;
    let mut aggregator = Aggregator::from_config(&config(&server));

    let summary = aggregator.fetch_summary().await;

    assert_eq!(summary.sources_degraded, BTreeSet::from([SourceId::Prediction]));
    assert!(!summary.prediction.is_live);
}

#[tokio::test]
async fn test_live_prediction_failure_keeps_previous_prediction() {
    let server = MockServer::start_async().await;
    mock_space_weather(&server, &[]).await;
    mock_get(&server, "/", HEALTHY).await;
    let predict = mock_get(&server, "/api/predict", PREDICT).await;
    let mut aggregator = Aggregator::from_config(&config(&server));

    let first = aggregator.fetch_summary().await;
    assert!(first.prediction.is_live);

    predict.delete_async().await;
    let second = aggregator.fetch_summary().await;

    assert_eq!(second.sources_degraded, BTreeSet::from([SourceId::Prediction]));
    assert_eq!(second.prediction, first.prediction);
    assert_eq!(second.prediction.snapshot.probability, 72.41);
}

#[tokio::test]
async fn test_empty_cme_catalog_is_not_degraded() {
    let server = MockServer::start_async().await;
    mock_space_weather(&server, &["/CME"]).await;
    mock_get(&server, "/CME", "[]").await;
    let mut aggregator = Aggregator::from_config(&config(&server));

    let summary = aggregator.fetch_summary().await;

    assert_eq!(summary.cme.total_cmes, 0);
    assert!(summary.cme.latest_cme.is_none());
    assert!(!summary.sources_degraded.contains(&SourceId::Cme));
}

#[tokio::test]
async fn test_all_sources_down_still_returns_summary() {
    let server = MockServer::start_async().await;
    let mut aggregator = Aggregator::from_config(&config(&server));

    let summary = aggregator.fetch_summary().await;

    let expected = BTreeSet::from([
        SourceId::SolarWind,
        SourceId::Magnetometer,
        SourceId::Kp,
        SourceId::Xray,
        SourceId::Cme,
        SourceId::Flare,
    ]);
    assert_eq!(summary.sources_degraded, expected);
    assert_eq!(summary.solar_wind.speed_km_s, 0.0);
    assert_eq!(summary.xray.flare_class, "--");
    assert_eq!(summary.cme.total_cmes, 0);
    assert!(!summary.prediction.is_live);
}

#[tokio::test]
async fn test_failed_source_keeps_previous_value() {
    let server = MockServer::start_async().await;
    let mocks = mock_space_weather(&server, &[]).await;
    let cache = ResponseCache::new();
    let mut aggregator = aggregator_with_cache(&server, &cache);

    let first = aggregator.fetch_summary().await;
    assert!(!first.is_degraded());

    // Kp is the third route; with no cache entry left the previous summary is the only fallback.
    mocks[2].delete_async().await;
    cache.clear();
    let second = aggregator.fetch_summary().await;

    assert_eq!(second.sources_degraded, BTreeSet::from([SourceId::Kp]));
    assert_eq!(second.geomagnetic, first.geomagnetic);
    assert_eq!(second.geomagnetic.kp_index, 8.67);
}

#[tokio::test]
async fn test_stale_cache_marks_source_degraded() {
    let server = MockServer::start_async().await;
    let mocks = mock_space_weather(&server, &[]).await;
    let cache = ResponseCache::new();
    let mut aggregator = aggregator_with_cache(&server, &cache);

    let first = aggregator.fetch_summary().await;

    // Plasma is the first route; its expired cache entry is served instead.
    mocks[0].delete_async().await;
    let second = aggregator.fetch_summary().await;

    assert_eq!(second.sources_degraded, BTreeSet::from([SourceId::SolarWind]));
    assert_eq!(second.solar_wind, first.solar_wind);
    assert_eq!(aggregator.previous(), Some(&second));
}
