//! Plain-text rendering of summaries and catalog listings

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::aggregate::{AggregateSummary, NO_DATA};
use crate::data::prediction::{AccuracyMetrics, FeatureWeight, Forecast, ModelInfo, RealtimeSeries};
use crate::data::swpc::AuroraNowcast;
use crate::data::{
    AirQuality, CmeEvent, FlareEvent, LocalConditions, ProvidedPrediction, SatelliteTrack, StormEvent,
    WeatherReport,
};

/// Number of aurora cells listed in the text report
const AURORA_TOP_N: usize = 10;

fn time_or_dash(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| NO_DATA.to_string())
}

fn opt_or_dash(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| NO_DATA.to_string())
}

fn provenance(is_live: bool) -> &'static str {
    if is_live {
        "live"
    } else {
        "mock"
    }
}

pub fn render_prediction(provided: &ProvidedPrediction) -> String {
    let s = &provided.snapshot;
    format!(
        "CME probability: {:.1}% [{}] (confidence {:.1}%, arrival in {}) ({})\n",
        s.probability,
        s.alert_level,
        s.confidence,
        s.arrival_eta(),
        provenance(provided.is_live)
    )
}

/// Renders the full summary
pub fn render_summary(summary: &AggregateSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Space weather summary ({})", time_or_dash(Some(summary.last_updated)));
    out.push('\n');

    let wind = &summary.solar_wind;
    let _ = writeln!(
        out,
        "Solar wind:   {:.0} km/s, {:.1} p/cm3, {:.0} K ({})",
        wind.speed_km_s,
        wind.density_p_cm3,
        wind.temperature_k,
        summary.conditions.speed_category
    );
    let field = &summary.magnetic_field;
    let _ = writeln!(
        out,
        "IMF:          Bz {:.1} nT ({}), Bt {:.1} nT, beta {:.2}",
        field.bz_nt, summary.conditions.bz_direction, field.bt_nt, summary.conditions.plasma_beta
    );
    let _ = writeln!(
        out,
        "Kp index:     {:.2} ({})",
        summary.geomagnetic.kp_index, summary.geomagnetic.storm_level
    );
    let _ = writeln!(out, "X-ray:        {}", summary.xray.flare_class);
    let _ = writeln!(out, "Storm risk:   {}", summary.conditions.storm_potential);
    out.push('\n');

    let _ = writeln!(
        out,
        "CMEs:         {} ({} d)",
        summary.cme.total_cmes, summary.cme.window_days
    );
    if let Some(latest) = &summary.cme.latest_cme {
        let _ = writeln!(
            out,
            "  latest:     {} ({} km/s)",
            time_or_dash(latest.start_time),
            opt_or_dash(latest.speed_km_s, 0)
        );
    }
    if let Some(fastest) = &summary.cme.fastest {
        let _ = writeln!(
            out,
            "  fastest:    {} km/s ({})",
            opt_or_dash(fastest.speed_km_s, 0),
            fastest.activity_id
        );
    }
    let _ = writeln!(out, "Flares:       {}", summary.flares.total_flares);
    if let Some(strongest) = &summary.flares.strongest {
        let _ = writeln!(
            out,
            "  strongest:  {} at {}",
            strongest.class_type.as_deref().unwrap_or(NO_DATA),
            time_or_dash(strongest.peak_time.or(strongest.begin_time))
        );
    }
    out.push('\n');
    out.push_str(&render_prediction(&summary.prediction));

    if summary.local_weather.is_some() || summary.air_quality.is_some() {
        out.push('\n');
        out.push_str(&render_weather(summary.local_weather.as_ref(), summary.air_quality.as_ref()));
    }

    if summary.is_degraded() {
        let sources: Vec<&str> = summary.sources_degraded.iter().map(|s| s.as_str()).collect();
        let _ = writeln!(out, "\nDegraded sources: {}", sources.join(", "));
    }
    out
}

pub fn render_weather(weather: Option<&WeatherReport>, air_quality: Option<&AirQuality>) -> String {
    let mut out = String::new();
    if let Some(w) = weather {
        let _ = writeln!(
            out,
            "Weather:      {} {:.1}°C (feels {:.1}°C), {}, clouds {:.0}%, wind {:.1} m/s",
            w.location, w.temperature_c, w.feels_like_c, w.description, w.cloud_cover, w.wind_speed_m_s
        );
        let _ = writeln!(
            out,
            "Sky:          {}",
            if w.condition.is_sky_visible() {
                "clear enough for aurora viewing"
            } else {
                "obscured"
            }
        );
    }
    if let Some(aq) = air_quality {
        let _ = writeln!(
            out,
            "Air quality:  AQI {:.0} ({}) at {}",
            aq.aqi,
            aq.category(),
            aq.station
        );
    }
    out
}

pub fn render_local_conditions(conditions: &LocalConditions) -> String {
    let mut out = render_weather(conditions.weather.as_ref(), conditions.air_quality.as_ref());
    for failure in &conditions.failures {
        let _ = writeln!(out, "Unavailable:  {} ({})", failure.source, failure.error);
    }
    out
}

pub fn render_cmes(events: &[CmeEvent]) -> String {
    if events.is_empty() {
        return "No CMEs in range\n".to_string();
    }
    let mut out = String::new();
    for e in events {
        let _ = writeln!(
            out,
            "{}  {:>6} km/s  half-angle {:>4}  type {:<2}  {}  {}",
            time_or_dash(e.start_time),
            opt_or_dash(e.speed_km_s, 0),
            opt_or_dash(e.half_angle_deg, 0),
            e.cme_type.as_deref().unwrap_or(NO_DATA),
            e.source_location.as_deref().unwrap_or(NO_DATA),
            e.activity_id
        );
    }
    out
}

pub fn render_flares(events: &[FlareEvent]) -> String {
    if events.is_empty() {
        return "No flares in range\n".to_string();
    }
    let mut out = String::new();
    for e in events {
        let _ = writeln!(
            out,
            "{}  peak {}  {:<5}  {}  AR {}",
            time_or_dash(e.begin_time),
            time_or_dash(e.peak_time),
            e.class_type.as_deref().unwrap_or(NO_DATA),
            e.source_location.as_deref().unwrap_or(NO_DATA),
            e.active_region
                .map(|r| r.to_string())
                .unwrap_or_else(|| NO_DATA.to_string())
        );
    }
    out
}

pub fn render_storms(events: &[StormEvent]) -> String {
    if events.is_empty() {
        return "No geomagnetic storms in range\n".to_string();
    }
    let mut out = String::new();
    for e in events {
        let _ = writeln!(
            out,
            "{}  max Kp {:.2} ({})  {} observations",
            time_or_dash(e.start_time),
            e.max_kp,
            crate::data::swpc::storm_level(e.max_kp),
            e.kp_observations
        );
    }
    out
}

pub fn render_track(track: &SatelliteTrack) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} (NORAD {}){}",
        track.name,
        track.norad_id,
        if track.is_visible() { " - above horizon" } else { "" }
    );
    for p in &track.positions {
        let _ = writeln!(
            out,
            "{}  lat {:>8.3}  lon {:>8.3}  alt {:>7.1} km  az {:>6.1}  el {:>6.1}",
            time_or_dash(Some(p.time)),
            p.latitude,
            p.longitude,
            p.altitude_km,
            p.azimuth,
            p.elevation
        );
    }
    out
}

pub fn render_aurora(nowcast: &AuroraNowcast) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Aurora nowcast: observed {}, forecast {}",
        time_or_dash(nowcast.observation_time),
        time_or_dash(nowcast.forecast_time)
    );
    let _ = writeln!(
        out,
        "{} active cells, max probability {:.0}%",
        nowcast.points.len(),
        nowcast.max_intensity()
    );

    let mut strongest: Vec<_> = nowcast.points.iter().collect();
    strongest.sort_by(|a, b| b.intensity.total_cmp(&a.intensity));
    for p in strongest.into_iter().take(AURORA_TOP_N) {
        let _ = writeln!(
            out,
            "  lat {:>6.1}  lon {:>7.1}  {:>3.0}%",
            p.latitude, p.longitude, p.intensity
        );
    }
    out
}

pub fn render_forecast(forecast: &Forecast) -> String {
    let s = &forecast.snapshot;
    format!(
        "{}h forecast: {:.1}% [{}], arrival within {:.1} h, confidence {:.1}%\n",
        forecast.period_hours, s.probability, s.alert_level, s.arrival_hours, s.confidence
    )
}

pub fn render_model_info(info: &ModelInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {}",
        info.name,
        info.version.as_deref().unwrap_or("")
    );
    if let Some(source) = &info.data_source {
        let _ = writeln!(out, "Data source: {}", source);
    }
    if let Some(validation) = &info.validation_source {
        let _ = writeln!(out, "Validation:  {}", validation);
    }
    if let Some(architecture) = info.architecture.as_object() {
        for (name, value) in architecture {
            let rendered = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            let _ = writeln!(out, "  {}: {}", name, rendered);
        }
    }
    out
}

pub fn render_accuracy(metrics: &AccuracyMetrics) -> String {
    let mut out = String::new();
    let rows = [
        ("Accuracy", metrics.accuracy),
        ("Precision", metrics.precision),
        ("Recall", metrics.recall),
        ("F1", metrics.f1_score),
        ("AUC-ROC", metrics.auc_roc),
    ];
    for (name, value) in rows {
        let _ = writeln!(out, "{:<10} {}", name, opt_or_dash(value, 2));
    }
    if let Some(period) = &metrics.validation_period {
        let _ = writeln!(out, "Validated on {}", period);
    }
    if let Some(total) = metrics.total_events_tested {
        let _ = writeln!(out, "Events tested: {}", total);
    }
    out
}

pub fn render_features(weights: &[FeatureWeight]) -> String {
    let mut out = String::new();
    for w in weights {
        let bar = "#".repeat((w.importance.clamp(0.0, 1.0) * 40.0).round() as usize);
        let _ = writeln!(out, "{:<12} {:>5.1}% {}", w.feature, w.importance * 100.0, bar);
    }
    out
}

pub fn render_realtime(series: &RealtimeSeries) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}: {} points ({} to {})",
        series.data_source,
        series.timestamps.len(),
        time_or_dash(series.timestamps.first().copied()),
        time_or_dash(series.timestamps.last().copied())
    );
    for (name, values) in &series.columns {
        let _ = writeln!(out, "  {:<12} latest {}", name, opt_or_dash(values.last().copied(), 2));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SourceId;

    #[test]
    fn test_render_summary_default_uses_placeholders() {
        let text = render_summary(&AggregateSummary::default());

        assert!(text.contains("Kp index:     0.00 (--)"));
        assert!(text.contains("X-ray:        --"));
        assert!(text.contains("(mock)"));
        assert!(!text.contains("Degraded sources"));
    }

    #[test]
    fn test_render_summary_lists_degraded_sources() {
        let mut summary = AggregateSummary::default();
        summary.sources_degraded.insert(SourceId::Kp);
        summary.sources_degraded.insert(SourceId::Cme);

        let text = render_summary(&summary);

        assert!(text.contains("Degraded sources: kp, cme"));
    }

    #[test]
    fn test_render_empty_catalogs() {
        assert_eq!(render_cmes(&[]), "No CMEs in range\n");
        assert_eq!(render_flares(&[]), "No flares in range\n");
        assert_eq!(render_storms(&[]), "No geomagnetic storms in range\n");
    }

    #[test]
    fn test_render_local_conditions_lists_failures() {
        let conditions = LocalConditions {
            weather: None,
            air_quality: None,
            failures: vec![crate::data::ProviderFailure {
                source: SourceId::Weather,
                error: "upstream returned HTTP 500".to_string(),
            }],
        };

        let text = render_local_conditions(&conditions);

        assert_eq!(text, "Unavailable:  weather (upstream returned HTTP 500)\n");
    }

    #[test]
    fn test_render_features_bar() {
        let text = render_features(&[FeatureWeight {
            feature: "speed".to_string(),
            importance: 0.25,
        }]);

        assert!(text.contains("25.0%"));
        assert!(text.contains(&"#".repeat(10)));
    }
}
