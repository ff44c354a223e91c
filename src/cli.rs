//! Command-line interface for spacewatch
//!
//! This module handles parsing of CLI arguments using clap and dispatches each
//! subcommand to the matching client. Reports go to stdout, as text or JSON;
//! logs go to stderr.

use std::path::PathBuf;

use chrono::{Days, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::aggregate::Aggregator;
use crate::config::{AppConfig, ConfigError};
use crate::data::satellite::ISS_NORAD_ID;
use crate::data::{Observer, PredictionProvider};
use crate::fetch::FetchError;
use crate::health::HealthProbe;
use crate::refresh::{RefreshHandle, RefreshMessage};
use crate::report;

/// Error types for CLI commands
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded or is incomplete
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An upstream request failed with no cached fallback
    #[error("Upstream request failed: {0}")]
    Fetch(#[from] FetchError),

    /// JSON output could not be produced
    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    /// No observer location from flags or config
    #[error("No observer location: pass --lat/--lon or set SPACEWATCH_OBSERVER_LAT/LON")]
    MissingObserver,
}

/// Space weather telemetry from NOAA, NASA and friends
#[derive(Parser, Debug)]
#[command(name = "spacewatch")]
#[command(about = "Space weather summaries from NOAA SWPC, NASA DONKI and a CME prediction backend")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to a TOML config file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Fetch every source once and print the merged summary
    Summary,

    /// Refresh the summary on an interval
    Watch {
        /// Seconds between refreshes (defaults to config)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,

        /// Stop after this many summaries
        #[arg(long)]
        cycles: Option<u32>,
    },

    /// Current CME prediction (live backend or mock)
    Predict,

    /// CME forecast for the next HOURS (1-72)
    Forecast {
        #[arg(value_parser = clap::value_parser!(u32).range(1..=72))]
        hours: u32,
    },

    /// Prediction model metadata
    Model {
        #[arg(value_enum)]
        view: ModelView,
    },

    /// Coronal mass ejections from NASA DONKI
    Cme {
        /// Days to look back (defaults to config)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=30))]
        days: Option<u32>,
    },

    /// Solar flares from NASA DONKI
    Flares {
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=30))]
        days: Option<u32>,
    },

    /// Geomagnetic storms from NASA DONKI
    Storms {
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=30))]
        days: Option<u32>,
    },

    /// Satellite positions from N2YO
    Satellite {
        /// NORAD catalog number (defaults to the ISS)
        #[arg(default_value_t = ISS_NORAD_ID)]
        norad_id: u32,

        /// Seconds of positions to fetch (1-300)
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=300))]
        seconds: u32,

        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },

    /// Weather and air quality at the observer
    Weather {
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },

    /// OVATION aurora nowcast
    Aurora,

    /// Check whether the prediction backend is live
    Health,

    /// Ask the space weather assistant a question
    Chat {
        /// Include the current summary as context
        #[arg(long)]
        context: bool,

        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelView {
    Info,
    Accuracy,
    Features,
    Realtime,
}

/// Prints `value` as pretty JSON, or as text rendered by `text`
fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T) -> String) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text(value));
    }
    Ok(())
}

fn catalog_range(days: u32) -> (NaiveDate, NaiveDate) {
    let end = Utc::now().date_naive();
    let start = end.checked_sub_days(Days::new(u64::from(days))).unwrap_or(end);
    (start, end)
}

/// Resolves the observer from flags, falling back to config
pub fn resolve_observer(
    lat: Option<f64>,
    lon: Option<f64>,
    config: &AppConfig,
) -> Result<Observer, CliError> {
    match (lat, lon) {
        (Some(latitude), Some(longitude)) => {
            if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
                return Err(ConfigError::Invalid(format!(
                    "observer {}, {} is out of range",
                    latitude, longitude
                ))
                .into());
            }
            Ok(Observer {
                latitude,
                longitude,
                altitude_m: 0.0,
            })
        }
        _ => config.observer.ok_or(CliError::MissingObserver),
    }
}

/// Runs the parsed command against a loaded config
pub async fn run(cli: Cli, config: AppConfig) -> Result<(), CliError> {
    let json = cli.json;
    let mut aggregator = Aggregator::from_config(&config);
    let clients = aggregator.clients().clone();

    match cli.command {
        Command::Summary => {
            let summary = aggregator.fetch_summary().await;
            emit(json, &summary, report::render_summary)
        }
        Command::Watch { interval, cycles } => {
            let mut refresh = config.refresh.clone();
            if let Some(secs) = interval {
                refresh.interval_secs = secs;
            }
            watch(aggregator, &refresh, cycles, json).await
        }
        Command::Predict => {
            let probe = HealthProbe::from_timeouts(&config.timeouts);
            let provider = PredictionProvider::select(&probe, &clients.prediction).await;
            let provided = provider.provide().await?;
            emit(json, &provided, report::render_prediction)
        }
        Command::Forecast { hours } => {
            let forecast = clients.prediction.fetch_forecast(hours).await?;
            emit(json, &forecast, report::render_forecast)
        }
        Command::Model { view } => match view {
            ModelView::Info => {
                let info = clients.prediction.fetch_model_info().await?.into_inner();
                emit(json, &info, report::render_model_info)
            }
            ModelView::Accuracy => {
                let metrics = clients.prediction.fetch_accuracy().await?.into_inner();
                emit(json, &metrics, report::render_accuracy)
            }
            ModelView::Features => {
                let weights = clients.prediction.fetch_feature_importance().await?.into_inner();
                emit(json, &weights, |w| report::render_features(w))
            }
            ModelView::Realtime => {
                let series = clients.prediction.fetch_realtime().await?;
                emit(json, &series, report::render_realtime)
            }
        },
        Command::Cme { days } => {
            let (start, end) = catalog_range(days.unwrap_or(config.cme_lookback_days));
            let events = clients.donki.fetch_cmes(start, end).await?.into_inner();
            emit(json, &events, |e| report::render_cmes(e))
        }
        Command::Flares { days } => {
            let (start, end) = catalog_range(days.unwrap_or(config.cme_lookback_days));
            let events = clients.donki.fetch_flares(start, end).await?.into_inner();
            emit(json, &events, |e| report::render_flares(e))
        }
        Command::Storms { days } => {
            let (start, end) = catalog_range(days.unwrap_or(config.cme_lookback_days));
            let events = clients.donki.fetch_storms(start, end).await?.into_inner();
            emit(json, &events, |e| report::render_storms(e))
        }
        Command::Satellite {
            norad_id,
            seconds,
            lat,
            lon,
        } => {
            let client = clients
                .satellite
                .as_ref()
                .ok_or(ConfigError::MissingKey("N2YO_API_KEY"))?;
            let observer = resolve_observer(lat, lon, &config)?;
            let track = client.fetch_positions(norad_id, &observer, seconds).await?.into_inner();
            emit(json, &track, report::render_track)
        }
        Command::Weather { lat, lon } => {
            let observer = resolve_observer(lat, lon, &config)?;
            if !clients.weather.has_weather() && !clients.weather.has_air_quality() {
                return Err(ConfigError::MissingKey("OPENWEATHER_API_KEY or AQICN_TOKEN").into());
            }
            let conditions = clients.weather.fetch_conditions(&observer).await?;
            emit(json, &conditions, report::render_local_conditions)
        }
        Command::Aurora => {
            let nowcast = clients.swpc.fetch_aurora().await?.into_inner();
            emit(json, &nowcast, report::render_aurora)
        }
        Command::Health => {
            let probe = HealthProbe::from_timeouts(&config.timeouts);
            let live = probe.is_live(&clients.prediction).await;
            let output = serde_json::json!({
                "backend": clients.prediction.base_url(),
                "live": live,
            });
            emit(json, &output, |_| {
                format!(
                    "{} is {}\n",
                    clients.prediction.base_url(),
                    if live { "live" } else { "not live (mock predictions in use)" }
                )
            })
        }
        Command::Chat { context, question } => {
            let chat = clients
                .chat
                .as_ref()
                .ok_or(ConfigError::MissingKey("GEMINI_API_KEY"))?;
            let summary = if context {
                Some(aggregator.fetch_summary().await)
            } else {
                None
            };
            let reply = chat.ask(&question.join(" "), summary.as_ref()).await?;
            emit(json, &serde_json::json!({ "model": chat.model(), "reply": reply }), |_| {
                format!("{}\n", reply.trim_end())
            })
        }
    }
}

async fn watch(
    aggregator: Aggregator,
    refresh: &crate::config::RefreshConfig,
    cycles: Option<u32>,
    json: bool,
) -> Result<(), CliError> {
    let mut handle = RefreshHandle::spawn(aggregator, refresh);
    let mut printed: u32 = 0;

    loop {
        tokio::select! {
            message = handle.receiver.recv() => {
                match message {
                    Some(RefreshMessage::SummaryUpdated(summary)) => {
                        emit(json, summary.as_ref(), report::render_summary)?;
                        printed += 1;
                        if cycles.is_some_and(|limit| printed >= limit) {
                            break;
                        }
                    }
                    Some(RefreshMessage::RefreshStarted { pass }) => {
                        info!(pass, "Refreshing");
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
