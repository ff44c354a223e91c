//! spacewatch library
//!
//! Fetches space-weather telemetry from NOAA SWPC, NASA DONKI, N2YO,
//! OpenWeather/AQICN, a CME prediction backend and a chat model, caches it
//! briefly in memory, and merges it into one summary that tolerates partial
//! upstream failure.

pub mod aggregate;
pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod fetch;
pub mod health;
pub mod logging;
pub mod refresh;
pub mod report;
