//! Logging setup using `tracing` and `tracing-subscriber`
//!
//! Logs always go to stderr so that report and JSON output on stdout stay
//! clean. `RUST_LOG` takes precedence over the verbosity flag.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Maps `-v` occurrences to a level; the default is warnings only
pub fn level_for_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn build_env_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_lowercase();
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Dependencies stay at warn.
        EnvFilter::new(format!("warn,spacewatch={}", level))
    })
}

/// Installs the global subscriber
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init_logging(verbosity: u8, json: bool) {
    let filter = build_env_filter(level_for_verbosity(verbosity));

    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr).with_target(false))
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!("Logging already initialized: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for_verbosity(0), Level::WARN);
        assert_eq!(level_for_verbosity(1), Level::INFO);
        assert_eq!(level_for_verbosity(2), Level::DEBUG);
        assert_eq!(level_for_verbosity(9), Level::TRACE);
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging(0, false);
        init_logging(2, true);
    }
}
