use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

const FALLBACK_LEVEL: &str = "info";

/// Builds the log filter from `logging.level`. A blank or unparseable level
/// falls back to `info`.
pub fn log_filter(logging: &LoggingConfig) -> EnvFilter {
    let level = logging.level.trim();
    if level.is_empty() {
        return EnvFilter::new(FALLBACK_LEVEL);
    }
    EnvFilter::try_new(level).unwrap_or_else(|e| {
        eprintln!("invalid log level {:?} ({}), using {}", level, e, FALLBACK_LEVEL);
        EnvFilter::new(FALLBACK_LEVEL)
    })
}

/// Installs the global tracing subscriber. Call once, from the binary.
///
/// `logging.json` switches to one JSON object per line, with the agent and
/// request fields of each event flattened to the top level.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = log_filter(logging);

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}
