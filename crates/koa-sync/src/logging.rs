//! Subscriber setup for hosts that don't install their own.
//!
//! `RUST_LOG` picks the filter (default `koa_sync=info`); set
//! `KOA_LOG_FORMAT=json` for one JSON object per line.

use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FORMAT: &str = "KOA_LOG_FORMAT";
const DEFAULT_FILTER: &str = "koa_sync=info";

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    if wants_json(std::env::var(ENV_LOG_FORMAT).ok().as_deref()) {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

fn wants_json(format: Option<&str>) -> bool {
    format.is_some_and(|v| v.eq_ignore_ascii_case("json"))
}
