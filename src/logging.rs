//! Logging setup
//!
//! Log lines go to stderr so stdout stays free for decisions. Environment:
//! - `RUST_LOG`: filter directives (default `shadow_gatekeeper=info`)
//! - `SHADOW_LOG_JSON`: emit JSON lines instead of text
//! - `SHADOW_LOG_DIR`: also write a daily rolling log file in this directory

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "shadow_gatekeeper=info";
const LOG_DIR_ENV: &str = "SHADOW_LOG_DIR";
const LOG_JSON_ENV: &str = "SHADOW_LOG_JSON";
const LOG_FILE_PREFIX: &str = "shadow-gatekeeper.log";

/// Install the global subscriber
///
/// Returns the file writer's guard when file logging is on; keep it alive
/// until exit so buffered lines are flushed.
pub fn init_logging() -> anyhow::Result<Option<WorkerGuard>> {
    let filter = env_filter(std::env::var("RUST_LOG").ok().as_deref());
    let json = flag_enabled(std::env::var(LOG_JSON_ENV).ok().as_deref());

    let stderr_layer = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// Filter from `RUST_LOG`, falling back to the default on absence or bad syntax
fn env_filter(directives: Option<&str>) -> EnvFilter {
    match directives {
        Some(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .unwrap_or_else(|e| {
                eprintln!("Ignoring invalid RUST_LOG {:?}: {}", directives, e);
                EnvFilter::new(DEFAULT_FILTER)
            }),
        _ => EnvFilter::new(DEFAULT_FILTER),
    }
}

fn flag_enabled(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}
