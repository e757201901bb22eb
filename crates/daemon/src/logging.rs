//! Subscriber setup for the binary.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::service_config::Config;

const LOG_FILE_PREFIX: &str = "syndicate-ms.log";

/// `RUST_LOG` wins over the configured level.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber: stderr always, plus a daily rolling file
/// when the config names a log directory. Keep the guard alive for as long
/// as the process logs; dropping it flushes the file writer.
pub fn init(config: &Config) -> Option<WorkerGuard> {
    let (file_layer, guard) = match config.log_dir.as_deref() {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(dir));
            (Some(fmt::layer().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
    if installed.is_err() {
        // A subscriber already exists, e.g. in tests.
        return None;
    }
    guard
}

fn file_appender(dir: &Path) -> tracing_appender::rolling::RollingFileAppender {
    tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_falls_back() {
        // Must not panic on garbage.
        let _ = env_filter("not a level ===");
        let _ = env_filter("syndicate_ms=debug,warn");
    }
}
