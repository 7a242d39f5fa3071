//! Logging setup for Dotland binaries.
//!
//! Library crates only emit `tracing` events; this crate installs the
//! subscriber. Console output carries uptime timestamps and targets. Debug
//! builds can also write JSON lines to `dotland.log` for post-mortem
//! analysis.

use std::path::Path;

use dotland_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config sets a level.
pub const DEFAULT_FILTER: &str = "info";

/// File name of the JSON log inside the log directory.
pub const LOG_FILE: &str = "dotland.log";

/// Filter directives for `config`: its `debug.log_level`, or
/// [`DEFAULT_FILTER`] when unset or empty.
pub fn filter_directives(config: Option<&Config>) -> String {
    config
        .map(|config| config.debug.log_level.trim())
        .filter(|level| !level.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
///
/// ```no_run
/// use dotland_config::Config;
///
/// let config = Config::default();
/// dotland_log::init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join(LOG_FILE))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// `EnvFilter` built from [`DEFAULT_FILTER`].
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_log_level() {
        assert!(default_env_filter().to_string().contains("info"));
        assert_eq!(filter_directives(None), "info");
    }

    #[test]
    fn test_config_level_used() {
        let mut config = Config::default();
        config.debug.log_level = "warn,dotland_net=debug".into();
        assert_eq!(filter_directives(Some(&config)), "warn,dotland_net=debug");

        config.debug.log_level = "  ".into();
        assert_eq!(filter_directives(Some(&config)), DEFAULT_FILTER);
    }

    #[test]
    fn test_env_filter_parsing() {
        for directives in ["info", "debug,dotland_sync=trace", "warn,dotland_net=debug", "error"] {
            assert!(
                EnvFilter::try_new(directives).is_ok(),
                "failed to parse filter: {directives}"
            );
        }
    }

    #[test]
    fn test_json_layer_writes_parseable_lines() {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .json(),
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(player = 3, "joined");
        });

        let bytes = buffer.0.lock().unwrap().clone();
        let line = String::from_utf8(bytes).unwrap();
        let event: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(event["level"], "INFO");
        assert_eq!(event["fields"]["message"], "joined");
        assert_eq!(event["fields"]["player"], 3);
    }
}
