use std::sync::{Arc, OnceLock};

/// Receives cipherstore's log records in the host application's logging
/// system.
///
/// ```rust
/// use cipherstore_core::logger::{Logger, LogLevel};
///
/// struct StderrLogger;
///
/// impl Logger for StderrLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         eprintln!("[{level:?}] {message}");
///     }
/// }
/// ```
pub trait Logger: Sync + Send {
    /// Records one formatted message.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a forwarded record, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Per-statement detail.
    Trace,
    /// Session and registry lifecycle detail.
    Debug,
    /// Opens, closes, deletes and seeding.
    Info,
    /// Recoverable problems such as a changed seed asset.
    Warn,
    /// Failures.
    Error,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

const CRATE_PREFIX: &str = "cipherstore";

static HOST_LOGGER: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// `log` facade backend that hands records to [`HOST_LOGGER`].
struct Bridge;

impl log::Log for Bridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        should_forward(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !should_forward(record.metadata()) {
            return;
        }
        match HOST_LOGGER.get() {
            Some(logger) => logger.log(record.level().into(), record.args().to_string()),
            None => eprintln!("cipherstore log (no logger set): {}", record.args()),
        }
    }

    fn flush(&self) {}
}

/// Debug and trace records pass only when targeted at cipherstore's own
/// modules. The target defaults to the module path.
fn should_forward(metadata: &log::Metadata) -> bool {
    metadata.level() <= log::Level::Info || metadata.target().starts_with(CRATE_PREFIX)
}

/// Installs `logger` as the destination for all cipherstore log records.
///
/// Only the first call takes effect. If another `log` backend is already
/// installed in the process, the bridge is not registered and records go to
/// that backend instead.
pub fn set_logger(logger: Arc<dyn Logger>) {
    static BRIDGE: Bridge = Bridge;
    if HOST_LOGGER.set(logger).is_err() {
        eprintln!("cipherstore logger already set, keeping the first one");
        return;
    }
    if let Err(err) = log::set_logger(&BRIDGE) {
        eprintln!("failed to install cipherstore log bridge: {err}");
        return;
    }
    log::set_max_level(log::LevelFilter::Trace);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn metadata(level: log::Level, target: &str) -> log::Metadata<'_> {
        log::Metadata::builder().level(level).target(target).build()
    }

    #[test]
    fn test_foreign_debug_records_are_dropped() {
        assert!(should_forward(&metadata(
            log::Level::Debug,
            "cipherstore_core::registry"
        )));
        assert!(!should_forward(&metadata(log::Level::Debug, "rusqlite::cache")));
        assert!(!should_forward(&metadata(log::Level::Trace, "tokio")));
        assert!(should_forward(&metadata(log::Level::Warn, "rusqlite::cache")));
    }

    #[test]
    fn test_custom_target_decides_forwarding() {
        // A cipherstore module logging to a foreign target is dropped below
        // info; a foreign module logging to a cipherstore target passes.
        assert!(!log::Log::enabled(
            &Bridge,
            &metadata(log::Level::Debug, "sql_timing")
        ));
        assert!(log::Log::enabled(
            &Bridge,
            &metadata(log::Level::Debug, "cipherstore::sql")
        ));
    }

    struct CapturingLogger(Mutex<Vec<(LogLevel, String)>>);

    impl Logger for CapturingLogger {
        fn log(&self, level: LogLevel, message: String) {
            if let Ok(mut records) = self.0.lock() {
                records.push((level, message));
            }
        }
    }

    #[test]
    fn test_set_logger_forwards_records() {
        let logger = Arc::new(CapturingLogger(Mutex::new(Vec::new())));
        set_logger(logger.clone());

        log::warn!("seed asset changed");

        let records = logger.0.lock().expect("records");
        assert!(records
            .iter()
            .any(|(level, message)| *level == LogLevel::Warn && message == "seed asset changed"));
    }
}
