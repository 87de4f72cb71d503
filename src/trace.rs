//! Optional trace logger for applications and tests

#[cfg(feature = "log")]
use std::fs::File;

#[cfg(feature = "log")]
use simplelog::{Config, LevelFilter, SimpleLogger, WriteLogger};

pub const TRACE_ENV: &str = "P11WRAP_TRACE";
pub const TRACE_LEVEL_ENV: &str = "P11WRAP_TRACE_LEVEL";

#[cfg(feature = "log")]
fn trace_level() -> LevelFilter {
    match std::env::var(TRACE_LEVEL_ENV) {
        Err(_) => LevelFilter::Error,
        Ok(l) => match l.as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Trace,
        },
    }
}

/// Installs a simple logger as the `log` backend based on the value of
/// the environment variable P11WRAP_TRACE:
/// - stdout -> logs to standard output
/// - file -> any other value is interpreted as a file name to log into
/// - NOT PRESENT -> No tracing is initialized
///
/// The log level is read from P11WRAP_TRACE_LEVEL and defaults to
/// `error`. Valid values are: off, error, warn, info, debug, trace.
/// Unknown values select `trace`.
///
/// Failures (a log file that can not be created, a logger already
/// installed) are ignored. Without the `log` feature this does nothing
/// and the application is expected to install its own logger.
pub fn trace_init() {
    #[cfg(feature = "log")]
    {
        let level = trace_level();
        match std::env::var(TRACE_ENV) {
            Err(_) => (),
            Ok(t) => match t.as_str() {
                "stdout" => {
                    let _ = SimpleLogger::init(level, Config::default());
                }
                file_name => {
                    if let Ok(file) = File::create(file_name) {
                        let _ =
                            WriteLogger::init(level, Config::default(), file);
                    }
                }
            },
        }
    }
}

#[test]
pub fn test_trace_init() {
    trace_init();
    trace_init();
}
