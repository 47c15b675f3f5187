//! Logging to stderr using env_logger
//!
//! The level comes from the bot config; `RUST_LOG`, when set, wins and
//! accepts the usual env_logger filter syntax.

use log::LevelFilter;
use std::io::Write;

/// Map a config level name to a filter, unknown names mean `Info`
pub fn level_from_name(name: &str) -> LevelFilter {
    match name.trim().to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Install the global logger
///
/// Calling it a second time is a no-op.
pub fn init(level: &str) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level_from_name(level))
        // Octocrab's HTTP stack is chatty at debug
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("hyper_util", LevelFilter::Warn)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, false),
                record.level(),
                record.target(),
                record.args()
            )
        });

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_name() {
        assert_eq!(level_from_name("debug"), LevelFilter::Debug);
        assert_eq!(level_from_name(" WARN "), LevelFilter::Warn);
        assert_eq!(level_from_name("warning"), LevelFilter::Warn);
        assert_eq!(level_from_name("off"), LevelFilter::Off);
        assert_eq!(level_from_name("verbose"), LevelFilter::Info);
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init("info");
        init("debug");
    }
}
