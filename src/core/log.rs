use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// Maps `-v` occurrences to a level: warnings by default, then info, then debug.
fn level_for(verbosity: u8) -> (LevelFilter, &'static str) {
    match verbosity {
        0 => (LevelFilter::WARN, "warn"),
        1 => (LevelFilter::INFO, "info"),
        _ => (LevelFilter::DEBUG, "debug"),
    }
}

/// Logs to stderr so price output on stdout stays clean. `RUST_LOG` overrides.
pub fn init_logging(verbosity: u8) {
    let (level_filter, level) = level_for(verbosity);
    let app_filter = Targets::new()
        .with_target("pricer", level_filter)
        .with_default(LevelFilter::WARN);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(app_filter)
        .with(env_filter)
        .init();
}
