use anyhow::{Context, Result};
use tracing::metadata::LevelFilter;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
};

/// Prefix of the operational log files, e.g. `fuel-consumption-server.2024-01-01-10.log`
pub const LOG_FILE_PREFIX: &str = "fuel-consumption-server";

// Start logger, should be done inside main
pub fn init(log_path: String, is_verbose: bool, is_tracing: bool) -> Result<()> {
    // Redirect all logs from libs using "Log"
    LogTracer::init_with_filter(tracing::log::LevelFilter::Trace)
        .context("Failed to set logger")?;

    // Configure the console log
    let console_env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_verbose {
            EnvFilter::new(LevelFilter::DEBUG.to_string())
        } else {
            EnvFilter::new(LevelFilter::INFO.to_string())
        }
    });
    let console_layer = fmt::Layer::new()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(fmt::format::FmtSpan::NONE)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_filter(console_env_filter);

    // Configure the file log, this is the operational record of connects,
    // disconnects, skipped records and persistence failures
    let file_env_filter = if is_tracing {
        EnvFilter::new(LevelFilter::TRACE.to_string())
    } else {
        EnvFilter::new(LevelFilter::DEBUG.to_string())
    };
    let file_appender = custom_rolling_appender(
        log_path,
        tracing_appender::rolling::Rotation::HOURLY,
        LOG_FILE_PREFIX,
        "log",
    )?;
    let file_layer = fmt::Layer::new()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(fmt::format::FmtSpan::NONE)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_filter(file_env_filter);

    // Configure the default subscriber
    let subscriber = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)
        .context("Unable to set a global subscriber")?;

    Ok(())
}

fn custom_rolling_appender<P: AsRef<std::path::Path>>(
    dir: P,
    rotation: tracing_appender::rolling::Rotation,
    prefix: &str,
    suffix: &str,
) -> Result<tracing_appender::rolling::RollingFileAppender> {
    tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(prefix)
        .filename_suffix(suffix)
        .build(dir)
        .context("Failed to initialize rolling file appender")
}
