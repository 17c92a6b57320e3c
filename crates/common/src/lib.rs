mod files;
pub use files::*;
use snafu::ResultExt;

#[derive(Debug, snafu::Snafu)]
pub enum InitLoggerError {
    #[snafu(display("Failed to initialize logger: {}", source))]
    LoggerFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Installs the global `tracing` subscriber. `log_level` is an `EnvFilter`
/// directive such as `info` or `info,allocation_client=debug`.
pub fn init_logger(log_level: &str) -> Result<(), InitLoggerError> {
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .try_init()
        .context(LoggerFailedSnafu)?;

    Ok(())
}
