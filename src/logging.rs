//! Logging configuration using tracing
//!
//! Structured logging to stderr, filtered through `RUST_LOG`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber
///
/// `RUST_LOG` wins when set. Otherwise the default level is `warn`, or `info`
/// when `verbose` is requested, so a batch run stays quiet under cron.
///
/// # Example RUST_LOG values
/// - `RUST_LOG=issue_mirror=debug` - engine decisions per issue
/// - `RUST_LOG=issue_mirror::integrations=trace` - every remote call
///
/// # Errors
/// Returns an error if a global subscriber is already installed
pub fn init(verbose: bool) -> crate::Result<()> {
    let default_level = if verbose { "info" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| crate::SyncError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let _ = init(false);
        assert!(init(true).is_err());
    }
}
