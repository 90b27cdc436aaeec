//! Console logging with progress bars.
//!
//! Log lines are written through the indicatif layer so they do not tear the
//! progress bars drawn by the parallel executor.

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "reckon=info";

/// Installs a global subscriber filtered by `RUST_LOG`, or
/// [`DEFAULT_FILTER`] if it is unset.
///
/// Fails if a global subscriber is already installed.
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    init_with(filter)
}

pub fn init_with(filter: EnvFilter) -> anyhow::Result<()> {
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Either this call installs the subscriber or another test did.
        let _ = init_with(EnvFilter::new("off"));
        assert!(init().is_err());
    }
}
