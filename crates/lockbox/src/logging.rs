//! Logging initialisation.
//!
//! Libraries in this workspace only emit `tracing` events; installing a
//! subscriber is left to the process.

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Fails if a global subscriber is
/// already installed; use [`try_init`] where that is expected.
pub fn init(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| Error::Logging(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

/// Like [`init`], but a no-op if a subscriber is already installed.
///
/// Tests call this freely.
pub fn try_init(default_filter: &str) {
    let _ = init(default_filter);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_is_repeatable() {
        try_init("debug");
        try_init("debug");
        tracing::debug!("logging initialised twice without panicking");
    }

    #[test]
    fn test_second_init_reports_error() {
        try_init("info");
        assert!(matches!(init("info"), Err(Error::Logging(_))));
    }
}
