//! Controller error types.

use gbs_common::config::ConfigError;
use gbs_common::hal::HalError;
use thiserror::Error;

/// Errors surfaced by the sync controller.
///
/// Transient sync loss, SOG miscalibration, implausible corrections and
/// clock lock failures are handled internally and never appear here.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Register bus or clock synthesizer transport failure.
    #[error("Bus error: {0}")]
    Bus(#[from] HalError),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The register write/read-back self-test failed.
    #[error("Board not responding")]
    BoardNotResponding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hal_errors_convert() {
        fn fails() -> Result<(), SyncError> {
            Err(HalError::Bus {
                offset: 0xf0,
                reason: "nak".to_string(),
            })?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(matches!(err, SyncError::Bus(_)));
        assert!(err.to_string().contains("nak"));
    }

    #[test]
    fn config_errors_convert() {
        let err: SyncError = ConfigError::ValidationError("bad".to_string()).into();
        assert!(err.to_string().contains("bad"));
    }
}
