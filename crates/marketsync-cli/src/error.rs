use marketsync_core::{ConfigError, ProviderError, StoreError, SyncError, WarehouseError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] marketsync_core::ValidationError),

    #[error("command error: {0}")]
    Command(String),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<SyncError> for CliError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::NotConnected { attempts } => Self::Provider(ProviderError::not_connected(
                format!("provider is not connected after {attempts} attempt(s)"),
            )),
            SyncError::Provider(error) => Self::Provider(error),
            SyncError::Storage(error) => Self::Store(error),
            SyncError::Validation(error) => Self::Validation(error),
        }
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Command(_) => 2,
            Self::Provider(_) => 4,
            Self::Warehouse(_) => 5,
            Self::Store(_) => 5,
            Self::Config(_) => 6,
            Self::Logging(_) => 6,
            Self::Serialization(_) => 10,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_level_failures_map_to_their_categories() {
        let not_connected = CliError::from(SyncError::NotConnected { attempts: 3 });
        assert_eq!(not_connected.exit_code(), 4);
        assert!(not_connected.to_string().contains("3 attempt(s)"));

        let invalid = CliError::from(SyncError::Validation(
            marketsync_core::ValidationError::EmptyCode,
        ));
        assert_eq!(invalid.exit_code(), 2);

        let storage = CliError::from(SyncError::Storage(StoreError::Corrupt(String::from(
            "bad timestamp",
        ))));
        assert_eq!(storage.exit_code(), 5);
    }

    #[test]
    fn config_errors_exit_with_six() {
        let error = CliError::from(ConfigError::Invalid(String::from("sync.workers")));
        assert_eq!(error.exit_code(), 6);
    }
}
