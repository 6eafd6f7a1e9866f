use thiserror::Error;

/// Top-level error type for the UrbanEye workspace.
///
/// Covers configuration and serialization failures shared by every crate.
/// The assistant crate defines its own `AssistantError` for session-level
/// failures and converts from this type where configuration is involved.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UrbanEyeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for UrbanEyeError {
    fn from(err: toml::de::Error) -> Self {
        UrbanEyeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for UrbanEyeError {
    fn from(err: toml::ser::Error) -> Self {
        UrbanEyeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for UrbanEyeError {
    fn from(err: serde_json::Error) -> Self {
        UrbanEyeError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for UrbanEye operations.
pub type Result<T> = std::result::Result<T, UrbanEyeError>;
