use thiserror::Error;

/// Errors that can occur when loading or saving settings
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    ReadError(String),

    #[error("Invalid settings value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Errors that can occur when running synthetic probes
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Invalid monitor definition: {0}")]
    InvalidMonitor(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur in the time-series store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Errors that can occur when dispatching notifications
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}
