use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    #[error("Provisioning error: {0}")]
    ProvisioningError(#[from] provisioning::Error),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<toml::de::Error> for FleetError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

impl From<anyhow::Error> for FleetError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}
