use thiserror::Error;

use crate::common::error::FrontendError::GenericError;
use crate::directory::AdvertiseFailure;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    #[error(
        "Invalid excess policy `{0}`, valid values are \"NO\", \"WAIT\", \"IDLE\", \"ALL\", \"UNREG\""
    )]
    InvalidExcessPolicy(String),
    #[error("Client monitor info must contain {expected} values, got {actual}")]
    InvalidMonitorInfo { expected: usize, actual: usize },
    #[error("Unknown resource record `{0}`")]
    UnknownResource(String),
    #[error("Crypto error: {0}")]
    CryptoError(String),
    #[error("Group `{group}` has been crashing too often, quitting the whole frontend:\n{output}")]
    GroupCrashLoop { group: String, output: String },
    #[error("{}", format_failures(.0))]
    MultiAdvertise(Vec<AdvertiseFailure>),
    #[error("Error: {0}")]
    GenericError(String),
}

fn format_failures(failures: &[AdvertiseFailure]) -> String {
    let mut message = format!("Advertising failed for {} target(s)", failures.len());
    for failure in failures {
        message.push_str(&format!("\n{failure}"));
    }
    message
}

impl From<serde_json::error::Error> for FrontendError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for FrontendError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(format!("{error:?}"))
    }
}

impl From<toml::de::Error> for FrontendError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

impl From<orion::errors::UnknownCryptoError> for FrontendError {
    fn from(error: orion::errors::UnknownCryptoError) -> Self {
        Self::CryptoError(error.to_string())
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}

impl From<String> for FrontendError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}
