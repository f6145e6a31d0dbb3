//! Error types for the WebSub hub and subscriber

use thiserror::Error;

/// WebSub errors
#[derive(Debug, Error)]
pub enum WebSubError {
    /// No usable hub/topic metadata found
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Malformed or policy-violating subscription request, or hub rejection
    #[error("Subscriber error: {0}")]
    Subscriber(String),

    #[error("Not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    /// Confirmation never arrived before the request TTL ran out
    #[error("Hub not responding: {0}")]
    HubNotResponding(String),

    /// Publish target lacks matching Link relations or is unreachable
    #[error("Notification error: {0}")]
    Notification(String),

    /// The hub denied a subscription request
    #[error("Subscription denied: {0}")]
    Denied(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WebSubError {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        WebSubError::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn subscriber(message: impl Into<String>) -> Self {
        WebSubError::Subscriber(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        WebSubError::Validation(message.into())
    }

    pub fn notification(message: impl Into<String>) -> Self {
        WebSubError::Notification(message.into())
    }
}

impl From<std::io::Error> for WebSubError {
    fn from(err: std::io::Error) -> Self {
        WebSubError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for WebSubError {
    fn from(err: serde_json::Error) -> Self {
        WebSubError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for WebSubError {
    fn from(err: config::ConfigError) -> Self {
        WebSubError::Config(err.to_string())
    }
}

impl From<rocksdb::Error> for WebSubError {
    fn from(err: rocksdb::Error) -> Self {
        WebSubError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for WebSubError {
    fn from(err: reqwest::Error) -> Self {
        WebSubError::Network(err.to_string())
    }
}

/// Result type for WebSub operations
pub type WebSubResult<T> = Result<T, WebSubError>;
