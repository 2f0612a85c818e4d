//! Error types for mqtt-pubsub-tools

use thiserror::Error;

/// Main error type for both tools
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("invalid message template: {0}")]
    Template(#[from] crate::template::TemplateError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),
}

/// Errors related to MQTT operations
#[derive(Error, Debug)]
pub enum MqttError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

pub type Result<T> = std::result::Result<T, Error>;
