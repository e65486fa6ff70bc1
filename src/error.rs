use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum GatewayError {
    #[error("Failed to bind MQTT listener: {0}")]
    ListenerBindFailed(String),

    #[error("Store operation failed: {0}")]
    StoreError(String),

    #[error("Session not connected: {0}")]
    SessionNotConnected(String),

    #[error("Outbound channel closed for client: {0}")]
    OutboundChannelClosed(String),

    #[error(transparent)]
    CodecError(#[from] rumqttc::mqttbytes::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
