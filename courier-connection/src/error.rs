//! Error types for broker connectivity

use thiserror::Error;

/// Errors that can occur while talking to the broker
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Network socket failure while reaching the broker
    #[error("Socket failure: {0}")]
    Socket(#[from] std::io::Error),

    /// The broker could not be reached
    #[error("Broker unreachable: {0}")]
    BrokerUnreachable(String),

    /// The broker refused the credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No live connection exists
    #[error("No broker connection is available to perform this action")]
    NotConnected,

    /// The connection manager was disposed
    #[error("Connection manager has been disposed")]
    Disposed,

    /// Channel could not be opened or was closed
    #[error("Channel failure: {0}")]
    Channel(String),

    /// Failed to publish a message
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Failed to start or continue consuming
    #[error("Consume failed: {0}")]
    Consume(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Any other broker-side failure
    #[error("Broker error: {0}")]
    Broker(String),
}

impl ConnectionError {
    /// Check if the reconnect policy may retry this error.
    ///
    /// Only socket failures and an unreachable broker qualify; everything
    /// else aborts a connect attempt immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectionError::Socket(_) | ConnectionError::BrokerUnreachable(_)
        )
    }
}

#[cfg(feature = "rabbitmq")]
impl From<lapin::Error> for ConnectionError {
    fn from(err: lapin::Error) -> Self {
        match &err {
            lapin::Error::IOError(_) => ConnectionError::BrokerUnreachable(err.to_string()),
            lapin::Error::InvalidChannelState(_) | lapin::Error::ChannelsLimitReached => {
                ConnectionError::Channel(err.to_string())
            }
            lapin::Error::InvalidConnectionState(_) => {
                ConnectionError::BrokerUnreachable(err.to_string())
            }
            _ => ConnectionError::Broker(err.to_string()),
        }
    }
}

/// Result alias for connection operations
pub type Result<T> = std::result::Result<T, ConnectionError>;
