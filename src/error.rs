//! Error types for kadmesh

use thiserror::Error;

/// Protocol-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Failed to serialize a wire message
    #[error("Failed to encode message: {0}")]
    EncodeFailed(String),

    /// Failed to deserialize bytes into a wire message
    #[error("Failed to decode message: {0}")]
    DecodeFailed(String),

    /// Message size exceeds maximum allowed
    #[error("Message too large: {0} bytes (max: {1} bytes)")]
    MessageTooLarge(usize, usize),

    /// Unknown message type tag received
    #[error("Invalid message type: {0}")]
    InvalidMessageType(i32),

    /// A field required for this message kind is missing or malformed
    #[error("Invalid field value: {0}")]
    InvalidField(&'static str),
}

/// Transport-level errors, surfaced by `Transport` implementations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Failed to establish a connection to an endpoint
    #[error("Connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        /// Endpoint the connection was attempted against
        endpoint: String,
        /// Implementation-specific failure detail
        reason: String,
    },

    /// No live connection for the given connection id
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// A send on a live connection failed
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Routing errors observable through the public API
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    /// A pending request's deadline elapsed before a response arrived
    #[error("Request timed out")]
    Timeout,

    /// The node has not joined the network yet
    #[error("Not joined to the network")]
    NotJoined,

    /// No peer is available to carry the message
    #[error("No route to {0}")]
    NoRoute(String),

    /// The response slot was dropped without being fulfilled
    #[error("Request cancelled")]
    Cancelled,
}

/// Main error type for kadmesh operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Protocol errors
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport errors
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Routing errors
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
