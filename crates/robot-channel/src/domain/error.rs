//! Error types for the channel and discovery layers.
//!
//! Protocol-level decode failures come from `robot_core` as
//! [`ProtocolError`]; they convert into [`ChannelError::MalformedEnvelope`]
//! with `?`.

use std::time::Duration;

use robot_core::{CommandId, CorrelationToken, ProtocolError};
use thiserror::Error;

/// Errors returned by the connection and the handler registry.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The transport could not be opened within the allotted time.
    #[error("timed out after {timeout:?} connecting to {address}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// The robot refused the connection or the handshake failed.
    #[error("connection to {address} refused: {reason}")]
    ConnectRefused { address: String, reason: String },

    /// A send was attempted while no transport is open.
    #[error("not connected to a robot")]
    NotConnected,

    /// An envelope could not be encoded or decoded.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] ProtocolError),

    /// A pending request with the same command and token is already waiting.
    #[error("a request for command {command} with token {token} is already pending")]
    DuplicateCorrelation {
        command: CommandId,
        token: CorrelationToken,
    },

    /// Writing to the open transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors raised while browsing for robots.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The mDNS daemon could not be started or refused the browse request.
    #[error("mDNS browse for {service_type} failed: {reason}")]
    Browse {
        service_type: String,
        reason: String,
    },

    /// The mDNS daemon is not running.
    #[error("mDNS daemon unavailable: {0}")]
    Unavailable(String),
}
