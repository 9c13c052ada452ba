//! The envelope: one protocol message unit exchanged with the robot.
//!
//! An envelope is a small header (command, correlation token, target) wrapped
//! around an opaque payload.  This layer never looks inside the payload; its
//! schema is owned by whoever builds the request for a given command.

use serde::{Deserialize, Serialize};

use crate::protocol::token::CorrelationToken;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current binary envelope version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the fixed part of the binary envelope, before the token bytes:
/// version (1) + reserved (1) + command (4) + target (4) + token_len (2).
pub const FIXED_HEADER_SIZE: usize = 12;

/// Size of the payload length prefix that follows the token.
pub const PAYLOAD_LEN_SIZE: usize = 4;

/// `target` value meaning "the connected robot does not implement this command".
pub const TARGET_UNSUPPORTED: i32 = -1;

/// `target` value written on requests originating from this client.
pub const TARGET_DEFAULT: i32 = 0;

/// Robots listen for the command channel on this port unless they advertise
/// a different one.
pub const DEFAULT_CHANNEL_PORT: u16 = 8800;

/// Identifier of a robot command, shared between client and robot firmware.
pub type CommandId = u32;

// ── Envelope ──────────────────────────────────────────────────────────────────

/// A single protocol message: header fields plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The operation this envelope belongs to.
    pub command: CommandId,
    /// Ties a reply to its request; `"0"` when no correlation is expected.
    pub token: CorrelationToken,
    /// Routing data echoed by the robot; [`TARGET_UNSUPPORTED`] is reserved.
    pub target: i32,
    /// Command-specific bytes, never interpreted by the channel.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Builds an outbound request envelope.
    pub fn request(command: CommandId, token: CorrelationToken, payload: Vec<u8>) -> Self {
        Self {
            command,
            token,
            target: TARGET_DEFAULT,
            payload,
        }
    }

    /// Builds an outbound fire-and-forget envelope (token `"0"`).
    pub fn fire_and_forget(command: CommandId, payload: Vec<u8>) -> Self {
        Self::request(command, CorrelationToken::fire_and_forget(), payload)
    }

    /// Builds the reply a robot sends when it does not know `command`.
    pub fn unsupported(command: CommandId, token: CorrelationToken) -> Self {
        Self {
            command,
            token,
            target: TARGET_UNSUPPORTED,
            payload: Vec::new(),
        }
    }

    /// Returns `true` if the robot flagged the command as unsupported.
    pub fn is_unsupported(&self) -> bool {
        self.target == TARGET_UNSUPPORTED
    }
}
