//! # robot-core
//!
//! Shared library for the robot command channel containing the envelope
//! protocol, the correlation-token allocator, and the discovered-device model.
//!
//! It has no dependencies on sockets, async runtimes, or mDNS libraries, so it
//! can be tested anywhere and reused by any transport.
//!
//! # Architecture overview (for beginners)
//!
//! A controlling process talks to a robot by sending small *envelopes* over a
//! WebSocket.  Each envelope names a command, carries an opaque payload, and
//! holds a *correlation token* so that the robot's reply can be matched with
//! the request that caused it.
//!
//! - **`protocol`** – The [`Envelope`] type, its binary codec and text framing,
//!   and the [`TokenAllocator`] that hands out correlation tokens.
//!
//! - **`domain`** – The [`Device`] snapshot produced by local-network
//!   discovery and the [`RobotFamily`] that decides which service type to
//!   browse for.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `robot_core::Envelope` instead of `robot_core::protocol::envelope::Envelope`.
pub use domain::device::{Advertisement, Device, RobotFamily};
pub use protocol::codec::{decode_envelope, decode_frame, encode_envelope, encode_frame, ProtocolError};
pub use protocol::envelope::{CommandId, Envelope, DEFAULT_CHANNEL_PORT, TARGET_UNSUPPORTED};
pub use protocol::token::{CorrelationToken, TokenAllocator};
