//! Protocol module: the envelope type, its codec, and correlation tokens.

pub mod codec;
pub mod envelope;
pub mod token;

pub use codec::{decode_envelope, decode_frame, encode_envelope, encode_frame, ProtocolError};
pub use envelope::*;
pub use token::{CorrelationToken, TokenAllocator};
