//! Correlation tokens and the thread-safe allocator that hands them out.
//!
//! # What is a correlation token? (for beginners)
//!
//! Every request sent to the robot carries a short string called a
//! *correlation token*.  When the robot answers, it echoes the same token back
//! in the reply header.  The client uses the token to find the caller that is
//! waiting for that particular reply, even when many requests are in flight
//! and the replies arrive in a different order than the requests were sent.
//!
//! The token `"0"` is reserved: it marks a *fire-and-forget* request for which
//! no reply is expected.  Events that the robot pushes on its own (sensor
//! reports, for example) are also sent with token `"0"`.
//!
//! # Thread safety
//!
//! The allocator uses an `AtomicU64` internally.  An atomic `fetch_add` reads,
//! increments and writes the counter as a single indivisible step, so two
//! tasks can call [`TokenAllocator::next`] at the same moment without ever
//! receiving the same token.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// The reserved token value meaning "no reply expected".
pub const FIRE_AND_FORGET_TOKEN: &str = "0";

/// A correlation token as it appears on the wire.
///
/// Tokens are plain decimal strings.  The newtype keeps them from being mixed
/// up with other strings (device names, service types) in function signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Returns the reserved fire-and-forget token (`"0"`).
    pub fn fire_and_forget() -> Self {
        Self(FIRE_AND_FORGET_TOKEN.to_string())
    }

    /// Returns `true` if this is the reserved `"0"` token.
    pub fn is_fire_and_forget(&self) -> bool {
        self.0 == FIRE_AND_FORGET_TOKEN
    }

    /// Borrows the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the token and returns the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<u64> for CorrelationToken {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for CorrelationToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CorrelationToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A lock-free, monotonically increasing source of correlation tokens.
///
/// The first call to [`next`](Self::next) returns `"1"`.  Zero is never
/// returned because `"0"` means fire-and-forget.
///
/// # Examples
///
/// ```rust
/// use robot_core::protocol::TokenAllocator;
///
/// let tokens = TokenAllocator::new();
/// assert_eq!(tokens.next().as_str(), "1");
/// assert_eq!(tokens.next().as_str(), "2");
/// ```
#[derive(Debug)]
pub struct TokenAllocator {
    inner: AtomicU64,
}

impl TokenAllocator {
    /// Creates an allocator whose first token is `"1"`.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next correlation token.
    ///
    /// Wraps from `u64::MAX` back to `1`, skipping the reserved zero.  In
    /// practice the wrap is unreachable, but it must not hand out `"0"`.
    pub fn next(&self) -> CorrelationToken {
        loop {
            // `Relaxed` is enough: uniqueness comes from the atomicity of
            // fetch_add, not from ordering against other memory.
            let value = self.inner.fetch_add(1, Ordering::Relaxed);
            if value != 0 {
                return CorrelationToken::from(value);
            }
        }
    }

    /// Returns the value the next call to [`next`](Self::next) will use.
    ///
    /// Diagnostics only: another task may advance the counter right after.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }

    /// Puts the allocator back to its initial state.
    ///
    /// Only call this when no request is outstanding, e.g. after the
    /// connection has been shut down.
    pub fn reset(&self) {
        self.inner.store(1, Ordering::Relaxed);
    }
}

impl Default for TokenAllocator {
    fn default() -> Self {
        Self::new()
    }
}
