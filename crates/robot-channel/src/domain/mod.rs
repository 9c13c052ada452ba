//! Domain types for the robot channel client.
//!
//! Everything in this module is plain data: error enums, the result of a
//! correlated request, and the on-disk configuration.  Nothing here touches a
//! socket or spawns a task, so the application and infrastructure layers can
//! both depend on it freely.

pub mod config;
pub mod error;
pub mod outcome;

pub use config::{ChannelConfig, ConfigError};
pub use error::{ChannelError, DiscoveryError};
pub use outcome::RequestOutcome;
