//! Domain entities for the robot channel.
//!
//! Pure data with no network or async dependencies: what a discovered robot
//! looks like and which product families exist.

/// Discovered devices, advertisements, and robot families.
pub mod device;

pub use device::{device_name, Advertisement, Device, RobotFamily, UnknownRobotFamily};
