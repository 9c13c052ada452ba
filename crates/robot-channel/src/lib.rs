//! robot-channel library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does robot-channel do? (for beginners)
//!
//! A robot on the local network runs a small server (the *command channel*)
//! that accepts WebSocket connections on port 8800.  This crate is the other
//! end of that channel:
//!
//! 1. **Discovery** – robots announce themselves with mDNS.  A scan lists the
//!    robots of one product family, or waits for one with a given name.
//! 2. **Connection** – opens the WebSocket to one robot and keeps a single
//!    reader task running for as long as the connection lives.
//! 3. **Requests** – every request carries a fresh correlation token.  The
//!    robot echoes it in its reply, which is how the reply finds its caller
//!    even when many requests are in flight.
//! 4. **Events** – some commands make the robot push a stream of events
//!    (sensor readings, for example).  Callers subscribe with a callback and
//!    an optional delivery limit.
//!
//! Payloads are opaque bytes here; their schema belongs to the caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use robot_channel::{RequestOutcome, RobotConnection};
//!
//! # async fn demo() -> Result<(), robot_channel::ChannelError> {
//! let conn = RobotConnection::new();
//! conn.connect("192.168.1.20", 8800, Duration::from_secs(15)).await?;
//! match conn.send_and_await(101, b"payload", Duration::from_secs(5)).await? {
//!     RequestOutcome::Success(reply) => println!("{} reply bytes", reply.len()),
//!     other => println!("request ended with {other:?}"),
//! }
//! conn.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// Domain layer: errors, request outcomes, configuration.
pub mod domain;

/// Application layer: handler registry and device discovery.
pub mod application;

/// Infrastructure layer: WebSocket connection and mDNS browser.
pub mod infrastructure;

pub use application::discovery::{DeviceDiscovery, DeviceListener, ListenerId, ServiceBrowser, ServiceEvent};
pub use application::dispatcher::{DeliveryLimit, EventCallback, SubscriptionId};
pub use domain::{ChannelConfig, ChannelError, DiscoveryError, RequestOutcome};
pub use infrastructure::connection::{ConnectionState, RobotConnection};
pub use infrastructure::mdns::MdnsBrowser;
