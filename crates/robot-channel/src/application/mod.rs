//! Application layer use cases for the robot channel client.
//!
//! # What use cases does the client have?
//!
//! - **`dispatcher`** – Keeps track of who is waiting for what.  Every
//!   inbound envelope is routed to the pending request or the event
//!   subscriptions registered for its `(command, token)` pair.
//!
//! - **`discovery`** – Runs mDNS scans for robots of one product family and
//!   maintains the set of devices currently visible.  The network browser is
//!   injected through the [`discovery::ServiceBrowser`] trait, so the scan
//!   logic can be tested without a real network.

pub mod discovery;
pub mod dispatcher;
