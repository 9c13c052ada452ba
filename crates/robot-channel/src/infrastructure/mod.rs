//! Infrastructure layer for the robot channel client.
//!
//! Contains the adapters that touch the network.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `robot_core`, but MUST NOT be imported by the `application` or `domain`
//! layers.
//!
//! # Sub-modules
//!
//! - **`connection`** – WebSocket client for a robot's command channel: the
//!   connect/teardown lifecycle, the reader task, and the correlated
//!   request/response API.
//!
//! - **`mdns`** – [`ServiceBrowser`](crate::application::discovery::ServiceBrowser)
//!   implementation backed by the `mdns-sd` daemon.

pub mod connection;
pub mod mdns;
