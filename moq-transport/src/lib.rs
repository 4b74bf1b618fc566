//! # moq-transport: Media over QUIC for subscribers
//!
//! A pub/sub transport designed for real-time live media delivery.
//! Broadcasts are announced under a path, tracks are subscribed with a
//! priority, and groups are delivered over independent QUIC streams so a
//! slow group never blocks a newer one.
//!
//! ## API
//!
//! The API is built around Producer/Consumer pairs, with the hierarchy:
//! - [Session]: A connection to a relay, exposing announcements and broadcasts.
//! - [Broadcast]: A collection of [Track]s, produced by a single publisher.
//! - [Track]: A sequence of [Group]s, delivered out-of-order until stale.
//! - [Group]: A sequence of [Frame]s, delivered in order until cancelled.
//! - [Frame]: Chunks of data with an upfront size.

pub mod coding;
pub mod message;

mod error;
mod model;
mod path;
mod session;

pub use error::*;
pub use model::*;
pub use path::*;
pub use session::*;

// Re-export the crates used in the public API.
pub use bytes;
pub use web_transport;
