//! # moq-watch: the subscription side of Media over QUIC
//!
//! Built on top of [`moq_transport`], this crate turns a broadcast into a
//! playable stream:
//! - **Catalog**: discover renditions and codec configs.
//! - **Containers**: parse CMAF or legacy framed payloads into samples.
//! - **Sources**: pick a rendition, host the platform decoder, switch
//!   without glitches.
//! - **Sync**: schedule presentation against a latency target.
//!
//! The platform decoder itself is injected via [DecoderFactory]; this crate
//! never links a codec.

pub mod catalog;
pub mod container;
pub mod rendition;

mod connect;
mod decode;
mod error;
mod source;
mod sync;
mod timestamp;
mod watch;

pub use catalog::{Catalog, CatalogConsumer, PRIORITY_AUDIO, PRIORITY_CATALOG, PRIORITY_VIDEO};
pub use connect::*;
pub use container::{Cmaf, GroupDecoder, Legacy, OrderedConsumer, Sample};
pub use decode::*;
pub use error::*;
pub use rendition::Target;
pub use source::*;
pub use sync::*;
pub use timestamp::*;
pub use watch::*;

// Re-export the transport layer in use.
pub use moq_transport;
