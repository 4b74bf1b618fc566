//! Per-media-type sources: rendition selection, decoder lifecycle and
//! Sync-gated frame emission.

mod audio;
mod video;

pub use audio::*;
pub use video::*;

use crate::Timestamp;

/// Whether a frame is currently available for display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BufferStatus {
	/// Enabled but nothing published yet; show a buffering indicator.
	#[default]
	Empty,

	/// A frame is published (or the source is disabled).
	Filled,
}

/// Counters for the UI, updated as frames flow.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceStats {
	/// Decoded frames published so far.
	pub frame_count: u64,

	/// Encoded bytes received from the network.
	pub bytes_received: u64,

	/// The timestamp of the most recently published frame.
	pub timestamp: Option<Timestamp>,
}
