//! Container decoders: turn group payloads into timestamped samples.
//!
//! Two families are supported, dispatched on the catalog's container kind:
//! CMAF (fragmented MP4) and a legacy framed container. Both parsers are
//! pure functions over byte slices; the transport never leaks in here.

mod cmaf;
mod legacy;
mod ordered;

pub use cmaf::*;
pub use legacy::*;
pub use ordered::*;

use bytes::Bytes;

use crate::{catalog, Result, Timestamp};

/// A single media sample extracted from a container.
///
/// Samples own their bytes; the group buffer they came from can be dropped.
#[derive(Clone, Debug)]
pub struct Sample {
	/// The presentation timestamp in producer microseconds.
	pub timestamp: Timestamp,

	/// Whether this sample can be decoded independently.
	pub keyframe: bool,

	/// The encoded payload; format depends on the codec.
	pub payload: Bytes,
}

/// Incrementally parses one group's frames into samples.
///
/// A fresh decoder is created per group; a group is a resynchronisation
/// point and parse state never crosses the boundary.
pub enum GroupDecoder {
	Legacy(Legacy),
	Cmaf(Cmaf),
}

impl GroupDecoder {
	pub fn new(container: catalog::Container) -> Self {
		match container {
			catalog::Container::Legacy => Self::Legacy(Legacy::new()),
			catalog::Container::Cmaf { timescale } => Self::Cmaf(Cmaf::new(timescale)),
		}
	}

	/// Feed one transport frame, appending any complete samples to `out`.
	///
	/// Legacy yields exactly one sample per frame; CMAF yields zero or more
	/// depending on fragment boundaries.
	pub fn decode(&mut self, frame: Bytes, out: &mut Vec<Sample>) -> Result<()> {
		match self {
			Self::Legacy(legacy) => {
				out.push(legacy.decode(frame)?);
				Ok(())
			}
			Self::Cmaf(cmaf) => cmaf.decode(frame, out),
		}
	}
}
