use serde::{Deserialize, Serialize};

/// Container format for frame timestamp encoding and frame payload structure.
///
/// - "legacy": each frame is a varint microsecond timestamp followed by raw codec data.
/// - "cmaf": a group's frames concatenate into fragmented MP4 (moof+mdat pairs);
///   the decoder init segment comes from the catalog `description`.
///
/// JSON example:
/// {
///   "kind": "cmaf",
///   "timescale": 90000
/// }
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "kind")]
pub enum Container {
	#[serde(rename = "legacy")]
	#[default]
	Legacy,

	#[serde(rename = "cmaf")]
	Cmaf {
		/// Ticks per second for `dts` values carried in the fragments.
		timescale: u32,
	},
}

impl Container {
	pub fn is_cmaf(&self) -> bool {
		matches!(self, Self::Cmaf { .. })
	}
}
