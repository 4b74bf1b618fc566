use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;

use super::Container;

/// The priority of video tracks; the relay sheds these first.
pub const PRIORITY_VIDEO: u8 = 1;

/// Display dimensions, as a hint for the UI.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
	pub width: u32,
	pub height: u32,
}

/// Information about the video tracks in the catalog.
///
/// This is a map instead of an array so renditions merge predictably.
/// A BTreeMap keeps keys sorted for *some* deterministic behavior.
#[serde_with::serde_as]
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Video {
	/// A map of track name to rendition configuration.
	pub renditions: BTreeMap<String, VideoConfig>,

	/// The intended display size, if different from the coded size.
	#[serde(default)]
	pub display: Option<Dimensions>,

	/// If true, the rendering layer should flip the video horizontally.
	#[serde(default)]
	pub flip: Option<bool>,
}

/// Video decoder configuration, based on WebCodecs VideoDecoderConfig.
///
/// Reference: <https://w3c.github.io/webcodecs/#video-decoder-config>
#[serde_with::serde_as]
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
	/// The codec, see the registry for details:
	/// <https://w3c.github.io/webcodecs/codec_registry.html>
	pub codec: String,

	/// Information used to initialize the decoder on a per-codec basis.
	///
	/// The best example is H.264, which needs the sps/pps to function.
	/// For CMAF this is the init segment contents (e.g. an avcC box body).
	#[serde(default)]
	#[serde_as(as = "Option<Hex>")]
	pub description: Option<Bytes>,

	/// The encoded width/height of the media.
	///
	/// Optional because it can be changed in-band for some codecs.
	/// Changing only these fields does not require a decoder restart.
	pub coded_width: Option<u32>,
	pub coded_height: Option<u32>,

	/// How frame payloads are packaged on the track.
	#[serde(default)]
	pub container: Container,

	/// The maximum bitrate of the video track, if known.
	#[serde(default)]
	pub bitrate: Option<u64>,

	/// The frame rate of the video track, if known.
	#[serde(default)]
	pub framerate: Option<f64>,

	/// If true, the decoder will optimize for latency.
	///
	/// Default: true
	#[serde(default)]
	pub optimize_for_latency: Option<bool>,

	/// If true, the rendering layer should flip this rendition horizontally.
	#[serde(default)]
	pub flip: Option<bool>,
}

impl VideoConfig {
	/// The coded area in pixels, if the dimensions are known.
	pub fn pixels(&self) -> Option<u64> {
		Some(self.coded_width? as u64 * self.coded_height? as u64)
	}
}
