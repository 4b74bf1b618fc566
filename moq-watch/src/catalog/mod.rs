//! The catalog: a JSON document on a reserved track describing the
//! broadcast's other tracks.
//!
//! Each catalog group replaces the previous document wholesale; consumers
//! only ever read the most recent group.

mod audio;
mod container;
mod video;

pub use audio::*;
pub use container::*;
pub use video::*;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The priority of the catalog track; the relay sheds it last.
pub const PRIORITY_CATALOG: u8 = 100;

/// A catalog track, created by a broadcaster to describe the tracks available in a broadcast.
#[serde_with::serde_as]
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Catalog {
	/// Video track information with multiple renditions.
	#[serde(default)]
	pub video: Option<Video>,

	/// Audio track information with multiple renditions.
	#[serde(default)]
	pub audio: Option<Audio>,

	/// A hint for how much media to buffer before starting playback, in milliseconds.
	#[serde(default)]
	pub min_buffer: Option<u64>,
}

impl Catalog {
	/// The default name for the catalog track.
	pub const DEFAULT_NAME: &'static str = "catalog.json";

	/// Parse a catalog from a slice of bytes.
	pub fn from_slice(v: &[u8]) -> Result<Self> {
		Ok(serde_json::from_slice(v)?)
	}

	/// Parse a catalog from a string.
	#[allow(clippy::should_implement_trait)]
	pub fn from_str(s: &str) -> Result<Self> {
		Ok(serde_json::from_str(s)?)
	}

	/// Serialize the catalog to a string.
	pub fn to_string(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}

	/// Serialize the catalog to a vector of bytes.
	pub fn to_vec(&self) -> Result<Vec<u8>> {
		Ok(serde_json::to_vec(self)?)
	}

	pub fn default_track() -> moq_transport::Track {
		moq_transport::Track {
			name: Catalog::DEFAULT_NAME.to_string(),
			priority: PRIORITY_CATALOG,
		}
	}
}

/// Consumes the catalog track, returning each new catalog document.
///
/// Subsequent groups replace the current catalog wholesale; there is no
/// diffing. A malformed document returns [Error::MalformedCatalog] and the
/// caller keeps whatever catalog it had.
pub struct CatalogConsumer {
	track: moq_transport::TrackConsumer,
	group: Option<moq_transport::GroupConsumer>,
}

impl CatalogConsumer {
	pub fn new(track: moq_transport::TrackConsumer) -> Self {
		Self { track, group: None }
	}

	/// Get the next catalog update.
	///
	/// Waits for the next publication and returns the parsed document.
	/// `None` means the catalog track ended.
	pub async fn next(&mut self) -> Result<Option<Catalog>> {
		loop {
			tokio::select! {
				biased;
				Some(group) = async { self.track.next_group().await.transpose() } => {
					// Use the newer group; any partially read one is stale.
					self.group = Some(group.map_err(Error::Transport)?);
				},
				Some(frame) = async { self.group.as_mut()?.read_frame().await.transpose() } => {
					self.group.take(); // One document per group.
					let frame = frame.map_err(Error::Transport)?;
					let catalog = Catalog::from_slice(&frame)?;
					return Ok(Some(catalog));
				},
				else => return Ok(None),
			}
		}
	}

	/// Wait until the catalog track is closed.
	pub async fn closed(&self) -> Result<()> {
		Ok(self.track.closed().await.map_err(Error::Transport)?)
	}
}

impl From<moq_transport::TrackConsumer> for CatalogConsumer {
	fn from(track: moq_transport::TrackConsumer) -> Self {
		Self::new(track)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use super::*;

	#[test]
	fn simple() {
		let mut encoded = r#"{
			"video": {
				"renditions": {
					"hd": {
						"codec": "avc1.640028",
						"codedWidth": 1920,
						"codedHeight": 1080,
						"container": {"kind":"cmaf","timescale":90000}
					}
				}
			},
			"audio": {
				"renditions": {
					"audio": {
						"codec": "opus",
						"sampleRate": 48000,
						"numberOfChannels": 2,
						"container": {"kind":"legacy"}
					}
				}
			},
			"minBuffer": 100
		}"#
		.to_string();

		encoded.retain(|c| !c.is_whitespace());

		let mut video_renditions = BTreeMap::new();
		video_renditions.insert(
			"hd".to_string(),
			VideoConfig {
				codec: "avc1.640028".to_string(),
				description: None,
				coded_width: Some(1920),
				coded_height: Some(1080),
				container: Container::Cmaf { timescale: 90_000 },
				bitrate: None,
				framerate: None,
				optimize_for_latency: None,
				flip: None,
			},
		);

		let mut audio_renditions = BTreeMap::new();
		audio_renditions.insert(
			"audio".to_string(),
			AudioConfig {
				codec: "opus".to_string(),
				sample_rate: 48_000,
				channel_count: 2,
				bitrate: None,
				description: None,
				container: Container::Legacy,
			},
		);

		let decoded = Catalog {
			video: Some(Video {
				renditions: video_renditions,
				display: None,
				flip: None,
			}),
			audio: Some(Audio {
				renditions: audio_renditions,
			}),
			min_buffer: Some(100),
		};

		let output = Catalog::from_str(&encoded).expect("failed to decode");
		assert_eq!(decoded, output, "wrong decoded output");
	}

	#[test]
	fn malformed() {
		assert!(matches!(
			Catalog::from_slice(b"{not json"),
			Err(Error::MalformedCatalog(_))
		));
	}

	#[test]
	fn description_hex() {
		let encoded = r#"{
			"video": {
				"renditions": {
					"sd": {
						"codec": "avc1.42e01e",
						"description": "0142e01e03",
						"container": {"kind":"legacy"}
					}
				}
			}
		}"#;

		let catalog = Catalog::from_str(encoded).unwrap();
		let config = &catalog.video.unwrap().renditions["sd"];
		assert_eq!(config.description.as_deref(), Some(&[0x01, 0x42, 0xe0, 0x1e, 0x03][..]));
	}
}
