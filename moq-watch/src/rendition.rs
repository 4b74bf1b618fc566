//! Rendition selection: which of the catalog's encodings to subscribe to.
//!
//! Selection is a pure function of the supported set and the target, so it
//! is deterministic and trivially testable. Ties break on name order.

use std::collections::BTreeMap;

use crate::{catalog, DecoderConfig, DecoderFactory};

/// What the application wants to watch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Target {
	/// A manual rendition override; wins whenever it names a supported rendition.
	pub rendition: Option<String>,

	/// The desired pixel count, usually the display area.
	/// None means "as large as possible".
	pub pixels: Option<u64>,
}

/// Filter the catalog's renditions down to what the platform can decode.
///
/// The support query omits the description for CMAF (it arrives later from
/// the init segment) and includes it for the legacy container.
pub fn supported(factory: &dyn DecoderFactory, video: &catalog::Video) -> BTreeMap<String, catalog::VideoConfig> {
	let supported: BTreeMap<_, _> = video
		.renditions
		.iter()
		.filter(|(_, config)| factory.supports_video(&DecoderConfig::query(config)))
		.map(|(name, config)| (name.clone(), config.clone()))
		.collect();

	if supported.is_empty() && !video.renditions.is_empty() {
		tracing::warn!("no rendition is supported by the platform decoder");
	}

	supported
}

/// Pick a rendition from the supported set.
///
/// - A supported `target.rendition` always wins.
/// - Otherwise pick the largest rendition not exceeding `target.pixels`,
///   falling back to the smallest one above it.
/// - If no rendition declares its dimensions, the first entry wins.
pub fn select<'a>(supported: &'a BTreeMap<String, catalog::VideoConfig>, target: &Target) -> Option<&'a str> {
	if let Some(name) = &target.rendition {
		if supported.contains_key(name) {
			return Some(supported.get_key_value(name).unwrap().0);
		}
	}

	let want = target.pixels.unwrap_or(u64::MAX);

	// The largest rendition that doesn't exceed the target...
	let mut below: Option<(&str, u64)> = None;
	// ...or failing that, the smallest one that does.
	let mut above: Option<(&str, u64)> = None;
	let mut sized = false;

	// BTreeMap iterates in name order, so first-wins is a stable tie-break.
	for (name, config) in supported {
		let Some(pixels) = config.pixels() else { continue };
		sized = true;

		if pixels <= want {
			if below.is_none_or(|(_, best)| pixels > best) {
				below = Some((name, pixels));
			}
		} else if above.is_none_or(|(_, best)| pixels < best) {
			above = Some((name, pixels));
		}
	}

	if !sized {
		// No rendition declares its size; take the first entry.
		return supported.keys().next().map(String::as_str);
	}

	below.or(above).map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::{Container, VideoConfig};

	fn config(width: Option<u32>, height: Option<u32>) -> VideoConfig {
		VideoConfig {
			codec: "avc1.640028".to_string(),
			description: None,
			coded_width: width,
			coded_height: height,
			container: Container::Cmaf { timescale: 90_000 },
			bitrate: None,
			framerate: None,
			optimize_for_latency: None,
			flip: None,
		}
	}

	fn renditions() -> BTreeMap<String, VideoConfig> {
		BTreeMap::from([
			("sd".to_string(), config(Some(256), Some(144))),
			("hd".to_string(), config(Some(1920), Some(1080))),
		])
	}

	#[test]
	fn by_pixels() {
		let supported = renditions();

		// A small display gets the rendition that fits it.
		let target = Target {
			rendition: None,
			pixels: Some(300 * 200),
		};
		assert_eq!(select(&supported, &target), Some("sd"));

		// A big display gets the big rendition.
		let target = Target {
			rendition: None,
			pixels: Some(1920 * 1080),
		};
		assert_eq!(select(&supported, &target), Some("hd"));
	}

	#[test]
	fn default_is_largest() {
		let supported = renditions();
		assert_eq!(select(&supported, &Target::default()), Some("hd"));
	}

	#[test]
	fn smaller_than_everything() {
		let supported = renditions();

		// Nothing fits under 100 pixels; take the smallest above.
		let target = Target {
			rendition: None,
			pixels: Some(100),
		};
		assert_eq!(select(&supported, &target), Some("sd"));
	}

	#[test]
	fn manual_override() {
		let supported = renditions();

		let target = Target {
			rendition: Some("sd".to_string()),
			pixels: Some(1920 * 1080),
		};
		assert_eq!(select(&supported, &target), Some("sd"));

		// An unknown override falls back to the pixel rules.
		let target = Target {
			rendition: Some("4k".to_string()),
			pixels: Some(1920 * 1080),
		};
		assert_eq!(select(&supported, &target), Some("hd"));
	}

	#[test]
	fn no_dimensions() {
		let supported = BTreeMap::from([
			("a".to_string(), config(None, None)),
			("b".to_string(), config(None, None)),
		]);

		// First entry in name order.
		assert_eq!(select(&supported, &Target::default()), Some("a"));
	}

	#[test]
	fn deterministic_ties() {
		// Two renditions with the same area; name order decides, stably.
		let supported = BTreeMap::from([
			("east".to_string(), config(Some(640), Some(360))),
			("west".to_string(), config(Some(640), Some(360))),
		]);

		for _ in 0..10 {
			assert_eq!(select(&supported, &Target::default()), Some("east"));
		}
	}

	#[test]
	fn empty() {
		let supported = BTreeMap::new();
		assert_eq!(select(&supported, &Target::default()), None);
	}
}
