//! The platform decoder seam.
//!
//! Decoding itself happens elsewhere (WebCodecs, FFmpeg, VideoToolbox, ...);
//! this module defines the traits the pipeline drives. The decoder is
//! single-owner: the active pipeline holds the only handle, and switching
//! renditions constructs a second instance before dropping the first.

use bytes::Bytes;

use crate::{catalog, Sample, Timestamp};

/// Errors surfaced by a platform decoder.
#[derive(Debug, thiserror::Error, Clone)]
pub enum DecodeError {
	#[error("failed to initialize decoder: {0}")]
	Init(String),

	/// The decoder died mid-stream; the pipeline re-enters rendition selection.
	#[error("failed to decode: {0}")]
	Fatal(String),

	#[error("unsupported codec: {0}")]
	Unsupported(String),
}

/// Everything a platform decoder needs to decide support and initialize.
///
/// For CMAF the description is omitted from the support query; it arrives
/// later from the init segment. For the legacy container it is included.
#[derive(Clone, Debug, PartialEq)]
pub struct DecoderConfig {
	pub codec: String,
	pub description: Option<Bytes>,
	pub coded_width: Option<u32>,
	pub coded_height: Option<u32>,
	pub optimize_for_latency: bool,
}

impl DecoderConfig {
	/// The support query for a rendition, per its container kind.
	pub fn query(config: &catalog::VideoConfig) -> Self {
		let cmaf = config.container.is_cmaf();

		Self {
			codec: config.codec.clone(),
			// The description comes later from the init segment for CMAF.
			description: (!cmaf).then(|| config.description.clone()).flatten(),
			coded_width: config.coded_width,
			coded_height: config.coded_height,
			optimize_for_latency: config.optimize_for_latency.unwrap_or(true),
		}
	}

	/// The full config used to actually open the decoder.
	pub fn open(config: &catalog::VideoConfig) -> Self {
		Self {
			codec: config.codec.clone(),
			description: config.description.clone(),
			coded_width: config.coded_width,
			coded_height: config.coded_height,
			optimize_for_latency: config.optimize_for_latency.unwrap_or(true),
		}
	}

	/// True if switching from `other` to `self` can reuse a running decoder.
	///
	/// A change limited to the coded dimensions never forces a tear-down.
	pub fn compatible(&self, other: &Self) -> bool {
		self.codec == other.codec
			&& self.description == other.description
			&& self.optimize_for_latency == other.optimize_for_latency
	}
}

/// A decoded video frame, ready for presentation.
///
/// The pixel payload is opaque to the pipeline; the renderer knows what to
/// do with it. Dropping the frame releases it.
#[derive(Clone, Debug)]
pub struct VideoFrame {
	/// Presentation timestamp in producer microseconds.
	pub timestamp: Timestamp,

	pub width: u32,
	pub height: u32,

	/// Decoded pixel data, in whatever layout the decoder produced.
	pub payload: Bytes,
}

/// A decoded chunk of audio samples.
#[derive(Clone, Debug)]
pub struct AudioFrame {
	/// Presentation timestamp in producer microseconds.
	pub timestamp: Timestamp,

	pub sample_rate: u32,
	pub channel_count: u32,

	/// Interleaved samples, in whatever format the decoder produced.
	pub payload: Bytes,
}

/// A running video decoder instance.
///
/// Push encoded samples in with [Self::decode]; pull decoded frames out
/// with [Self::poll]. The platform may buffer, so a decode can yield zero
/// or several frames.
pub trait VideoDecoder: Send {
	fn decode(&mut self, sample: Sample) -> Result<(), DecodeError>;

	fn poll(&mut self) -> Result<Option<VideoFrame>, DecodeError>;
}

/// A running audio decoder instance.
pub trait AudioDecoder: Send {
	fn decode(&mut self, sample: Sample) -> Result<(), DecodeError>;

	fn poll(&mut self) -> Result<Option<AudioFrame>, DecodeError>;
}

/// The platform's decoder registry: capability queries and construction.
pub trait DecoderFactory: Send + Sync {
	/// Ask the platform whether it can decode this config at all.
	fn supports_video(&self, config: &DecoderConfig) -> bool;

	fn supports_audio(&self, config: &catalog::AudioConfig) -> bool;

	fn open_video(&self, config: &DecoderConfig) -> Result<Box<dyn VideoDecoder>, DecodeError>;

	fn open_audio(&self, config: &catalog::AudioConfig) -> Result<Box<dyn AudioDecoder>, DecodeError>;
}
