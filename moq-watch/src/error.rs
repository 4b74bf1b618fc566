use std::sync::Arc;

use crate::TimestampOverflow;

/// Error types for the subscription pipeline.
///
/// Recovery is local where possible: a lost group or malformed container
/// loses one group, a malformed catalog keeps the previous one, a fatal
/// decoder error re-enters rendition selection. Transport errors end the
/// session.
#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
	/// An error from the underlying MoQ transport layer.
	#[error("transport error: {0}")]
	Transport(#[from] moq_transport::Error),

	/// The broadcast path is not (or no longer) announced.
	#[error("broadcast unavailable")]
	BroadcastUnavailable,

	/// No rendition in the catalog can be decoded by the platform.
	#[error("no supported rendition")]
	DecoderUnsupported,

	/// The platform decoder surfaced an error mid-stream.
	#[error("decoder error: {0}")]
	DecoderFatal(String),

	/// The transport cancelled a group; continue at the next one.
	#[error("group lost: {sequence}")]
	GroupLost { sequence: u64 },

	/// The catalog document failed to parse; the previous catalog is retained.
	#[error("malformed catalog: {0}")]
	MalformedCatalog(Arc<serde_json::Error>),

	/// A group payload failed to parse; the group is dropped.
	#[error("malformed container: {0}")]
	MalformedContainer(&'static str),

	/// The track must start with a keyframe.
	#[error("must start with a keyframe")]
	MissingKeyframe,

	/// The timestamp is too large.
	#[error("timestamp overflow")]
	TimestampOverflow(#[from] TimestampOverflow),

	/// Failed to decode hexadecimal data in the catalog.
	#[error("hex error: {0}")]
	Hex(#[from] hex::FromHexError),

	/// Failed to parse a URL.
	#[error("url parse error: {0}")]
	Url(#[from] url::ParseError),

	/// The URL scheme must be http or https.
	#[error("invalid scheme")]
	InvalidScheme,

	/// The connection attempt failed, timed out or was refused.
	#[error("connect failed: {0}")]
	ConnectFailed(String),
}

/// A Result type alias for subscription operations.
pub type Result<T> = std::result::Result<T, Error>;

// Wrap in an Arc so it is Clone
impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::MalformedCatalog(Arc::new(err))
	}
}
