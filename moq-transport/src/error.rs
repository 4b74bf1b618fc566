use crate::{coding, message};

/// A list of possible errors that can occur during the session.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
	#[error("webtransport error: {0}")]
	WebTransport(#[from] web_transport::Error),

	/// A transport error reported by the peer, without further detail.
	#[error("transport error")]
	Transport,

	#[error("decode error: {0}")]
	Decode(#[from] coding::DecodeError),

	#[error("unsupported versions: client={0:?} server={1:?}")]
	Version(message::Versions, message::Versions),

	/// An unexpected stream was received
	#[error("unexpected stream: {0:?}")]
	UnexpectedStream(message::ControlType),

	/// Some VarInt was too large and we were too lazy to handle it
	#[error("varint bounds exceeded")]
	BoundsExceeded(#[from] coding::BoundsExceeded),

	/// The broadcast/track is a duplicate
	#[error("duplicate")]
	Duplicate,

	// Cancel is returned when there are no more readers.
	#[error("cancelled")]
	Cancel,

	/// It took too long to open or transmit a stream.
	#[error("timeout")]
	Timeout,

	/// The group is older than the latest group and was dropped.
	#[error("old")]
	Old,

	// The application closes the stream with a code.
	#[error("app code={0}")]
	App(u32),

	#[error("not found")]
	NotFound,

	#[error("wrong frame size")]
	WrongSize,

	#[error("protocol violation")]
	ProtocolViolation,

	#[error("unauthorized")]
	Unauthorized,
}

impl Error {
	/// An integer code that is sent over the wire.
	pub fn to_code(&self) -> u32 {
		match self {
			Self::Cancel => 0,
			Self::Old => 2,
			Self::Timeout => 3,
			Self::WebTransport(_) | Self::Transport => 4,
			Self::Decode(_) => 5,
			Self::Unauthorized => 6,
			Self::Version(..) => 9,
			Self::UnexpectedStream(_) => 10,
			Self::BoundsExceeded(_) => 11,
			Self::Duplicate => 12,
			Self::NotFound => 13,
			Self::WrongSize => 14,
			Self::ProtocolViolation => 15,
			Self::App(app) => *app + 64,
		}
	}

	/// Decode an error from a wire code, e.g. a stream reset.
	pub fn from_code(code: u32) -> Self {
		match code {
			0 => Self::Cancel,
			2 => Self::Old,
			3 => Self::Timeout,
			4 => Self::Transport,
			5 => Self::Decode(coding::DecodeError::InvalidValue),
			6 => Self::Unauthorized,
			10 => Self::ProtocolViolation,
			11 => Self::BoundsExceeded(coding::BoundsExceeded),
			12 => Self::Duplicate,
			13 => Self::NotFound,
			14 => Self::WrongSize,
			code if code >= 64 => Self::App(code - 64),
			_ => Self::ProtocolViolation,
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;
