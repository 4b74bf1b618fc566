use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timestamp overflow")]
pub struct TimestampOverflow;

/// A timestamp representing the presentation time of a media frame in microseconds.
///
/// This is producer time, scoped to the broadcast. It is NOT a wall clock;
/// only the [crate::Sync] clock maps producer time to wall time.
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
	/// The zero timestamp.
	pub const ZERO: Self = Self(0);

	// Keep timestamps within a QUIC varint so they survive the wire.
	const MAX_MICROS: u64 = (1 << 62) - 1;

	pub const fn from_micros(micros: u64) -> Result<Self, TimestampOverflow> {
		if micros > Self::MAX_MICROS {
			Err(TimestampOverflow)
		} else {
			Ok(Self(micros))
		}
	}

	pub const fn from_millis(millis: u64) -> Result<Self, TimestampOverflow> {
		match millis.checked_mul(1000) {
			Some(micros) => Self::from_micros(micros),
			None => Err(TimestampOverflow),
		}
	}

	pub const fn from_secs(seconds: u64) -> Result<Self, TimestampOverflow> {
		match seconds.checked_mul(1_000_000) {
			Some(micros) => Self::from_micros(micros),
			None => Err(TimestampOverflow),
		}
	}

	/// Get the timestamp as microseconds.
	pub const fn as_micros(self) -> u64 {
		self.0
	}

	/// Get the timestamp as milliseconds, truncating.
	pub const fn as_millis(self) -> u64 {
		self.0 / 1000
	}

	pub fn max(self, other: Self) -> Self {
		Self(self.0.max(other.0))
	}

	pub fn checked_add(self, rhs: Duration) -> Option<Self> {
		let rhs: u64 = rhs.as_micros().try_into().ok()?;
		Self::from_micros(self.0.checked_add(rhs)?).ok()
	}

	pub fn checked_sub(self, rhs: Self) -> Option<Duration> {
		Some(Duration::from_micros(self.0.checked_sub(rhs.0)?))
	}

	pub fn saturating_sub(self, rhs: Self) -> Duration {
		Duration::from_micros(self.0.saturating_sub(rhs.0))
	}
}

impl TryFrom<Duration> for Timestamp {
	type Error = TimestampOverflow;

	fn try_from(duration: Duration) -> Result<Self, Self::Error> {
		Self::from_micros(duration.as_micros().try_into().map_err(|_| TimestampOverflow)?)
	}
}

impl From<Timestamp> for Duration {
	fn from(timestamp: Timestamp) -> Self {
		Duration::from_micros(timestamp.0)
	}
}

impl std::fmt::Debug for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}µs", self.0)
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}µs", self.0)
	}
}
