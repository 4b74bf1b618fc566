use crate::coding::{Decode, DecodeError, Encode};
use crate::Path;

/// Sent by the subscriber to request announcements matching a prefix.
#[derive(Clone, Debug)]
pub struct AnnounceRequest {
	pub prefix: Path,
}

impl Decode for AnnounceRequest {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			prefix: Path::decode(r)?,
		})
	}
}

impl Encode for AnnounceRequest {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.prefix.encode(w);
	}
}

/// Sent by the publisher for each broadcast matching the requested prefix.
///
/// An `Ended` cancels a prior `Active` for the same suffix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Announce {
	Active { suffix: Path },
	Ended { suffix: Path },
}

impl Announce {
	pub fn suffix(&self) -> &Path {
		match self {
			Self::Active { suffix } => suffix,
			Self::Ended { suffix } => suffix,
		}
	}

	pub fn is_active(&self) -> bool {
		matches!(self, Self::Active { .. })
	}
}

impl Decode for Announce {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let active = bool::decode(r)?;
		let suffix = Path::decode(r)?;

		Ok(match active {
			true => Self::Active { suffix },
			false => Self::Ended { suffix },
		})
	}
}

impl Encode for Announce {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.is_active().encode(w);
		self.suffix().encode(w);
	}
}

#[cfg(test)]
impl Announce {
	pub fn assert_active(&self, suffix: &Path) {
		assert_eq!(
			self,
			&Announce::Active {
				suffix: suffix.clone()
			}
		);
	}

	pub fn assert_ended(&self, suffix: &Path) {
		assert_eq!(
			self,
			&Announce::Ended {
				suffix: suffix.clone()
			}
		);
	}
}
