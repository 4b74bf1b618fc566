//! Wire messages exchanged with the relay.
//!
//! Control streams are bidirectional and carry a [ControlType] discriminant
//! followed by messages. Data streams are unidirectional and carry a
//! [DataType] discriminant followed by a [Group] header and its frames.

mod announce;
mod frame;
mod group;
mod setup;
mod subscribe;

pub use announce::*;
pub use frame::*;
pub use group::*;
pub use setup::*;
pub use subscribe::*;

use crate::coding::{Decode, DecodeError, Encode};

/// The type of a bidirectional control stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlType {
	Session,
	Announce,
	Subscribe,
}

impl Decode for ControlType {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match u64::decode(r)? {
			0 => Ok(Self::Session),
			1 => Ok(Self::Announce),
			2 => Ok(Self::Subscribe),
			other => Err(DecodeError::InvalidMessage(other)),
		}
	}
}

impl Encode for ControlType {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		let v: u64 = match self {
			Self::Session => 0,
			Self::Announce => 1,
			Self::Subscribe => 2,
		};
		v.encode(w)
	}
}

/// The type of a unidirectional data stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
	Group,
}

impl Decode for DataType {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match u64::decode(r)? {
			0 => Ok(Self::Group),
			other => Err(DecodeError::InvalidMessage(other)),
		}
	}
}

impl Encode for DataType {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		let v: u64 = match self {
			Self::Group => 0,
		};
		v.encode(w)
	}
}
