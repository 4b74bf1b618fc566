use std::fmt;

use crate::coding::{Decode, DecodeError, Encode};

/// A version of the protocol, negotiated during setup.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Version(pub u64);

impl Version {
	/// The only version this implementation speaks.
	pub const CURRENT: Version = Version(0xff0bad01);
}

impl fmt::Debug for Version {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{:x}", self.0)
	}
}

impl Decode for Version {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self(u64::decode(r)?))
	}
}

impl Encode for Version {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.0.encode(w)
	}
}

/// A list of versions, so we can pretty print failures.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Versions(pub Vec<Version>);

impl Versions {
	pub fn contains(&self, version: &Version) -> bool {
		self.0.contains(version)
	}
}

impl fmt::Debug for Versions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.0.iter()).finish()
	}
}

impl<const N: usize> From<[Version; N]> for Versions {
	fn from(versions: [Version; N]) -> Self {
		Self(versions.to_vec())
	}
}

impl Decode for Versions {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let count = usize::decode(r)?;
		let mut versions = Vec::with_capacity(count.min(8));

		for _ in 0..count {
			versions.push(Version::decode(r)?);
		}

		Ok(Self(versions))
	}
}

impl Encode for Versions {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.0.len().encode(w);
		for version in &self.0 {
			version.encode(w);
		}
	}
}

/// Sent by the client to start a session.
#[derive(Clone, Debug)]
pub struct ClientSetup {
	pub versions: Versions,
}

impl Decode for ClientSetup {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			versions: Versions::decode(r)?,
		})
	}
}

impl Encode for ClientSetup {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.versions.encode(w);
	}
}

/// Sent by the server in response, picking a version.
#[derive(Clone, Debug)]
pub struct ServerSetup {
	pub version: Version,
}

impl Decode for ServerSetup {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			version: Version::decode(r)?,
		})
	}
}

impl Encode for ServerSetup {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.version.encode(w);
	}
}
