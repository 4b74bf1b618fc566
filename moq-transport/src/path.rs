use std::{fmt, sync::Arc};

use crate::coding::{Decode, DecodeError, Encode};

/// An ordered sequence of string segments, identifying a broadcast.
///
/// Paths are cheap to clone; segments are reference counted.
/// Prefix/suffix matching is per segment, not per character.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
	parts: Vec<Arc<String>>,
}

impl Path {
	/// Creates a new `Path` from any collection of elements that can be converted to strings.
	pub fn new<T: ToString, I: IntoIterator<Item = T>>(parts: I) -> Self {
		Self {
			parts: parts.into_iter().map(|s| Arc::new(s.to_string())).collect(),
		}
	}

	/// The empty path.
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.parts.is_empty()
	}

	pub fn push<T: ToString>(mut self, part: T) -> Self {
		self.parts.push(Arc::new(part.to_string()));
		self
	}

	/// Concatenate two paths.
	pub fn append(mut self, other: &Path) -> Self {
		self.parts.extend_from_slice(&other.parts);
		self
	}

	pub fn has_prefix(&self, prefix: &Path) -> bool {
		if prefix.parts.len() > self.parts.len() {
			return false;
		}

		prefix.parts.iter().zip(self.parts.iter()).all(|(a, b)| a == b)
	}

	pub fn strip_prefix(mut self, prefix: &Path) -> Option<Self> {
		if !self.has_prefix(prefix) {
			return None;
		}

		self.parts.drain(..prefix.parts.len());
		Some(self)
	}
}

impl std::ops::Deref for Path {
	type Target = [Arc<String>];

	fn deref(&self) -> &Self::Target {
		&self.parts
	}
}

impl fmt::Display for Path {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, part) in self.parts.iter().enumerate() {
			if i > 0 {
				write!(f, "/")?;
			}
			write!(f, "{}", part)?;
		}
		Ok(())
	}
}

impl fmt::Debug for Path {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "[")?;
		for (i, part) in self.parts.iter().enumerate() {
			if i > 0 {
				write!(f, ", ")?;
			}
			write!(f, "{:?}", part)?;
		}
		write!(f, "]")
	}
}

impl<S: ToString> FromIterator<S> for Path {
	fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
		Self::new(iter)
	}
}

impl From<&str> for Path {
	/// Split a URL-style path on `/`, ignoring empty segments.
	fn from(path: &str) -> Self {
		path.split('/').filter(|part| !part.is_empty()).collect()
	}
}

impl Decode for Path {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let count = usize::decode(r)?;
		let mut parts = Vec::with_capacity(count.min(64));

		for _ in 0..count {
			parts.push(Arc::new(String::decode(r)?));
		}

		Ok(Self { parts })
	}
}

impl Encode for Path {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.parts.len().encode(w);
		for part in &self.parts {
			part.as_str().encode(w);
		}
	}
}
