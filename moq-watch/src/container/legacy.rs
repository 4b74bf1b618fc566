use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result, Sample, Timestamp};

/// The legacy framed container.
///
/// Each frame payload is a varint microsecond timestamp followed by raw
/// codec data. The first frame of a group is the keyframe; the rest are
/// deltas.
pub struct Legacy {
	index: usize,
}

impl Legacy {
	pub fn new() -> Self {
		Self { index: 0 }
	}

	/// Parse one frame into a sample.
	pub fn decode(&mut self, mut payload: Bytes) -> Result<Sample> {
		let timestamp = decode_varint(&mut payload).ok_or(Error::MalformedContainer("truncated timestamp"))?;
		let timestamp = Timestamp::from_micros(timestamp).map_err(|_| Error::MalformedContainer("timestamp too large"))?;

		let keyframe = self.index == 0;
		self.index += 1;

		Ok(Sample {
			timestamp,
			keyframe,
			payload,
		})
	}

	/// Encode a sample into a frame payload.
	///
	/// The keyframe flag is positional (first frame of a group), so it is not encoded.
	pub fn encode(sample: &Sample) -> Bytes {
		let mut buf = BytesMut::with_capacity(8 + sample.payload.len());
		encode_varint(sample.timestamp.as_micros(), &mut buf);
		buf.extend_from_slice(&sample.payload);
		buf.freeze()
	}
}

impl Default for Legacy {
	fn default() -> Self {
		Self::new()
	}
}

// QUIC varints, the same encoding the transport uses on the wire.
fn decode_varint<B: Buf>(buf: &mut B) -> Option<u64> {
	if buf.remaining() < 1 {
		return None;
	}

	let first = buf.get_u8();
	let size = 1usize << (first >> 6);
	let mut value = (first & 0b0011_1111) as u64;

	if buf.remaining() < size - 1 {
		return None;
	}

	for _ in 1..size {
		value = (value << 8) | buf.get_u8() as u64;
	}

	Some(value)
}

fn encode_varint<B: BufMut>(v: u64, buf: &mut B) {
	if v < (1 << 6) {
		buf.put_u8(v as u8);
	} else if v < (1 << 14) {
		buf.put_u16(0b01 << 14 | v as u16);
	} else if v < (1 << 30) {
		buf.put_u32(0b10 << 30 | v as u32);
	} else {
		buf.put_u64(0b11 << 62 | v);
	}
}
