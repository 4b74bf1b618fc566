use super::{Decode, DecodeError, Encode};

/// The value was too large to be encoded as a QUIC varint.
#[derive(thiserror::Error, Debug, Clone, Copy)]
#[error("varint bounds exceeded")]
pub struct BoundsExceeded;

/// The largest value that fits in a QUIC variable-length integer: 2^62 - 1.
pub const MAX_VARINT: u64 = (1 << 62) - 1;

// QUIC variable-length integers, RFC 9000 section 16.
// The top two bits of the first byte encode the total length: 1, 2, 4 or 8 bytes.
impl Decode for u64 {
	fn decode<B: bytes::Buf>(buf: &mut B) -> Result<Self, DecodeError> {
		Self::decode_remaining(buf, 1)?;

		let first = buf.get_u8();
		let size = 1usize << (first >> 6);
		let mut value = (first & 0b0011_1111) as u64;

		Self::decode_remaining(buf, size - 1)?;

		for _ in 1..size {
			value = (value << 8) | buf.get_u8() as u64;
		}

		Ok(value)
	}
}

impl Encode for u64 {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		let v = *self;
		assert!(v <= MAX_VARINT, "varint bounds exceeded");

		if v < (1 << 6) {
			w.put_u8(v as u8);
		} else if v < (1 << 14) {
			w.put_u16(0b01 << 14 | v as u16);
		} else if v < (1 << 30) {
			w.put_u32(0b10 << 30 | v as u32);
		} else {
			w.put_u64(0b11 << 62 | v);
		}
	}
}

impl Decode for u32 {
	fn decode<B: bytes::Buf>(buf: &mut B) -> Result<Self, DecodeError> {
		u64::decode(buf)?.try_into().map_err(|_| DecodeError::BoundsExceeded)
	}
}

impl Encode for u32 {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		(*self as u64).encode(w)
	}
}

impl Decode for usize {
	fn decode<B: bytes::Buf>(buf: &mut B) -> Result<Self, DecodeError> {
		u64::decode(buf)?.try_into().map_err(|_| DecodeError::BoundsExceeded)
	}
}

impl Encode for usize {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		let v: u64 = (*self).try_into().expect("usize too large");
		v.encode(w)
	}
}
