use bytes::{Buf, Bytes, BytesMut};
use mp4_atom::{Any, DecodeMaybe, Mdat, Moof};

use crate::{Error, Result, Sample, Timestamp};

/// The CMAF container: fragmented MP4.
///
/// A group's frames concatenate into a byte stream of `moof`/`mdat` pairs.
/// Each track-fragment run yields samples with `dts` in the catalog
/// timescale; the decoder init segment arrives out of band via the catalog
/// `description`, so no `moov` is expected here.
pub struct Cmaf {
	timescale: u32,

	// Undecoded bytes, accumulated across frames.
	buffer: BytesMut,

	// The moof header waiting for its mdat.
	moof: Option<Moof>,
	moof_size: usize,
}

impl Cmaf {
	pub fn new(timescale: u32) -> Self {
		Self {
			timescale,
			buffer: BytesMut::new(),
			moof: None,
			moof_size: 0,
		}
	}

	/// Feed more bytes, appending any complete samples to `out`.
	pub fn decode(&mut self, frame: Bytes, out: &mut Vec<Sample>) -> Result<()> {
		self.buffer.extend_from_slice(&frame);

		let mut buffer = std::mem::take(&mut self.buffer);
		let mut cursor = std::io::Cursor::new(&mut buffer);
		let mut position = 0;

		while let Some(atom) = Any::decode_maybe(&mut cursor).map_err(|_| Error::MalformedContainer("invalid atom"))? {
			let size = cursor.position() as usize - position;
			position = cursor.position() as usize;

			match atom {
				Any::Ftyp(_) | Any::Styp(_) | Any::Moov(_) => {
					// Init data is delivered via the catalog instead; ignore it in-band.
					tracing::debug!("skipping init atom");
				}
				Any::Moof(moof) => {
					if self.moof.is_some() {
						// Two moof boxes in a row.
						return Err(Error::MalformedContainer("duplicate moof box"));
					}

					self.moof = Some(moof);
					self.moof_size = size;
				}
				Any::Mdat(mdat) => {
					let header_size = size - mdat.data.len();
					self.extract(mdat, header_size, out)?;
				}
				_ => {
					// Skip unknown atoms
					tracing::warn!(?atom, "skipping")
				}
			}
		}

		// Advance the buffer by the amount of data that was processed.
		drop(cursor);
		buffer.advance(position);
		self.buffer = buffer;

		Ok(())
	}

	// Extract all samples out of an mdat atom.
	fn extract(&mut self, mdat: Mdat, header_size: usize, out: &mut Vec<Sample>) -> Result<()> {
		let mdat = Bytes::from(mdat.data);
		let moof = self.moof.take().ok_or(Error::MalformedContainer("missing moof box"))?;

		for traf in &moof.traf {
			let tfhd = &traf.tfhd;

			let tfdt = traf
				.tfdt
				.as_ref()
				.ok_or(Error::MalformedContainer("missing tfdt box"))?;
			let mut dts = tfdt.base_media_decode_time;

			let mut offset = tfhd.base_data_offset.unwrap_or_default() as usize;

			if traf.trun.is_none() {
				return Err(Error::MalformedContainer("missing trun box"));
			}

			for trun in &traf.trun {
				if let Some(data_offset) = trun.data_offset {
					// This is relative to the start of the MOOF, not the MDAT.
					// Note: The trun data offset can be negative, but... that's not supported here.
					let data_offset: usize = data_offset
						.try_into()
						.map_err(|_| Error::MalformedContainer("negative data offset"))?;

					if data_offset < self.moof_size + header_size {
						return Err(Error::MalformedContainer("invalid data offset"));
					}

					let base_offset = tfhd.base_data_offset.unwrap_or_default() as usize;
					offset = base_offset + data_offset - self.moof_size - header_size;
				}

				for entry in &trun.entries {
					// Use the fragment defaults if the sample doesn't have its own values.
					let flags = entry.flags.unwrap_or(tfhd.default_sample_flags.unwrap_or_default());
					let duration = entry.duration.unwrap_or(tfhd.default_sample_duration.unwrap_or_default());
					let size = entry.size.unwrap_or(tfhd.default_sample_size.unwrap_or_default()) as usize;

					let pts = (dts as i64 + entry.cts.unwrap_or_default() as i64) as u64;
					let micros = (pts as u128 * 1_000_000 / self.timescale as u128) as u64;
					let timestamp = Timestamp::from_micros(micros)?;

					if offset + size > mdat.len() {
						return Err(Error::MalformedContainer("sample out of bounds"));
					}

					// https://chromium.googlesource.com/chromium/src/media/+/master/formats/mp4/track_run_iterator.cc#177
					let depends = (flags >> 24) & 0x3 == 0x2; // kSampleDependsOnNoOther
					let non_sync = (flags >> 16) & 0x1 == 0x1; // kSampleIsNonSyncSample
					let keyframe = depends && !non_sync;

					out.push(Sample {
						timestamp,
						keyframe,
						payload: mdat.slice(offset..offset + size),
					});

					dts += duration as u64;
					offset += size;
				}
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bytes::BufMut;

	const TIMESCALE: u32 = 90_000;

	// Flags for a sample that depends on no other sample.
	const FLAG_SYNC: u32 = 0x0200_0000;
	// Flags for a delta sample.
	const FLAG_DELTA: u32 = 0x0101_0000;

	struct TestSample {
		duration: u32,
		flags: u32,
		payload: &'static [u8],
	}

	// Hand-roll a minimal moof+mdat pair so the test has zero dependencies
	// on a muxer: mfhd, then one traf with tfhd/tfdt/trun.
	fn fragment(base_dts: u64, samples: &[TestSample]) -> Bytes {
		let mut traf = BytesMut::new();

		// tfhd: default-base-is-moof, track_id only.
		put_box(&mut traf, b"tfhd", |b| {
			b.put_u32(0x0002_0000); // version 0, flags
			b.put_u32(1); // track_id
		});

		// tfdt: version 1, 64-bit decode time.
		put_box(&mut traf, b"tfdt", |b| {
			b.put_u32(0x0100_0000);
			b.put_u64(base_dts);
		});

		// trun sizes are fixed, so the data offset is computable upfront:
		// moof = 8 + mfhd(16) + traf(8 + 16 + 20 + trun), trun = 20 + 12n.
		let trun_size = 20 + 12 * samples.len();
		let moof_size = 8 + 16 + 8 + 16 + 20 + trun_size;
		let data_offset = moof_size + 8; // mdat payload starts after its header

		// trun: data-offset + per-sample duration, size and flags.
		put_box(&mut traf, b"trun", |b| {
			b.put_u32(0x0000_0701);
			b.put_u32(samples.len() as u32);
			b.put_i32(data_offset as i32);
			for sample in samples {
				b.put_u32(sample.duration);
				b.put_u32(sample.payload.len() as u32);
				b.put_u32(sample.flags);
			}
		});

		let mut moof = BytesMut::new();
		put_box(&mut moof, b"mfhd", |b| {
			b.put_u32(0);
			b.put_u32(1); // sequence_number
		});
		put_box_raw(&mut moof, b"traf", &traf);

		let mut out = BytesMut::new();
		put_box_raw(&mut out, b"moof", &moof);
		assert_eq!(out.len(), moof_size, "moof size math is off");

		let mdat: Vec<u8> = samples.iter().flat_map(|s| s.payload.iter().copied()).collect();
		put_box_raw(&mut out, b"mdat", &mdat);

		out.freeze()
	}

	fn put_box(out: &mut BytesMut, name: &[u8; 4], body: impl FnOnce(&mut BytesMut)) {
		let mut buf = BytesMut::new();
		body(&mut buf);
		put_box_raw(out, name, &buf);
	}

	fn put_box_raw(out: &mut BytesMut, name: &[u8; 4], body: &[u8]) {
		out.put_u32(8 + body.len() as u32);
		out.put_slice(name);
		out.put_slice(body);
	}

	#[test]
	fn timestamps() {
		// dts 90_000 at timescale 90_000 presents at exactly one second.
		let fragment = fragment(
			90_000,
			&[
				TestSample {
					duration: 3000,
					flags: FLAG_SYNC,
					payload: b"key",
				},
				TestSample {
					duration: 3000,
					flags: FLAG_DELTA,
					payload: b"delta",
				},
			],
		);

		let mut cmaf = Cmaf::new(TIMESCALE);
		let mut samples = Vec::new();
		cmaf.decode(fragment, &mut samples).unwrap();

		assert_eq!(samples.len(), 2);

		assert_eq!(samples[0].timestamp.as_micros(), 1_000_000);
		assert!(samples[0].keyframe);
		assert_eq!(samples[0].payload, Bytes::from_static(b"key"));

		// 3000 ticks at 90kHz is one 30fps frame: 33_333µs.
		assert_eq!(samples[1].timestamp.as_micros(), 1_033_333);
		assert!(!samples[1].keyframe);
		assert_eq!(samples[1].payload, Bytes::from_static(b"delta"));
	}

	#[test]
	fn split_across_frames() {
		let fragment = fragment(
			0,
			&[TestSample {
				duration: 3000,
				flags: FLAG_SYNC,
				payload: b"key",
			}],
		);

		// Feed the fragment one byte at a time; samples appear only at the end.
		let mut cmaf = Cmaf::new(TIMESCALE);
		let mut samples = Vec::new();

		for i in 0..fragment.len() {
			cmaf.decode(fragment.slice(i..i + 1), &mut samples).unwrap();
		}

		assert_eq!(samples.len(), 1);
		assert_eq!(samples[0].timestamp, Timestamp::ZERO);
	}

	#[test]
	fn sample_order() {
		let fragment = fragment(
			1000,
			&[
				TestSample {
					duration: 100,
					flags: FLAG_SYNC,
					payload: b"a",
				},
				TestSample {
					duration: 100,
					flags: FLAG_DELTA,
					payload: b"b",
				},
				TestSample {
					duration: 100,
					flags: FLAG_DELTA,
					payload: b"c",
				},
			],
		);

		let mut cmaf = Cmaf::new(TIMESCALE);
		let mut samples = Vec::new();
		cmaf.decode(fragment, &mut samples).unwrap();

		// Samples come out in non-decreasing timestamp order.
		for pair in samples.windows(2) {
			assert!(pair[0].timestamp <= pair[1].timestamp);
		}
	}

	#[test]
	fn garbage() {
		let mut cmaf = Cmaf::new(TIMESCALE);
		let mut samples = Vec::new();

		// A plausible box header with an unreasonable body.
		let res = cmaf.decode(Bytes::from_static(b"\x00\x00\x00\x10mdat1234whatever"), &mut samples);

		// Without a moof first, the mdat is malformed.
		assert!(res.is_err());
	}
}
