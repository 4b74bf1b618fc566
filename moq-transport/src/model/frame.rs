use std::future::Future;

use bytes::{Bytes, BytesMut};
use tokio::sync::watch;

use crate::{Error, Result};

/// A unit of data within a group, usually a video frame or audio packet.
///
/// The payload timestamp is container-dependent and carried inside the
/// payload itself, not at this layer.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Frame {
	pub size: u64,
}

impl Frame {
	pub fn produce(self) -> FrameProducer {
		FrameProducer::new(self)
	}
}

impl From<usize> for Frame {
	fn from(size: usize) -> Self {
		Self { size: size as u64 }
	}
}

impl From<u64> for Frame {
	fn from(size: u64) -> Self {
		Self { size }
	}
}

#[derive(Default)]
struct FrameState {
	// Every chunk written so far, in order.
	chunks: Vec<Bytes>,

	// Set when the writer is done, successfully or not.
	closed: Option<Result<()>>,
}

/// Used to write a frame's worth of data in chunks.
#[derive(Clone)]
pub struct FrameProducer {
	pub info: Frame,

	// Writing a chunk wakes every consumer watching this channel.
	state: watch::Sender<FrameState>,

	// Sanity check to ensure we don't write more than the frame size.
	written: usize,
}

impl FrameProducer {
	pub fn new(info: Frame) -> Self {
		Self {
			info,
			state: Default::default(),
			written: 0,
		}
	}

	pub fn write<B: Into<Bytes>>(&mut self, chunk: B) {
		let chunk = chunk.into();
		self.written += chunk.len();
		assert!(self.written <= self.info.size as usize);

		self.state.send_modify(|state| {
			assert!(state.closed.is_none());
			state.chunks.push(chunk);
		});
	}

	pub fn finish(self) {
		assert!(self.written == self.info.size as usize);
		self.state.send_modify(|state| state.closed = Some(Ok(())));
	}

	pub fn abort(self, err: Error) {
		self.state.send_modify(|state| state.closed = Some(Err(err)));
	}

	/// Create a new consumer for the frame.
	pub fn consume(&self) -> FrameConsumer {
		FrameConsumer {
			info: self.info.clone(),
			state: self.state.subscribe(),
			index: 0,
		}
	}

	// Clones the sender up front so the returned future doesn't hold &self.
	pub fn unused(&self) -> impl Future<Output = ()> {
		let state = self.state.clone();
		async move {
			state.closed().await;
		}
	}
}

impl From<Frame> for FrameProducer {
	fn from(info: Frame) -> Self {
		FrameProducer::new(info)
	}
}

/// Used to consume a frame's worth of data in chunks.
///
/// Cloned consumers each receive a copy of every unread chunk.
#[derive(Clone)]
pub struct FrameConsumer {
	pub info: Frame,

	// Follows the producer's state changes.
	state: watch::Receiver<FrameState>,

	// How many chunks this consumer has taken. A clone starts at the same
	// position and advances on its own from there.
	index: usize,
}

impl FrameConsumer {
	// Return the next chunk.
	pub async fn read(&mut self) -> Result<Option<Bytes>> {
		loop {
			{
				let state = self.state.borrow_and_update();

				if let Some(chunk) = state.chunks.get(self.index).cloned() {
					self.index += 1;
					return Ok(Some(chunk));
				}

				match &state.closed {
					Some(Ok(_)) => return Ok(None),
					Some(Err(err)) => return Err(err.clone()),
					_ => {}
				}
			}

			if self.state.changed().await.is_err() {
				return Err(Error::Cancel);
			}
		}
	}

	// Return all of the remaining chunks concatenated together.
	pub async fn read_all(&mut self) -> Result<Bytes> {
		// The only await is the wait for the writer to finish, and `index`
		// doesn't move until after it. Dropping this future mid-wait leaves
		// the consumer untouched, so a retry still sees the whole frame.
		let state = match self.state.wait_for(|state| state.closed.is_some()).await {
			Ok(state) => {
				if let Some(Err(err)) = &state.closed {
					return Err(err.clone());
				}
				state
			}
			Err(_) => return Err(Error::Cancel),
		};

		// Take everything that's left in one go.
		let chunks = &state.chunks[self.index..];
		self.index = state.chunks.len();

		// The chunk lengths are all here, so size the buffer once.
		let size = chunks.iter().map(Bytes::len).sum();
		let mut buf = BytesMut::with_capacity(size);

		for chunk in chunks {
			buf.extend_from_slice(chunk);
		}

		Ok(buf.freeze())
	}
}
