//! A group is a stream of frames, split into a [GroupProducer] and [GroupConsumer] handle.
//!
//! The producer appends frames in order, whole or chunk by chunk. Consumers
//! read them back in the same order; cloning a consumer fans the frames out,
//! with each clone reading at its own pace.
//!
//! A group boundary is a decoder resynchronisation point: the first frame of a
//! video group is a keyframe, and a lost group is skipped wholesale.
use std::future::Future;

use bytes::Bytes;
use tokio::sync::watch;

use crate::{Error, Result};

use super::{Frame, FrameConsumer, FrameProducer};

#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Group {
	pub sequence: u64,
}

impl Group {
	pub fn produce(self) -> GroupProducer {
		GroupProducer::new(self)
	}
}

impl From<u64> for Group {
	fn from(sequence: u64) -> Self {
		Self { sequence }
	}
}

impl From<usize> for Group {
	fn from(sequence: usize) -> Self {
		Self {
			sequence: sequence as u64,
		}
	}
}

#[derive(Default)]
struct GroupState {
	// Every frame appended so far, in order.
	frames: Vec<FrameConsumer>,

	// Whether the group is finished
	closed: Option<Result<()>>,
}

/// Create a group, frame-by-frame.
#[derive(Clone)]
pub struct GroupProducer {
	// Appending a frame wakes every consumer watching this channel.
	state: watch::Sender<GroupState>,

	pub info: Group,
}

impl GroupProducer {
	pub fn new(info: Group) -> Self {
		Self {
			info,
			state: Default::default(),
		}
	}

	/// A helper method to write a frame from a single byte buffer.
	pub fn write_frame<B: Into<Bytes>>(&mut self, frame: B) {
		let data = frame.into();
		let frame = Frame {
			size: data.len() as u64,
		};
		let mut frame = self.create_frame(frame);
		frame.write(data);
		frame.finish();
	}

	/// Create a frame with an upfront size
	pub fn create_frame(&mut self, info: Frame) -> FrameProducer {
		let producer = FrameProducer::new(info);
		self.append_frame(producer.consume());
		producer
	}

	/// Append a frame to the group.
	pub fn append_frame(&mut self, consumer: FrameConsumer) {
		self.state.send_modify(|state| {
			assert!(state.closed.is_none());
			state.frames.push(consumer)
		});
	}

	// Clean termination of the group.
	pub fn finish(self) {
		self.state.send_modify(|state| state.closed = Some(Ok(())));
	}

	pub fn abort(self, err: Error) {
		self.state.send_modify(|state| state.closed = Some(Err(err)));
	}

	/// Create a new consumer for the group.
	pub fn consume(&self) -> GroupConsumer {
		GroupConsumer {
			info: self.info.clone(),
			state: self.state.subscribe(),
			index: 0,
			active: None,
		}
	}

	pub fn unused(&self) -> impl Future<Output = ()> {
		let state = self.state.clone();
		async move {
			state.closed().await;
		}
	}
}

impl From<Group> for GroupProducer {
	fn from(info: Group) -> Self {
		GroupProducer::new(info)
	}
}

/// Consume a group, frame-by-frame.
#[derive(Clone)]
pub struct GroupConsumer {
	// Follows the producer's state changes.
	state: watch::Receiver<GroupState>,

	pub info: Group,

	// How many frames this consumer has taken. A clone starts at the same
	// position and advances on its own from there.
	index: usize,

	// A frame taken from the state but not yet drained; see read_frame.
	active: Option<FrameConsumer>,
}

impl GroupConsumer {
	/// Read the next frame in its entirety.
	pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
		// Two suspension points: taking the next frame, then draining it.
		// `index` has already advanced once the frame is taken, so if the
		// caller's select! drops us between the two, the frame would vanish.
		// Park it in `active` and pick it back up on the next call instead.
		if self.active.is_none() {
			self.active = self.next_frame().await?;
		};

		// read_all consumes nothing until the writer finished, so dropping
		// this await loses nothing either.
		let frame = match self.active.as_mut() {
			Some(frame) => frame.read_all().await?,
			None => return Ok(None),
		};

		self.active = None;

		Ok(Some(frame))
	}

	/// Return a reader for the next frame.
	pub async fn next_frame(&mut self) -> Result<Option<FrameConsumer>> {
		// A cancelled read_frame may have parked a frame; hand that out first.
		if let Some(frame) = self.active.take() {
			return Ok(Some(frame));
		}

		loop {
			{
				let state = self.state.borrow_and_update();

				if let Some(frame) = state.frames.get(self.index).cloned() {
					self.index += 1;
					return Ok(Some(frame));
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

	/// Block until the group is closed, cleanly or not.
	pub async fn closed(&self) -> Result<()> {
		match self.state.clone().wait_for(|state| state.closed.is_some()).await {
			Ok(state) => state.closed.clone().unwrap(),
			Err(_) => Err(Error::Cancel),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn frames_in_order() {
		let mut producer = Group { sequence: 0 }.produce();
		let mut consumer = producer.consume();

		producer.write_frame(Bytes::from_static(b"frame1"));
		producer.write_frame(Bytes::from_static(b"frame2"));
		producer.write_frame(Bytes::from_static(b"frame3"));
		producer.finish();

		assert_eq!(consumer.read_frame().await.unwrap().unwrap(), Bytes::from_static(b"frame1"));
		assert_eq!(consumer.read_frame().await.unwrap().unwrap(), Bytes::from_static(b"frame2"));
		assert_eq!(consumer.read_frame().await.unwrap().unwrap(), Bytes::from_static(b"frame3"));
		assert!(consumer.read_frame().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn chunked() {
		let mut producer = Group { sequence: 0 }.produce();
		let mut consumer = producer.consume();

		let mut frame = producer.create_frame(Frame { size: 10 });
		frame.write(Bytes::from_static(b"hello"));
		frame.write(Bytes::from_static(b"world"));
		frame.finish();
		producer.finish();

		assert_eq!(consumer.read_frame().await.unwrap().unwrap(), Bytes::from_static(b"helloworld"));
	}

	#[tokio::test]
	async fn fanout() {
		let mut producer = Group { sequence: 0 }.produce();
		let mut consumer1 = producer.consume();
		let mut consumer2 = producer.consume();

		producer.write_frame(Bytes::from_static(b"data"));
		producer.finish();

		assert_eq!(consumer1.read_frame().await.unwrap().unwrap(), Bytes::from_static(b"data"));
		assert_eq!(consumer2.read_frame().await.unwrap().unwrap(), Bytes::from_static(b"data"));
	}

	#[tokio::test]
	async fn abort() {
		let mut producer = Group { sequence: 0 }.produce();
		let mut consumer = producer.consume();

		producer.write_frame(Bytes::from_static(b"data"));
		producer.abort(Error::Cancel);

		// The frame was written before the abort so it's still readable.
		assert_eq!(consumer.read_frame().await.unwrap().unwrap(), Bytes::from_static(b"data"));

		// But the group itself is errored.
		assert!(consumer.read_frame().await.is_err());
		assert!(consumer.closed().await.is_err());
	}
}
