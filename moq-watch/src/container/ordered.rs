use std::collections::BinaryHeap;
use std::{cmp, time::Duration};

use tokio::time::Instant;

use moq_transport::GroupConsumer;

use crate::{catalog, Error, GroupDecoder, Result, Sample};

// A sample waiting in the reorder queue, ordered by (timestamp, group, arrival).
struct Held {
	sample: Sample,
	sequence: u64,
	arrival: Instant,
}

impl PartialEq for Held {
	fn eq(&self, other: &Self) -> bool {
		self.sample.timestamp == other.sample.timestamp && self.sequence == other.sequence
	}
}

impl Eq for Held {}

impl PartialOrd for Held {
	fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Held {
	fn cmp(&self, other: &Self) -> cmp::Ordering {
		// BinaryHeap is a max-heap; reverse so the earliest timestamp is on top.
		(other.sample.timestamp, other.sequence).cmp(&(self.sample.timestamp, self.sequence))
	}
}

// One group currently being read.
struct OpenGroup {
	sequence: u64,
	consumer: GroupConsumer,
	decoder: GroupDecoder,

	// The largest timestamp this group has produced so far.
	max_seen: Option<crate::Timestamp>,

	// No more frames will arrive.
	done: bool,
}

/// Merges frames from concurrently arriving groups into timestamp order.
///
/// Within a latency budget, a sample is held until either every open group
/// has caught up past its timestamp, or the budget expires. Samples older
/// than the last released timestamp are dropped silently.
///
/// CMAF tracks usually bypass this (a single writer preserves order), but
/// any container works; pass the track and its catalog container kind.
pub struct OrderedConsumer {
	track: moq_transport::TrackConsumer,
	container: catalog::Container,
	latency: Duration,

	groups: Vec<OpenGroup>,
	heap: BinaryHeap<Held>,

	// The timestamp of the last sample we released.
	last: Option<crate::Timestamp>,

	// The track has ended; drain and finish.
	closed: bool,
}

impl OrderedConsumer {
	pub fn new(track: moq_transport::TrackConsumer, container: catalog::Container, latency: Duration) -> Self {
		Self {
			track,
			container,
			latency,
			groups: Vec::new(),
			heap: BinaryHeap::new(),
			last: None,
			closed: false,
		}
	}

	/// Read the next sample in presentation order.
	pub async fn read(&mut self) -> Result<Option<Sample>> {
		loop {
			// Release anything that is ready before waiting for more input.
			if let Some(sample) = self.pop() {
				return Ok(Some(sample));
			}

			if self.closed && self.groups.is_empty() && self.heap.is_empty() {
				return Ok(None);
			}

			let deadline = self.heap.peek().map(|held| held.arrival + self.latency);

			tokio::select! {
				biased;

				res = self.track.next_group(), if !self.closed => {
					match res {
						Ok(Some(group)) => self.open(group),
						Ok(None) => self.closed = true,
						Err(moq_transport::Error::Cancel) => self.closed = true,
						Err(err) => return Err(Error::Transport(err)),
					}
				},
				Some((index, res)) = Self::read_any(&mut self.groups) => {
					self.advance(index, res)?;
				},
				_ = async { tokio::time::sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
					// The hold on the earliest sample expired; release it even
					// though some group hasn't caught up. Stale entries may be
					// all that's left, in which case we just keep reading.
					if let Some(sample) = self.pop_expired() {
						tracing::trace!(timestamp = %sample.timestamp, "hold expired");
						return Ok(Some(sample));
					}
				},
			}
		}
	}

	// Wait for the next frame from any open group.
	async fn read_any(groups: &mut [OpenGroup]) -> Option<(usize, moq_transport::Result<Option<bytes::Bytes>>)> {
		if groups.is_empty() {
			return std::future::pending().await;
		}

		let futures = groups.iter_mut().enumerate().map(|(index, group)| {
			Box::pin(async move { (index, group.consumer.read_frame().await) })
		});

		let (res, _, _) = futures::future::select_all(futures).await;
		Some(res)
	}

	fn open(&mut self, group: GroupConsumer) {
		tracing::trace!(sequence = group.info.sequence, "group opened");

		self.groups.push(OpenGroup {
			sequence: group.info.sequence,
			consumer: group,
			decoder: GroupDecoder::new(self.container),
			max_seen: None,
			done: false,
		});
	}

	fn advance(&mut self, index: usize, res: moq_transport::Result<Option<bytes::Bytes>>) -> Result<()> {
		let group = &mut self.groups[index];

		let frame = match res {
			Ok(Some(frame)) => frame,
			Ok(None) => {
				group.done = true;
				self.prune();
				return Ok(());
			}
			Err(err) => {
				// The transport cancelled the group; whatever we buffered still plays.
				tracing::debug!(sequence = group.sequence, ?err, "group lost");
				self.groups.swap_remove(index);
				return Ok(());
			}
		};

		let mut samples = Vec::new();
		if let Err(err) = group.decoder.decode(frame, &mut samples) {
			// A malformed group is dropped; continue at the next one.
			tracing::warn!(sequence = group.sequence, ?err, "malformed group");
			self.groups.swap_remove(index);
			return Ok(());
		}

		let arrival = Instant::now();
		let sequence = group.sequence;

		for sample in samples {
			group.max_seen = Some(group.max_seen.unwrap_or_default().max(sample.timestamp));
			self.heap.push(Held {
				sample,
				sequence,
				arrival,
			});
		}

		Ok(())
	}

	// Drop groups that have finished and can no longer hold back the queue.
	fn prune(&mut self) {
		self.groups.retain(|group| !group.done);
	}

	// Release the earliest sample if every open group has caught up past it.
	fn pop(&mut self) -> Option<Sample> {
		loop {
			let top = self.heap.peek()?;

			let quorum = self
				.groups
				.iter()
				.all(|group| group.done || group.max_seen >= Some(top.sample.timestamp));

			if !quorum {
				return None;
			}

			let sample = self.heap.pop().unwrap().sample;

			// Anything older than the last released sample is too late to decode.
			if Some(sample.timestamp) < self.last {
				tracing::trace!(timestamp = %sample.timestamp, "dropping late sample");
				continue;
			}

			self.last = Some(sample.timestamp);
			return Some(sample);
		}
	}

	// Release the earliest sample unconditionally; its hold expired.
	fn pop_expired(&mut self) -> Option<Sample> {
		while let Some(held) = self.heap.pop() {
			if Some(held.sample.timestamp) < self.last {
				continue;
			}

			self.last = Some(held.sample.timestamp);
			return Some(held.sample);
		}

		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::container::Legacy;
	use crate::Timestamp;
	use bytes::Bytes;
	use moq_transport::Track;

	fn sample(micros: u64, payload: &'static [u8]) -> Sample {
		Sample {
			timestamp: Timestamp::from_micros(micros).unwrap(),
			keyframe: false,
			payload: Bytes::from_static(payload),
		}
	}

	fn ordered(producer: &moq_transport::TrackProducer) -> OrderedConsumer {
		OrderedConsumer::new(
			producer.consume(),
			catalog::Container::Legacy,
			Duration::from_millis(100),
		)
	}

	#[tokio::test]
	async fn single_group() {
		let mut producer = Track::new("video").produce();
		let mut consumer = ordered(&producer);

		let mut group = producer.append_group();
		group.write_frame(Legacy::encode(&sample(0, b"a")));
		group.write_frame(Legacy::encode(&sample(33_333, b"b")));
		group.finish();
		producer.finish();

		let a = consumer.read().await.unwrap().unwrap();
		assert_eq!(a.timestamp.as_micros(), 0);
		assert!(a.keyframe);

		let b = consumer.read().await.unwrap().unwrap();
		assert_eq!(b.timestamp.as_micros(), 33_333);
		assert!(!b.keyframe);

		assert!(consumer.read().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn merges_concurrent_groups() {
		let mut producer = Track::new("video").produce();
		let mut consumer = ordered(&producer);

		// Group 0 is still producing deltas when group 1 starts.
		let mut group0 = producer.append_group();
		let mut group1 = producer.append_group();

		group1.write_frame(Legacy::encode(&sample(200, b"g1-key")));
		group0.write_frame(Legacy::encode(&sample(100, b"g0-key")));
		group0.write_frame(Legacy::encode(&sample(150, b"g0-delta")));
		group0.finish();
		group1.write_frame(Legacy::encode(&sample(250, b"g1-delta")));
		group1.finish();
		producer.finish();

		// Samples come out in timestamp order, not arrival order.
		let mut timestamps = Vec::new();
		while let Some(sample) = consumer.read().await.unwrap() {
			timestamps.push(sample.timestamp.as_micros());
		}

		assert_eq!(timestamps, vec![100, 150, 200, 250]);
	}

	#[tokio::test]
	async fn drops_stale() {
		let mut producer = Track::new("video").produce();
		let mut consumer = ordered(&producer);

		let mut group0 = producer.append_group();
		let mut group1 = producer.append_group();

		// Group 1 races ahead; group 0's delta is older than what we released.
		group1.write_frame(Legacy::encode(&sample(300, b"g1-key")));
		group0.write_frame(Legacy::encode(&sample(100, b"g0-key")));
		group1.finish();

		let first = consumer.read().await.unwrap().unwrap();
		assert_eq!(first.timestamp.as_micros(), 100);

		let second = consumer.read().await.unwrap().unwrap();
		assert_eq!(second.timestamp.as_micros(), 300);

		// This one is older than the last released sample and disappears.
		group0.write_frame(Legacy::encode(&sample(200, b"g0-late")));
		group0.finish();
		producer.finish();

		assert!(consumer.read().await.unwrap().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn hold_expires() {
		let mut producer = Track::new("video").produce();
		let mut consumer = ordered(&producer);

		// Group 0 never finishes; its silence shouldn't hold group 1 hostage
		// past the latency budget.
		let _group0 = producer.append_group();
		let mut group1 = producer.append_group();
		group1.write_frame(Legacy::encode(&sample(500, b"g1-key")));

		let released = consumer.read().await.unwrap().unwrap();
		assert_eq!(released.timestamp.as_micros(), 500);
	}

	#[tokio::test]
	async fn lost_group() {
		let mut producer = Track::new("video").produce();
		let mut consumer = ordered(&producer);

		let mut group0 = producer.append_group();
		group0.write_frame(Legacy::encode(&sample(100, b"g0-key")));
		group0.abort(moq_transport::Error::Cancel);

		let mut group1 = producer.append_group();
		group1.write_frame(Legacy::encode(&sample(400, b"g1-key")));
		group1.finish();
		producer.finish();

		// The aborted group's buffered frame still plays, then the next group.
		let first = consumer.read().await.unwrap().unwrap();
		assert_eq!(first.timestamp.as_micros(), 100);

		let second = consumer.read().await.unwrap().unwrap();
		assert_eq!(second.timestamp.as_micros(), 400);

		assert!(consumer.read().await.unwrap().is_none());
	}
}
