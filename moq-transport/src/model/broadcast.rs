use std::{
	collections::HashMap,
	future::Future,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
};

use tokio::sync::watch;
use web_async::Lock;

use crate::{Error, Path, TrackConsumer, TrackProducer};

use super::Track;

/// A broadcast is a named set of tracks, identified by a path relative to the session root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Broadcast {
	pub path: Path,
}

impl Broadcast {
	pub fn new<P: Into<Path>>(path: P) -> Self {
		Self { path: path.into() }
	}

	pub fn produce(self) -> BroadcastProducer {
		BroadcastProducer::new(self)
	}
}

impl From<Path> for Broadcast {
	fn from(path: Path) -> Self {
		Self { path }
	}
}

type State = HashMap<String, TrackConsumer>;

/// Receives track requests and fulfills them, usually backed by the network.
pub struct BroadcastProducer {
	pub info: Broadcast,

	published: Lock<State>,
	closed: watch::Sender<bool>,
	requested: (
		async_channel::Sender<TrackProducer>,
		async_channel::Receiver<TrackProducer>,
	),
	cloned: Arc<AtomicUsize>,
}

impl BroadcastProducer {
	pub fn new(info: Broadcast) -> Self {
		Self {
			info,
			published: Default::default(),
			closed: Default::default(),
			requested: async_channel::unbounded(),
			cloned: Default::default(),
		}
	}

	/// Return the next track requested by a consumer.
	pub async fn requested(&self) -> Option<TrackProducer> {
		let track = self.requested.1.recv().await.ok()?;
		web_async::spawn(Self::cleanup(track.consume(), self.published.clone()));
		Some(track)
	}

	/// Create a track and insert it into the broadcast.
	pub fn create(&mut self, track: Track) -> TrackProducer {
		let producer = track.produce();
		self.insert(producer.consume());
		producer
	}

	/// Insert a track into the lookup, returning true if it was unique.
	pub fn insert(&mut self, track: TrackConsumer) -> bool {
		let unique = self
			.published
			.lock()
			.insert(track.info.name.clone(), track.clone())
			.is_none();

		web_async::spawn(Self::cleanup(track, self.published.clone()));

		unique
	}

	pub fn remove(&mut self, name: &str) -> Option<TrackConsumer> {
		self.published.lock().remove(name)
	}

	// Remove the track from the lookup when it's closed.
	async fn cleanup(track: TrackConsumer, published: Lock<State>) {
		track.closed().await.ok();

		let mut published = published.lock();
		match published.remove(&track.info.name) {
			// Put it back if it's not the same track.
			Some(other) if !other.is_clone(&track) => {
				published.insert(track.info.name.clone(), other);
			}
			_ => {}
		}
	}

	/// Create a new consumer for the broadcast.
	pub fn consume(&self) -> BroadcastConsumer {
		BroadcastConsumer {
			info: self.info.clone(),
			published: self.published.clone(),
			closed: self.closed.subscribe(),
			requested: self.requested.0.clone(),
		}
	}

	pub fn finish(&mut self) {
		self.closed.send_modify(|closed| *closed = true);
	}

	/// Block until there are no more consumers.
	///
	/// Not final: [Self::consume] can revive the broadcast afterwards.
	pub fn unused(&self) -> impl Future<Output = ()> {
		let closed = self.closed.clone();
		async move { closed.closed().await }
	}

	pub fn is_clone(&self, other: &Self) -> bool {
		self.closed.same_channel(&other.closed)
	}
}

impl Clone for BroadcastProducer {
	fn clone(&self) -> Self {
		self.cloned.fetch_add(1, Ordering::Relaxed);
		Self {
			info: self.info.clone(),
			published: self.published.clone(),
			closed: self.closed.clone(),
			requested: self.requested.clone(),
			cloned: self.cloned.clone(),
		}
	}
}

impl Drop for BroadcastProducer {
	fn drop(&mut self) {
		if self.cloned.fetch_sub(1, Ordering::Relaxed) > 0 {
			return;
		}

		// Cleanup any lingering state when the last producer is dropped.

		// Close the sender so consumers can't send any more requests.
		self.requested.0.close();

		// Drain any remaining requests.
		while let Ok(producer) = self.requested.1.try_recv() {
			producer.abort(Error::Cancel);
		}

		// Cleanup any published tracks.
		self.published.lock().clear();
	}
}

/// Subscribe to tracks within a broadcast.
#[derive(Clone)]
pub struct BroadcastConsumer {
	pub info: Broadcast,

	published: Lock<State>,
	closed: watch::Receiver<bool>,
	requested: async_channel::Sender<TrackProducer>,
}

impl BroadcastConsumer {
	/// Subscribe to a track by name and priority.
	///
	/// Subscribing to the same track twice yields independent consumers of
	/// the same underlying producer; the request is deduplicated.
	pub fn subscribe(&self, track: &Track) -> TrackConsumer {
		let mut published = self.published.lock();

		// Return any explicitly published track.
		if let Some(consumer) = published.get(&track.name).cloned() {
			return consumer;
		}

		// Otherwise we have never seen this track before and need to create a new producer.
		let producer = track.clone().produce();
		let consumer = producer.consume();
		published.insert(track.name.clone(), consumer.clone());

		// Hand the producer to whoever is serving this broadcast.
		match self.requested.try_send(producer) {
			Ok(()) => {}
			Err(error) => error.into_inner().abort(Error::Cancel),
		}

		consumer
	}

	/// Block until the broadcast is no longer being served.
	pub fn closed(&self) -> impl Future<Output = ()> {
		let mut closed = self.closed.clone();
		async move {
			closed.wait_for(|closed| *closed).await.ok();
		}
	}

	/// Check if this is the exact same instance of a broadcast.
	///
	/// Duplicate paths are allowed in the case of resumption.
	pub fn is_clone(&self, other: &Self) -> bool {
		self.closed.same_channel(&other.closed)
	}
}

#[cfg(test)]
use futures::FutureExt;

#[cfg(test)]
impl BroadcastProducer {
	pub fn assert_used(&self) {
		assert!(self.unused().now_or_never().is_none(), "should be used");
	}

	pub fn assert_unused(&self) {
		assert!(self.unused().now_or_never().is_some(), "should be unused");
	}

	pub fn assert_request(&mut self) -> TrackProducer {
		self.requested()
			.now_or_never()
			.expect("should not have blocked")
			.expect("should be a request")
	}

	pub fn assert_no_request(&mut self) {
		assert!(self.requested().now_or_never().is_none(), "should have blocked");
	}
}

#[cfg(test)]
impl BroadcastConsumer {
	pub fn assert_not_closed(&self) {
		assert!(self.closed().now_or_never().is_none(), "should not be closed");
	}

	pub fn assert_closed(&self) {
		assert!(self.closed().now_or_never().is_some(), "should be closed");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn insert() {
		let mut producer = Broadcast::new("test").produce();
		let mut track1 = Track::new("track1").produce();

		// Make sure we can insert before a consumer is created.
		producer.insert(track1.consume());
		track1.append_group().finish();

		let consumer = producer.consume();

		let mut track1c = consumer.subscribe(&track1.info);
		track1c.assert_group();

		let mut track2 = Track::new("track2").produce();
		producer.insert(track2.consume());

		let consumer2 = producer.consume();
		let mut track2c = consumer2.subscribe(&track2.info);
		track2c.assert_no_group();

		track2.append_group().finish();
		track2c.assert_group();
	}

	#[tokio::test]
	async fn unused() {
		let producer = Broadcast::new("test").produce();
		producer.assert_unused();

		let consumer1 = producer.consume();
		producer.assert_used();

		let consumer2 = consumer1.clone();
		producer.assert_used();

		drop(consumer1);
		producer.assert_used();

		drop(consumer2);
		producer.assert_unused();
	}

	#[tokio::test]
	async fn requests() {
		let mut producer = Broadcast::new("test").produce();

		let consumer = producer.consume();
		let consumer2 = consumer.clone();

		let mut track1 = consumer.subscribe(&Track::new("track1"));
		track1.assert_not_closed();
		track1.assert_no_group();

		// Make sure we deduplicate requests.
		let track2 = consumer2.subscribe(&Track::new("track1"));
		track2.assert_is_clone(&track1);

		// Get the requested track, and there should only be one.
		let mut track3 = producer.assert_request();
		producer.assert_no_request();

		// Make sure the consumer is the same.
		track3.consume().assert_is_clone(&track1);

		// Append a group and make sure they all get it.
		track3.append_group().finish();
		track1.assert_group();

		// Make sure that tracks are cancelled when the producer is dropped.
		let track4 = consumer.subscribe(&Track::new("track2"));
		drop(producer);

		// Make sure the track is errored, not closed.
		track4.assert_error();

		let track5 = consumer2.subscribe(&Track::new("track3"));
		track5.assert_error();
	}

	#[tokio::test]
	async fn finish() {
		let mut producer = Broadcast::new("test").produce();

		let consumer = producer.consume();
		consumer.assert_not_closed();

		producer.finish();
		consumer.assert_closed();
	}
}
