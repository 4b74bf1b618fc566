use std::collections::{BTreeSet, VecDeque};

use tokio::sync::mpsc;
use web_async::{Lock, LockWeak};

use crate::Path;

/// An announcement event, relative to the consumer's prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Announced {
	// The broadcast is now active.
	Active(Path),

	// The broadcast is no longer active, cancelling a prior Active.
	Ended(Path),
}

impl Announced {
	pub fn path(&self) -> &Path {
		match self {
			Self::Active(path) => path,
			Self::Ended(path) => path,
		}
	}

	pub fn is_active(&self) -> bool {
		matches!(self, Self::Active(_))
	}
}

#[derive(Default)]
struct ProducerState {
	// A BTreeSet just for ordering so the unit tests are deterministic.
	active: BTreeSet<Path>,
	consumers: Vec<(Lock<ConsumerState>, mpsc::Sender<()>)>,
}

impl ProducerState {
	fn insert(&mut self, path: Path) -> bool {
		if self.active.contains(&path) {
			// Duplicate; deliver an end/start pair so consumers reset.
			self.update(Announced::Ended(path.clone()));
			self.update(Announced::Active(path));
			return false;
		}

		self.active.insert(path.clone());
		self.update(Announced::Active(path));
		true
	}

	fn remove(&mut self, path: &Path) -> bool {
		let existing = self.active.remove(path);
		if existing {
			self.update(Announced::Ended(path.clone()));
		}

		existing
	}

	fn update(&mut self, update: Announced) {
		let mut i = 0;

		while let Some((consumer, notify)) = self.consumers.get(i) {
			if !notify.is_closed() {
				consumer.lock().push(update.clone());
				notify.try_send(()).ok();
				i += 1;
			} else {
				self.consumers.swap_remove(i);
			}
		}
	}

	// Replay any active paths to a new consumer.
	fn consume(&mut self, prefix: Path) -> ConsumerState {
		let mut init = VecDeque::new();

		for active in self.active.iter() {
			if let Some(suffix) = active.clone().strip_prefix(&prefix) {
				init.push_back(Announced::Active(suffix));
			}
		}

		ConsumerState { prefix, updates: init }
	}

	fn subscribe(&mut self, consumer: Lock<ConsumerState>) -> mpsc::Receiver<()> {
		let (tx, rx) = mpsc::channel(1);
		self.consumers.push((consumer, tx));
		rx
	}
}

impl Drop for ProducerState {
	fn drop(&mut self) {
		// Flush an Ended for everything still active.
		while let Some(path) = self.active.pop_first() {
			self.update(Announced::Ended(path));
		}
	}
}

#[derive(Clone)]
struct ConsumerState {
	prefix: Path,
	updates: VecDeque<Announced>,
}

impl ConsumerState {
	pub fn push(&mut self, update: Announced) {
		if let Some(suffix) = update.path().clone().strip_prefix(&self.prefix) {
			self.updates.push_back(match update {
				Announced::Active(_) => Announced::Active(suffix),
				Announced::Ended(_) => Announced::Ended(suffix),
			});
		}
	}
}

/// Announces broadcasts to consumers, usually fed over the network.
#[derive(Default, Clone)]
pub struct AnnouncedProducer {
	state: Lock<ProducerState>,
}

impl AnnouncedProducer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Announce a broadcast, returning true if it's new.
	pub fn insert(&mut self, path: Path) -> bool {
		self.state.lock().insert(path)
	}

	/// Stop announcing a broadcast, returning true if it was active.
	pub fn remove(&mut self, path: &Path) -> bool {
		self.state.lock().remove(path)
	}

	/// Check if a broadcast is active.
	pub fn contains(&self, path: &Path) -> bool {
		self.state.lock().active.contains(path)
	}

	pub fn is_empty(&self) -> bool {
		self.state.lock().active.is_empty()
	}

	/// Subscribe to all announcements matching the prefix, including those already active.
	///
	/// Suffixes are relative to the prefix.
	pub fn consume(&self, prefix: Path) -> AnnouncedConsumer {
		let mut state = self.state.lock();
		let consumer = Lock::new(state.consume(prefix));
		let notify = state.subscribe(consumer.clone());
		AnnouncedConsumer::new(self.state.downgrade(), consumer, notify)
	}

	/// Wait until all consumers have been dropped.
	pub async fn unused(&self) {
		// Keep looping until all consumers are closed.
		while let Some(notify) = self.unused_inner() {
			notify.closed().await;
		}
	}

	// Returns the closed notify of any consumer.
	fn unused_inner(&self) -> Option<mpsc::Sender<()>> {
		let mut state = self.state.lock();

		while let Some((_, notify)) = state.consumers.last() {
			if !notify.is_closed() {
				return Some(notify.clone());
			}

			state.consumers.pop();
		}

		None
	}
}

/// Consumes announcements matching a prefix.
pub struct AnnouncedConsumer {
	producer: LockWeak<ProducerState>,
	state: Lock<ConsumerState>,
	notify: mpsc::Receiver<()>,
}

impl AnnouncedConsumer {
	fn new(producer: LockWeak<ProducerState>, state: Lock<ConsumerState>, notify: mpsc::Receiver<()>) -> Self {
		Self {
			producer,
			state,
			notify,
		}
	}

	/// Returns the next announcement, or None when the producer is gone.
	pub async fn next(&mut self) -> Option<Announced> {
		loop {
			{
				let mut state = self.state.lock();

				if let Some(update) = state.updates.pop_front() {
					return Some(update);
				}
			}

			self.notify.recv().await?;
		}
	}

	/// A helper that skips to the next active broadcast.
	pub async fn active(&mut self) -> Option<Path> {
		loop {
			match self.next().await? {
				Announced::Active(path) => return Some(path),
				Announced::Ended(_) => continue,
			}
		}
	}
}

impl Clone for AnnouncedConsumer {
	fn clone(&self) -> Self {
		let consumer = Lock::new(self.state.lock().clone());

		match self.producer.upgrade() {
			Some(producer) => {
				let notify = producer.lock().subscribe(consumer.clone());
				AnnouncedConsumer::new(self.producer.clone(), consumer, notify)
			}
			None => {
				let (_, notify) = mpsc::channel(1);
				AnnouncedConsumer::new(self.producer.clone(), consumer, notify)
			}
		}
	}
}

#[cfg(test)]
use futures::FutureExt;

#[cfg(test)]
impl AnnouncedConsumer {
	fn assert_active(&mut self, suffix: &str) {
		let announced = self
			.next()
			.now_or_never()
			.expect("would have blocked")
			.expect("no next announcement");
		assert_eq!(announced, Announced::Active(Path::from(suffix)));
	}

	fn assert_ended(&mut self, suffix: &str) {
		let announced = self
			.next()
			.now_or_never()
			.expect("would have blocked")
			.expect("no next announcement");
		assert_eq!(announced, Announced::Ended(Path::from(suffix)));
	}

	fn assert_wait(&mut self) {
		assert!(self.next().now_or_never().is_none());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn simple() {
		let mut producer = AnnouncedProducer::new();
		let mut consumer = producer.consume(Path::empty());
		let ab = Path::from("a/b");

		assert!(!producer.contains(&ab));
		assert!(producer.insert(ab.clone()));
		assert!(producer.contains(&ab));

		consumer.assert_active("a/b");

		assert!(producer.remove(&ab));
		assert!(!producer.contains(&ab));

		consumer.assert_ended("a/b");
		consumer.assert_wait();
	}

	#[test]
	fn duplicate() {
		let mut producer = AnnouncedProducer::new();
		let mut consumer = producer.consume(Path::empty());

		let ab = Path::from("a/b");

		assert!(producer.insert(ab.clone()));
		consumer.assert_active("a/b");

		// Duplicate announcement becomes an end/start pair.
		assert!(!producer.insert(ab.clone()));
		consumer.assert_ended("a/b");
		consumer.assert_active("a/b");

		drop(producer);

		consumer.assert_ended("a/b");
		assert_eq!(consumer.next().now_or_never(), Some(None));
	}

	#[test]
	fn late() {
		let mut producer = AnnouncedProducer::new();

		assert!(producer.insert(Path::from("a/b")));
		assert!(producer.insert(Path::from("a/c")));

		// Subscribe after announcing; everything is replayed.
		let mut consumer = producer.consume(Path::empty());

		assert!(producer.insert(Path::from("d/e")));

		consumer.assert_active("a/b");
		consumer.assert_active("a/c");
		consumer.assert_active("d/e");
		consumer.assert_wait();
	}

	#[test]
	fn prefix() {
		let mut producer = AnnouncedProducer::new();
		let mut consumer = producer.consume(Path::from("a"));

		assert!(producer.insert(Path::from("a/b")));
		assert!(producer.insert(Path::from("a/c")));
		assert!(producer.insert(Path::from("d/e")));

		consumer.assert_active("b");
		consumer.assert_active("c");
		consumer.assert_wait();

		assert!(producer.remove(&Path::from("d/e")));
		assert!(producer.remove(&Path::from("a/c")));

		consumer.assert_ended("c");
		consumer.assert_wait();
	}

	#[test]
	fn dropped() {
		let mut producer = AnnouncedProducer::new();
		let mut consumer = producer.consume(Path::empty());

		producer.insert(Path::from("a/b"));
		producer.insert(Path::from("a/c"));

		consumer.assert_active("a/b");
		consumer.assert_active("a/c");

		drop(producer);

		consumer.assert_ended("a/b");
		consumer.assert_ended("a/c");
		assert_eq!(consumer.next().now_or_never(), Some(None));
	}

	#[tokio::test]
	async fn wakeup() {
		tokio::time::pause();

		let mut producer = AnnouncedProducer::new();
		let mut consumer = producer.consume(Path::empty());

		tokio::spawn(async move {
			tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
			producer.insert(Path::from("a/b"));
			tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
			producer.remove(&Path::from("a/b"));
			tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
			drop(producer);
		});

		assert_eq!(consumer.next().await, Some(Announced::Active(Path::from("a/b"))));
		assert_eq!(consumer.next().await, Some(Announced::Ended(Path::from("a/b"))));
		assert_eq!(consumer.next().await, None);
	}
}
