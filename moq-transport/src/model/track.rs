//! A track is a sequence of groups, split into a [TrackProducer] and [TrackConsumer] handle.
//!
//! A [TrackProducer] creates groups with a sequence number.
//! Groups are delivered over independent transport streams so a slow group
//! never head-of-line-blocks a newer one.
//!
//! A [TrackConsumer] receives groups roughly in producer order: arrival
//! order within a small cache window. A slow consumer skips groups that
//! have been evicted; gaps are normal and expected.
//!
//! The track is closed with [Error] when the producer aborts, or cleanly via finish.

use std::{collections::VecDeque, future::Future};

use tokio::sync::watch;

use crate::{Error, Result};

use super::{Group, GroupConsumer, GroupProducer};

/// A track is identified by a name within a broadcast, plus a subscription priority.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Track {
	pub name: String,

	/// Higher priority tracks are served first by the relay during congestion.
	pub priority: u8,
}

impl Track {
	pub fn new<T: Into<String>>(name: T) -> Self {
		Self {
			name: name.into(),
			priority: 0,
		}
	}

	pub fn with_priority(mut self, priority: u8) -> Self {
		self.priority = priority;
		self
	}

	pub fn produce(self) -> TrackProducer {
		TrackProducer::new(self)
	}
}

// The number of unread groups to cache before evicting the oldest.
// Groups are short (a keyframe interval); anything older just adds latency.
const MAX_GROUPS: usize = 8;

#[derive(Default)]
struct TrackState {
	// Unconsumed groups in arrival order.
	groups: VecDeque<GroupConsumer>,

	// The number of groups evicted from the front.
	offset: u64,

	// The highest sequence number seen, for duplicate detection.
	max_sequence: Option<u64>,

	closed: Option<Result<()>>,
}

/// A producer for a track, used to create new groups.
#[derive(Clone)]
pub struct TrackProducer {
	pub info: Track,
	state: watch::Sender<TrackState>,
}

impl TrackProducer {
	pub fn new(info: Track) -> Self {
		Self {
			info,
			state: Default::default(),
		}
	}

	/// Insert a group into the track, returning true if it was accepted.
	///
	/// Duplicate sequence numbers are rejected, as are groups so old they
	/// fall outside the cache window.
	pub fn insert_group(&mut self, group: GroupConsumer) -> bool {
		self.state.send_if_modified(|state| {
			if state.closed.is_some() {
				return false;
			}

			let sequence = group.info.sequence;

			// Reject duplicates still in the cache.
			if state.groups.iter().any(|other| other.info.sequence == sequence) {
				return false;
			}

			// Reject anything older than the newest sequence minus the window.
			if let Some(max) = state.max_sequence {
				if sequence < max.saturating_sub(MAX_GROUPS as u64) {
					return false;
				}
			}

			state.max_sequence = Some(state.max_sequence.unwrap_or_default().max(sequence));
			state.groups.push_back(group);

			// Evict the oldest groups; slow consumers skip them.
			while state.groups.len() > MAX_GROUPS {
				state.groups.pop_front();
				state.offset += 1;
			}

			true
		})
	}

	/// Create a new group with the given sequence number.
	///
	/// Returns None if the group arrived too late or is a duplicate.
	pub fn create_group(&mut self, info: Group) -> Option<GroupProducer> {
		let group = GroupProducer::new(info);
		self.insert_group(group.consume()).then_some(group)
	}

	/// Create a new group with the next sequence number.
	pub fn append_group(&mut self) -> GroupProducer {
		let sequence = self
			.state
			.borrow()
			.max_sequence
			.map_or(0, |sequence| sequence + 1);

		let group = Group { sequence };
		self.create_group(group).unwrap()
	}

	pub fn finish(self) {
		self.state.send_modify(|state| state.closed = Some(Ok(())));
	}

	pub fn abort(self, err: Error) {
		self.state.send_modify(|state| state.closed = Some(Err(err)));
	}

	/// Create a new consumer for the track.
	///
	/// Subscribing twice yields independent consumers.
	pub fn consume(&self) -> TrackConsumer {
		TrackConsumer {
			info: self.info.clone(),
			state: self.state.subscribe(),
			index: self.state.borrow().offset,
		}
	}

	/// Block until there are no active consumers.
	pub fn unused(&self) -> impl Future<Output = ()> {
		let state = self.state.clone();
		async move {
			state.closed().await;
		}
	}

	/// Return true if this is the same underlying track.
	pub fn is_clone(&self, other: &Self) -> bool {
		self.state.same_channel(&other.state)
	}
}

impl From<Track> for TrackProducer {
	fn from(info: Track) -> Self {
		TrackProducer::new(info)
	}
}

/// A consumer for a track, used to read groups.
#[derive(Clone)]
pub struct TrackConsumer {
	pub info: Track,
	state: watch::Receiver<TrackState>,

	// The absolute index of the next group to return.
	index: u64,
}

impl TrackConsumer {
	/// Return the next group in arrival order, skipping any we fell behind on.
	///
	/// NOTE: This can have gaps if the reader is too slow or there were network slowdowns.
	pub async fn next_group(&mut self) -> Result<Option<GroupConsumer>> {
		loop {
			{
				let state = self.state.borrow_and_update();

				// We fell behind; skip to the oldest cached group.
				if self.index < state.offset {
					self.index = state.offset;
				}

				let relative = (self.index - state.offset) as usize;
				if let Some(group) = state.groups.get(relative).cloned() {
					self.index += 1;
					return Ok(Some(group));
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

	/// Block until the track is closed.
	pub async fn closed(&self) -> Result<()> {
		match self.state.clone().wait_for(|state| state.closed.is_some()).await {
			Ok(state) => state.closed.clone().unwrap(),
			Err(_) => Err(Error::Cancel),
		}
	}

	pub fn is_clone(&self, other: &Self) -> bool {
		self.state.same_channel(&other.state)
	}
}

#[cfg(test)]
use futures::FutureExt;

#[cfg(test)]
impl TrackConsumer {
	pub fn assert_group(&mut self) -> GroupConsumer {
		self.next_group()
			.now_or_never()
			.expect("group would have blocked")
			.expect("would have errored")
			.expect("track was closed")
	}

	pub fn assert_no_group(&mut self) {
		assert!(
			self.next_group().now_or_never().is_none(),
			"next group would not have blocked"
		);
	}

	pub fn assert_not_closed(&self) {
		assert!(self.closed().now_or_never().is_none(), "should not be closed");
	}

	pub fn assert_closed(&self) {
		assert!(self.closed().now_or_never().is_some(), "should be closed");
	}

	pub fn assert_error(&self) {
		self.closed()
			.now_or_never()
			.expect("should not block")
			.expect_err("should be an error");
	}

	pub fn assert_is_clone(&self, other: &Self) {
		assert!(self.is_clone(other), "should be the same track");
	}
}
