//! The synchronisation clock: maps producer timestamps to wall-clock
//! presentation times under a configurable end-to-end latency target.
//!
//! Producer time and wall time only ever meet here. The clock is fed with
//! [Sync::update] as frames are *received* (not decoded), and every
//! pipeline gates emission on [Sync::wait]. Sharing one clock across
//! tracks is what keeps audio and video aligned.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::Timestamp;

/// Whether the clock is advancing or stalled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncStatus {
	/// Frames are presented as they come due.
	#[default]
	Play,

	/// The producer stalled or we are paused; nothing is due.
	Wait,
}

/// The maximum playback rate while catching up to the latency target.
const MAX_RATE: f64 = 1.1;

/// How long past the latency target we tolerate silence before stalling.
const GRACE: Duration = Duration::from_millis(500);

#[derive(Clone)]
struct State {
	// Maps producer time to wall time: `reference.0` presents at `reference.1`.
	reference: Option<(Timestamp, Instant)>,

	// The end-to-end latency target.
	latency: Duration,

	// Playback rate; > 1.0 while catching up.
	rate: f64,

	status: SyncStatus,

	// The largest producer timestamp we have received.
	last_update: Option<Timestamp>,

	// When we last received an update, for stall detection.
	updated_at: Option<Instant>,

	// Set when the latency target changes; the next update re-anchors to it.
	reanchor: bool,

	paused: bool,
}

impl State {
	fn new(latency: Duration) -> Self {
		Self {
			reference: None,
			latency,
			rate: 1.0,
			status: SyncStatus::Play,
			last_update: None,
			updated_at: None,
			reanchor: false,
			paused: false,
		}
	}

	// The wall-clock time at which `timestamp` is due, if the clock is seeded.
	fn present(&self, timestamp: Timestamp) -> Option<Instant> {
		let (ref_ts, ref_wall) = self.reference?;

		match timestamp.checked_sub(ref_ts) {
			// Scale producer time by the playback rate.
			Some(ahead) => Some(ref_wall + ahead.div_f64(self.rate)),
			None => ref_wall.checked_sub(ref_ts.saturating_sub(timestamp).div_f64(self.rate)),
		}
	}

	// Seed the reference so `timestamp` presents exactly `latency` from now.
	fn seed(&mut self, timestamp: Timestamp, now: Instant) {
		self.reference = Some((timestamp, now + self.latency));
		self.rate = 1.0;
	}

	// Re-seed without ever moving an already-scheduled frame earlier,
	// keeping presentation monotone across discontinuities.
	fn reseed(&mut self, timestamp: Timestamp, now: Instant) {
		let proposed = now + self.latency;
		match self.present(timestamp) {
			Some(current) if current > proposed => {}
			_ => self.seed(timestamp, now),
		}
	}

	fn update(&mut self, timestamp: Timestamp, now: Instant) {
		// Timestamps may regress across tracks; the clock only moves forward.
		let timestamp = self.last_update.unwrap_or(timestamp).max(timestamp);
		self.last_update = Some(timestamp);
		self.updated_at = Some(now);

		match self.reference {
			None => self.seed(timestamp, now),
			Some(_) if self.reanchor => {
				// The latency target changed; re-anchor so this frame presents
				// at the new target. Unlike stall recovery this may jump
				// forward, dropping whatever was buffered for the old target.
				self.seed(timestamp, now);
				self.reanchor = false;

				if self.status == SyncStatus::Wait && !self.paused {
					self.status = SyncStatus::Play;
				}
			}
			Some(_) if self.status == SyncStatus::Wait && !self.paused => {
				// Returning from a stall: re-seed so the new frame presents in
				// `latency`, accepting a discontinuity rather than a permanent lag.
				self.reseed(timestamp, now);
				self.status = SyncStatus::Play;
			}
			Some(_) => {
				let due = self.present(timestamp).unwrap();

				// The producer is ahead of schedule: the buffer holds more than
				// the target. Speed up slightly until we converge.
				let backlog = due.saturating_duration_since(now);
				if backlog > self.latency + self.latency / 2 {
					self.rate = MAX_RATE;
				} else if self.rate != 1.0 && backlog <= self.latency {
					self.rate = 1.0;
				}
			}
		}
	}

	// The deadline after which silence becomes a stall.
	fn stall_deadline(&self) -> Option<Instant> {
		Some(self.updated_at? + self.latency + GRACE)
	}
}

/// A cloneable handle to the shared presentation clock.
///
/// Requires a tokio runtime: a background task watches for producer stalls
/// so the status flips even when nothing is waiting. The task exits when
/// the last handle is dropped.
#[derive(Clone)]
pub struct Sync {
	state: watch::Sender<State>,
	status: watch::Sender<SyncStatus>,

	// Dropped with the last handle, stopping the stall monitor.
	_stop: std::sync::Arc<watch::Sender<()>>,
}

impl Sync {
	pub fn new(latency: Duration) -> Self {
		let state = watch::Sender::new(State::new(latency));
		let status = watch::Sender::new(SyncStatus::Play);
		let stop = watch::Sender::new(());

		web_async::spawn(Self::monitor(state.clone(), status.clone(), stop.subscribe()));

		Self {
			state,
			status,
			_stop: std::sync::Arc::new(stop),
		}
	}

	// Flip to Wait when the producer goes quiet, even with no one waiting.
	async fn monitor(state: watch::Sender<State>, status: watch::Sender<SyncStatus>, mut stop: watch::Receiver<()>) {
		let mut observe = state.subscribe();

		loop {
			let deadline = {
				let state = observe.borrow_and_update();
				match state.status {
					SyncStatus::Play => state.stall_deadline(),
					SyncStatus::Wait => None,
				}
			};

			tokio::select! {
				res = stop.changed() => {
					if res.is_err() {
						return;
					}
				}
				res = observe.changed() => {
					if res.is_err() {
						return;
					}
				}
				_ = async { tokio::time::sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
					state.send_modify(|state| {
						if state.status == SyncStatus::Play {
							tracing::debug!("producer stalled");
							state.status = SyncStatus::Wait;
						}
					});

					let current = state.borrow().status;
					status.send_if_modified(|prev| {
						let changed = *prev != current;
						*prev = current;
						changed
					});
				}
			}
		}
	}

	/// Feed the clock with a newly *received* producer timestamp.
	pub fn update(&self, timestamp: Timestamp) {
		let now = Instant::now();
		self.state.send_modify(|state| state.update(timestamp, now));
		self.publish_status();
	}

	/// The wall-clock time at which `timestamp` is due, if known.
	pub fn present(&self, timestamp: Timestamp) -> Option<Instant> {
		self.state.borrow().present(timestamp)
	}

	/// The current latency target.
	pub fn latency(&self) -> Duration {
		self.state.borrow().latency
	}

	/// Change the latency target.
	///
	/// The value updates atomically and pending waits are notified, but the
	/// reference stays put until the next [Sync::update] re-anchors to the
	/// new target.
	pub fn set_latency(&self, latency: Duration) {
		self.state.send_modify(|state| {
			state.latency = latency;
			state.reanchor = state.reference.is_some();
		});
	}

	/// Suspend or resume presentation.
	///
	/// While paused the status is [SyncStatus::Wait] and no frame comes due.
	/// Resuming re-seeds on the next update.
	pub fn set_paused(&self, paused: bool) {
		self.state.send_modify(|state| {
			state.paused = paused;
			if paused {
				state.status = SyncStatus::Wait;
			}
		});
		self.publish_status();
	}

	/// The current status, as a watchable signal.
	pub fn status(&self) -> watch::Receiver<SyncStatus> {
		self.status.subscribe()
	}

	#[cfg(test)]
	fn status_now(&self) -> SyncStatus {
		self.state.borrow().status
	}

	fn publish_status(&self) {
		let status = self.state.borrow().status;
		self.status.send_if_modified(|current| {
			let changed = *current != status;
			*current = status;
			changed
		});
	}

	/// Wait until `timestamp` is due and the clock is playing.
	///
	/// Spurious wake-ups are allowed. Cancel by dropping the future, usually
	/// inside a `select!` against the track closing.
	pub async fn wait(&self, timestamp: Timestamp) {
		let mut state = self.state.subscribe();

		loop {
			let snapshot = state.borrow_and_update().clone();

			if snapshot.status == SyncStatus::Play {
				if let Some(due) = snapshot.present(timestamp) {
					if Instant::now() >= due {
						return;
					}

					// Sleep until the frame is due or the clock changes;
					// the stall monitor wakes us through the latter.
					tokio::select! {
						_ = tokio::time::sleep_until(due) => {}
						res = state.changed() => {
							if res.is_err() {
								return;
							}
						}
					}
					continue;
				}
				// Not seeded yet; fall through and wait for the first update.
			}

			// Waiting: either paused, stalled, or unseeded.
			if state.changed().await.is_err() {
				return;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const LATENCY: Duration = Duration::from_millis(200);

	fn micros(us: u64) -> Timestamp {
		Timestamp::from_micros(us).unwrap()
	}

	#[tokio::test(start_paused = true)]
	async fn first_frame_presents_at_latency() {
		let sync = Sync::new(LATENCY);

		let start = Instant::now();
		sync.update(micros(0));

		let due = sync.present(micros(0)).unwrap();
		assert_eq!(due - start, LATENCY);

		// Waiting resolves once the latency elapses.
		sync.wait(micros(0)).await;
		assert!(Instant::now() >= due);
	}

	#[tokio::test(start_paused = true)]
	async fn presentation_is_monotone() {
		let sync = Sync::new(LATENCY);

		sync.update(micros(0));
		let mut prev = sync.present(micros(0)).unwrap();

		for i in 1..100u64 {
			tokio::time::advance(Duration::from_millis(33)).await;
			sync.update(micros(i * 33_333));

			let due = sync.present(micros(i * 33_333)).unwrap();
			assert!(due >= prev, "presentation went backwards at frame {}", i);
			prev = due;
		}
	}

	#[tokio::test(start_paused = true)]
	async fn cadence() {
		let sync = Sync::new(LATENCY);

		sync.update(micros(0));
		sync.update(micros(33_333));

		let a = sync.present(micros(0)).unwrap();
		let b = sync.present(micros(33_333)).unwrap();

		// Frames 33.333ms apart in producer time present 33.333ms apart.
		assert_eq!(b - a, Duration::from_micros(33_333));
	}

	#[tokio::test(start_paused = true)]
	async fn stall_and_recover() {
		let sync = Sync::new(LATENCY);

		for i in 0..10u64 {
			sync.update(micros(i * 33_333));
			tokio::time::advance(Duration::from_millis(33)).await;
		}
		assert_eq!(sync.status_now(), SyncStatus::Play);

		// Go silent for twice the latency plus the grace period; the stall
		// monitor flips the status without anyone waiting.
		tokio::time::advance(2 * LATENCY + GRACE).await;
		tokio::time::sleep(Duration::from_millis(1)).await;
		assert_eq!(sync.status_now(), SyncStatus::Wait);

		// A waiter sees nothing come due while stalled.
		let waiter = sync.wait(micros(10 * 33_333));
		tokio::pin!(waiter);
		assert!(futures::poll!(&mut waiter).is_pending());

		// A fresh update resumes playback with a re-seeded reference:
		// the new frame is due `latency` from now, no snap-back.
		let now = Instant::now();
		sync.update(micros(11 * 33_333));
		assert_eq!(sync.status_now(), SyncStatus::Play);

		let due = sync.present(micros(11 * 33_333)).unwrap();
		assert!(due >= now + LATENCY);
	}

	#[tokio::test(start_paused = true)]
	async fn no_regression_after_recovery() {
		let sync = Sync::new(LATENCY);

		sync.update(micros(0));

		// Stall, then recover with a newer timestamp.
		tokio::time::advance(LATENCY + GRACE + Duration::from_millis(1)).await;
		tokio::time::sleep(Duration::from_millis(1)).await;
		assert_eq!(sync.status_now(), SyncStatus::Wait);
		sync.update(micros(66_666));

		// Earlier timestamps must not present later than newer ones.
		let after_old = sync.present(micros(0)).unwrap();
		let after_new = sync.present(micros(66_666)).unwrap();
		assert!(after_old <= after_new);
	}

	#[tokio::test(start_paused = true)]
	async fn catch_up_rate() {
		let sync = Sync::new(LATENCY);

		sync.update(micros(0));

		// The producer bursts far ahead of schedule.
		sync.update(micros(1_000_000));

		let state = sync.state.borrow().clone();
		assert!(state.rate > 1.0);
		assert!(state.rate <= MAX_RATE);
	}

	#[tokio::test(start_paused = true)]
	async fn pause_suspends() {
		let sync = Sync::new(LATENCY);
		sync.update(micros(0));

		sync.set_paused(true);
		assert_eq!(sync.status_now(), SyncStatus::Wait);

		// Nothing comes due while paused, no matter how long we wait.
		let waiter = sync.wait(micros(0));
		tokio::pin!(waiter);
		tokio::time::advance(Duration::from_secs(5)).await;
		assert!(futures::poll!(&mut waiter).is_pending());

		// Resuming plus an update brings it back.
		sync.set_paused(false);
		sync.update(micros(33_333));
		waiter.await;
	}

	#[tokio::test(start_paused = true)]
	async fn latency_change_applies_on_next_update() {
		let sync = Sync::new(Duration::from_secs(2));
		sync.update(micros(0));

		let waiter = sync.wait(micros(33_333));
		tokio::pin!(waiter);
		assert!(futures::poll!(&mut waiter).is_pending());

		// Changing the target notifies the waiter, but the reference is
		// untouched until the next update arrives: still not due.
		sync.set_latency(Duration::ZERO);
		assert!(futures::poll!(&mut waiter).is_pending());

		// The next producer timestamp re-anchors to the new target, making
		// the frame due immediately.
		sync.update(micros(33_333));
		waiter.await;
	}

	#[tokio::test(start_paused = true)]
	async fn status_watch() {
		let sync = Sync::new(LATENCY);
		let mut status = sync.status();

		assert_eq!(*status.borrow_and_update(), SyncStatus::Play);

		sync.set_paused(true);
		status.changed().await.unwrap();
		assert_eq!(*status.borrow_and_update(), SyncStatus::Wait);
	}
}
