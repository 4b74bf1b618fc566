use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tokio::sync::watch;

use moq_transport::{BroadcastConsumer, GroupConsumer, Track};

use crate::{
	catalog, rendition, BufferStatus, DecodeError, DecoderConfig, DecoderFactory, Error, GroupDecoder,
	OrderedConsumer, Result, Sample, SourceStats, Sync, Target, Timestamp, VideoDecoder, VideoFrame,
	PRIORITY_VIDEO,
};

/// The video source: selects a rendition, hosts the decoder, and publishes
/// frames gated on the shared [Sync] clock.
///
/// Switching renditions is glitch-free: a *pending* pipeline warms up on the
/// new track while the *active* one keeps rendering. The first decoded frame
/// from the pending pipeline that passes the Sync gate promotes it.
pub struct VideoSource {
	broadcast: BroadcastConsumer,
	factory: Arc<dyn DecoderFactory>,
	sync: Sync,

	enabled: bool,
	catalog: Option<catalog::Video>,
	supported: BTreeMap<String, catalog::VideoConfig>,
	target: Target,
	selected: Option<String>,

	active: Option<Pipeline>,
	pending: Option<Pipeline>,

	// Consecutive fatal decoder errors, to avoid a reopen hot-loop.
	faults: u32,

	frame: watch::Sender<Option<VideoFrame>>,
	stats: watch::Sender<SourceStats>,
}

impl VideoSource {
	pub fn new(broadcast: BroadcastConsumer, factory: Arc<dyn DecoderFactory>, sync: Sync) -> Self {
		Self {
			broadcast,
			factory,
			sync,
			enabled: true,
			catalog: None,
			supported: BTreeMap::new(),
			target: Target::default(),
			selected: None,
			active: None,
			pending: None,
			faults: 0,
			frame: watch::Sender::new(None),
			stats: watch::Sender::new(SourceStats::default()),
		}
	}

	/// The most recently published frame, as a watchable signal.
	pub fn frame(&self) -> watch::Receiver<Option<VideoFrame>> {
		self.frame.subscribe()
	}

	pub fn stats(&self) -> watch::Receiver<SourceStats> {
		self.stats.subscribe()
	}

	/// `Empty` iff enabled and no frame is currently published.
	pub fn buffer_status(&self) -> BufferStatus {
		match self.enabled && self.frame.borrow().is_none() {
			true => BufferStatus::Empty,
			false => BufferStatus::Filled,
		}
	}

	/// The renditions the platform can decode, for the UI.
	pub fn available(&self) -> Vec<(String, Option<u32>, Option<u32>)> {
		self.supported
			.iter()
			.map(|(name, config)| (name.clone(), config.coded_width, config.coded_height))
			.collect()
	}

	/// The rendition currently on screen.
	pub fn active_rendition(&self) -> Option<String> {
		self.active.as_ref().map(|pipeline| pipeline.name.clone())
	}

	pub fn set_catalog(&mut self, catalog: Option<catalog::Video>) {
		self.catalog = catalog;
		self.faults = 0;
		self.reinit();
	}

	pub fn set_target(&mut self, target: Target) {
		self.target = target;
		self.reinit();
	}

	pub fn set_enabled(&mut self, enabled: bool) {
		self.enabled = enabled;

		if !enabled {
			self.active = None;
			self.pending = None;
			self.frame.send_replace(None);
		}

		self.reinit();
	}

	// Re-evaluate the capability filter and rendition selection, opening or
	// retiring pipelines as needed.
	fn reinit(&mut self) {
		self.supported = match &self.catalog {
			Some(video) => rendition::supported(self.factory.as_ref(), video),
			None => BTreeMap::new(),
		};
		self.selected = rendition::select(&self.supported, &self.target).map(str::to_string);

		if !self.enabled {
			return;
		}

		let Some(selected) = self.selected.clone() else {
			// No playable rendition; retire the pipelines but keep the last
			// frame on screen so the UI isn't blanked.
			self.active = None;
			self.pending = None;
			return;
		};

		let config = self.supported.get(&selected).unwrap().clone();

		if let Some(active) = &mut self.active {
			if active.name == selected {
				let opened = DecoderConfig::open(&config);

				if opened.compatible(&active.opened) {
					// Only the coded dimensions changed; reuse the decoder.
					active.opened = opened;
					active.config = config;
					self.pending = None;
					return;
				}
				// Same track, incompatible config: warm a fresh decoder below.
			}
		}

		if self.pending.as_ref().is_some_and(|pending| pending.name == selected) {
			return;
		}

		match Pipeline::open(
			&self.broadcast,
			selected.clone(),
			config,
			self.factory.as_ref(),
			&self.sync,
		) {
			Ok(pipeline) => {
				tracing::info!(rendition = %selected, "pipeline opened");
				if self.active.is_none() {
					self.active = Some(pipeline);
				} else {
					self.pending = Some(pipeline);
				}
			}
			Err(err) => {
				tracing::warn!(rendition = %selected, ?err, "failed to open pipeline");
			}
		}
	}

	/// Drive decode and emission; runs until cancelled.
	///
	/// This is cancel safe: frames mid-gate are staged inside the pipelines
	/// and survive the future being dropped and recreated.
	pub async fn run(&mut self) {
		loop {
			let last = self.stats.borrow().timestamp;
			let published = self.frame.borrow().is_some();

			tokio::select! {
				// The pending pipeline only promotes once a frame passes the gate.
				res = Self::gated(&mut self.pending, &self.sync, &self.stats, last, false) => {
					self.promoted(res);
				},
				res = Self::gated(&mut self.active, &self.sync, &self.stats, last, !published) => {
					self.emitted(res);
				},
			}
		}
	}

	// Decode until a frame passes the staleness check and the Sync gate.
	//
	// With `latch` set the first frame skips the gate entirely, so the UI
	// has a placeholder instead of a blank surface.
	async fn gated(
		pipeline: &mut Option<Pipeline>,
		sync: &Sync,
		stats: &watch::Sender<SourceStats>,
		last: Option<Timestamp>,
		latch: bool,
	) -> Result<Option<VideoFrame>> {
		let Some(pipeline) = pipeline.as_mut() else {
			return std::future::pending().await;
		};

		loop {
			if pipeline.staged.is_none() {
				let Some(frame) = pipeline.frame(sync, stats).await? else {
					return Ok(None);
				};

				// Older than the last published frame; too late to show.
				if Some(frame.timestamp) < last {
					continue;
				}

				pipeline.staged = Some(frame);
			}

			let staged = pipeline.staged.as_ref().unwrap();

			if !latch {
				sync.wait(staged.timestamp).await;
			}

			return Ok(pipeline.staged.take());
		}
	}

	// The active pipeline produced a frame that passed the gate.
	fn emitted(&mut self, res: Result<Option<VideoFrame>>) {
		match res {
			Ok(Some(frame)) => self.publish(frame),
			Ok(None) => {
				tracing::debug!("video track ended");
				self.active = None;
			}
			Err(err) => self.fault(err),
		}
	}

	// The pending pipeline produced a frame that passed the gate: promote it.
	fn promoted(&mut self, res: Result<Option<VideoFrame>>) {
		match res {
			Ok(Some(frame)) => {
				let pending = self.pending.take().unwrap();
				tracing::info!(rendition = %pending.name, "rendition switched");

				// The previously active pipeline closes here, cancelling its
				// subscription and releasing the decoder.
				self.active = Some(pending);
				self.faults = 0;
				self.publish(frame);
			}
			Ok(None) => self.pending = None,
			Err(err) => {
				tracing::warn!(?err, "pending pipeline failed");
				self.pending = None;
			}
		}
	}

	fn publish(&mut self, frame: VideoFrame) {
		// Authoritative staleness check: another track may have re-seeded the
		// clock while we were waiting. The pre-wait check is not enough.
		let last = self.stats.borrow().timestamp;
		if Some(frame.timestamp) < last {
			tracing::trace!(timestamp = %frame.timestamp, "dropping stale frame");
			return;
		}

		self.faults = 0;
		self.stats.send_modify(|stats| {
			stats.frame_count += 1;
			stats.timestamp = Some(frame.timestamp);
		});

		// The prior frame is closed by being replaced.
		self.frame.send_replace(Some(frame));
	}

	fn fault(&mut self, err: Error) {
		self.active = None;
		self.faults += 1;

		if matches!(err, Error::DecoderFatal(_)) && self.faults < 3 {
			// Tear down and re-enter rendition selection; the decoder may
			// come back, or selection may pick a different rendition.
			tracing::warn!(?err, faults = self.faults, "decoder error, reselecting");
			self.reinit();
		} else {
			tracing::error!(?err, "video source failed, disabling");
			self.pending = None;
		}
	}
}

// A subscription plus its container parser and platform decoder.
struct Pipeline {
	name: String,
	config: catalog::VideoConfig,
	opened: DecoderConfig,

	source: SampleSource,
	decoder: Box<dyn VideoDecoder>,

	// A decoded frame waiting on the Sync gate; survives cancellation.
	staged: Option<VideoFrame>,
}

impl Pipeline {
	fn open(
		broadcast: &BroadcastConsumer,
		name: String,
		config: catalog::VideoConfig,
		factory: &dyn DecoderFactory,
		sync: &Sync,
	) -> Result<Self> {
		let track = broadcast.subscribe(&Track {
			name: name.clone(),
			priority: PRIORITY_VIDEO,
		});

		let source = match config.container {
			// A single CMAF writer preserves order; skip the reorder buffer.
			catalog::Container::Cmaf { .. } => SampleSource::direct(track, config.container),
			catalog::Container::Legacy => {
				SampleSource::ordered(OrderedConsumer::new(track, config.container, sync.latency()))
			}
		};

		let opened = DecoderConfig::open(&config);
		let decoder = factory
			.open_video(&opened)
			.map_err(|err| Error::DecoderFatal(err.to_string()))?;

		Ok(Self {
			name,
			config,
			opened,
			source,
			decoder,
			staged: None,
		})
	}

	// The next decoded frame, feeding the clock as samples *arrive*.
	async fn frame(&mut self, sync: &Sync, stats: &watch::Sender<SourceStats>) -> Result<Option<VideoFrame>> {
		loop {
			match self.decoder.poll() {
				Ok(Some(frame)) => return Ok(Some(frame)),
				Ok(None) => {}
				Err(err) => return Err(Error::DecoderFatal(err.to_string())),
			}

			let Some(sample) = self.source.next().await? else {
				return Ok(None);
			};

			sync.update(sample.timestamp);
			stats.send_modify(|stats| stats.bytes_received += sample.payload.len() as u64);

			if let Err(err) = self.decoder.decode(sample) {
				return Err(match err {
					DecodeError::Fatal(reason) => Error::DecoderFatal(reason),
					err => Error::DecoderFatal(err.to_string()),
				});
			}
		}
	}
}

// Where a pipeline's samples come from: merged across groups for the legacy
// container, or straight through for CMAF.
enum SampleSource {
	Ordered(OrderedConsumer),
	Direct(DirectConsumer),
}

impl SampleSource {
	fn ordered(consumer: OrderedConsumer) -> Self {
		Self::Ordered(consumer)
	}

	fn direct(track: moq_transport::TrackConsumer, container: catalog::Container) -> Self {
		Self::Direct(DirectConsumer {
			track,
			container,
			group: None,
			queue: VecDeque::new(),
		})
	}

	async fn next(&mut self) -> Result<Option<Sample>> {
		match self {
			Self::Ordered(consumer) => consumer.read().await,
			Self::Direct(consumer) => consumer.next().await,
		}
	}
}

// Reads groups sequentially, parsing samples as frames arrive.
struct DirectConsumer {
	track: moq_transport::TrackConsumer,
	container: catalog::Container,
	group: Option<(GroupConsumer, GroupDecoder)>,
	queue: VecDeque<Sample>,
}

impl DirectConsumer {
	async fn next(&mut self) -> Result<Option<Sample>> {
		loop {
			if let Some(sample) = self.queue.pop_front() {
				return Ok(Some(sample));
			}

			let Some((group, decoder)) = self.group.as_mut() else {
				match self.track.next_group().await.map_err(Error::Transport)? {
					Some(group) => {
						self.group = Some((group, GroupDecoder::new(self.container)));
						continue;
					}
					None => return Ok(None),
				}
			};

			match group.read_frame().await {
				Ok(Some(frame)) => {
					let mut samples = Vec::new();
					if let Err(err) = decoder.decode(frame, &mut samples) {
						// The rest of this group is garbage; the next group
						// starts at a keyframe anyway.
						tracing::warn!(sequence = group.info.sequence, ?err, "malformed group");
						self.group = None;
						continue;
					}
					self.queue.extend(samples);
				}
				Ok(None) => self.group = None,
				Err(err) => {
					// The transport cancelled the group; this group is lost.
					tracing::debug!(sequence = group.info.sequence, ?err, "group lost");
					self.group = None;
				}
			}
		}
	}
}
