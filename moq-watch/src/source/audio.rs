use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;

use moq_transport::{BroadcastConsumer, GroupConsumer, Track};

use crate::{
	catalog, AudioDecoder, AudioFrame, BufferStatus, DecodeError, Error, GroupDecoder, Result, Sample, SourceStats,
	Sync, PRIORITY_AUDIO,
};

/// The audio source: picks a rendition, hosts the decoder, and publishes
/// decoded chunks gated on the shared [Sync] clock.
///
/// Audio has no pixel targets; the first supported rendition wins. Muting
/// tears the subscription down entirely so the relay stops sending.
pub struct AudioSource {
	broadcast: BroadcastConsumer,
	factory: Arc<dyn crate::DecoderFactory>,
	sync: Sync,

	enabled: bool,
	muted: bool,
	volume: watch::Sender<f64>,

	catalog: Option<catalog::Audio>,
	active: Option<Pipeline>,

	frame: watch::Sender<Option<AudioFrame>>,
	stats: watch::Sender<SourceStats>,
}

impl AudioSource {
	pub fn new(broadcast: BroadcastConsumer, factory: Arc<dyn crate::DecoderFactory>, sync: Sync) -> Self {
		Self {
			broadcast,
			factory,
			sync,
			enabled: true,
			muted: false,
			volume: watch::Sender::new(1.0),
			catalog: None,
			active: None,
			frame: watch::Sender::new(None),
			stats: watch::Sender::new(SourceStats::default()),
		}
	}

	/// The most recently emitted chunk, for the audio output layer.
	pub fn frame(&self) -> watch::Receiver<Option<AudioFrame>> {
		self.frame.subscribe()
	}

	pub fn stats(&self) -> watch::Receiver<SourceStats> {
		self.stats.subscribe()
	}

	pub fn buffer_status(&self) -> BufferStatus {
		match self.enabled && !self.muted && self.frame.borrow().is_none() {
			true => BufferStatus::Empty,
			false => BufferStatus::Filled,
		}
	}

	pub fn set_catalog(&mut self, catalog: Option<catalog::Audio>) {
		self.catalog = catalog;
		self.reinit();
	}

	pub fn set_muted(&mut self, muted: bool) {
		self.muted = muted;
		self.reinit();
	}

	pub fn set_enabled(&mut self, enabled: bool) {
		self.enabled = enabled;
		self.reinit();
	}

	/// Output gain, consumed by the audio output layer.
	pub fn set_volume(&mut self, volume: f64) {
		self.volume.send_replace(volume.clamp(0.0, 1.0));
	}

	pub fn volume(&self) -> watch::Receiver<f64> {
		self.volume.subscribe()
	}

	fn reinit(&mut self) {
		let existing = self.active.take();

		if !self.enabled || self.muted {
			self.frame.send_replace(None);
			return;
		}

		let Some(catalog) = &self.catalog else {
			self.frame.send_replace(None);
			return;
		};

		// The first supported rendition wins; audio variants are about
		// codecs, not sizes.
		let Some((name, config)) = catalog
			.renditions
			.iter()
			.find(|(_, config)| self.factory.supports_audio(config))
		else {
			tracing::warn!("no audio rendition is supported by the platform decoder");
			return;
		};

		// Reuse the existing subscription if the rendition didn't change.
		if let Some(existing) = existing {
			if existing.name == *name && existing.config == *config {
				self.active = Some(existing);
				return;
			}
		}

		match Pipeline::open(&self.broadcast, name.clone(), config.clone(), self.factory.as_ref()) {
			Ok(pipeline) => {
				tracing::info!(rendition = %name, "audio pipeline opened");
				self.active = Some(pipeline);
			}
			Err(err) => {
				tracing::warn!(rendition = %name, ?err, "failed to open audio pipeline");
			}
		}
	}

	/// Drive decode and emission; runs until cancelled.
	pub async fn run(&mut self) {
		loop {
			let res = match &mut self.active {
				Some(pipeline) => pipeline.emit(&self.sync, &self.stats).await,
				None => std::future::pending().await,
			};

			match res {
				Ok(Some(frame)) => {
					self.stats.send_modify(|stats| {
						stats.frame_count += 1;
						stats.timestamp = Some(frame.timestamp);
					});
					self.frame.send_replace(Some(frame));
				}
				Ok(None) => {
					tracing::debug!("audio track ended");
					self.active = None;
				}
				Err(err) => {
					// Tear down and re-enter selection once; audio is not
					// worth a crash loop.
					tracing::warn!(?err, "audio pipeline failed");
					self.active = None;
					self.reinit();
				}
			}
		}
	}
}

// A subscription plus its container parser and platform decoder.
struct Pipeline {
	name: String,
	config: catalog::AudioConfig,

	track: moq_transport::TrackConsumer,
	container: catalog::Container,
	group: Option<(GroupConsumer, GroupDecoder)>,
	queue: VecDeque<Sample>,

	decoder: Box<dyn AudioDecoder>,

	// A decoded chunk waiting on the Sync gate; survives cancellation.
	staged: Option<AudioFrame>,
}

impl Pipeline {
	fn open(
		broadcast: &BroadcastConsumer,
		name: String,
		config: catalog::AudioConfig,
		factory: &dyn crate::DecoderFactory,
	) -> Result<Self> {
		let track = broadcast.subscribe(&Track {
			name: name.clone(),
			priority: PRIORITY_AUDIO,
		});

		let decoder = factory
			.open_audio(&config)
			.map_err(|err| Error::DecoderFatal(err.to_string()))?;

		Ok(Self {
			name,
			container: config.container,
			config,
			track,
			group: None,
			queue: VecDeque::new(),
			decoder,
			staged: None,
		})
	}

	// The next decoded chunk, gated on the clock.
	async fn emit(&mut self, sync: &Sync, stats: &watch::Sender<SourceStats>) -> Result<Option<AudioFrame>> {
		loop {
			if self.staged.is_none() {
				let Some(frame) = self.frame(sync, stats).await? else {
					return Ok(None);
				};
				self.staged = Some(frame);
			}

			let staged = self.staged.as_ref().unwrap();
			sync.wait(staged.timestamp).await;

			return Ok(self.staged.take());
		}
	}

	async fn frame(&mut self, sync: &Sync, stats: &watch::Sender<SourceStats>) -> Result<Option<AudioFrame>> {
		loop {
			match self.decoder.poll() {
				Ok(Some(frame)) => return Ok(Some(frame)),
				Ok(None) => {}
				Err(err) => return Err(Error::DecoderFatal(err.to_string())),
			}

			let Some(sample) = self.next_sample().await? else {
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

	async fn next_sample(&mut self) -> Result<Option<Sample>> {
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
						tracing::warn!(sequence = group.info.sequence, ?err, "malformed group");
						self.group = None;
						continue;
					}
					self.queue.extend(samples);
				}
				Ok(None) => self.group = None,
				Err(err) => {
					tracing::debug!(sequence = group.info.sequence, ?err, "group lost");
					self.group = None;
				}
			}
		}
	}
}
