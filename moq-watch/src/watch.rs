use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use url::Url;

use moq_transport::{Announced, AnnouncedConsumer, Path, SessionStatus};

use crate::{
	catalog, AudioSource, BufferStatus, Catalog, CatalogConsumer, ConnectConfig, Connector, DecoderFactory, Error,
	Result, SourceStats, Sync, SyncStatus, Target, VideoSource,
};

/// How long to wait for the broadcast to be announced before reporting it offline.
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(2);

/// The user-visible lifecycle of a subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WatchStatus {
	/// No URL configured yet.
	#[default]
	NoUrl,

	/// The session ended; the consumer decides whether to reconnect.
	Disconnected,

	/// Dialing the relay.
	Connecting,

	/// Connected, but the broadcast is not announced.
	Offline,

	/// Announced; waiting for the catalog and the first frame.
	Loading,

	/// Media is flowing.
	Live,
}

/// Everything needed to start watching.
#[derive(Clone, Debug)]
pub struct WatchConfig {
	/// `https://host:port/path[?jwt=token]`, or `http://` for development.
	pub url: Option<Url>,

	/// The initial end-to-end latency target.
	pub latency: Duration,

	pub connect: ConnectConfig,
}

impl Default for WatchConfig {
	fn default() -> Self {
		Self {
			url: None,
			latency: Duration::from_millis(200),
			connect: ConnectConfig::default(),
		}
	}
}

/// A whole subscription: session, catalog, and synchronised A/V sources.
///
/// Construct it, then call [Watch::run] and drive the UI off the watchable
/// signals. All controls are safe to call while running.
pub struct Watch {
	config: WatchConfig,
	factory: Arc<dyn DecoderFactory>,

	sync: Sync,
	status: watch::Sender<WatchStatus>,

	catalog: Option<Catalog>,
	video: Option<VideoSource>,
	audio: Option<AudioSource>,

	// Controls applied to sources as they come and go.
	target: Target,
	muted: bool,
	volume: f64,
}

impl Watch {
	pub fn new(config: WatchConfig, factory: Arc<dyn DecoderFactory>) -> Self {
		let sync = Sync::new(config.latency);
		let status = match config.url {
			Some(_) => WatchStatus::Connecting,
			None => WatchStatus::NoUrl,
		};

		Self {
			config,
			factory,
			sync,
			status: watch::Sender::new(status),
			catalog: None,
			video: None,
			audio: None,
			target: Target::default(),
			muted: false,
			volume: 1.0,
		}
	}

	/// The user-visible status, as a watchable signal.
	pub fn status(&self) -> watch::Receiver<WatchStatus> {
		self.status.subscribe()
	}

	/// The presentation clock status (play/wait), for a buffering indicator.
	pub fn sync_status(&self) -> watch::Receiver<SyncStatus> {
		self.sync.status()
	}

	pub fn set_paused(&mut self, paused: bool) {
		self.sync.set_paused(paused);
	}

	pub fn set_latency(&mut self, latency: Duration) {
		self.sync.set_latency(latency);
	}

	pub fn set_muted(&mut self, muted: bool) {
		self.muted = muted;
		if let Some(audio) = &mut self.audio {
			audio.set_muted(muted);
		}
	}

	pub fn set_volume(&mut self, volume: f64) {
		self.volume = volume;
		if let Some(audio) = &mut self.audio {
			audio.set_volume(volume);
		}
	}

	/// Manually pin a rendition, overriding the pixel heuristic.
	pub fn set_target_rendition(&mut self, rendition: Option<String>) {
		self.target.rendition = rendition;
		if let Some(video) = &mut self.video {
			video.set_target(self.target.clone());
		}
	}

	/// The desired pixel count, usually the display area.
	pub fn set_target_pixels(&mut self, pixels: Option<u64>) {
		self.target.pixels = pixels;
		if let Some(video) = &mut self.video {
			video.set_target(self.target.clone());
		}
	}

	/// Renditions the platform can decode, as `(name, width, height)`.
	pub fn available_renditions(&self) -> Vec<(String, Option<u32>, Option<u32>)> {
		self.video.as_ref().map(VideoSource::available).unwrap_or_default()
	}

	pub fn active_rendition(&self) -> Option<String> {
		self.video.as_ref().and_then(VideoSource::active_rendition)
	}

	pub fn buffer_status(&self) -> BufferStatus {
		self.video
			.as_ref()
			.map(VideoSource::buffer_status)
			.unwrap_or(BufferStatus::Empty)
	}

	/// The published video frame, for the renderer.
	pub fn video_frame(&self) -> Option<watch::Receiver<Option<crate::VideoFrame>>> {
		self.video.as_ref().map(VideoSource::frame)
	}

	/// The emitted audio chunks, for the output device.
	pub fn audio_frame(&self) -> Option<watch::Receiver<Option<crate::AudioFrame>>> {
		self.audio.as_ref().map(AudioSource::frame)
	}

	pub fn video_stats(&self) -> SourceStats {
		self.video
			.as_ref()
			.map(|video| *video.stats().borrow())
			.unwrap_or_default()
	}

	pub fn audio_stats(&self) -> SourceStats {
		self.audio
			.as_ref()
			.map(|audio| *audio.stats().borrow())
			.unwrap_or_default()
	}

	/// Connect and run until the session ends.
	///
	/// Status transitions are visible on [Watch::status]. Returns when the
	/// session disconnects or the URL is unset; the caller decides whether
	/// to reconnect.
	pub async fn run(&mut self) -> Result<()> {
		let Some(url) = self.config.url.clone() else {
			self.status.send_replace(WatchStatus::NoUrl);
			return Ok(());
		};

		self.status.send_replace(WatchStatus::Connecting);

		let connector = Connector::new(self.config.connect.clone())?;
		let session = match connector.connect(&url).await {
			Ok(session) => session,
			Err(err) => {
				self.status.send_replace(WatchStatus::Disconnected);
				return Err(err);
			}
		};

		let path = Path::from(url.path());
		let announced = session.announced(path.clone());

		let res = self.run_session(&session, path, announced).await;

		self.video = None;
		self.audio = None;
		self.status.send_replace(WatchStatus::Disconnected);

		session.close();

		res
	}

	async fn run_session(
		&mut self,
		session: &moq_transport::Session,
		path: Path,
		mut announced: AnnouncedConsumer,
	) -> Result<()> {
		let mut session_status = session.status();

		// The broadcast should be announced quickly; otherwise report it
		// offline and keep waiting for a (re-)announcement.
		match tokio::time::timeout(ANNOUNCE_TIMEOUT, announced.next()).await {
			Ok(Some(Announced::Active(_))) => {}
			Ok(_) => return Err(Error::BroadcastUnavailable),
			Err(_) => {
				tracing::info!(%path, "broadcast not announced yet");
				self.status.send_replace(WatchStatus::Offline);

				loop {
					match announced.next().await {
						Some(Announced::Active(_)) => break,
						Some(Announced::Ended(_)) => continue,
						None => return Err(Error::BroadcastUnavailable),
					}
				}
			}
		}

		self.status.send_replace(WatchStatus::Loading);
		tracing::info!(%path, "broadcast announced");

		// Subscribe to the catalog and build the sources.
		let broadcast = session.consume(path.clone());
		let mut catalog = CatalogConsumer::new(broadcast.subscribe(&Catalog::default_track()));

		let mut video = VideoSource::new(broadcast.clone(), self.factory.clone(), self.sync.clone());
		video.set_target(self.target.clone());

		let mut audio = AudioSource::new(broadcast.clone(), self.factory.clone(), self.sync.clone());
		audio.set_muted(self.muted);
		audio.set_volume(self.volume);

		self.video = Some(video);
		self.audio = Some(audio);

		loop {
			tokio::select! {
				res = catalog.next() => {
					match res {
						Ok(Some(update)) => self.apply_catalog(update),
						Ok(None) => {
							tracing::info!("catalog track ended");
							return Ok(());
						}
						Err(Error::MalformedCatalog(err)) => {
							// Keep the previous catalog; a broken update
							// shouldn't kill playback.
							tracing::warn!(%err, "malformed catalog, keeping previous");
						}
						Err(err) => return Err(err),
					}
				},
				Some(announce) = announced.next() => {
					match announce {
						Announced::Ended(_) => {
							// Subscriptions stay; the broadcast may come back.
							tracing::info!(%path, "broadcast went offline");
							self.status.send_replace(WatchStatus::Offline);
						}
						Announced::Active(_) => {
							self.status.send_replace(match self.catalog {
								Some(_) => WatchStatus::Live,
								None => WatchStatus::Loading,
							});
						}
					}
				},
				// The sources live in self so the controls can reach them.
				Some(_) = async { Some(self.video.as_mut()?.run().await) } => {},
				Some(_) = async { Some(self.audio.as_mut()?.run().await) } => {},
				res = session_status.wait_for(|status| *status == SessionStatus::Disconnected) => {
					res.map_err(|_| Error::Transport(moq_transport::Error::Cancel))?;
					tracing::info!("session disconnected");
					return Ok(());
				},
			}
		}
	}

	// A new catalog replaces the old one wholesale; re-evaluate everything.
	fn apply_catalog(&mut self, update: Catalog) {
		tracing::debug!("catalog updated");

		if let Some(video) = &mut self.video {
			video.set_catalog(update.video.clone());
		}

		if let Some(audio) = &mut self.audio {
			audio.set_catalog(update.audio.clone());
		}

		self.catalog = Some(update);
		self.status.send_replace(WatchStatus::Live);
	}

	/// The display hint from the catalog, if any.
	pub fn display(&self) -> Option<catalog::Dimensions> {
		self.catalog.as_ref()?.video.as_ref()?.display
	}
}
