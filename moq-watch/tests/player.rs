//! End-to-end playback tests against the in-memory transport model,
//! with a passthrough decoder standing in for the platform.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::time::Instant;

use moq_watch::{
	catalog, container::Legacy, AudioDecoder, BufferStatus, DecodeError, DecoderConfig, DecoderFactory, Sample,
	Sync, SyncStatus, Target, Timestamp, VideoDecoder, VideoFrame, VideoSource,
};

// A passthrough decoder: every sample becomes a frame immediately.
struct TestDecoder {
	queue: VecDeque<VideoFrame>,
}

impl VideoDecoder for TestDecoder {
	fn decode(&mut self, sample: Sample) -> Result<(), DecodeError> {
		self.queue.push_back(VideoFrame {
			timestamp: sample.timestamp,
			width: 1920,
			height: 1080,
			payload: sample.payload,
		});
		Ok(())
	}

	fn poll(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
		Ok(self.queue.pop_front())
	}
}

struct TestFactory;

impl DecoderFactory for TestFactory {
	fn supports_video(&self, _config: &DecoderConfig) -> bool {
		true
	}

	fn supports_audio(&self, _config: &catalog::AudioConfig) -> bool {
		false
	}

	fn open_video(&self, _config: &DecoderConfig) -> Result<Box<dyn VideoDecoder>, DecodeError> {
		Ok(Box::new(TestDecoder { queue: VecDeque::new() }))
	}

	fn open_audio(&self, _config: &catalog::AudioConfig) -> Result<Box<dyn AudioDecoder>, DecodeError> {
		Err(DecodeError::Unsupported("audio".into()))
	}
}

const TIMESCALE: u32 = 90_000;

fn cmaf_config() -> catalog::VideoConfig {
	catalog::VideoConfig {
		codec: "avc1.640028".to_string(),
		description: None,
		coded_width: Some(1920),
		coded_height: Some(1080),
		container: catalog::Container::Cmaf { timescale: TIMESCALE },
		bitrate: None,
		framerate: Some(30.0),
		optimize_for_latency: None,
		flip: None,
	}
}

fn legacy_config() -> catalog::VideoConfig {
	catalog::VideoConfig {
		container: catalog::Container::Legacy,
		..cmaf_config()
	}
}

fn video_catalog(config: catalog::VideoConfig) -> catalog::Video {
	catalog::Video {
		renditions: [("video".to_string(), config)].into(),
		display: None,
		flip: None,
	}
}

// A minimal moof+mdat pair: mfhd, one traf with tfhd/tfdt/trun, one sample.
fn cmaf_fragment(dts: u64, payload: &[u8]) -> Bytes {
	fn put_box(out: &mut BytesMut, name: &[u8; 4], body: &[u8]) {
		out.put_u32(8 + body.len() as u32);
		out.put_slice(name);
		out.put_slice(body);
	}

	let mut tfhd = BytesMut::new();
	tfhd.put_u32(0x0002_0000); // default-base-is-moof
	tfhd.put_u32(1); // track_id

	let mut tfdt = BytesMut::new();
	tfdt.put_u32(0x0100_0000); // version 1
	tfdt.put_u64(dts);

	// moof = header + mfhd(16) + traf(8 + tfhd(16) + tfdt(20) + trun(32))
	let moof_size = 8 + 16 + 8 + 16 + 20 + 32;

	let mut trun = BytesMut::new();
	trun.put_u32(0x0000_0701); // data-offset + duration + size + flags
	trun.put_u32(1); // sample count
	trun.put_i32(moof_size as i32 + 8);
	trun.put_u32(3000); // duration: one 30fps frame at 90kHz
	trun.put_u32(payload.len() as u32);
	trun.put_u32(0x0200_0000); // sync sample

	let mut traf = BytesMut::new();
	put_box(&mut traf, b"tfhd", &tfhd);
	put_box(&mut traf, b"tfdt", &tfdt);
	put_box(&mut traf, b"trun", &trun);

	let mut mfhd = BytesMut::new();
	mfhd.put_u32(0);
	mfhd.put_u32(1);

	let mut moof = BytesMut::new();
	put_box(&mut moof, b"mfhd", &mfhd);
	put_box(&mut moof, b"traf", &traf);

	let mut out = BytesMut::new();
	put_box(&mut out, b"moof", &moof);
	assert_eq!(out.len(), moof_size);
	put_box(&mut out, b"mdat", payload);

	out.freeze()
}

fn legacy_frame(micros: u64, payload: &'static [u8]) -> Bytes {
	Legacy::encode(&Sample {
		timestamp: Timestamp::from_micros(micros).unwrap(),
		keyframe: false,
		payload: Bytes::from_static(payload),
	})
}

// Collect published frame timestamps while driving the source, until idle.
async fn collect(source: &mut VideoSource, idle: Duration) -> Vec<(Instant, u64)> {
	let mut frames = source.frame();
	let mut seen = Vec::new();

	loop {
		tokio::select! {
			biased;
			_ = source.run() => unreachable!(),
			_ = tokio::time::sleep(idle) => break,
			res = frames.changed() => {
				if res.is_err() {
					break;
				}
				if let Some(frame) = frames.borrow().as_ref() {
					seen.push((Instant::now(), frame.timestamp.as_micros()));
				}
			},
		}
	}

	seen
}

/// Single rendition, CMAF, 30fps: the first frame is published within 250ms
/// of the first update, and later frames hold a ~33ms cadence.
#[tokio::test(start_paused = true)]
async fn cmaf_cadence() {
	let mut broadcast = moq_transport::Broadcast::new("test").produce();
	let sync = Sync::new(Duration::from_millis(200));
	let mut source = VideoSource::new(broadcast.consume(), Arc::new(TestFactory), sync);

	source.set_catalog(Some(video_catalog(cmaf_config())));
	let mut track = broadcast.requested().await.unwrap();

	let start = Instant::now();

	// One group per keyframe, one frame per group, every 33ms.
	tokio::spawn(async move {
		for i in 0..30u64 {
			let mut group = track.append_group();
			group.write_frame(cmaf_fragment(i * 3000, b"frame"));
			group.finish();
			tokio::time::sleep(Duration::from_millis(33)).await;
		}
		track.finish();
	});

	let seen = collect(&mut source, Duration::from_secs(2)).await;

	assert!(!seen.is_empty(), "nothing was published");

	// The first frame appears quickly as a placeholder.
	let (first_at, first_ts) = seen[0];
	assert_eq!(first_ts, 0);
	assert!(first_at - start <= Duration::from_millis(250));

	// Published timestamps never decrease, and most frames make it out.
	for pair in seen.windows(2) {
		assert!(pair[0].1 <= pair[1].1);
	}
	assert!(seen.len() >= 25, "only {} frames published", seen.len());

	// Steady-state cadence is one frame every ~33ms.
	let cadence: Vec<Duration> = seen.windows(2).skip(5).map(|pair| pair[1].0 - pair[0].0).collect();
	let avg = cadence.iter().sum::<Duration>() / cadence.len() as u32;
	assert!(
		avg > Duration::from_millis(25) && avg < Duration::from_millis(45),
		"cadence was {:?}",
		avg
	);
}

/// Group loss: the transport cancels a group mid-read; playback continues
/// cleanly at the next group with no phantom frames in the gap.
#[tokio::test(start_paused = true)]
async fn group_loss() {
	let mut broadcast = moq_transport::Broadcast::new("test").produce();
	let sync = Sync::new(Duration::from_millis(100));
	let mut source = VideoSource::new(broadcast.consume(), Arc::new(TestFactory), sync);

	source.set_catalog(Some(video_catalog(legacy_config())));
	let mut track = broadcast.requested().await.unwrap();

	tokio::spawn(async move {
		for i in 0..8u64 {
			let mut group = track.append_group();
			let base = i * 40_000;

			if i == 5 {
				// Two frames, then the transport cancels the stream.
				group.write_frame(legacy_frame(base, b"f0"));
				group.write_frame(legacy_frame(base + 10_000, b"f1"));
				group.abort(moq_transport::Error::Cancel);
			} else {
				for k in 0..4u64 {
					group.write_frame(legacy_frame(base + k * 10_000, b"f"));
				}
				group.finish();
			}

			tokio::time::sleep(Duration::from_millis(40)).await;
		}
		track.finish();
	});

	let seen = collect(&mut source, Duration::from_secs(2)).await;
	let timestamps: Vec<u64> = seen.iter().map(|(_, ts)| *ts).collect();

	// Nothing from the lost tail of group 5 appears.
	assert!(!timestamps.contains(&220_000));
	assert!(!timestamps.contains(&230_000));

	// Group 6 starts cleanly.
	assert!(timestamps.contains(&240_000), "published: {:?}", timestamps);

	for pair in timestamps.windows(2) {
		assert!(pair[0] <= pair[1]);
	}
}

/// Stall: the producer goes quiet, the sync status flips to Wait before the
/// buffer drains, and a fresh update resumes playback without regression.
#[tokio::test(start_paused = true)]
async fn stall() {
	let mut broadcast = moq_transport::Broadcast::new("test").produce();
	let sync = Sync::new(Duration::from_millis(200));
	let mut source = VideoSource::new(broadcast.consume(), Arc::new(TestFactory), sync.clone());

	source.set_catalog(Some(video_catalog(legacy_config())));
	let mut track = broadcast.requested().await.unwrap();

	let mut group = track.append_group();
	for i in 0..10u64 {
		group.write_frame(legacy_frame(i * 33_333, b"f"));
	}

	// Drain the normal updates.
	let seen = collect(&mut source, Duration::from_secs(3)).await;
	assert!(!seen.is_empty());

	// The producer has been silent for a while now; a waiter observes Wait.
	let mut status = sync.status();
	tokio::select! {
		biased;
		_ = source.run() => unreachable!(),
		res = status.wait_for(|status| *status == SyncStatus::Wait) => { res.unwrap(); },
		_ = tokio::time::sleep(Duration::from_secs(5)) => panic!("never stalled"),
	}

	// A fresh update resumes playback with no timestamp regression.
	group.write_frame(legacy_frame(20 * 33_333, b"resume"));

	let mut frames = source.frame();
	tokio::select! {
		biased;
		_ = source.run() => unreachable!(),
		res = frames.wait_for(|frame| {
			frame.as_ref().is_some_and(|f| f.timestamp.as_micros() == 20 * 33_333)
		}) => { res.unwrap(); },
		_ = tokio::time::sleep(Duration::from_secs(5)) => panic!("never resumed"),
	}

	assert_eq!(*sync.status().borrow(), SyncStatus::Play);

	let last_before = seen.last().unwrap().1;
	assert!(20 * 33_333 >= last_before, "timestamp regressed after stall");

	group.finish();
	track.finish();
}

/// Latency override: pinning a rendition beats the pixel heuristic.
#[tokio::test(start_paused = true)]
async fn rendition_override() {
	let broadcast = moq_transport::Broadcast::new("test").produce();
	let sync = Sync::new(Duration::from_millis(200));
	let mut source = VideoSource::new(broadcast.consume(), Arc::new(TestFactory), sync);

	let mut video = video_catalog(cmaf_config());
	video.renditions.insert(
		"sd".to_string(),
		catalog::VideoConfig {
			coded_width: Some(256),
			coded_height: Some(144),
			..cmaf_config()
		},
	);

	source.set_catalog(Some(video));
	assert_eq!(source.active_rendition().as_deref(), Some("video"));

	source.set_target(Target {
		rendition: Some("sd".to_string()),
		pixels: Some(1920 * 1080),
	});

	// The pending pipeline targets sd even though pixels say otherwise.
	let renditions = source.available();
	assert!(renditions.iter().any(|(name, _, _)| name == "sd"));
}

/// After the source is disabled, no further frames are published.
#[tokio::test(start_paused = true)]
async fn close_is_silent() {
	let mut broadcast = moq_transport::Broadcast::new("test").produce();
	let sync = Sync::new(Duration::from_millis(100));
	let mut source = VideoSource::new(broadcast.consume(), Arc::new(TestFactory), sync);

	source.set_catalog(Some(video_catalog(legacy_config())));
	let mut track = broadcast.requested().await.unwrap();

	let mut group = track.append_group();
	group.write_frame(legacy_frame(0, b"f"));

	let seen = collect(&mut source, Duration::from_secs(1)).await;
	assert!(!seen.is_empty());
	assert_eq!(source.buffer_status(), BufferStatus::Filled);

	source.set_enabled(false);
	let mut frames = source.frame();
	frames.borrow_and_update();

	// More frames arrive, but nothing is published anymore.
	group.write_frame(legacy_frame(33_333, b"late"));
	group.finish();
	track.finish();

	let after = collect(&mut source, Duration::from_secs(1)).await;
	assert!(after.is_empty(), "published after close: {:?}", after);
	assert!(!frames.has_changed().unwrap_or(true));
}

/// The catalog track: the latest group wins, and a malformed document
/// leaves the previous catalog in place.
#[tokio::test]
async fn catalog_updates() {
	let mut broadcast = moq_transport::Broadcast::new("test").produce();
	let consumer = broadcast.consume();

	let mut catalog_track = broadcast.create(moq_watch::Catalog::default_track());

	let v1 = moq_watch::Catalog {
		video: Some(video_catalog(cmaf_config())),
		audio: None,
		min_buffer: Some(100),
	};

	let mut group = catalog_track.append_group();
	group.write_frame(v1.to_vec().unwrap());
	group.finish();

	let track = consumer.subscribe(&moq_watch::Catalog::default_track());
	let mut catalog = moq_watch::CatalogConsumer::new(track);

	let first = catalog.next().await.unwrap().unwrap();
	assert_eq!(first.min_buffer, Some(100));

	// A malformed update surfaces an error; the caller keeps the old catalog.
	let mut group = catalog_track.append_group();
	group.write_frame(Bytes::from_static(b"{broken"));
	group.finish();

	assert!(catalog.next().await.is_err());

	// Two quick updates: the consumer only ever parses the newest.
	let v2 = moq_watch::Catalog {
		min_buffer: Some(200),
		..v1.clone()
	};
	let v3 = moq_watch::Catalog {
		min_buffer: Some(300),
		..v1.clone()
	};

	let mut group = catalog_track.append_group();
	group.write_frame(v2.to_vec().unwrap());
	group.finish();

	let mut group = catalog_track.append_group();
	group.write_frame(v3.to_vec().unwrap());
	group.finish();

	let latest = catalog.next().await.unwrap().unwrap();
	assert_eq!(latest.min_buffer, Some(300));
}
