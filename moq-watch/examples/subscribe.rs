// cargo run --example subscribe -- https://relay.example/demo/bbb
//
// Watches a broadcast and logs decoded frame metadata. The "decoder" here
// is a passthrough; a real application plugs in WebCodecs/FFmpeg/etc via
// the DecoderFactory trait.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use moq_watch::{
	catalog, AudioDecoder, AudioFrame, DecodeError, DecoderConfig, DecoderFactory, Sample, VideoDecoder, VideoFrame,
	Watch, WatchConfig,
};

struct Passthrough;

struct PassthroughVideo {
	queue: VecDeque<VideoFrame>,
}

impl VideoDecoder for PassthroughVideo {
	fn decode(&mut self, sample: Sample) -> Result<(), DecodeError> {
		self.queue.push_back(VideoFrame {
			timestamp: sample.timestamp,
			width: 0,
			height: 0,
			payload: sample.payload,
		});
		Ok(())
	}

	fn poll(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
		Ok(self.queue.pop_front())
	}
}

struct PassthroughAudio {
	queue: VecDeque<AudioFrame>,
}

impl AudioDecoder for PassthroughAudio {
	fn decode(&mut self, sample: Sample) -> Result<(), DecodeError> {
		self.queue.push_back(AudioFrame {
			timestamp: sample.timestamp,
			sample_rate: 0,
			channel_count: 0,
			payload: sample.payload,
		});
		Ok(())
	}

	fn poll(&mut self) -> Result<Option<AudioFrame>, DecodeError> {
		Ok(self.queue.pop_front())
	}
}

impl DecoderFactory for Passthrough {
	fn supports_video(&self, _config: &DecoderConfig) -> bool {
		true
	}

	fn supports_audio(&self, _config: &catalog::AudioConfig) -> bool {
		true
	}

	fn open_video(&self, _config: &DecoderConfig) -> Result<Box<dyn VideoDecoder>, DecodeError> {
		Ok(Box::new(PassthroughVideo { queue: VecDeque::new() }))
	}

	fn open_audio(&self, _config: &catalog::AudioConfig) -> Result<Box<dyn AudioDecoder>, DecodeError> {
		Ok(Box::new(PassthroughAudio { queue: VecDeque::new() }))
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_max_level(tracing::Level::DEBUG)
		.init();

	let url = std::env::args()
		.nth(1)
		.unwrap_or_else(|| "https://cdn.moq.dev/anon/video-example".to_string());

	let config = WatchConfig {
		url: Some(url::Url::parse(&url)?),
		latency: Duration::from_millis(200),
		..Default::default()
	};

	let mut watch = Watch::new(config, Arc::new(Passthrough));

	let frames = tokio::spawn({
		let mut status = watch.status();
		async move {
			while status.changed().await.is_ok() {
				tracing::info!(status = ?*status.borrow(), "status");
			}
		}
	});

	watch.run().await?;
	frames.abort();

	Ok(())
}
