use std::{
	collections::HashMap,
	sync::{atomic, Arc},
};

use web_async::{spawn, Lock};

use crate::{
	message,
	model::{AnnouncedConsumer, AnnouncedProducer, Broadcast, BroadcastConsumer, BroadcastProducer},
	Error, Frame, FrameProducer, Group, GroupProducer, Path, TrackProducer,
};

use super::{Reader, Stream};

#[derive(Clone)]
pub(super) struct Subscriber {
	session: web_transport::Session,

	broadcasts: Lock<HashMap<Path, BroadcastProducer>>,
	subscribes: Lock<HashMap<u64, TrackProducer>>,
	next_id: Arc<atomic::AtomicU64>,
}

impl Subscriber {
	pub fn new(session: web_transport::Session) -> Self {
		Self {
			session,

			broadcasts: Default::default(),
			subscribes: Default::default(),
			next_id: Default::default(),
		}
	}

	/// Discover any broadcasts matching a prefix.
	pub fn announced(&self, prefix: Path) -> AnnouncedConsumer {
		let producer = AnnouncedProducer::default();
		let consumer = producer.consume(Path::empty());

		spawn(self.clone().run_announced(prefix, producer));

		consumer
	}

	async fn run_announced(mut self, prefix: Path, producer: AnnouncedProducer) {
		tracing::debug!(%prefix, "announced started");

		// Wait until the producer is no longer needed or the stream is closed.
		let res = tokio::select! {
			_ = producer.unused() => Err(Error::Cancel),
			res = self.run_announce(&prefix, producer.clone()) => res,
		};

		match res {
			Err(Error::Cancel) => tracing::debug!(%prefix, "announced cancelled"),
			Err(err) => tracing::warn!(?err, %prefix, "announced error"),
			_ => tracing::debug!(%prefix, "announced complete"),
		}
	}

	async fn run_announce(&mut self, prefix: &Path, mut announced: AnnouncedProducer) -> Result<(), Error> {
		let mut stream = Stream::open(&mut self.session, message::ControlType::Announce).await?;

		stream
			.writer
			.encode(&message::AnnounceRequest {
				prefix: prefix.clone(),
			})
			.await?;

		while let Some(announce) = stream.reader.decode_maybe::<message::Announce>().await? {
			match announce {
				message::Announce::Active { suffix } => {
					tracing::debug!(broadcast = %suffix, "received announce");

					if !announced.insert(suffix) {
						// Duplicates are re-announced as an end/start pair.
						tracing::debug!("duplicate announce");
					}
				}
				message::Announce::Ended { suffix } => {
					tracing::debug!(broadcast = %suffix, "received unannounce");

					if !announced.remove(&suffix) {
						return Err(Error::NotFound);
					}
				}
			}
		}

		stream.writer.finish().await
	}

	/// Subscribe to a given broadcast, lazily.
	pub fn consume(&self, path: Path) -> BroadcastConsumer {
		if let Some(producer) = self.broadcasts.lock().get(&path) {
			return producer.consume();
		}

		let producer = Broadcast::new(path.clone()).produce();
		let consumer = producer.consume();
		self.broadcasts.lock().insert(path, producer.clone());

		// Run the broadcast in the background until all consumers are dropped.
		spawn(self.clone().run_broadcast(producer));

		consumer
	}

	async fn run_broadcast(self, broadcast: BroadcastProducer) {
		loop {
			// Keep serving requests until there are no more consumers.
			let producer = tokio::select! {
				Some(producer) = broadcast.requested() => producer,
				_ = broadcast.unused() => break,
				_ = self.session.closed() => break,
				else => break,
			};

			let id = self.next_id.fetch_add(1, atomic::Ordering::Relaxed);
			spawn(self.clone().run_subscribe(id, broadcast.info.path.clone(), producer));
		}

		// Remove the broadcast from the lookup.
		self.broadcasts.lock().remove(&broadcast.info.path);
	}

	async fn run_subscribe(mut self, id: u64, broadcast: Path, track: TrackProducer) {
		self.subscribes.lock().insert(id, track.clone());

		let msg = message::Subscribe {
			id,
			broadcast: broadcast.clone(),
			track: track.info.name.clone(),
			priority: track.info.priority,
		};

		tracing::info!(%broadcast, track = %track.info.name, id, "subscription started");

		let res = tokio::select! {
			_ = track.unused() => Err(Error::Cancel),
			res = self.run_track(msg) => res,
		};

		match res {
			Err(Error::Cancel) => {
				tracing::info!(%broadcast, track = %track.info.name, id, "subscription cancelled");
				track.abort(Error::Cancel);
			}
			Err(err) => {
				tracing::warn!(?err, %broadcast, track = %track.info.name, id, "subscription error");
				track.abort(err);
			}
			_ => {
				tracing::info!(%broadcast, track = %track.info.name, id, "subscription complete");
				track.finish();
			}
		}

		self.subscribes.lock().remove(&id);
	}

	async fn run_track(&mut self, msg: message::Subscribe) -> Result<(), Error> {
		let mut stream = Stream::open(&mut self.session, message::ControlType::Subscribe).await?;

		if let Err(err) = self.run_track_stream(&mut stream, msg).await {
			stream.close(&err);
			return Err(err);
		}

		stream.writer.finish().await
	}

	async fn run_track_stream(&mut self, stream: &mut Stream, msg: message::Subscribe) -> Result<(), Error> {
		stream.writer.encode(&msg).await?;

		// TODO use the response to populate the track info.
		let _info: message::SubscribeOk = stream.reader.decode().await?;

		// Wait until the publisher closes the subscription.
		stream.reader.finished().await?;

		Ok(())
	}

	/// Serve an incoming group stream.
	pub async fn recv_group(&mut self, stream: &mut Reader) -> Result<(), Error> {
		let group: message::Group = stream.decode().await?;

		tracing::trace!(group = %group.sequence, "received group");

		let mut group = {
			let mut subs = self.subscribes.lock();
			let track = subs.get_mut(&group.subscribe).ok_or(Error::Cancel)?;

			let group = Group {
				sequence: group.sequence,
			};

			// The group arrived too late; tell the relay to stop sending it.
			track.create_group(group).ok_or(Error::Old)?
		};

		let res = tokio::select! {
			// The application stopped reading; the relay MAY cancel the stream the same way.
			_ = group.unused() => Err(Error::Cancel),
			res = self.run_group(stream, &mut group) => res,
		};

		match res {
			Err(Error::Cancel) => {
				tracing::trace!(group = %group.info.sequence, "group cancelled");
				group.abort(Error::Cancel);
			}
			Err(err) => {
				tracing::debug!(?err, group = %group.info.sequence, "group error");
				group.abort(err.clone());
				return Err(err);
			}
			_ => {
				tracing::trace!(group = %group.info.sequence, "group complete");
				group.finish();
			}
		}

		Ok(())
	}

	async fn run_group(&mut self, stream: &mut Reader, group: &mut GroupProducer) -> Result<(), Error> {
		while let Some(frame) = stream.decode_maybe::<message::Frame>().await? {
			let mut frame = group.create_frame(Frame { size: frame.size });

			if let Err(err) = self.run_frame(stream, &mut frame).await {
				frame.abort(err.clone());
				return Err(err);
			}

			frame.finish();
		}

		Ok(())
	}

	async fn run_frame(&mut self, stream: &mut Reader, frame: &mut FrameProducer) -> Result<(), Error> {
		let mut remain = frame.info.size as usize;

		while remain > 0 {
			let chunk = stream.read(remain).await?.ok_or(Error::WrongSize)?;
			remain = remain.checked_sub(chunk.len()).ok_or(Error::WrongSize)?;
			frame.write(chunk);
		}

		Ok(())
	}
}
