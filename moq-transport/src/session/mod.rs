use tokio::sync::watch;
use web_async::spawn;

use crate::{message, model::AnnouncedConsumer, BroadcastConsumer, Error, Path};

mod reader;
mod stream;
mod subscriber;
mod writer;

use reader::*;
use stream::*;
use subscriber::*;
use writer::*;

/// The lifecycle of a session, observable via [Session::status].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionStatus {
	#[default]
	Connecting,
	Connected,
	Disconnected,
}

/// A MoQ session, used to subscribe to broadcasts.
///
/// Consumers MUST release dependent resources when the status flips to
/// [SessionStatus::Disconnected]; all broadcasts owned by the session end.
#[derive(Clone)]
pub struct Session {
	webtransport: web_transport::Session,
	subscriber: Subscriber,
	status: watch::Sender<SessionStatus>,
}

impl Session {
	fn new(mut session: web_transport::Session, stream: Stream) -> Self {
		let subscriber = Subscriber::new(session.clone());
		let status = watch::Sender::new(SessionStatus::Connected);

		let this = Self {
			webtransport: session.clone(),
			subscriber: subscriber.clone(),
			status: status.clone(),
		};

		spawn(async move {
			let res = tokio::select! {
				res = Self::run_session(stream) => res,
				res = Self::run_uni(session.clone(), subscriber) => res,
			};

			if let Err(err) = res {
				tracing::info!(?err, "session terminated");
				session.close(err.to_code(), &err.to_string());
			}

			status.send_replace(SessionStatus::Disconnected);
		});

		this
	}

	/// Perform the MoQ handshake as a client.
	pub async fn connect<T: Into<web_transport::Session>>(session: T) -> Result<Self, Error> {
		let mut session = session.into();
		let mut stream = Stream::open(&mut session, message::ControlType::Session).await?;
		Self::connect_setup(&mut stream).await?;
		Ok(Self::new(session, stream))
	}

	async fn connect_setup(setup: &mut Stream) -> Result<(), Error> {
		let client = message::ClientSetup {
			versions: [message::Version::CURRENT].into(),
		};

		setup.writer.encode(&client).await?;
		let server: message::ServerSetup = setup.reader.decode().await?;

		if server.version != message::Version::CURRENT {
			return Err(Error::Version(client.versions, [server.version].into()));
		}

		tracing::debug!(version = ?server.version, "connected");

		Ok(())
	}

	async fn run_session(mut stream: Stream) -> Result<(), Error> {
		// The session stream is kept open for the lifetime of the connection.
		stream.reader.finished().await?;
		Err(Error::Cancel)
	}

	async fn run_uni(mut session: web_transport::Session, subscriber: Subscriber) -> Result<(), Error> {
		loop {
			let mut stream = Reader::accept(&mut session).await?;
			let mut subscriber = subscriber.clone();

			spawn(async move {
				match stream.decode::<message::DataType>().await {
					Ok(message::DataType::Group) => {
						if let Err(err) = subscriber.recv_group(&mut stream).await {
							stream.stop(&err);
						}
					}
					Err(err) => stream.stop(&err),
				}
			});
		}
	}

	/// Discover broadcasts published under a path prefix.
	///
	/// Announcements are relative to the prefix; an `Ended` cancels a prior
	/// `Active` for the same suffix.
	pub fn announced(&self, prefix: Path) -> AnnouncedConsumer {
		self.subscriber.announced(prefix)
	}

	/// Subscribe to a broadcast by path.
	///
	/// The broadcast is lazy: nothing is sent over the network until a track
	/// is subscribed. Consuming the same path twice returns the same handle.
	pub fn consume(&self, path: Path) -> BroadcastConsumer {
		self.subscriber.consume(path)
	}

	/// The current session status, as a watchable signal.
	pub fn status(&self) -> watch::Receiver<SessionStatus> {
		self.status.subscribe()
	}

	/// Close the session gracefully.
	pub fn close(mut self) {
		self.webtransport.close(0, "");
		self.status.send_replace(SessionStatus::Disconnected);
	}

	/// Block until the session is closed, returning the reason.
	pub async fn closed(&self) -> Error {
		let mut status = self.status.subscribe();
		status
			.wait_for(|status| *status == SessionStatus::Disconnected)
			.await
			.ok();

		Error::Cancel
	}
}
