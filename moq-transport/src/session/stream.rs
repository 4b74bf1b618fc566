use crate::{message, Error};

use super::{Reader, Writer};

// A bidirectional control stream.
pub(super) struct Stream {
	pub writer: Writer,
	pub reader: Reader,
}

impl Stream {
	pub async fn open(session: &mut web_transport::Session, typ: message::ControlType) -> Result<Self, Error> {
		let (send, recv) = session.open_bi().await?;

		let mut stream = Self {
			writer: Writer::new(send),
			reader: Reader::new(recv),
		};

		stream.writer.encode(&typ).await?;

		Ok(stream)
	}

	pub fn close(&mut self, err: &Error) {
		self.writer.abort(err);
		self.reader.stop(err);
	}
}
