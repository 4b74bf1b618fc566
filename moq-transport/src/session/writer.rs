use std::fmt;

use crate::{coding::Encode, Error};

// Encodes messages onto a send stream, resetting it if dropped mid-message.
pub(super) struct Writer {
	stream: web_transport::SendStream,
	buffer: bytes::BytesMut,
}

impl Writer {
	pub fn new(stream: web_transport::SendStream) -> Self {
		Self {
			stream,
			buffer: Default::default(),
		}
	}

	pub async fn encode<T: Encode + fmt::Debug>(&mut self, msg: &T) -> Result<(), Error> {
		tracing::trace!(?msg, "encode");

		self.buffer.clear();
		msg.encode(&mut self.buffer);

		while !self.buffer.is_empty() {
			self.stream.write_buf(&mut self.buffer).await?;
		}

		Ok(())
	}

	/// A clean termination of the stream, waiting for the peer to close.
	pub async fn finish(&mut self) -> Result<(), Error> {
		self.stream.finish()?;
		self.stream.closed().await?;
		Ok(())
	}

	pub fn abort(&mut self, err: &Error) {
		self.stream.reset(err.to_code());
	}
}

impl Drop for Writer {
	fn drop(&mut self) {
		// A dropped writer never finished its message. Reset the stream so
		// the peer sees a cancel code instead of a truncated payload.
		self.stream.reset(Error::Cancel.to_code());
	}
}
