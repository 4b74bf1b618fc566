use std::net;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::{Error, Result};

/// Configuration for dialing a relay.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConnectConfig {
	/// Listen for UDP packets on the given address.
	pub bind: net::SocketAddr,

	/// Use the TLS root at this path, encoded as PEM.
	///
	/// This value can be provided multiple times for multiple roots.
	/// If this is empty, system roots will be used instead.
	pub tls_roots: Vec<PathBuf>,

	/// How long to wait for the QUIC + WebTransport + MoQ handshakes.
	#[serde(with = "duration_millis")]
	pub timeout: Duration,
}

impl Default for ConnectConfig {
	fn default() -> Self {
		Self {
			bind: "[::]:0".parse().unwrap(),
			tls_roots: Vec::new(),
			timeout: Duration::from_secs(10),
		}
	}
}

mod duration_millis {
	use super::Duration;
	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		(duration.as_millis() as u64).serialize(serializer)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		Ok(Duration::from_millis(u64::deserialize(deserializer)?))
	}
}

/// Dials relays over QUIC/WebTransport and performs the MoQ handshake.
///
/// `https://` validates certificates as usual. `http://` is development
/// only: certificate verification is disabled entirely. A `?jwt=` query
/// parameter rides the connect URL untouched; the relay consumes it.
#[derive(Clone)]
pub struct Connector {
	quic: quinn::Endpoint,
	tls: rustls::ClientConfig,
	transport: Arc<quinn::TransportConfig>,
	timeout: Duration,
}

impl Connector {
	pub fn new(config: ConnectConfig) -> Result<Self> {
		let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

		// Create a list of acceptable root certificates.
		let mut roots = rustls::RootCertStore::empty();

		if config.tls_roots.is_empty() {
			let native = rustls_native_certs::load_native_certs();

			// Log any errors that occurred while loading the native root certificates.
			for err in native.errors {
				tracing::warn!(?err, "failed to load root cert");
			}

			for cert in native.certs {
				roots
					.add(cert)
					.map_err(|err| Error::ConnectFailed(format!("failed to add root cert: {err}")))?;
			}
		} else {
			for root in &config.tls_roots {
				let root = std::fs::File::open(root)
					.map_err(|err| Error::ConnectFailed(format!("failed to open root cert file: {err}")))?;
				let mut root = std::io::BufReader::new(root);

				let root = rustls_pemfile::certs(&mut root)
					.next()
					.ok_or_else(|| Error::ConnectFailed("no roots found".to_string()))?
					.map_err(|err| Error::ConnectFailed(format!("failed to read root cert: {err}")))?;

				roots
					.add(root)
					.map_err(|err| Error::ConnectFailed(format!("failed to add root cert: {err}")))?;
			}
		}

		let tls = rustls::ClientConfig::builder_with_provider(provider)
			.with_protocol_versions(&[&rustls::version::TLS13])
			.map_err(|err| Error::ConnectFailed(format!("invalid TLS config: {err}")))?
			.with_root_certificates(roots)
			.with_no_client_auth();

		let socket = std::net::UdpSocket::bind(config.bind)
			.map_err(|err| Error::ConnectFailed(format!("failed to bind UDP socket: {err}")))?;

		// Low-latency friendly transport defaults.
		let mut transport = quinn::TransportConfig::default();
		transport.max_idle_timeout(Some(Duration::from_secs(10).try_into().unwrap()));
		transport.keep_alive_interval(Some(Duration::from_secs(4)));
		transport.congestion_controller_factory(Arc::new(quinn::congestion::BbrConfig::default()));
		transport.mtu_discovery_config(None); // Disable MTU discovery
		let transport = Arc::new(transport);

		let runtime = quinn::default_runtime().ok_or_else(|| Error::ConnectFailed("no async runtime".to_string()))?;
		let quic = quinn::Endpoint::new(quinn::EndpointConfig::default(), None, socket, runtime)
			.map_err(|err| Error::ConnectFailed(format!("failed to create QUIC endpoint: {err}")))?;

		Ok(Self {
			quic,
			tls,
			transport,
			timeout: config.timeout,
		})
	}

	/// Establish a WebTransport connection and perform the MoQ handshake.
	pub async fn connect(&self, url: &Url) -> Result<moq_transport::Session> {
		tokio::time::timeout(self.timeout, self.connect_inner(url))
			.await
			.map_err(|_| Error::ConnectFailed("timed out".to_string()))?
	}

	async fn connect_inner(&self, url: &Url) -> Result<moq_transport::Session> {
		let mut config = self.tls.clone();
		let mut url = url.clone();

		let host = url
			.host()
			.ok_or_else(|| Error::ConnectFailed("missing hostname".to_string()))?
			.to_string();
		let port = url.port().unwrap_or(443);

		match url.scheme() {
			"https" => {}
			"http" => {
				// Development only: no certificate validation at all.
				tracing::warn!("TLS certificate verification is disabled for http://");

				let provider = config.crypto_provider().clone();
				config
					.dangerous()
					.set_certificate_verifier(Arc::new(NoCertificateVerification(provider)));

				url.set_scheme("https").expect("failed to set scheme");
			}
			_ => return Err(Error::InvalidScheme),
		}

		// Look up the DNS entry.
		let ip = tokio::net::lookup_host((host.clone(), port))
			.await
			.map_err(|err| Error::ConnectFailed(format!("DNS lookup failed: {err}")))?
			.next()
			.ok_or_else(|| Error::ConnectFailed("no DNS entries".to_string()))?;

		config.alpn_protocols = vec![web_transport::quinn::ALPN.as_bytes().to_vec()];

		let config: quinn::crypto::rustls::QuicClientConfig = config
			.try_into()
			.map_err(|err| Error::ConnectFailed(format!("invalid QUIC TLS config: {err}")))?;
		let mut config = quinn::ClientConfig::new(Arc::new(config));
		config.transport_config(self.transport.clone());

		tracing::debug!(%url, %ip, "connecting");

		let connection = self
			.quic
			.connect_with(config, ip, &host)
			.map_err(|err| Error::ConnectFailed(format!("failed to start connection: {err}")))?
			.await
			.map_err(|err| Error::ConnectFailed(format!("connection failed: {err}")))?;

		// The full URL, query included, rides the WebTransport CONNECT.
		let session = web_transport::quinn::Session::connect(connection, url)
			.await
			.map_err(|err| Error::ConnectFailed(format!("webtransport handshake failed: {err}")))?;

		let session = moq_transport::Session::connect(session).await?;

		Ok(session)
	}
}

#[derive(Debug)]
struct NoCertificateVerification(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
	fn verify_server_cert(
		&self,
		_end_entity: &rustls::pki_types::CertificateDer<'_>,
		_intermediates: &[rustls::pki_types::CertificateDer<'_>],
		_server_name: &rustls::pki_types::ServerName<'_>,
		_ocsp: &[u8],
		_now: rustls::pki_types::UnixTime,
	) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
		Ok(rustls::client::danger::ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &rustls::pki_types::CertificateDer<'_>,
		dss: &rustls::DigitallySignedStruct,
	) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &rustls::pki_types::CertificateDer<'_>,
		dss: &rustls::DigitallySignedStruct,
	) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
	}

	fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
		self.0.signature_verification_algorithms.supported_schemes()
	}
}
