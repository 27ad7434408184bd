//! Peer-certificate acquisition and description for RA-TLS endpoints.
//!
//! The probe dials a TLS endpoint purely to retrieve the certificate the
//! peer presents. Chain validation is deliberately disabled: the
//! certificate is handed to RA-TLS-specific verification afterwards, and
//! nothing is ever sent over the resulting connection. The connection is
//! dropped as soon as the leaf certificate has been cloned out.

use std::{fmt, sync::Arc, time::Duration};

use rustls::pki_types::{CertificateDer, ServerName};
use serde::Serialize;
use tokio::net::TcpStream;
use x509_cert::{der::Decode, time::Time, Certificate};

/// Upper bound on dial plus handshake time. The probe respects this bound
/// on its own, independent of the inbound request's lifetime.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_TLS_PORT: &str = "443";

/// Vendor OID namespace for RA-TLS certificate extensions, with the
/// semantic label reported for each known identifier. Unrecognized
/// identifiers are still reported, just without a label.
const KNOWN_VENDOR_OIDS: &[(&str, &str)] = &[
	("1.3.6.1.4.1.62397.1.1", "phala-ratls-tdx-quote"),
	("1.3.6.1.4.1.62397.1.2", "phala-ratls-event-log"),
	("1.3.6.1.4.1.62397.1.3", "phala-ratls-app-id"),
	("1.3.6.1.4.1.62397.1.4", "phala-ratls-cert-usage"),
	("1.3.6.1.4.1.62397.1.8", "phala-ratls-attestation"),
	("1.3.6.1.4.1.62397.1.9", "phala-ratls-app-info"),
];

/// Errors from dialing an endpoint or describing its certificate.
#[derive(Debug)]
pub enum ProbeError {
	/// The endpoint host is not a valid DNS name or IP address.
	InvalidEndpoint(String),
	/// Dial plus handshake exceeded [`DIAL_TIMEOUT`].
	Timeout,
	/// TCP or TLS level failure while connecting.
	Connect(String),
	/// The handshake succeeded but the peer presented zero certificates.
	NoPeerCertificate,
	/// The peer certificate is not parseable DER.
	Certificate(String),
}

impl fmt::Display for ProbeError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::InvalidEndpoint(host) => {
				write!(f, "invalid endpoint host: {host}")
			}
			Self::Timeout => write!(
				f,
				"connection timed out after {}s",
				DIAL_TIMEOUT.as_secs()
			),
			Self::Connect(e) => write!(f, "failed to connect: {e}"),
			Self::NoPeerCertificate => {
				write!(f, "server presented no certificate")
			}
			Self::Certificate(e) => {
				write!(f, "failed to parse peer certificate: {e}")
			}
		}
	}
}

/// Descriptor for a single certificate extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionDescriptor {
	/// Object identifier in dotted string form.
	pub oid: String,
	/// Criticality flag from the certificate.
	pub critical: bool,
	/// Raw extension value length in bytes.
	pub size: usize,
	/// Semantic label, present only for known vendor identifiers.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
}

/// Human-inspectable projection of a peer's leaf certificate.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateSummary {
	pub subject: String,
	pub issuer: String,
	pub not_before: String,
	pub not_after: String,
	/// Extensions in their original certificate order.
	pub extensions: Vec<ExtensionDescriptor>,
}

/// Append the default TLS port when the endpoint carries none.
///
/// `host` becomes `host:443`, `host:9000` is unchanged. Bare IPv6
/// addresses are bracketed before the port is appended.
#[must_use]
pub fn normalize_endpoint(endpoint: &str) -> String {
	if endpoint.starts_with('[') {
		// bracketed IPv6, maybe with a port
		let has_port = endpoint
			.rfind(']')
			.is_some_and(|end| endpoint[end + 1..].starts_with(':'));
		if has_port {
			return endpoint.to_string();
		}
		return format!("{endpoint}:{DEFAULT_TLS_PORT}");
	}

	match endpoint.matches(':').count() {
		0 => format!("{endpoint}:{DEFAULT_TLS_PORT}"),
		1 => endpoint.to_string(),
		// bare IPv6 address
		_ => format!("[{endpoint}]:{DEFAULT_TLS_PORT}"),
	}
}

/// Host portion of a normalized endpoint, for use as the SNI name.
fn endpoint_host(endpoint: &str) -> &str {
	if let Some(rest) = endpoint.strip_prefix('[') {
		if let Some(end) = rest.find(']') {
			return &rest[..end];
		}
	}
	endpoint.rsplit_once(':').map_or(endpoint, |(host, _)| host)
}

/// Open a TLS connection to `endpoint` without validating the chain and
/// return the first (leaf) certificate the peer presents.
///
/// # Errors
///
/// Fails if the endpoint host is invalid, the dial or handshake fails or
/// exceeds [`DIAL_TIMEOUT`], or the peer presents zero certificates.
pub async fn fetch_peer_certificate(
	endpoint: &str,
) -> Result<CertificateDer<'static>, ProbeError> {
	let endpoint = normalize_endpoint(endpoint);
	let host = endpoint_host(&endpoint);
	let server_name = ServerName::try_from(host.to_string())
		.map_err(|_| ProbeError::InvalidEndpoint(host.to_string()))?;

	let connector = tokio_rustls::TlsConnector::from(no_validation_config());

	let handshake = async {
		let tcp = TcpStream::connect(&endpoint)
			.await
			.map_err(|e| ProbeError::Connect(e.to_string()))?;
		connector
			.connect(server_name, tcp)
			.await
			.map_err(|e| ProbeError::Connect(e.to_string()))
	};
	let tls = tokio::time::timeout(DIAL_TIMEOUT, handshake)
		.await
		.map_err(|_| ProbeError::Timeout)??;

	let (_, conn) = tls.get_ref();
	let leaf = conn
		.peer_certificates()
		.and_then(|certs| certs.first())
		.ok_or(ProbeError::NoPeerCertificate)?;

	// the connection drops right here; the data channel is never used
	Ok(leaf.clone().into_owned())
}

/// Describe the extensions of a DER-encoded certificate in their original
/// order. No sorting, no deduplication, unknown identifiers kept.
///
/// # Errors
///
/// Fails if the certificate is not parseable DER.
pub fn describe_extensions(
	der: &[u8],
) -> Result<Vec<ExtensionDescriptor>, ProbeError> {
	let cert = Certificate::from_der(der)
		.map_err(|e| ProbeError::Certificate(e.to_string()))?;
	Ok(extension_descriptors(&cert))
}

/// Full summary of a DER-encoded certificate.
///
/// # Errors
///
/// Fails if the certificate is not parseable DER.
pub fn summarize_certificate(
	der: &[u8],
) -> Result<CertificateSummary, ProbeError> {
	let cert = Certificate::from_der(der)
		.map_err(|e| ProbeError::Certificate(e.to_string()))?;
	let validity = &cert.tbs_certificate.validity;

	Ok(CertificateSummary {
		subject: cert.tbs_certificate.subject.to_string(),
		issuer: cert.tbs_certificate.issuer.to_string(),
		not_before: time_string(&validity.not_before),
		not_after: time_string(&validity.not_after),
		extensions: extension_descriptors(&cert),
	})
}

fn extension_descriptors(cert: &Certificate) -> Vec<ExtensionDescriptor> {
	cert.tbs_certificate
		.extensions
		.iter()
		.flatten()
		.map(|ext| {
			let oid = ext.extn_id.to_string();
			let name = vendor_label(&oid).map(String::from);
			ExtensionDescriptor {
				critical: ext.critical,
				size: ext.extn_value.as_bytes().len(),
				oid,
				name,
			}
		})
		.collect()
}

fn vendor_label(oid: &str) -> Option<&'static str> {
	KNOWN_VENDOR_OIDS
		.iter()
		.find(|(known, _)| *known == oid)
		.map(|(_, label)| *label)
}

fn time_string(time: &Time) -> String {
	match time {
		Time::UtcTime(t) => t.to_date_time().to_string(),
		Time::GeneralTime(t) => t.to_date_time().to_string(),
	}
}

fn no_validation_config() -> Arc<rustls::ClientConfig> {
	let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
	let config = rustls::ClientConfig::builder_with_provider(provider.clone())
		.with_safe_default_protocol_versions()
		.expect("default protocol versions are supported. qed.")
		.dangerous()
		.with_custom_certificate_verifier(Arc::new(danger::NoVerification(
			provider,
		)))
		.with_no_client_auth();
	Arc::new(config)
}

mod danger {
	//! Verifier that accepts any chain. Only `fetch_peer_certificate` may
	//! use this; the connection exists solely to read the certificate the
	//! peer presents and is never trusted for data exchange.

	use std::sync::Arc;

	use rustls::{
		client::danger::{
			HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
		},
		crypto::CryptoProvider,
		pki_types::{CertificateDer, ServerName, UnixTime},
		DigitallySignedStruct, Error, SignatureScheme,
	};

	#[derive(Debug)]
	pub(super) struct NoVerification(pub(super) Arc<CryptoProvider>);

	impl ServerCertVerifier for NoVerification {
		fn verify_server_cert(
			&self,
			_end_entity: &CertificateDer<'_>,
			_intermediates: &[CertificateDer<'_>],
			_server_name: &ServerName<'_>,
			_ocsp_response: &[u8],
			_now: UnixTime,
		) -> Result<ServerCertVerified, Error> {
			Ok(ServerCertVerified::assertion())
		}

		fn verify_tls12_signature(
			&self,
			_message: &[u8],
			_cert: &CertificateDer<'_>,
			_dss: &DigitallySignedStruct,
		) -> Result<HandshakeSignatureValid, Error> {
			Ok(HandshakeSignatureValid::assertion())
		}

		fn verify_tls13_signature(
			&self,
			_message: &[u8],
			_cert: &CertificateDer<'_>,
			_dss: &DigitallySignedStruct,
		) -> Result<HandshakeSignatureValid, Error> {
			Ok(HandshakeSignatureValid::assertion())
		}

		fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
			self.0.signature_verification_algorithms.supported_schemes()
		}
	}
}
