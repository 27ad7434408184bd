//! Narrow call contract into the attestation libraries.
//!
//! Quote parsing, collateral fetching, quote verification and RA-TLS
//! certificate verification are performed by external libraries that this
//! gateway only orchestrates. Handlers reach them through
//! [`AttestationVerifier`]; a production backend is wired in by the binary
//! that embeds this crate, while the `mock` feature provides a canned
//! backend for tests and local development.
//!
//! Implementations may block on network or device I/O; callers drive them
//! through `tokio::task::spawn_blocking`.

use std::fmt;

use serde_json::Value;

/// Opaque collateral payload, cached and returned to clients verbatim.
pub type Collateral = Value;

/// Identity and payload of a successfully parsed quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuote {
	/// Platform identifier (FMSPC) collateral is keyed on.
	pub fmspc: String,
	/// Quote type tag, e.g. `SGX` or `TDX`.
	pub quote_type: String,
	/// CA tag forwarded when requesting collateral.
	pub ca: String,
	/// PEM certificate chain embedded in the quote, when present.
	pub cert_chain_pem: Option<String>,
	/// Full parsed quote structure, returned to clients as-is.
	pub body: Value,
}

impl ParsedQuote {
	/// Whether collateral should be requested through the SGX path.
	#[must_use]
	pub fn is_sgx(&self) -> bool {
		self.quote_type == "SGX"
	}
}

/// Outcome of RA-TLS certificate verification.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RaTlsReport {
	/// TCB status, e.g. `UpToDate`.
	pub status: String,
	/// Security advisories affecting the platform.
	pub advisory_ids: Vec<String>,
	/// Quote type tag of the embedded quote.
	pub quote_type: String,
	/// Report type tag, e.g. `TD10`.
	pub report_type: String,
	/// RTMR measurement registers, present for TD reports only.
	pub rtmrs: Option<[Vec<u8>; 4]>,
}

/// Errors surfaced by collaborator calls, split along the boundary the
/// HTTP layer cares about: payloads that do not decode versus upstream
/// dependencies that failed.
#[derive(Debug)]
pub enum VerifierError {
	/// The bytes did not decode into a valid quote structure.
	UnparsableQuote(String),
	/// The quote carries no embedded certificate chain.
	MissingCertChain,
	/// The PCK extension could not be decoded from the chain.
	PckExtension(String),
	/// A remote dependency (the collateral service) failed.
	CollateralFetch(String),
	/// The quote or certificate failed verification.
	VerificationFailed(String),
}

impl fmt::Display for VerifierError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::UnparsableQuote(e) => {
				write!(f, "failed to parse quote: {e}")
			}
			Self::MissingCertChain => {
				write!(f, "quote has no embedded certificate chain")
			}
			Self::PckExtension(e) => {
				write!(f, "failed to parse PCK extension: {e}")
			}
			Self::CollateralFetch(e) => {
				write!(f, "failed to fetch collateral: {e}")
			}
			Self::VerificationFailed(e) => {
				write!(f, "verification failed: {e}")
			}
		}
	}
}

/// Call contract into the attestation libraries. All methods are
/// all-or-nothing: no partial results, no internal retries.
pub trait AttestationVerifier: Send + Sync {
	/// Parse raw quote bytes into a structured quote.
	fn parse(&self, raw_quote: &[u8]) -> Result<ParsedQuote, VerifierError>;

	/// Fetch collateral for a parsed quote from the service at `pccs_url`.
	fn fetch_collateral(
		&self,
		pccs_url: &str,
		quote: &ParsedQuote,
	) -> Result<Collateral, VerifierError>;

	/// Parse, fetch collateral and verify in one call.
	fn verify(
		&self,
		raw_quote: &[u8],
		pccs_url: &str,
	) -> Result<Value, VerifierError>;

	/// Decode the PCK certificate extension from a quote's embedded chain.
	fn pck_extension(
		&self,
		cert_chain_pem: &str,
	) -> Result<Value, VerifierError>;

	/// RA-TLS verify a peer certificate (DER encoded).
	fn verify_ratls_cert(
		&self,
		cert_der: &[u8],
		pccs_url: &str,
	) -> Result<RaTlsReport, VerifierError>;
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
	//! Canned attestation backend. Never use in production.

	use std::sync::atomic::{AtomicUsize, Ordering};

	use serde_json::json;

	use super::{
		AttestationVerifier, Collateral, ParsedQuote, RaTlsReport,
		VerifierError,
	};

	/// Platform identifier reported for every parsed quote.
	pub const MOCK_FMSPC: &str = "ABCD1234";
	/// Quote type reported for every parsed quote.
	pub const MOCK_QUOTE_TYPE: &str = "TDX";
	/// Placeholder chain handed out when `with_cert_chain` is set.
	pub const MOCK_CERT_CHAIN_PEM: &str =
		"-----BEGIN CERTIFICATE-----\nbW9jaw==\n-----END CERTIFICATE-----\n";

	/// Backend returning fixed results. Collateral fetches are counted so
	/// tests can assert cache behavior, and failure modes can be toggled.
	pub struct MockVerifier {
		collateral_fetches: AtomicUsize,
		fail_collateral: bool,
		with_cert_chain: bool,
	}

	impl Default for MockVerifier {
		fn default() -> Self {
			Self {
				collateral_fetches: AtomicUsize::new(0),
				fail_collateral: false,
				with_cert_chain: true,
			}
		}
	}

	impl MockVerifier {
		#[must_use]
		pub fn new() -> Self {
			Self::default()
		}

		/// Make every collateral fetch fail as an upstream error.
		#[must_use]
		pub fn fail_collateral(mut self) -> Self {
			self.fail_collateral = true;
			self
		}

		/// Parse quotes without an embedded certificate chain.
		#[must_use]
		pub fn without_cert_chain(mut self) -> Self {
			self.with_cert_chain = false;
			self
		}

		/// Number of collateral fetches that reached this backend (cache
		/// hits never do).
		#[must_use]
		pub fn collateral_fetch_count(&self) -> usize {
			self.collateral_fetches.load(Ordering::Relaxed)
		}
	}

	impl AttestationVerifier for MockVerifier {
		fn parse(
			&self,
			raw_quote: &[u8],
		) -> Result<ParsedQuote, VerifierError> {
			if raw_quote.is_empty() {
				return Err(VerifierError::UnparsableQuote(
					"empty quote".to_string(),
				));
			}
			Ok(ParsedQuote {
				fmspc: MOCK_FMSPC.to_string(),
				quote_type: MOCK_QUOTE_TYPE.to_string(),
				ca: "processor".to_string(),
				cert_chain_pem: self
					.with_cert_chain
					.then(|| MOCK_CERT_CHAIN_PEM.to_string()),
				body: json!({
					"fmspc": MOCK_FMSPC,
					"quote_type": MOCK_QUOTE_TYPE,
					"raw_len": raw_quote.len(),
				}),
			})
		}

		fn fetch_collateral(
			&self,
			pccs_url: &str,
			quote: &ParsedQuote,
		) -> Result<Collateral, VerifierError> {
			if self.fail_collateral {
				return Err(VerifierError::CollateralFetch(
					"mock collateral failure".to_string(),
				));
			}
			self.collateral_fetches.fetch_add(1, Ordering::Relaxed);
			Ok(json!({
				"pccs_url": pccs_url,
				"fmspc": quote.fmspc,
				"tcb_info": "mock-tcb-info",
			}))
		}

		fn verify(
			&self,
			raw_quote: &[u8],
			pccs_url: &str,
		) -> Result<serde_json::Value, VerifierError> {
			let quote = self.parse(raw_quote)?;
			if self.fail_collateral {
				return Err(VerifierError::CollateralFetch(
					"mock collateral failure".to_string(),
				));
			}
			Ok(json!({
				"status": "UpToDate",
				"advisory_ids": [],
				"fmspc": quote.fmspc,
				"pccs_url": pccs_url,
			}))
		}

		fn pck_extension(
			&self,
			cert_chain_pem: &str,
		) -> Result<serde_json::Value, VerifierError> {
			if cert_chain_pem != MOCK_CERT_CHAIN_PEM {
				return Err(VerifierError::PckExtension(
					"unexpected chain".to_string(),
				));
			}
			Ok(json!({ "fmspc": MOCK_FMSPC, "pcesvn": 11 }))
		}

		fn verify_ratls_cert(
			&self,
			cert_der: &[u8],
			_pccs_url: &str,
		) -> Result<RaTlsReport, VerifierError> {
			if cert_der.is_empty() {
				return Err(VerifierError::VerificationFailed(
					"empty certificate".to_string(),
				));
			}
			Ok(RaTlsReport {
				status: "UpToDate".to_string(),
				advisory_ids: Vec::new(),
				quote_type: MOCK_QUOTE_TYPE.to_string(),
				report_type: "TD10".to_string(),
				rtmrs: Some([
					vec![0x00; 48],
					vec![0x11; 48],
					vec![0x22; 48],
					vec![0x33; 48],
				]),
			})
		}
	}
}

#[cfg(test)]
mod test {
	use super::{mock::MockVerifier, *};

	#[test]
	fn mock_parse_reports_fixed_identity() {
		let verifier = MockVerifier::new();
		let quote = verifier.parse(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
		assert_eq!(quote.fmspc, "ABCD1234");
		assert_eq!(quote.quote_type, "TDX");
		assert!(!quote.is_sgx());
		assert_eq!(quote.body["raw_len"], 4);
	}

	#[test]
	fn mock_parse_rejects_empty_quotes() {
		let verifier = MockVerifier::new();
		assert!(matches!(
			verifier.parse(&[]).unwrap_err(),
			VerifierError::UnparsableQuote(_)
		));
	}

	#[test]
	fn mock_counts_collateral_fetches() {
		let verifier = MockVerifier::new();
		let quote = verifier.parse(b"q").unwrap();
		verifier.fetch_collateral("https://pccs.test", &quote).unwrap();
		verifier.fetch_collateral("https://pccs.test", &quote).unwrap();
		assert_eq!(verifier.collateral_fetch_count(), 2);
	}

	#[test]
	fn mock_collateral_failure_is_an_upstream_error() {
		let verifier = MockVerifier::new().fail_collateral();
		let quote = verifier.parse(b"q").unwrap();
		assert!(matches!(
			verifier.fetch_collateral("https://pccs.test", &quote),
			Err(VerifierError::CollateralFetch(_))
		));
		assert_eq!(verifier.collateral_fetch_count(), 0);
	}
}
