//! Attestation gateway host. The gateway is an HTTP server whose handlers
//! proxy into external attestation libraries: quote operations read the
//! request body through `agw_core::body`, RA-TLS operations dial out
//! through `agw_core::probe`, and every externally-backed outcome feeds
//! the shared `agw_core::breaker` so a persistently failing dependency
//! restarts the whole process.
//!
//! # IMPLEMENTERS NOTE
//!
//! The HTTP server is implemented using the `axum` framework. These
//! resources can help familiarize you with the abstractions:
//!
//! * Request body extractors: <https://github.com/tokio-rs/axum/blob/main/axum/src/docs/extract.md/>
//! * Response: <https://github.com/tokio-rs/axum/blob/main/axum/src/docs/response.md/>
//! * Responding with error: <https://github.com/tokio-rs/axum/blob/main/axum/src/docs/error_handling.md/>

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};

use agw_core::{body::BodyError, probe::ProbeError, verifier::VerifierError};

pub mod config;
pub mod host;

/// Crate version of the gateway binary, sourced from `Cargo.toml`.
pub const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) const HOST_HEALTH: &str = "/host-health";
pub(crate) const QUOTE_PARSE: &str = "/quote-ops/parse";
pub(crate) const QUOTE_VERIFY: &str = "/quote-ops/verify";
pub(crate) const QUOTE_COLLATERAL: &str = "/quote-ops/collateral";
pub(crate) const QUOTE_PCK: &str = "/quote-ops/pck";
pub(crate) const RATLS_VERIFY: &str = "/ratls/verify";
pub(crate) const RATLS_CERT: &str = "/ratls/cert";

/// Body of a 4xx or 5xx response.
#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub struct JsonError {
	/// Error message.
	pub error: String,
}

/// Error that maps onto the gateway's client-facing failure classes and
/// implements [`IntoResponse`] so it can be returned from handlers without
/// getting silently dropped.
#[derive(Debug)]
pub enum Error {
	/// 400 - the request itself is malformed (body, query parameters).
	BadRequest(String),
	/// 422 - the payload does not decode into a valid quote/certificate,
	/// or verification failed.
	Unprocessable(String),
	/// 502 - an upstream dependency failed.
	BadGateway(String),
	/// 501 - no attestation backend compiled into this build.
	BackendUnavailable,
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::BadRequest(e)
			| Self::Unprocessable(e)
			| Self::BadGateway(e) => write!(f, "{e}"),
			Self::BackendUnavailable => {
				write!(f, "no attestation backend compiled into this build")
			}
		}
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let status = match self {
			Self::BadRequest(_) => StatusCode::BAD_REQUEST,
			Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
			Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
			Self::BackendUnavailable => StatusCode::NOT_IMPLEMENTED,
		};
		let body = JsonError { error: self.to_string() };
		eprintln!("agw_host error: {body:?}");

		(status, Json(body)).into_response()
	}
}

impl From<BodyError> for Error {
	fn from(err: BodyError) -> Self {
		// every body-reader failure is the client's fault
		Self::BadRequest(err.to_string())
	}
}

impl From<VerifierError> for Error {
	fn from(err: VerifierError) -> Self {
		match err {
			VerifierError::UnparsableQuote(_)
			| VerifierError::MissingCertChain
			| VerifierError::PckExtension(_)
			| VerifierError::VerificationFailed(_) => {
				Self::Unprocessable(err.to_string())
			}
			VerifierError::CollateralFetch(_) => {
				Self::BadGateway(err.to_string())
			}
		}
	}
}

impl From<ProbeError> for Error {
	fn from(err: ProbeError) -> Self {
		match err {
			ProbeError::InvalidEndpoint(_) => {
				Self::BadRequest(err.to_string())
			}
			ProbeError::Timeout
			| ProbeError::Connect(_)
			| ProbeError::NoPeerCertificate
			| ProbeError::Certificate(_) => Self::BadGateway(err.to_string()),
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn body_errors_are_bad_requests() {
		let err = Error::from(BodyError::MissingFilePart);
		assert!(matches!(err, Error::BadRequest(_)));
	}

	#[test]
	fn collateral_fetch_failures_are_bad_gateway() {
		let err = Error::from(VerifierError::CollateralFetch("x".to_string()));
		assert!(matches!(err, Error::BadGateway(_)));
	}

	#[test]
	fn unparsable_quotes_are_unprocessable() {
		let err = Error::from(VerifierError::UnparsableQuote("x".to_string()));
		assert!(matches!(err, Error::Unprocessable(_)));
	}

	#[test]
	fn invalid_probe_endpoints_are_bad_requests() {
		let err = Error::from(ProbeError::InvalidEndpoint("x".to_string()));
		assert!(matches!(err, Error::BadRequest(_)));
		let err = Error::from(ProbeError::NoPeerCertificate);
		assert!(matches!(err, Error::BadGateway(_)));
	}
}
