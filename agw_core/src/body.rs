//! Request-body ingestion for attestation quotes.
//!
//! A quote can arrive three ways: a multipart form upload carrying a part
//! named `file`, a JSON object carrying a hex string, or the raw binary
//! body itself. Negotiation is driven by the declared content type and the
//! raw binary branch is the fallback, so `application/octet-stream` and
//! unrecognized content types keep working.
//!
//! The size cap is checked before any content-specific parsing so an
//! oversized body fails the same way for every encoding. The HTTP layer
//! additionally bounds the body stream while it is being read; see
//! `agw_host`.

use bytes::Bytes;

use crate::hex::{self, HexError};

/// Hard ceiling on the size of an inbound quote body (10 MiB).
pub const MAX_QUOTE_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Name of the multipart form part that carries the quote bytes.
const MULTIPART_QUOTE_PART: &str = "file";

/// Errors produced while extracting quote bytes from a request body. Every
/// variant is the client's fault and maps to a 400-class response.
#[derive(Debug)]
pub enum BodyError {
	/// The body exceeds [`MAX_QUOTE_BODY_BYTES`].
	OversizedBody(usize),
	/// The multipart payload could not be parsed.
	Multipart(String),
	/// No part named `file` was present in the multipart payload.
	MissingFilePart,
	/// The JSON body could not be parsed into `{"hex": "..."}`.
	Json(String),
	/// The `hex` field did not decode as hexadecimal.
	Hex(HexError),
}

impl std::fmt::Display for BodyError {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::OversizedBody(size) => write!(
				f,
				"body of {size} bytes exceeds the {MAX_QUOTE_BODY_BYTES} byte limit"
			),
			Self::Multipart(e) => write!(f, "invalid multipart payload: {e}"),
			Self::MissingFilePart => {
				write!(f, "multipart payload has no part named '{MULTIPART_QUOTE_PART}'")
			}
			Self::Json(e) => write!(f, "invalid json body: {e}"),
			Self::Hex(e) => write!(f, "invalid hex in json body: {e}"),
		}
	}
}

impl From<HexError> for BodyError {
	fn from(err: HexError) -> Self {
		Self::Hex(err)
	}
}

impl From<multer::Error> for BodyError {
	fn from(err: multer::Error) -> Self {
		Self::Multipart(err.to_string())
	}
}

/// Body encodings understood by [`read_quote`]. Negotiation walks the
/// variants in declaration order and the first matching one wins; adding a
/// new format means adding a variant and a predicate, not growing a
/// conditional chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteEncoding {
	Multipart,
	JsonHex,
	Binary,
}

impl QuoteEncoding {
	fn negotiate(content_type: Option<&str>) -> Self {
		let ct = content_type.unwrap_or_default();
		if ct.starts_with("multipart/form-data") {
			Self::Multipart
		} else if ct.starts_with("application/json") {
			Self::JsonHex
		} else {
			// raw binary fallback, also serves application/octet-stream
			Self::Binary
		}
	}
}

#[derive(serde::Deserialize)]
struct HexBody {
	hex: String,
}

/// Extract the raw quote bytes from a fully read request body.
///
/// All-or-nothing: on success the entire quote is in memory, on failure no
/// partial reads are exposed.
///
/// # Errors
///
/// See [`BodyError`]; every failure is a client-fault (bad request) error.
pub async fn read_quote(
	content_type: Option<&str>,
	body: Bytes,
) -> Result<Vec<u8>, BodyError> {
	if body.len() > MAX_QUOTE_BODY_BYTES {
		return Err(BodyError::OversizedBody(body.len()));
	}

	match QuoteEncoding::negotiate(content_type) {
		QuoteEncoding::Multipart => {
			let boundary =
				multer::parse_boundary(content_type.unwrap_or_default())?;
			read_multipart_quote(boundary, body).await
		}
		QuoteEncoding::JsonHex => {
			let parsed: HexBody = serde_json::from_slice(&body)
				.map_err(|e| BodyError::Json(e.to_string()))?;
			Ok(hex::decode(&parsed.hex)?)
		}
		QuoteEncoding::Binary => Ok(body.to_vec()),
	}
}

async fn read_multipart_quote(
	boundary: String,
	body: Bytes,
) -> Result<Vec<u8>, BodyError> {
	let stream = futures_util::stream::once(async move {
		Ok::<Bytes, std::convert::Infallible>(body)
	});
	let mut multipart = multer::Multipart::new(stream, boundary);

	while let Some(field) = multipart.next_field().await? {
		if field.name() == Some(MULTIPART_QUOTE_PART) {
			return Ok(field.bytes().await?.to_vec());
		}
	}
	Err(BodyError::MissingFilePart)
}
