//! Utilities for encoding and decoding hex strings.

use std::fmt;

/// Error type for decoding hex strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HexError {
	/// Could not decode the input because it was an odd length.
	OddLength,
	/// There was a byte that was not valid hex i.e not in `0..=9`, `a..=f`,
	/// `A..=F`.
	NotHexChar(u8),
}

impl fmt::Display for HexError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::OddLength => write!(f, "odd number of hex characters"),
			Self::NotHexChar(b) => {
				write!(f, "invalid hex character 0x{b:02x}")
			}
		}
	}
}

fn nibble(b: u8) -> Result<u8, HexError> {
	match b {
		b'0'..=b'9' => Ok(b - b'0'),
		b'a'..=b'f' => Ok(b - b'a' + 10),
		b'A'..=b'F' => Ok(b - b'A' + 10),
		other => Err(HexError::NotHexChar(other)),
	}
}

/// Decode bytes from a hex encoded string.
///
/// Surrounding whitespace is trimmed and an optional `0x`/`0X` prefix is
/// stripped before decoding. Both character cases are accepted.
///
/// # Errors
///
/// - if the input is an odd length
/// - if a character is invalid hex
pub fn decode(raw: &str) -> Result<Vec<u8>, HexError> {
	let trimmed = raw.trim();
	let stripped = trimmed
		.strip_prefix("0x")
		.or_else(|| trimmed.strip_prefix("0X"))
		.unwrap_or(trimmed);

	let bytes = stripped.as_bytes();
	if bytes.len() % 2 != 0 {
		return Err(HexError::OddLength);
	}

	let mut decoded = Vec::with_capacity(bytes.len() / 2);
	for pair in bytes.chunks_exact(2) {
		decoded.push(nibble(pair[0])? << 4 | nibble(pair[1])?);
	}
	Ok(decoded)
}

/// Encode a byte slice to a hex string. Always encodes with lowercase
/// characters.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
	const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

	let mut encoded = String::with_capacity(bytes.len() * 2);
	for b in bytes {
		encoded.push(HEX_CHARS[(b >> 4) as usize] as char);
		encoded.push(HEX_CHARS[(b & 0x0f) as usize] as char);
	}
	encoded
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn decode_works_with_and_without_prefix() {
		let expected = vec![0xde, 0xad, 0xbe, 0xef];
		assert_eq!(decode("deadbeef").unwrap(), expected);
		assert_eq!(decode("0xdeadbeef").unwrap(), expected);
		assert_eq!(decode("0XDEADBEEF").unwrap(), expected);
		assert_eq!(decode("DeAdBeEf").unwrap(), expected);
	}

	#[test]
	fn decode_trims_whitespace() {
		assert_eq!(decode("  0xdeadbeef\n").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
	}

	#[test]
	fn decode_empty_is_empty() {
		assert_eq!(decode("").unwrap(), Vec::<u8>::new());
		assert_eq!(decode("0x").unwrap(), Vec::<u8>::new());
	}

	#[test]
	fn decode_rejects_odd_length() {
		assert_eq!(decode("abc").unwrap_err(), HexError::OddLength);
		assert_eq!(decode("0xa").unwrap_err(), HexError::OddLength);
	}

	#[test]
	fn decode_rejects_non_hex() {
		assert_eq!(decode("zz").unwrap_err(), HexError::NotHexChar(b'z'));
		// multi byte characters are rejected, not silently skipped
		assert!(matches!(decode("é!").unwrap_err(), HexError::NotHexChar(_)));
	}

	#[test]
	fn encode_round_trips() {
		let bytes: Vec<u8> = (0..=255).collect();
		assert_eq!(decode(&encode(&bytes)).unwrap(), bytes);
	}

	#[test]
	fn encode_is_lowercase() {
		assert_eq!(encode(&[0xAB, 0xCD]), "abcd");
	}
}
