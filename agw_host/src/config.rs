//! Environment configuration for the gateway process, read once at start
//! and immutable afterwards.

use std::env;

use agw_core::breaker::DEFAULT_FAILURE_THRESHOLD;

/// Port the gateway listens on when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 8080;

/// Collateral service used when neither the environment nor the request
/// supplies one.
pub const DEFAULT_PCCS_URL: &str =
	"https://pccs.phala.network/tdx/certification/v4";

/// Gateway configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
	/// Listening port (`PORT`).
	pub port: u16,
	/// Consecutive-failure threshold for the health breaker
	/// (`FAILURE_THRESHOLD`), minimum 1.
	pub failure_threshold: u32,
	/// Default collateral-service base URL (`PCCS_URL`).
	pub pccs_url: String,
}

impl Config {
	/// Read configuration from the environment. Missing, unparsable or
	/// non-positive values fall back to the defaults rather than failing
	/// startup.
	#[must_use]
	pub fn from_env() -> Self {
		Self::from_lookup(|key| env::var(key).ok())
	}

	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
		let failure_threshold = lookup("FAILURE_THRESHOLD")
			.and_then(|v| v.parse::<u32>().ok())
			.filter(|n| *n > 0)
			.unwrap_or(DEFAULT_FAILURE_THRESHOLD);

		let port = lookup("PORT")
			.and_then(|v| v.parse::<u16>().ok())
			.unwrap_or(DEFAULT_PORT);

		let pccs_url = lookup("PCCS_URL")
			.unwrap_or_else(|| DEFAULT_PCCS_URL.to_string());

		Self { port, failure_threshold, pccs_url }
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn defaults_apply_when_nothing_is_set() {
		let config = Config::from_lookup(|_| None);
		assert_eq!(config.port, DEFAULT_PORT);
		assert_eq!(config.failure_threshold, DEFAULT_FAILURE_THRESHOLD);
		assert_eq!(config.pccs_url, DEFAULT_PCCS_URL);
	}

	#[test]
	fn values_are_read_from_the_environment() {
		let config = Config::from_lookup(|key| match key {
			"FAILURE_THRESHOLD" => Some("3".to_string()),
			"PORT" => Some("9999".to_string()),
			"PCCS_URL" => Some("https://pccs.example".to_string()),
			_ => None,
		});
		assert_eq!(config.port, 9999);
		assert_eq!(config.failure_threshold, 3);
		assert_eq!(config.pccs_url, "https://pccs.example");
	}

	#[test]
	fn invalid_threshold_falls_back_to_default() {
		for bad in ["0", "-4", "ten", ""] {
			let config = Config::from_lookup(|key| {
				(key == "FAILURE_THRESHOLD").then(|| bad.to_string())
			});
			assert_eq!(
				config.failure_threshold, DEFAULT_FAILURE_THRESHOLD,
				"input: {bad:?}"
			);
		}
	}

	#[test]
	fn invalid_port_falls_back_to_default() {
		let config = Config::from_lookup(|key| {
			(key == "PORT").then(|| "not-a-port".to_string())
		});
		assert_eq!(config.port, DEFAULT_PORT);
	}
}
