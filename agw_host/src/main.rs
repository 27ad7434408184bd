//! Attestation gateway binary entry point.

use agw_host::{config::Config, host::GatewayServer};

#[tokio::main]
async fn main() {
	let config = Config::from_env();

	// The production attestation backend is wired in by downstream builds.
	// The `mock` feature runs the gateway against the canned backend for
	// local development:
	// ```
	// cargo run --features mock
	// ```
	#[cfg(feature = "mock")]
	let verifier = Some(std::sync::Arc::new(
		agw_core::verifier::mock::MockVerifier::new(),
	)
		as std::sync::Arc<dyn agw_core::verifier::AttestationVerifier>);
	#[cfg(not(feature = "mock"))]
	let verifier = None;

	GatewayServer::new(config, verifier).serve().await;
}
